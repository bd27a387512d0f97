use bytes::BufMut;
use serde::Serialize;

use super::{DISCRIMINATOR_LEN, MAX_ROUND_PLAYERS};
use crate::codec::{self, put_list, Cursor};
use crate::instruction::discriminator;
use crate::{amount_string, Address, IdToken};

/// Lifecycle of a round. Ordinals are the on-ledger encoding; transitions
/// only move forward in this order, and `Resulted`/`Closed` accept no
/// further play.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum RoundState {
    Published = 0,
    Started = 1,
    Playing = 2,
    Resulted = 3,
    Closed = 4,
}

impl RoundState {
    pub fn decode(value: u8) -> Result<Self, codec::Error> {
        match value {
            0 => Ok(Self::Published),
            1 => Ok(Self::Started),
            2 => Ok(Self::Playing),
            3 => Ok(Self::Resulted),
            4 => Ok(Self::Closed),
            got => Err(codec::Error::UnknownEnumValue {
                name: "RoundState",
                got,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Published => "Published",
            Self::Started => "Started",
            Self::Playing => "Playing",
            Self::Resulted => "Resulted",
            Self::Closed => "Closed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resulted | Self::Closed)
    }

    /// Monotonic ordering check: a round never moves backwards.
    pub fn can_advance_to(&self, next: RoundState) -> bool {
        (next as u8) > (*self as u8)
    }
}

/// A single playable round within a game.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Round {
    pub id: IdToken,
    pub game: Address,
    pub operator: Address,
    pub max_players: u16,
    pub min_players: u16,
    #[serde(with = "amount_string")]
    pub entry_fee: u64,
    pub total_turns: u8,
    pub state: RoundState,
    pub players: Vec<Address>,
    pub token_mint: Address,
    pub vault: Address,
    pub bump: u8,
}

impl Round {
    /// Encoded size with an empty player list.
    pub const MIN_LEN: usize = DISCRIMINATOR_LEN
        + IdToken::LEN
        + Address::LEN // game
        + Address::LEN // operator
        + 2 // max_players
        + 2 // min_players
        + 8 // entry_fee
        + 1 // total_turns
        + 1 // state
        + 4 // players length prefix
        + Address::LEN // token_mint
        + Address::LEN // vault
        + 1; // bump

    pub fn discriminator() -> [u8; 8] {
        discriminator("account", "Round")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, codec::Error> {
        let mut c = Cursor::new(bytes);
        c.skip("discriminator", DISCRIMINATOR_LEN)?;
        let id = c.id_token("id")?;
        let game = c.address("game")?;
        let operator = c.address("operator")?;
        let max_players = c.u16_le("max_players")?;
        let min_players = c.u16_le("min_players")?;
        let entry_fee = c.u64_le("entry_fee")?;
        let total_turns = c.u8("total_turns")?;
        let state = RoundState::decode(c.u8("state")?)?;
        let player_bound = (max_players as usize).min(MAX_ROUND_PLAYERS);
        let players = c.list("players", player_bound, |c| c.address("players"))?;
        Ok(Self {
            id,
            game,
            operator,
            max_players,
            min_players,
            entry_fee,
            total_turns,
            state,
            players,
            token_mint: c.address("token_mint")?,
            vault: c.address("vault")?,
            bump: c.u8("bump")?,
        })
    }

    /// Encode mirror of [`Round::decode`], used to build fixtures.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::MIN_LEN + self.players.len() * Address::LEN);
        buf.put_slice(&Self::discriminator());
        buf.put_slice(self.id.as_bytes());
        buf.put_slice(self.game.as_bytes());
        buf.put_slice(self.operator.as_bytes());
        buf.put_u16_le(self.max_players);
        buf.put_u16_le(self.min_players);
        buf.put_u64_le(self.entry_fee);
        buf.put_u8(self.total_turns);
        buf.put_u8(self.state as u8);
        put_list(&mut buf, &self.players, |buf, player| {
            buf.put_slice(player.as_bytes())
        });
        buf.put_slice(self.token_mint.as_bytes());
        buf.put_slice(self.vault.as_bytes());
        buf.put_u8(self.bump);
        buf
    }
}
