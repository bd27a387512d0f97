use bytes::BufMut;
use serde::Serialize;

use super::{DISCRIMINATOR_LEN, MAX_CURRENT_ROUNDS, MAX_ROUND_HISTORY, PLAYER_RESERVED_LEN};
use crate::codec::{self, put_list, Cursor};
use crate::instruction::discriminator;
use crate::{amount_string, Address, IdToken};

/// One settled round in a player's history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RoundHistoryEntry {
    pub round: IdToken,
    #[serde(with = "amount_string")]
    pub bet: u64,
    #[serde(with = "amount_string")]
    pub payout: u64,
    pub eliminated_turn: u8,
    pub winner: bool,
}

impl RoundHistoryEntry {
    pub const ENCODED_LEN: usize = IdToken::LEN + 8 + 8 + 1 + 1;

    fn decode(c: &mut Cursor<'_>) -> Result<Self, codec::Error> {
        Ok(Self {
            round: c.id_token("history.round")?,
            bet: c.u64_le("history.bet")?,
            payout: c.u64_le("history.payout")?,
            eliminated_turn: c.u8("history.eliminated_turn")?,
            winner: c.u8("history.winner")? != 0,
        })
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_slice(self.round.as_bytes());
        buf.put_u64_le(self.bet);
        buf.put_u64_le(self.payout);
        buf.put_u8(self.eliminated_turn);
        buf.put_u8(self.winner as u8);
    }
}

/// Per-wallet participation record for one game.
///
/// The two lists are bounded by compile-time constants; a length prefix
/// claiming more is clamped on decode rather than trusted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Player {
    pub wallet: Address,
    pub game: IdToken,
    #[serde(with = "amount_string")]
    pub rounds_played: u64,
    #[serde(with = "amount_string")]
    pub total_bet: u64,
    #[serde(with = "amount_string")]
    pub total_payout: u64,
    pub current_rounds: Vec<IdToken>,
    pub history: Vec<RoundHistoryEntry>,
    pub bump: u8,
}

impl Player {
    /// Encoded size with both lists empty.
    pub const MIN_LEN: usize = DISCRIMINATOR_LEN
        + Address::LEN
        + IdToken::LEN
        + 8 // rounds_played
        + 8 // total_bet
        + 8 // total_payout
        + 4 // current_rounds length prefix
        + 4 // history length prefix
        + 1 // bump
        + PLAYER_RESERVED_LEN;

    pub fn discriminator() -> [u8; 8] {
        discriminator("account", "Player")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, codec::Error> {
        let mut c = Cursor::new(bytes);
        c.skip("discriminator", DISCRIMINATOR_LEN)?;
        let wallet = c.address("wallet")?;
        let game = c.id_token("game")?;
        let rounds_played = c.u64_le("rounds_played")?;
        let total_bet = c.u64_le("total_bet")?;
        let total_payout = c.u64_le("total_payout")?;
        let current_rounds = c.list_clamped("current_rounds", MAX_CURRENT_ROUNDS, IdToken::LEN, |c| {
            c.id_token("current_rounds")
        })?;
        let history = c.list_clamped(
            "history",
            MAX_ROUND_HISTORY,
            RoundHistoryEntry::ENCODED_LEN,
            RoundHistoryEntry::decode,
        )?;
        let bump = c.u8("bump")?;
        c.skip("reserved", PLAYER_RESERVED_LEN)?;
        Ok(Self {
            wallet,
            game,
            rounds_played,
            total_bet,
            total_payout,
            current_rounds,
            history,
            bump,
        })
    }

    /// Encode mirror of [`Player::decode`], used to build fixtures.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            Self::MIN_LEN
                + self.current_rounds.len() * IdToken::LEN
                + self.history.len() * RoundHistoryEntry::ENCODED_LEN,
        );
        buf.put_slice(&Self::discriminator());
        buf.put_slice(self.wallet.as_bytes());
        buf.put_slice(self.game.as_bytes());
        buf.put_u64_le(self.rounds_played);
        buf.put_u64_le(self.total_bet);
        buf.put_u64_le(self.total_payout);
        put_list(&mut buf, &self.current_rounds, |buf, id| {
            buf.put_slice(id.as_bytes())
        });
        put_list(&mut buf, &self.history, |buf, entry| entry.encode(buf));
        buf.put_u8(self.bump);
        buf.put_slice(&[0u8; PLAYER_RESERVED_LEN]);
        buf
    }
}
