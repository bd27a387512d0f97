use bytes::BufMut;
use serde::Serialize;

use super::DISCRIMINATOR_LEN;
use crate::codec::{self, put_list, Cursor};
use crate::instruction::discriminator;
use crate::{Address, IdToken};

/// Top-level game registry account.
///
/// Layout: discriminator, id token, capacity limits, the two round-id lists,
/// operator and token-mint addresses, version byte. The lists are the only
/// variable-length regions; their declared lengths never exceed the capacity
/// limits carried in the same record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Game {
    pub id: IdToken,
    pub max_active_rounds: u8,
    pub max_completed_rounds: u8,
    pub active_rounds: Vec<IdToken>,
    pub completed_rounds: Vec<IdToken>,
    pub operator: Address,
    pub token_mint: Address,
    pub version: u8,
}

impl Game {
    /// Encoded size with both lists empty.
    pub const MIN_LEN: usize =
        DISCRIMINATOR_LEN + IdToken::LEN + 1 + 1 + 4 + 4 + Address::LEN + Address::LEN + 1;

    pub fn discriminator() -> [u8; 8] {
        discriminator("account", "Game")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, codec::Error> {
        let mut c = Cursor::new(bytes);
        c.skip("discriminator", DISCRIMINATOR_LEN)?;
        let id = c.id_token("id")?;
        let max_active_rounds = c.u8("max_active_rounds")?;
        let max_completed_rounds = c.u8("max_completed_rounds")?;
        let active_rounds = c.list("active_rounds", max_active_rounds as usize, |c| {
            c.id_token("active_rounds")
        })?;
        let completed_rounds = c.list("completed_rounds", max_completed_rounds as usize, |c| {
            c.id_token("completed_rounds")
        })?;
        Ok(Self {
            id,
            max_active_rounds,
            max_completed_rounds,
            active_rounds,
            completed_rounds,
            operator: c.address("operator")?,
            token_mint: c.address("token_mint")?,
            version: c.u8("version")?,
        })
    }

    /// Encode mirror of [`Game::decode`], used to build fixtures.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            Self::MIN_LEN + (self.active_rounds.len() + self.completed_rounds.len()) * IdToken::LEN,
        );
        buf.put_slice(&Self::discriminator());
        buf.put_slice(self.id.as_bytes());
        buf.put_u8(self.max_active_rounds);
        buf.put_u8(self.max_completed_rounds);
        put_list(&mut buf, &self.active_rounds, |buf, id| {
            buf.put_slice(id.as_bytes())
        });
        put_list(&mut buf, &self.completed_rounds, |buf, id| {
            buf.put_slice(id.as_bytes())
        });
        buf.put_slice(self.operator.as_bytes());
        buf.put_slice(self.token_mint.as_bytes());
        buf.put_u8(self.version);
        buf
    }
}
