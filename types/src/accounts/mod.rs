//! Ledger account records for the skirmish program.
//!
//! Each record decodes from the program's fixed little-endian layout: an
//! 8-byte discriminator (skipped unconditionally), fixed-width fields in
//! declared order, and `u32`-LE length-prefixed lists.

mod constants;
mod game;
mod player;
mod round;

pub use constants::*;
pub use game::Game;
pub use player::{Player, RoundHistoryEntry};
pub use round::{Round, RoundState};

use serde::Serialize;

use crate::codec;

/// Semantic kind of a subscribed account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum AccountKind {
    Game,
    Round,
    Player,
}

/// A decoded account record of any kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum AccountRecord {
    Game(Game),
    Round(Round),
    Player(Player),
}

impl AccountRecord {
    /// Decode raw account bytes as the given kind.
    pub fn decode(kind: AccountKind, bytes: &[u8]) -> Result<Self, codec::Error> {
        match kind {
            AccountKind::Game => Game::decode(bytes).map(Self::Game),
            AccountKind::Round => Round::decode(bytes).map(Self::Round),
            AccountKind::Player => Player::decode(bytes).map(Self::Player),
        }
    }

    pub fn kind(&self) -> AccountKind {
        match self {
            Self::Game(_) => AccountKind::Game,
            Self::Round(_) => AccountKind::Round,
            Self::Player(_) => AccountKind::Player,
        }
    }
}
