/// Width of the discriminator prefix on every program account.
pub const DISCRIMINATOR_LEN: usize = 8;

/// Hard cap on a round's player list, independent of the per-round limit.
pub const MAX_ROUND_PLAYERS: usize = 256;

/// Maximum rounds a player may participate in simultaneously.
pub const MAX_CURRENT_ROUNDS: usize = 8;

/// Maximum retained round-history entries per player.
pub const MAX_ROUND_HISTORY: usize = 32;

/// Reserved trailing bytes on the player account, kept for layout growth.
pub const PLAYER_RESERVED_LEN: usize = 7;
