//! Instruction argument encoding for transactions submitted to the
//! skirmish program.

use bytes::BufMut;
use sha2::{Digest, Sha256};

/// First 8 bytes of SHA-256 over `"<namespace>:<name>"`. Used both for
/// instruction data prefixes (`global` namespace) and account
/// discriminators (`account` namespace).
pub fn discriminator(namespace: &str, name: &str) -> [u8; 8] {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update(b":");
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// Arguments for the program instructions this client submits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstructionArgs {
    /// Register the caller as a player in a game.
    /// Binary: [disc:8]
    CreatePlayer,
    /// Join an open round, staking the entry fee.
    /// Binary: [disc:8] [entryFee:u64 LE]
    JoinRound { entry_fee: u64 },
    /// Claim the payout for a resulted round.
    /// Binary: [disc:8] [roundNumber:u32 LE]
    ClaimPayout { round_number: u32 },
}

impl InstructionArgs {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreatePlayer => "create_player",
            Self::JoinRound { .. } => "join_round",
            Self::ClaimPayout { .. } => "claim_payout",
        }
    }

    /// Serialize to instruction data: discriminator, then fixed-width
    /// little-endian fields in declared order.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        buf.put_slice(&discriminator("global", self.name()));
        match self {
            Self::CreatePlayer => {}
            Self::JoinRound { entry_fee } => buf.put_u64_le(*entry_fee),
            Self::ClaimPayout { round_number } => buf.put_u32_le(*round_number),
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminator_is_stable_and_distinct() {
        let join = discriminator("global", "join_round");
        assert_eq!(join, discriminator("global", "join_round"));
        assert_ne!(join, discriminator("global", "create_player"));
        assert_ne!(join, discriminator("account", "join_round"));
    }

    #[test]
    fn join_round_layout() {
        let data = InstructionArgs::JoinRound { entry_fee: 0x0102 }.encode();
        assert_eq!(data.len(), 16);
        assert_eq!(data[..8], discriminator("global", "join_round"));
        assert_eq!(data[8..], [0x02, 0x01, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn claim_payout_layout() {
        let data = InstructionArgs::ClaimPayout { round_number: 7 }.encode();
        assert_eq!(data.len(), 12);
        assert_eq!(data[8..], [7, 0, 0, 0]);
    }

    #[test]
    fn create_player_is_discriminator_only() {
        let data = InstructionArgs::CreatePlayer.encode();
        assert_eq!(data, discriminator("global", "create_player"));
    }
}
