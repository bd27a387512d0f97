//! Transaction assembly in the ledger's compact wire format.
//!
//! Account ordering and mutability/signer flags per instruction are a fixed
//! contract with the program: the ledger rejects a wrong order silently, so
//! the exact vectors are pinned by tests.

use std::fmt;
use std::str::FromStr;

use skirmish_types::instruction::InstructionArgs;
use skirmish_types::{Address, AddressParseError, IdToken};

use crate::pda;
use crate::{Error, Result};

/// The network's native loader/transfer program.
pub const SYSTEM_PROGRAM_ID: Address = Address::new([0u8; 32]);

const SIGNATURE_LEN: usize = 64;

/// A recent blockhash anchoring a transaction's validity window.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Blockhash([u8; 32]);

impl Blockhash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Blockhash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(&self.0).into_string())
    }
}

impl fmt::Debug for Blockhash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blockhash({self})")
    }
}

impl FromStr for Blockhash {
    type Err = AddressParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|err| AddressParseError::Encoding(err.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|rejected: Vec<u8>| AddressParseError::Length(rejected.len()))?;
        Ok(Self(bytes))
    }
}

/// One account reference in an instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccountMeta {
    pub address: Address,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    pub fn writable(address: Address, is_signer: bool) -> Self {
        Self {
            address,
            is_signer,
            is_writable: true,
        }
    }

    pub fn readonly(address: Address, is_signer: bool) -> Self {
        Self {
            address,
            is_signer,
            is_writable: false,
        }
    }
}

/// An instruction before compilation: target program, ordered account
/// references, and encoded argument data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub program_id: Address,
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

/// An instruction with account references resolved to key-table indices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub account_indices: Vec<u8>,
    pub data: Vec<u8>,
}

/// A compiled message: header, deduplicated key table, blockhash, and
/// compiled instructions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub num_required_signatures: u8,
    pub num_readonly_signed: u8,
    pub num_readonly_unsigned: u8,
    pub account_keys: Vec<Address>,
    pub recent_blockhash: Blockhash,
    pub instructions: Vec<CompiledInstruction>,
}

/// Append a compact-u16 length: 7 bits per byte, little-endian, high bit as
/// continuation flag.
pub fn encode_compact_u16(buf: &mut Vec<u8>, mut value: u16) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            return;
        }
    }
}

/// Decode a compact-u16 from `buf[offset..]`, returning the value and the
/// number of bytes consumed. Used by tests and diagnostic tooling.
pub fn decode_compact_u16(buf: &[u8], offset: usize) -> Option<(u16, usize)> {
    let mut value: u32 = 0;
    for (consumed, byte) in buf.get(offset..)?.iter().take(3).enumerate() {
        value |= u32::from(byte & 0x7f) << (7 * consumed);
        if byte & 0x80 == 0 {
            return u16::try_from(value).ok().map(|v| (v, consumed + 1));
        }
    }
    None
}

impl Message {
    /// Compile instructions against a fee payer and blockhash.
    ///
    /// Key table order: fee payer, writable signers, readonly signers,
    /// writable non-signers, readonly non-signers. Duplicate references are
    /// merged with their flags OR-ed together.
    pub fn compile(
        instructions: &[Instruction],
        fee_payer: &Address,
        recent_blockhash: Blockhash,
    ) -> Result<Self> {
        // Gather every referenced account with merged flags.
        let mut metas: Vec<AccountMeta> = vec![AccountMeta::writable(*fee_payer, true)];
        for instruction in instructions {
            for meta in instruction
                .accounts
                .iter()
                .copied()
                .chain(std::iter::once(AccountMeta::readonly(
                    instruction.program_id,
                    false,
                )))
            {
                match metas.iter_mut().find(|m| m.address == meta.address) {
                    Some(existing) => {
                        existing.is_signer |= meta.is_signer;
                        existing.is_writable |= meta.is_writable;
                    }
                    None => metas.push(meta),
                }
            }
        }

        // Stable partition: the fee payer stays first, then each class in
        // first-reference order.
        let class = |meta: &AccountMeta| match (meta.is_signer, meta.is_writable) {
            (true, true) => 0u8,
            (true, false) => 1,
            (false, true) => 2,
            (false, false) => 3,
        };
        let fee_payer_meta = metas.remove(0);
        metas.sort_by_key(class);
        metas.insert(0, fee_payer_meta);

        if metas.len() > u8::MAX as usize {
            return Err(Error::InvalidArgumentEncoding("too many accounts"));
        }

        let num_required_signatures = metas.iter().filter(|m| m.is_signer).count() as u8;
        let num_readonly_signed = metas
            .iter()
            .filter(|m| m.is_signer && !m.is_writable)
            .count() as u8;
        let num_readonly_unsigned = metas
            .iter()
            .filter(|m| !m.is_signer && !m.is_writable)
            .count() as u8;
        let account_keys: Vec<Address> = metas.iter().map(|m| m.address).collect();

        let index_of = |address: &Address| -> Result<u8> {
            account_keys
                .iter()
                .position(|key| key == address)
                .map(|i| i as u8)
                .ok_or(Error::InvalidArgumentEncoding("unresolved account index"))
        };

        let mut compiled = Vec::with_capacity(instructions.len());
        for instruction in instructions {
            let account_indices = instruction
                .accounts
                .iter()
                .map(|meta| index_of(&meta.address))
                .collect::<Result<Vec<u8>>>()?;
            compiled.push(CompiledInstruction {
                program_id_index: index_of(&instruction.program_id)?,
                account_indices,
                data: instruction.data.clone(),
            });
        }

        Ok(Self {
            num_required_signatures,
            num_readonly_signed,
            num_readonly_unsigned,
            account_keys,
            recent_blockhash,
            instructions: compiled,
        })
    }

    /// Serialize to the wire format used by signing and submission.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(3 + 1 + self.account_keys.len() * Address::LEN + 32 + 64);
        buf.push(self.num_required_signatures);
        buf.push(self.num_readonly_signed);
        buf.push(self.num_readonly_unsigned);
        encode_compact_u16(&mut buf, self.account_keys.len() as u16);
        for key in &self.account_keys {
            buf.extend_from_slice(key.as_bytes());
        }
        buf.extend_from_slice(self.recent_blockhash.as_bytes());
        encode_compact_u16(&mut buf, self.instructions.len() as u16);
        for instruction in &self.instructions {
            buf.push(instruction.program_id_index);
            encode_compact_u16(&mut buf, instruction.account_indices.len() as u16);
            buf.extend_from_slice(&instruction.account_indices);
            encode_compact_u16(&mut buf, instruction.data.len() as u16);
            buf.extend_from_slice(&instruction.data);
        }
        buf
    }
}

/// A signable transaction. Signature slots are sized by the message header
/// and filled externally; wallet custody is outside this system.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub signatures: Vec<[u8; SIGNATURE_LEN]>,
    pub message: Message,
}

impl Transaction {
    pub fn new_unsigned(message: Message) -> Self {
        let signatures = vec![[0u8; SIGNATURE_LEN]; message.num_required_signatures as usize];
        Self {
            signatures,
            message,
        }
    }

    /// Install the signature at `index` (slot order matches the leading
    /// signer keys of the message).
    pub fn set_signature(&mut self, index: usize, signature: [u8; SIGNATURE_LEN]) -> Result<()> {
        let slot = self
            .signatures
            .get_mut(index)
            .ok_or(Error::InvalidArgumentEncoding("signature index out of range"))?;
        *slot = signature;
        Ok(())
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_compact_u16(&mut buf, self.signatures.len() as u16);
        for signature in &self.signatures {
            buf.extend_from_slice(signature);
        }
        buf.extend_from_slice(&self.message.serialize());
        buf
    }
}

fn derived(result: Result<(Address, u8)>, which: &'static str) -> Result<Address> {
    match result {
        Ok((address, _)) => Ok(address),
        Err(Error::DerivationExhausted) => Err(Error::MissingAddress(which)),
        Err(err) => Err(err),
    }
}

/// Register the caller as a player in `game_id`.
///
/// Account order contract: wallet (signer, writable), game (readonly),
/// player (writable), system program (readonly).
pub fn build_create_player(
    program_id: &Address,
    wallet: &Address,
    game_id: &IdToken,
) -> Result<Instruction> {
    let game = derived(pda::game_address(program_id, game_id), "game")?;
    let player = derived(pda::player_address(program_id, &game, wallet), "player")?;
    Ok(Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::writable(*wallet, true),
            AccountMeta::readonly(game, false),
            AccountMeta::writable(player, false),
            AccountMeta::readonly(SYSTEM_PROGRAM_ID, false),
        ],
        data: InstructionArgs::CreatePlayer.encode(),
    })
}

/// Join round `round_number`, staking `entry_fee`.
///
/// Account order contract: wallet (signer, writable), game (readonly),
/// round (writable), player (writable), vault (writable), token mint
/// (readonly), system program (readonly).
pub fn build_join_round(
    program_id: &Address,
    wallet: &Address,
    game_id: &IdToken,
    token_mint: &Address,
    round_number: u32,
    entry_fee: u64,
) -> Result<Instruction> {
    let game = derived(pda::game_address(program_id, game_id), "game")?;
    let round = derived(pda::round_address(program_id, &game, round_number), "round")?;
    let player = derived(pda::player_address(program_id, &game, wallet), "player")?;
    let vault = derived(pda::vault_address(program_id, &round), "vault")?;
    Ok(Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::writable(*wallet, true),
            AccountMeta::readonly(game, false),
            AccountMeta::writable(round, false),
            AccountMeta::writable(player, false),
            AccountMeta::writable(vault, false),
            AccountMeta::readonly(*token_mint, false),
            AccountMeta::readonly(SYSTEM_PROGRAM_ID, false),
        ],
        data: InstructionArgs::JoinRound { entry_fee }.encode(),
    })
}

/// Claim the payout for resulted round `round_number`.
///
/// Account order contract: wallet (signer, writable), game (readonly),
/// round (writable), player (writable), vault (writable).
pub fn build_claim_payout(
    program_id: &Address,
    wallet: &Address,
    game_id: &IdToken,
    round_number: u32,
) -> Result<Instruction> {
    let game = derived(pda::game_address(program_id, game_id), "game")?;
    let round = derived(pda::round_address(program_id, &game, round_number), "round")?;
    let player = derived(pda::player_address(program_id, &game, wallet), "player")?;
    let vault = derived(pda::vault_address(program_id, &round), "vault")?;
    Ok(Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::writable(*wallet, true),
            AccountMeta::readonly(game, false),
            AccountMeta::writable(round, false),
            AccountMeta::writable(player, false),
            AccountMeta::writable(vault, false),
        ],
        data: InstructionArgs::ClaimPayout { round_number }.encode(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use skirmish_types::instruction::discriminator;

    fn program() -> Address {
        Address::new([42u8; 32])
    }

    fn game_id() -> IdToken {
        "01HZX3V9K2M4N6P8Q0R2S4T6V8".parse().unwrap()
    }

    #[test]
    fn compact_u16_fixtures() {
        for (value, expected) in [
            (0u16, vec![0x00]),
            (1, vec![0x01]),
            (127, vec![0x7f]),
            (128, vec![0x80, 0x01]),
            (16383, vec![0xff, 0x7f]),
            (16384, vec![0x80, 0x80, 0x01]),
            (u16::MAX, vec![0xff, 0xff, 0x03]),
        ] {
            let mut buf = Vec::new();
            encode_compact_u16(&mut buf, value);
            assert_eq!(buf, expected, "encoding {value}");
            assert_eq!(
                decode_compact_u16(&buf, 0),
                Some((value, expected.len())),
                "decoding {value}"
            );
        }
    }

    #[test]
    fn join_round_account_order_is_pinned() {
        let wallet = Address::new([1u8; 32]);
        let mint = Address::new([2u8; 32]);
        let instruction =
            build_join_round(&program(), &wallet, &game_id(), &mint, 3, 5_000_000).unwrap();

        let game = pda::game_address(&program(), &game_id()).unwrap().0;
        let round = pda::round_address(&program(), &game, 3).unwrap().0;
        let player = pda::player_address(&program(), &game, &wallet).unwrap().0;
        let vault = pda::vault_address(&program(), &round).unwrap().0;

        let expected = [
            (wallet, true, true),
            (game, false, false),
            (round, false, true),
            (player, false, true),
            (vault, false, true),
            (mint, false, false),
            (SYSTEM_PROGRAM_ID, false, false),
        ];
        assert_eq!(instruction.accounts.len(), expected.len());
        for (meta, (address, is_signer, is_writable)) in
            instruction.accounts.iter().zip(expected)
        {
            assert_eq!(meta.address, address);
            assert_eq!(meta.is_signer, is_signer, "signer flag for {address}");
            assert_eq!(meta.is_writable, is_writable, "writable flag for {address}");
        }
        assert_eq!(
            instruction.data[..8],
            discriminator("global", "join_round")
        );
    }

    #[test]
    fn compile_orders_keys_and_counts_header() {
        let payer = Address::new([1u8; 32]);
        let writable = Address::new([2u8; 32]);
        let readonly = Address::new([3u8; 32]);
        let instruction = Instruction {
            program_id: program(),
            accounts: vec![
                AccountMeta::readonly(readonly, false),
                AccountMeta::writable(writable, false),
                // Duplicate reference to the payer merges, not duplicates.
                AccountMeta::readonly(payer, true),
            ],
            data: vec![9, 9],
        };

        let message =
            Message::compile(&[instruction], &payer, Blockhash::new([7u8; 32])).unwrap();
        assert_eq!(message.num_required_signatures, 1);
        assert_eq!(message.num_readonly_signed, 0);
        assert_eq!(message.num_readonly_unsigned, 2); // readonly + program
        assert_eq!(
            message.account_keys,
            vec![payer, writable, readonly, program()]
        );
        assert_eq!(message.instructions.len(), 1);
        assert_eq!(message.instructions[0].program_id_index, 3);
        assert_eq!(message.instructions[0].account_indices, vec![2, 1, 0]);
    }

    #[test]
    fn serialized_message_layout_matches_hand_built_bytes() {
        let payer = Address::new([1u8; 32]);
        let instruction = Instruction {
            program_id: program(),
            accounts: vec![AccountMeta::writable(payer, true)],
            data: vec![0xAB],
        };
        let blockhash = Blockhash::new([7u8; 32]);
        let message = Message::compile(&[instruction], &payer, blockhash).unwrap();
        let bytes = message.serialize();

        let mut expected = vec![1, 0, 1]; // header
        expected.push(2); // key count
        expected.extend_from_slice(payer.as_bytes());
        expected.extend_from_slice(program().as_bytes());
        expected.extend_from_slice(blockhash.as_bytes());
        expected.push(1); // instruction count
        expected.push(1); // program id index
        expected.push(1); // account count
        expected.push(0); // payer index
        expected.push(1); // data len
        expected.push(0xAB);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn unsigned_transaction_reserves_signature_slots() {
        let payer = Address::new([1u8; 32]);
        let instruction = build_create_player(&program(), &payer, &game_id()).unwrap();
        let message =
            Message::compile(&[instruction], &payer, Blockhash::new([7u8; 32])).unwrap();
        let mut transaction = Transaction::new_unsigned(message);
        assert_eq!(transaction.signatures.len(), 1);
        assert_eq!(transaction.signatures[0], [0u8; 64]);

        transaction.set_signature(0, [5u8; 64]).unwrap();
        assert!(transaction.set_signature(1, [5u8; 64]).is_err());

        let bytes = transaction.serialize();
        assert_eq!(bytes[0], 1); // one signature
        assert_eq!(&bytes[1..65], &[5u8; 64]);
    }

    #[test]
    fn blockhash_base58_roundtrip() {
        let hash = Blockhash::new([200u8; 32]);
        let parsed: Blockhash = hash.to_string().parse().unwrap();
        assert_eq!(parsed, hash);
    }
}
