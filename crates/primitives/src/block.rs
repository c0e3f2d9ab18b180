//! Block header and block types.

use emberd_consensus::Hash256;

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;
use crate::outpoint::OutPoint;
use crate::transaction::Transaction;

pub const CURRENT_VERSION: i32 = 4;

#[derive(Clone, Debug, PartialEq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
    /// The staked output this block claims to spend; null for proof-of-work.
    pub prevout_stake: OutPoint,
    pub block_sig: Vec<u8>,
}

impl BlockHeader {
    pub fn is_proof_of_stake(&self) -> bool {
        !self.prevout_stake.is_null()
    }

    pub fn consensus_encode(&self) -> Vec<u8> {
        self.encode_with_mode(true)
    }

    pub fn consensus_encode_without_sig(&self) -> Vec<u8> {
        self.encode_with_mode(false)
    }

    pub fn hash(&self) -> Hash256 {
        sha256d(&self.consensus_encode())
    }

    /// Hash over the header with `block_sig` omitted; this is the message the
    /// staker signs.
    pub fn hash_without_sig(&self) -> Hash256 {
        sha256d(&self.consensus_encode_without_sig())
    }

    fn encode_with_mode(&self, include_signature: bool) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_i32_le(self.version);
        encoder.write_hash_le(&self.prev_block);
        encoder.write_hash_le(&self.merkle_root);
        encoder.write_u32_le(self.time);
        encoder.write_u32_le(self.bits);
        encoder.write_u32_le(self.nonce);
        self.prevout_stake.consensus_encode(&mut encoder);
        if include_signature {
            encoder.write_var_bytes(&self.block_sig);
        }
        encoder.into_inner()
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let header = Self::consensus_decode_from(&mut decoder)?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(header)
    }

    pub fn consensus_decode_from(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.read_i32_le()?;
        let prev_block = decoder.read_hash_le()?;
        let merkle_root = decoder.read_hash_le()?;
        let time = decoder.read_u32_le()?;
        let bits = decoder.read_u32_le()?;
        let nonce = decoder.read_u32_le()?;
        let prevout_stake = OutPoint::consensus_decode(decoder)?;
        let block_sig = decoder.read_var_bytes()?;
        Ok(Self {
            version,
            prev_block,
            merkle_root,
            time,
            bits,
            nonce,
            prevout_stake,
            block_sig,
        })
    }
}

#[derive(Clone, Debug)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// The coinstake is by convention the second transaction of a PoS block.
    pub fn coinstake(&self) -> Option<&Transaction> {
        let tx = self.transactions.get(1)?;
        tx.is_coinstake().then_some(tx)
    }

    pub fn consensus_encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_bytes(&self.header.consensus_encode());
        encoder.write_varint(self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.consensus_encode(&mut encoder);
        }
        encoder.into_inner()
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let header = BlockHeader::consensus_decode_from(&mut decoder)?;
        let count = decoder.read_varint()?;
        let count = usize::try_from(count).map_err(|_| DecodeError::SizeTooLarge)?;
        let mut transactions = Vec::with_capacity(count);
        for _ in 0..count {
            transactions.push(Transaction::consensus_decode(&mut decoder)?);
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            header,
            transactions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_header(prevout_stake: OutPoint) -> BlockHeader {
        BlockHeader {
            version: CURRENT_VERSION,
            prev_block: [0x11; 32],
            merkle_root: [0x22; 32],
            time: 1_700_000_000,
            bits: 0x1d00ffff,
            nonce: 0,
            prevout_stake,
            block_sig: vec![0x30, 0x01, 0x02],
        }
    }

    #[test]
    fn pos_header_has_stake_prevout() {
        let header = make_header(OutPoint {
            hash: [0x33; 32],
            index: 1,
        });
        assert!(header.is_proof_of_stake());
        assert!(!make_header(OutPoint::null()).is_proof_of_stake());
    }

    #[test]
    fn hash_without_sig_ignores_signature() {
        let mut header = make_header(OutPoint {
            hash: [0x33; 32],
            index: 1,
        });
        let unsigned = header.hash_without_sig();
        let signed = header.hash();
        header.block_sig = vec![0x30, 0xff, 0xee, 0xdd];
        assert_eq!(header.hash_without_sig(), unsigned);
        assert_ne!(header.hash(), signed);
    }

    #[test]
    fn header_roundtrip() {
        let header = make_header(OutPoint {
            hash: [0x44; 32],
            index: 3,
        });
        let decoded =
            BlockHeader::consensus_decode(&header.consensus_encode()).expect("decode header");
        assert_eq!(decoded, header);
    }
}
