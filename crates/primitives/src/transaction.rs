//! Transaction types and serialization.

use emberd_consensus::Hash256;

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;
use crate::outpoint::OutPoint;

pub const CURRENT_TX_VERSION: i32 = 2;

#[derive(Clone, Debug, PartialEq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl Encodable for TxIn {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.prevout.consensus_encode(encoder);
        encoder.write_var_bytes(&self.script_sig);
        encoder.write_u32_le(self.sequence);
    }
}

impl Decodable for TxIn {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let prevout = OutPoint::consensus_decode(decoder)?;
        let script_sig = decoder.read_var_bytes()?;
        let sequence = decoder.read_u32_le()?;
        Ok(Self {
            prevout,
            script_sig,
            sequence,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TxOut {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

impl TxOut {
    /// The empty marker output a coinstake carries at `vout[0]`.
    pub fn empty() -> Self {
        Self {
            value: 0,
            script_pubkey: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value == 0 && self.script_pubkey.is_empty()
    }
}

impl Encodable for TxOut {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i64_le(self.value);
        encoder.write_var_bytes(&self.script_pubkey);
    }
}

impl Decodable for TxOut {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let value = decoder.read_i64_le()?;
        let script_pubkey = decoder.read_var_bytes()?;
        Ok(Self {
            value,
            script_pubkey,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Transaction {
    pub version: i32,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn txid(&self) -> Hash256 {
        sha256d(&crate::encoding::encode(self))
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].prevout.is_null()
    }

    /// A coinstake spends the staked output as its first input and carries an
    /// empty marker at `vout[0]`, with the reward distributed in `vout[1..]`.
    pub fn is_coinstake(&self) -> bool {
        !self.vin.is_empty() && self.vout.len() >= 2 && self.vout[0].is_empty()
    }
}

impl Encodable for Transaction {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i32_le(self.version);
        encoder.write_varint(self.vin.len() as u64);
        for input in &self.vin {
            input.consensus_encode(encoder);
        }
        encoder.write_varint(self.vout.len() as u64);
        for output in &self.vout {
            output.consensus_encode(encoder);
        }
        encoder.write_u32_le(self.lock_time);
    }
}

impl Decodable for Transaction {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.read_i32_le()?;
        let vin_count = decoder.read_varint()?;
        let vin_count = usize::try_from(vin_count).map_err(|_| DecodeError::SizeTooLarge)?;
        let mut vin = Vec::with_capacity(vin_count);
        for _ in 0..vin_count {
            vin.push(TxIn::consensus_decode(decoder)?);
        }
        let vout_count = decoder.read_varint()?;
        let vout_count = usize::try_from(vout_count).map_err(|_| DecodeError::SizeTooLarge)?;
        let mut vout = Vec::with_capacity(vout_count);
        for _ in 0..vout_count {
            vout.push(TxOut::consensus_decode(decoder)?);
        }
        let lock_time = decoder.read_u32_le()?;
        Ok(Self {
            version,
            vin,
            vout,
            lock_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{decode, encode};

    fn spend_input(tag: u8) -> TxIn {
        TxIn {
            prevout: OutPoint {
                hash: [tag; 32],
                index: 0,
            },
            script_sig: vec![0x51],
            sequence: u32::MAX,
        }
    }

    #[test]
    fn coinstake_shape() {
        let tx = Transaction {
            version: CURRENT_TX_VERSION,
            vin: vec![spend_input(0x11)],
            vout: vec![
                TxOut::empty(),
                TxOut {
                    value: 5000,
                    script_pubkey: vec![0x51],
                },
            ],
            lock_time: 0,
        };
        assert!(tx.is_coinstake());
        assert!(!tx.is_coinbase());
    }

    #[test]
    fn single_output_is_not_coinstake() {
        let tx = Transaction {
            version: CURRENT_TX_VERSION,
            vin: vec![spend_input(0x11)],
            vout: vec![TxOut::empty()],
            lock_time: 0,
        };
        assert!(!tx.is_coinstake());
    }

    #[test]
    fn nonempty_first_output_is_not_coinstake() {
        let tx = Transaction {
            version: CURRENT_TX_VERSION,
            vin: vec![spend_input(0x11)],
            vout: vec![
                TxOut {
                    value: 1,
                    script_pubkey: Vec::new(),
                },
                TxOut {
                    value: 5000,
                    script_pubkey: vec![0x51],
                },
            ],
            lock_time: 0,
        };
        assert!(!tx.is_coinstake());
    }

    #[test]
    fn txid_is_stable_across_roundtrip() {
        let tx = Transaction {
            version: CURRENT_TX_VERSION,
            vin: vec![spend_input(0x22)],
            vout: vec![
                TxOut::empty(),
                TxOut {
                    value: 1_000_000,
                    script_pubkey: vec![0x76, 0xa9, 0x14],
                },
            ],
            lock_time: 7,
        };
        let decoded: Transaction = decode(&encode(&tx)).expect("decode");
        assert_eq!(decoded, tx);
        assert_eq!(decoded.txid(), tx.txid());
    }
}
