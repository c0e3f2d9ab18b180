//! Signature hashing for transaction inputs.

use emberd_consensus::Hash256;
use emberd_primitives::encoding::{Encodable, Encoder};
use emberd_primitives::hash::sha256d;
use emberd_primitives::transaction::Transaction;

pub const SIGHASH_ALL: u32 = 0x01;
pub const SIGHASH_NONE: u32 = 0x02;
pub const SIGHASH_SINGLE: u32 = 0x03;
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SighashType(pub u32);

impl SighashType {
    pub fn base_type(self) -> u32 {
        self.0 & 0x1f
    }

    pub fn has_anyone_can_pay(self) -> bool {
        (self.0 & SIGHASH_ANYONECANPAY) != 0
    }
}

#[derive(Debug)]
pub enum SighashError {
    InputIndexOutOfRange,
    MissingOutput,
}

impl std::fmt::Display for SighashError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SighashError::InputIndexOutOfRange => write!(f, "input index out of range"),
            SighashError::MissingOutput => write!(f, "no matching output for SIGHASH_SINGLE"),
        }
    }
}

impl std::error::Error for SighashError {}

/// Hash committed to by an input signature: the transaction with scripts and
/// amounts masked according to the sighash type, then the type itself.
pub fn signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    sighash_type: SighashType,
) -> Result<Hash256, SighashError> {
    if input_index >= tx.vin.len() {
        return Err(SighashError::InputIndexOutOfRange);
    }

    let base_type = sighash_type.base_type();
    if base_type == SIGHASH_SINGLE && input_index >= tx.vout.len() {
        return Err(SighashError::MissingOutput);
    }

    let anyone_can_pay = sighash_type.has_anyone_can_pay();
    let hash_single = base_type == SIGHASH_SINGLE;
    let hash_none = base_type == SIGHASH_NONE;

    let mut encoder = Encoder::new();
    encoder.write_i32_le(tx.version);

    let mask_other_sequences = hash_none || hash_single;
    if anyone_can_pay {
        encoder.write_varint(1);
        encode_input(&mut encoder, tx, input_index, input_index, script_code, false);
    } else {
        encoder.write_varint(tx.vin.len() as u64);
        for index in 0..tx.vin.len() {
            let mask = mask_other_sequences && index != input_index;
            encode_input(&mut encoder, tx, index, input_index, script_code, mask);
        }
    }

    if hash_none {
        encoder.write_varint(0);
    } else if hash_single {
        encoder.write_varint(input_index as u64 + 1);
        for index in 0..=input_index {
            if index == input_index {
                tx.vout[index].consensus_encode(&mut encoder);
            } else {
                // Blanked output: value of -1 and an empty script.
                encoder.write_i64_le(-1);
                encoder.write_varint(0);
            }
        }
    } else {
        encoder.write_varint(tx.vout.len() as u64);
        for output in &tx.vout {
            output.consensus_encode(&mut encoder);
        }
    }

    encoder.write_u32_le(tx.lock_time);
    encoder.write_u32_le(sighash_type.0);

    Ok(sha256d(&encoder.into_inner()))
}

fn encode_input(
    encoder: &mut Encoder,
    tx: &Transaction,
    index: usize,
    signed_index: usize,
    script_code: &[u8],
    mask_sequence: bool,
) {
    let input = &tx.vin[index];
    input.prevout.consensus_encode(encoder);
    if index == signed_index {
        encoder.write_var_bytes(script_code);
    } else {
        encoder.write_varint(0);
    }
    encoder.write_u32_le(if mask_sequence { 0 } else { input.sequence });
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberd_primitives::outpoint::OutPoint;
    use emberd_primitives::transaction::{TxIn, TxOut};

    fn two_in_two_out() -> Transaction {
        let input = |tag: u8| TxIn {
            prevout: OutPoint {
                hash: [tag; 32],
                index: 0,
            },
            script_sig: vec![0x51],
            sequence: u32::MAX,
        };
        let output = |value: i64| TxOut {
            value,
            script_pubkey: vec![0x52],
        };
        Transaction {
            version: 2,
            vin: vec![input(0x01), input(0x02)],
            vout: vec![output(10), output(20)],
            lock_time: 0,
        }
    }

    #[test]
    fn different_inputs_hash_differently() {
        let tx = two_in_two_out();
        let code = vec![0x76, 0xa9];
        let first = signature_hash(&tx, 0, &code, SighashType(SIGHASH_ALL)).expect("hash");
        let second = signature_hash(&tx, 1, &code, SighashType(SIGHASH_ALL)).expect("hash");
        assert_ne!(first, second);
    }

    #[test]
    fn sighash_none_ignores_outputs() {
        let mut tx = two_in_two_out();
        let code = vec![0x76, 0xa9];
        let before = signature_hash(&tx, 0, &code, SighashType(SIGHASH_NONE)).expect("hash");
        tx.vout[1].value = 999;
        let after = signature_hash(&tx, 0, &code, SighashType(SIGHASH_NONE)).expect("hash");
        assert_eq!(before, after);

        let all_before = signature_hash(&tx, 0, &code, SighashType(SIGHASH_ALL)).expect("hash");
        tx.vout[1].value = 1000;
        let all_after = signature_hash(&tx, 0, &code, SighashType(SIGHASH_ALL)).expect("hash");
        assert_ne!(all_before, all_after);
    }

    #[test]
    fn sighash_single_requires_matching_output() {
        let tx = Transaction {
            vout: vec![TxOut {
                value: 10,
                script_pubkey: vec![0x52],
            }],
            ..two_in_two_out()
        };
        let err = signature_hash(&tx, 1, &[0x51], SighashType(SIGHASH_SINGLE))
            .expect_err("missing output");
        assert!(matches!(err, SighashError::MissingOutput));
    }

    #[test]
    fn out_of_range_input_is_rejected() {
        let tx = two_in_two_out();
        let err =
            signature_hash(&tx, 5, &[0x51], SighashType(SIGHASH_ALL)).expect_err("out of range");
        assert!(matches!(err, SighashError::InputIndexOutOfRange));
    }
}
