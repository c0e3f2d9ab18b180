//! Block signature checks.
//!
//! A PoS block is signed by the key that controls the staked output. The
//! header carries a bare ECDSA signature, so validation recovers the signer
//! key from the signature and matches it against the staked output's script.

use std::sync::OnceLock;

use emberd_chainstate::{BlockIndex, CoinView};
use emberd_primitives::block::{Block, BlockHeader};
use emberd_primitives::hash::hash160;
use emberd_script::standard::{extract_key_id, ScriptType};
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId, Signature};
use secp256k1::{Message, Secp256k1, VerifyOnly};

use crate::kernel::ProofOfStakeError;

static SECP256K1_VERIFY: OnceLock<Secp256k1<VerifyOnly>> = OnceLock::new();

fn secp256k1_verify() -> &'static Secp256k1<VerifyOnly> {
    SECP256K1_VERIFY.get_or_init(Secp256k1::verification_only)
}

/// A stake held as pay-to-pubkey-hash may emit its reward to a raw
/// pay-to-pubkey output of the same key; every other non-exact combination
/// is rejected.
pub fn check_block_input_pubkey_matches_output_pubkey<V: CoinView>(
    block: &Block,
    view: &V,
) -> Result<(), ProofOfStakeError> {
    let coin_in = view.coin(&block.header.prevout_stake)?.ok_or_else(|| {
        ProofOfStakeError::MissingStakePrevout(block.header.prevout_stake.clone())
    })?;

    let Some(coinstake) = block.transactions.get(1) else {
        return Err(ProofOfStakeError::MalformedCoinstake);
    };
    if coinstake.vout.len() < 2 {
        return Err(ProofOfStakeError::MalformedCoinstake);
    }
    let txout = &coinstake.vout[1];

    if coin_in.script_pubkey == txout.script_pubkey {
        return Ok(());
    }

    let Some((input_type, input_key)) = extract_key_id(&coin_in.script_pubkey) else {
        return Err(ProofOfStakeError::InputOutputKeyMismatch(
            "could not extract key from staked output",
        ));
    };
    if input_type != ScriptType::P2Pkh {
        return Err(ProofOfStakeError::InputOutputKeyMismatch(
            "non-exact match input must be P2PKH",
        ));
    }

    let Some((output_type, output_key)) = extract_key_id(&txout.script_pubkey) else {
        return Err(ProofOfStakeError::InputOutputKeyMismatch(
            "could not extract key from reward output",
        ));
    };
    if output_type != ScriptType::P2Pk {
        return Err(ProofOfStakeError::InputOutputKeyMismatch(
            "non-exact match output must be P2PK",
        ));
    }

    if input_key != output_key {
        return Err(ProofOfStakeError::InputOutputKeyMismatch(
            "input P2PKH key does not match output P2PK key",
        ));
    }

    Ok(())
}

/// Recovers the signer key from the header signature and matches it against
/// the staked output's script. All four recovery ids are tried with both key
/// encodings; any match accepts the signature.
pub fn check_recovered_pubkey_from_block_signature<V: CoinView>(
    prev: &BlockIndex,
    header: &BlockHeader,
    view: &V,
) -> Result<bool, ProofOfStakeError> {
    let coin_prev = match view.coin(&header.prevout_stake)? {
        Some(coin) => coin,
        // The stake is usually spent by the block itself, so fall back to the
        // already-spent coins of the branch being validated.
        None => view
            .spent_coin_from_main_chain(prev, &header.prevout_stake)?
            .ok_or_else(|| {
                ProofOfStakeError::MissingStakePrevout(header.prevout_stake.clone())
            })?,
    };

    if header.block_sig.is_empty() {
        return Ok(false);
    }

    let Some((_, key_id)) = extract_key_id(&coin_prev.script_pubkey) else {
        return Ok(false);
    };

    let Ok(sig) = Signature::from_der_lax(&header.block_sig) else {
        return Ok(false);
    };
    let compact = sig.serialize_compact();

    let hash = header.hash_without_sig();
    let Ok(msg) = Message::from_digest_slice(&hash) else {
        return Ok(false);
    };

    for recid in 0..=3 {
        let Ok(recovery_id) = RecoveryId::from_i32(recid) else {
            continue;
        };
        let Ok(recoverable) = RecoverableSignature::from_compact(&compact, recovery_id) else {
            continue;
        };
        let Ok(pubkey) = secp256k1_verify().recover_ecdsa(&msg, &recoverable) else {
            continue;
        };
        for compressed in [false, true] {
            let recovered_id = if compressed {
                hash160(&pubkey.serialize())
            } else {
                hash160(&pubkey.serialize_uncompressed())
            };
            if recovered_id == key_id {
                return Ok(true);
            }
        }
    }

    Ok(false)
}
