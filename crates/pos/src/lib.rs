//! Proof-of-stake kernel validation.
//!
//! Decides whether a block that claims to stake a particular unspent output
//! is valid: the stake modifier chain, the kernel hash and its weighted
//! difficulty target, coinstake verification, block signature recovery, the
//! staker's candidate cache, and MPoS reward recipient selection.

pub mod cache;
pub mod kernel;
pub mod mpos;
pub mod signature;
pub mod superstaker;

pub use cache::{cache_kernel, check_kernel, StakeCache, StakeCacheEntry};
pub use kernel::{
    check_coinstake_timestamp, check_proof_of_stake, check_stake_kernel_hash,
    compute_stake_modifier, decode_compact, encode_compact, stake_kernel_hash, weighted_target,
    CompactError, KernelError, ProofOfStakeError, StakeProof,
};
pub use mpos::{
    add_mpos_script, create_mpos_outputs, get_mpos_output_scripts, MposError, MposScriptCache,
};
pub use signature::{
    check_block_input_pubkey_matches_output_pubkey, check_recovered_pubkey_from_block_signature,
};
pub use superstaker::{is_super_staker, super_staker_scripts};
