//! Stake candidate cache for the staker loop.
//!
//! A staker evaluates many outpoints against many candidate timestamps; the
//! cache memoizes the two chain lookups a kernel evaluation needs so the
//! common failing candidate costs one hash instead of three fetches.

use std::collections::HashMap;

use emberd_chainstate::{BlockIndex, Coin, CoinView};
use emberd_consensus::{Amount, ConsensusParams, COIN};
use emberd_primitives::outpoint::OutPoint;

use crate::kernel::{check_stake_kernel_hash, to_hex, ProofOfStakeError};
use crate::superstaker::is_super_staker;

/// Memoized inputs to the kernel hash for one candidate outpoint. Immutable
/// once inserted; evicted only on reorg or caller flush.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StakeCacheEntry {
    pub block_from_time: u32,
    pub amount: Amount,
}

pub type StakeCache = HashMap<OutPoint, StakeCacheEntry>;

pub fn stake_max_combine_inputs() -> usize {
    100
}

pub fn stake_combine_threshold() -> Amount {
    3_000 * COIN
}

pub fn stake_split_outputs() -> usize {
    10
}

pub fn stake_split_threshold() -> Amount {
    stake_split_outputs() as Amount * stake_combine_threshold()
}

/// Memoizes `(block_from_time, amount)` for `prevout`. Does nothing when the
/// outpoint is already cached, unknown, immature, or its creating block
/// cannot be found; entries are never overwritten.
pub fn cache_kernel<V: CoinView>(
    cache: &mut StakeCache,
    prevout: &OutPoint,
    prev: &BlockIndex,
    view: &V,
    params: &ConsensusParams,
) -> Result<(), ProofOfStakeError> {
    if cache.contains_key(prevout) {
        return Ok(());
    }

    let Some(coin_prev) = view.coin(prevout)? else {
        return Ok(());
    };

    if prev.height + 1 - coin_prev.height < params.coinbase_maturity {
        return Ok(());
    }

    let Some(block_from) = prev.ancestor(coin_prev.height) else {
        return Ok(());
    };

    cache.insert(
        prevout.clone(),
        StakeCacheEntry {
            block_from_time: block_from.time,
            amount: coin_prev.value,
        },
    );
    Ok(())
}

/// Staker-side kernel evaluation for one candidate.
///
/// A cache hit that passes is confirmed against the authoritative uncached
/// path before it is trusted: a deep reorg can leave a stale pair behind, and
/// publishing a block on a false positive must be impossible.
pub fn check_kernel<V: CoinView>(
    prev: &BlockIndex,
    bits: u32,
    time_block: u32,
    prevout: &OutPoint,
    view: &V,
    cache: Option<&StakeCache>,
    params: &ConsensusParams,
) -> Result<bool, ProofOfStakeError> {
    let coin_prev = match view.coin(prevout)? {
        Some(coin) => coin,
        None => match view.spent_coin_from_main_chain(prev, prevout)? {
            Some(coin) => coin,
            None => {
                emberd_log::log_debug!(
                    "kernel candidate {}:{} has no coin at the tip",
                    to_hex(&prevout.hash),
                    prevout.index
                );
                return Ok(false);
            }
        },
    };

    let super_staker = is_super_staker(params.network, &coin_prev.script_pubkey);

    let Some(entry) = cache.and_then(|cache| cache.get(prevout)) else {
        return check_kernel_uncached(
            prev,
            bits,
            time_block,
            prevout,
            &coin_prev,
            super_staker,
            params,
        );
    };

    let cached_pass = check_stake_kernel_hash(
        prev,
        bits,
        entry.block_from_time,
        entry.amount,
        prevout,
        time_block,
        super_staker,
    )
    .is_ok();

    if cached_pass {
        return check_kernel(prev, bits, time_block, prevout, view, None, params);
    }
    Ok(false)
}

fn check_kernel_uncached(
    prev: &BlockIndex,
    bits: u32,
    time_block: u32,
    prevout: &OutPoint,
    coin_prev: &Coin,
    super_staker: bool,
    params: &ConsensusParams,
) -> Result<bool, ProofOfStakeError> {
    if !super_staker && prev.height + 1 - coin_prev.height < params.coinbase_maturity {
        return Ok(false);
    }

    let Some(block_from) = prev.ancestor(coin_prev.height) else {
        return Ok(false);
    };

    if coin_prev.is_spent {
        return Ok(false);
    }

    Ok(check_stake_kernel_hash(
        prev,
        bits,
        block_from.time,
        coin_prev.value,
        prevout,
        time_block,
        super_staker,
    )
    .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberd_chainstate::MemoryCoinView;
    use emberd_consensus::{consensus_params, Network};
    use std::sync::Arc;

    const EASY_BITS: u32 = 0x207fffff;
    const HARD_BITS: u32 = 0x03000001;

    fn build_chain(length: i32) -> Arc<BlockIndex> {
        let mut tip = BlockIndex::genesis([0u8; 32], 1_000_000);
        for height in 1..=length {
            let mut hash = [0u8; 32];
            hash[..4].copy_from_slice(&height.to_le_bytes());
            tip = BlockIndex::new_child(
                &tip,
                hash,
                1_000_000 + height as u32 * 16,
                [height as u8; 32],
                true,
            );
        }
        tip
    }

    fn coin_at(height: i32, value: Amount) -> Coin {
        Coin {
            value,
            script_pubkey: vec![0x76, 0xa9, 0x14],
            height,
            is_coinbase: false,
            is_spent: false,
        }
    }

    fn candidate(tag: u8) -> OutPoint {
        OutPoint {
            hash: [tag; 32],
            index: 0,
        }
    }

    fn small_maturity_params() -> ConsensusParams {
        ConsensusParams {
            coinbase_maturity: 20,
            ..consensus_params(Network::Mainnet)
        }
    }

    #[test]
    fn cache_kernel_inserts_mature_candidates() {
        let params = small_maturity_params();
        let tip = build_chain(40);
        let mut view = MemoryCoinView::new();
        view.add_coin(candidate(0x01), coin_at(5, 77 * COIN));

        let mut cache = StakeCache::new();
        cache_kernel(&mut cache, &candidate(0x01), &tip, &view, &params).expect("cache");

        let entry = cache.get(&candidate(0x01)).expect("entry");
        assert_eq!(entry.amount, 77 * COIN);
        assert_eq!(
            entry.block_from_time,
            tip.ancestor(5).expect("ancestor").time
        );
    }

    #[test]
    fn cache_kernel_skips_unknown_and_immature() {
        let params = small_maturity_params();
        let tip = build_chain(40);
        let mut view = MemoryCoinView::new();
        view.add_coin(candidate(0x02), coin_at(35, COIN));

        let mut cache = StakeCache::new();
        cache_kernel(&mut cache, &candidate(0x01), &tip, &view, &params).expect("cache");
        cache_kernel(&mut cache, &candidate(0x02), &tip, &view, &params).expect("cache");
        assert!(cache.is_empty());
    }

    #[test]
    fn cache_kernel_never_overwrites() {
        let params = small_maturity_params();
        let tip = build_chain(40);
        let mut view = MemoryCoinView::new();
        view.add_coin(candidate(0x01), coin_at(5, COIN));

        let mut cache = StakeCache::new();
        let stale = StakeCacheEntry {
            block_from_time: 1,
            amount: 2,
        };
        cache.insert(candidate(0x01), stale);
        cache_kernel(&mut cache, &candidate(0x01), &tip, &view, &params).expect("cache");
        assert_eq!(*cache.get(&candidate(0x01)).expect("entry"), stale);
    }

    #[test]
    fn uncached_path_checks_maturity_spentness_and_target() {
        let params = small_maturity_params();
        let tip = build_chain(40);
        let time_block = tip.time + 16;

        let mut view = MemoryCoinView::new();
        view.add_coin(candidate(0x01), coin_at(5, COIN));
        assert!(
            check_kernel(&tip, EASY_BITS, time_block, &candidate(0x01), &view, None, &params)
                .expect("check")
        );
        assert!(
            !check_kernel(&tip, HARD_BITS, time_block, &candidate(0x01), &view, None, &params)
                .expect("check")
        );

        // Immature candidate.
        view.add_coin(candidate(0x02), coin_at(35, COIN));
        assert!(
            !check_kernel(&tip, EASY_BITS, time_block, &candidate(0x02), &view, None, &params)
                .expect("check")
        );

        // Spent candidate recovered from history never wins.
        view.add_spent_coin(candidate(0x03), coin_at(5, COIN));
        assert!(
            !check_kernel(&tip, EASY_BITS, time_block, &candidate(0x03), &view, None, &params)
                .expect("check")
        );

        // Unknown candidate.
        assert!(
            !check_kernel(&tip, EASY_BITS, time_block, &candidate(0x04), &view, None, &params)
                .expect("check")
        );
    }

    #[test]
    fn stale_cache_hit_is_rechecked_against_the_view() {
        let params = small_maturity_params();
        let tip = build_chain(40);
        let time_block = tip.time + 16;

        // The cached pair says the coin was mature; the view says it now sits
        // at an immature height, as after a deep reorg.
        let mut view = MemoryCoinView::new();
        view.add_coin(candidate(0x01), coin_at(35, COIN));

        let mut cache = StakeCache::new();
        cache.insert(
            candidate(0x01),
            StakeCacheEntry {
                block_from_time: tip.ancestor(5).expect("ancestor").time,
                amount: COIN,
            },
        );

        assert!(!check_kernel(
            &tip,
            EASY_BITS,
            time_block,
            &candidate(0x01),
            &view,
            Some(&cache),
            &params
        )
        .expect("check"));
    }

    #[test]
    fn cache_hit_that_fails_skips_the_expensive_path() {
        let params = small_maturity_params();
        let tip = build_chain(40);
        let time_block = tip.time + 16;

        let mut view = MemoryCoinView::new();
        view.add_coin(candidate(0x01), coin_at(5, COIN));

        let mut cache = StakeCache::new();
        cache_kernel(&mut cache, &candidate(0x01), &tip, &view, &params).expect("cache");

        assert!(!check_kernel(
            &tip,
            HARD_BITS,
            time_block,
            &candidate(0x01),
            &view,
            Some(&cache),
            &params
        )
        .expect("check"));
    }

    #[test]
    fn cache_hit_that_passes_is_confirmed() {
        let params = small_maturity_params();
        let tip = build_chain(40);
        let time_block = tip.time + 16;

        let mut view = MemoryCoinView::new();
        view.add_coin(candidate(0x01), coin_at(5, COIN));

        let mut cache = StakeCache::new();
        cache_kernel(&mut cache, &candidate(0x01), &tip, &view, &params).expect("cache");

        assert!(check_kernel(
            &tip,
            EASY_BITS,
            time_block,
            &candidate(0x01),
            &view,
            Some(&cache),
            &params
        )
        .expect("check"));
    }

    #[test]
    fn split_threshold_derives_from_split_outputs() {
        assert_eq!(stake_max_combine_inputs(), 100);
        assert_eq!(
            stake_split_threshold(),
            stake_split_outputs() as Amount * stake_combine_threshold()
        );
    }
}
