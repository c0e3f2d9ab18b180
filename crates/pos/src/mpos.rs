//! MPoS reward distribution: resolving the historical stake scripts that
//! share in a new block's reward.
//!
//! The reward of each PoS block is split between the current staker and the
//! previous `n - 1` stakers, offset back by the maturity window so every
//! recipient already holds a matured reward.

use std::collections::BTreeMap;

use emberd_chainstate::{BlockIndex, Chain, StakeIndex, ZERO_KEY_ID};
use emberd_consensus::{Amount, ConsensusParams, Hash256};
use emberd_primitives::transaction::{Transaction, TxOut};
use emberd_script::standard::{burn_script, p2pkh_script};
use emberd_storage::{KeyValueStore, StoreError};

#[derive(Clone, Debug)]
struct ScriptCacheEntry {
    script: Vec<u8>,
    hash: Hash256,
}

/// Cache of recently resolved recipient scripts keyed by block height. Owned
/// by the PoS subsystem; cleaned before every read and every write so stale
/// branches never leak into a reward list.
#[derive(Default)]
pub struct MposScriptCache {
    entries: BTreeMap<i32, ScriptCacheEntry>,
}

impl MposScriptCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops entries outside the retention window around `height` and entries
    /// whose block is no longer on the active chain.
    pub fn clean(&mut self, height: i32, params: &ConsensusParams, chain: &Chain) {
        let window = params.mpos_reward_recipients * 3 / 2;
        self.entries.retain(|entry_height, entry| {
            if *entry_height < height - window || *entry_height > height + window {
                return false;
            }
            match chain.get(*entry_height) {
                Some(index) => index.hash == entry.hash,
                None => false,
            }
        });
    }

    fn read(
        &mut self,
        index: &BlockIndex,
        height: i32,
        params: &ConsensusParams,
        chain: &Chain,
    ) -> Option<Vec<u8>> {
        self.clean(height, params, chain);
        let entry = self.entries.get(&height)?;
        (entry.hash == index.hash).then(|| entry.script.clone())
    }

    fn insert(
        &mut self,
        script: Vec<u8>,
        index: &BlockIndex,
        height: i32,
        params: &ConsensusParams,
        chain: &Chain,
    ) {
        self.clean(height, params, chain);
        self.entries.insert(
            height,
            ScriptCacheEntry {
                script,
                hash: index.hash,
            },
        );
    }
}

#[derive(Debug)]
pub enum MposError {
    MissingBlockIndex(i32),
    NotProofOfStake(i32),
    Store(StoreError),
}

impl std::fmt::Display for MposError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MposError::MissingBlockIndex(height) => {
                write!(f, "no active-chain block at height {height}")
            }
            MposError::NotProofOfStake(height) => {
                write!(f, "block at height {height} is not proof-of-stake")
            }
            MposError::Store(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for MposError {}

impl From<StoreError> for MposError {
    fn from(err: StoreError) -> Self {
        MposError::Store(err)
    }
}

/// Resolves the reward script of the block at `height` and appends it to
/// `scripts`. An unknown staker burns the share rather than halting the
/// chain; a non-PoS block is tolerated (as a burn) only where blocks are
/// mined on demand.
pub fn add_mpos_script<S: KeyValueStore>(
    cache: &mut MposScriptCache,
    scripts: &mut Vec<Vec<u8>>,
    stake_index: &StakeIndex<S>,
    chain: &Chain,
    height: i32,
    params: &ConsensusParams,
) -> Result<(), MposError> {
    let Some(index) = chain.get(height) else {
        emberd_log::log_debug!("mpos recipient block at height {height} not in active chain");
        return Err(MposError::MissingBlockIndex(height));
    };

    if let Some(script) = cache.read(index, height, params, chain) {
        scripts.push(script);
        return Ok(());
    }

    let staker = stake_index.read(height)?;

    if index.proof_of_stake {
        let script = if staker == ZERO_KEY_ID {
            emberd_log::log_debug!(
                "no stake index entry at height {height}, burning the reward share"
            );
            burn_script()
        } else {
            p2pkh_script(&staker)
        };
        scripts.push(script.clone());
        cache.insert(script, index, height, params, chain);
        return Ok(());
    }

    if params.mine_blocks_on_demand {
        // On-demand chains interleave PoW blocks; their share is burned.
        scripts.push(burn_script());
        return Ok(());
    }

    emberd_log::log_debug!("mpos recipient block at height {height} is not proof-of-stake");
    Err(MposError::NotProofOfStake(height))
}

/// Scripts of the `n - 1` historical recipients for a block at `height`, in
/// backward chain order starting `coinbase_maturity` blocks below it.
pub fn get_mpos_output_scripts<S: KeyValueStore>(
    cache: &mut MposScriptCache,
    stake_index: &StakeIndex<S>,
    chain: &Chain,
    height: i32,
    params: &ConsensusParams,
) -> Result<Vec<Vec<u8>>, MposError> {
    let base = height - params.coinbase_maturity;
    let recipients = (params.mpos_reward_recipients - 1).max(0);
    let mut scripts = Vec::with_capacity(recipients as usize);
    for offset in 0..recipients {
        add_mpos_script(cache, &mut scripts, stake_index, chain, base - offset, params)?;
    }
    Ok(scripts)
}

/// Appends one output of `reward_piece` per historical recipient to the
/// coinstake under construction.
pub fn create_mpos_outputs<S: KeyValueStore>(
    cache: &mut MposScriptCache,
    tx: &mut Transaction,
    reward_piece: Amount,
    stake_index: &StakeIndex<S>,
    chain: &Chain,
    height: i32,
    params: &ConsensusParams,
) -> Result<(), MposError> {
    let scripts = get_mpos_output_scripts(cache, stake_index, chain, height, params)?;
    for script_pubkey in scripts {
        tx.vout.push(TxOut {
            value: reward_piece,
            script_pubkey,
        });
    }
    Ok(())
}
