//! Coins and the views through which validation reads them.

use std::collections::HashMap;

use emberd_consensus::Hash256;
use emberd_primitives::encoding::{DecodeError, Decoder, Encoder};
use emberd_primitives::outpoint::OutPoint;
use emberd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::chain::BlockIndex;

pub const OUTPOINT_KEY_LEN: usize = 36;

/// An unspent (or recovered already-spent) transaction output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Coin {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
    /// Height of the block that created the output.
    pub height: i32,
    pub is_coinbase: bool,
    pub is_spent: bool,
}

impl Coin {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_i64_le(self.value);
        encoder.write_var_bytes(&self.script_pubkey);
        encoder.write_i32_le(self.height);
        let mut flags = 0u8;
        if self.is_coinbase {
            flags |= 1;
        }
        if self.is_spent {
            flags |= 2;
        }
        encoder.write_u8(flags);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let coin = Self::decode_from(&mut decoder)?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(coin)
    }

    fn decode_from(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let value = decoder.read_i64_le()?;
        let script_pubkey = decoder.read_var_bytes()?;
        let height = decoder.read_i32_le()?;
        let flags = decoder.read_u8()?;
        Ok(Self {
            value,
            script_pubkey,
            height,
            is_coinbase: flags & 1 != 0,
            is_spent: flags & 2 != 0,
        })
    }
}

#[derive(Debug)]
pub enum ViewError {
    Store(StoreError),
    Corrupt(DecodeError),
}

impl std::fmt::Display for ViewError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewError::Store(err) => write!(f, "{err}"),
            ViewError::Corrupt(err) => write!(f, "corrupt coin record: {err}"),
        }
    }
}

impl std::error::Error for ViewError {}

impl From<StoreError> for ViewError {
    fn from(err: StoreError) -> Self {
        ViewError::Store(err)
    }
}

impl From<DecodeError> for ViewError {
    fn from(err: DecodeError) -> Self {
        ViewError::Corrupt(err)
    }
}

/// Read access to coins. The two lookups are distinct capabilities: `coin`
/// answers from the current UTXO set, `spent_coin_from_main_chain` recovers
/// an output that was already spent on the branch ending at `tip`.
pub trait CoinView {
    fn coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, ViewError>;

    fn spent_coin_from_main_chain(
        &self,
        tip: &BlockIndex,
        outpoint: &OutPoint,
    ) -> Result<Option<Coin>, ViewError>;
}

fn outpoint_key(outpoint: &OutPoint) -> [u8; OUTPOINT_KEY_LEN] {
    let mut bytes = [0u8; OUTPOINT_KEY_LEN];
    bytes[..32].copy_from_slice(&outpoint.hash);
    bytes[32..].copy_from_slice(&outpoint.index.to_le_bytes());
    bytes
}

/// Production view backed by the storage trait. Spent coins are kept as
/// records carrying the spending block so recovery can confirm the spend
/// still lies on the branch being validated.
pub struct UtxoView<S> {
    store: S,
}

impl<S> UtxoView<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

struct SpentCoinRecord {
    coin: Coin,
    spend_height: i32,
    block_hash: Hash256,
}

impl SpentCoinRecord {
    fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_bytes(&self.coin.encode());
        encoder.write_i32_le(self.spend_height);
        encoder.write_hash_le(&self.block_hash);
        encoder.into_inner()
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let coin = Coin::decode_from(&mut decoder)?;
        let spend_height = decoder.read_i32_le()?;
        let block_hash = decoder.read_hash_le()?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            coin,
            spend_height,
            block_hash,
        })
    }
}

impl<S: KeyValueStore> UtxoView<S> {
    pub fn add_coin(&self, batch: &mut WriteBatch, outpoint: &OutPoint, coin: &Coin) {
        batch.put(Column::Utxo, outpoint_key(outpoint), coin.encode());
    }

    /// Moves a coin from the UTXO set to the spent-coin records.
    pub fn spend_coin(
        &self,
        batch: &mut WriteBatch,
        outpoint: &OutPoint,
        coin: &Coin,
        spend_height: i32,
        block_hash: Hash256,
    ) {
        let key = outpoint_key(outpoint);
        batch.delete(Column::Utxo, key);
        let record = SpentCoinRecord {
            coin: Coin {
                is_spent: true,
                ..coin.clone()
            },
            spend_height,
            block_hash,
        };
        batch.put(Column::SpentCoin, key, record.encode());
    }
}

impl<S: KeyValueStore> CoinView for UtxoView<S> {
    fn coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, ViewError> {
        match self.store.get(Column::Utxo, &outpoint_key(outpoint))? {
            Some(bytes) => Ok(Some(Coin::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn spent_coin_from_main_chain(
        &self,
        tip: &BlockIndex,
        outpoint: &OutPoint,
    ) -> Result<Option<Coin>, ViewError> {
        let Some(bytes) = self.store.get(Column::SpentCoin, &outpoint_key(outpoint))? else {
            return Ok(None);
        };
        let record = SpentCoinRecord::decode(&bytes)?;
        let on_branch = tip
            .ancestor(record.spend_height)
            .map(|index| index.hash == record.block_hash)
            .unwrap_or(false);
        Ok(on_branch.then_some(record.coin))
    }
}

/// In-memory view for the staker harness and tests.
#[derive(Default)]
pub struct MemoryCoinView {
    coins: HashMap<OutPoint, Coin>,
    spent: HashMap<OutPoint, Coin>,
}

impl MemoryCoinView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_coin(&mut self, outpoint: OutPoint, coin: Coin) {
        self.coins.insert(outpoint, coin);
    }

    pub fn remove_coin(&mut self, outpoint: &OutPoint) {
        self.coins.remove(outpoint);
    }

    /// Registers a coin recoverable only through the spent-coin lookup.
    pub fn add_spent_coin(&mut self, outpoint: OutPoint, coin: Coin) {
        self.spent.insert(
            outpoint,
            Coin {
                is_spent: true,
                ..coin
            },
        );
    }
}

impl CoinView for MemoryCoinView {
    fn coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, ViewError> {
        Ok(self.coins.get(outpoint).cloned())
    }

    fn spent_coin_from_main_chain(
        &self,
        _tip: &BlockIndex,
        outpoint: &OutPoint,
    ) -> Result<Option<Coin>, ViewError> {
        Ok(self.spent.get(outpoint).cloned())
    }
}
