//! Persisted map of block height to the staker's key id.

use emberd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

pub const ZERO_KEY_ID: [u8; 20] = [0u8; 20];

pub struct StakeIndex<S> {
    store: S,
}

impl<S> StakeIndex<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> StakeIndex<S> {
    /// Key id of the block's staker. Missing or malformed rows read as the
    /// zero id, which downstream consumers treat as "unknown staker".
    pub fn read(&self, height: i32) -> Result<[u8; 20], StoreError> {
        let Some(bytes) = self.store.get(Column::StakeIndex, &height_key(height))? else {
            return Ok(ZERO_KEY_ID);
        };
        let Ok(key_id) = <[u8; 20]>::try_from(bytes.as_slice()) else {
            return Ok(ZERO_KEY_ID);
        };
        Ok(key_id)
    }

    pub fn put(&self, batch: &mut WriteBatch, height: i32, key_id: &[u8; 20]) {
        batch.put(Column::StakeIndex, height_key(height), *key_id);
    }
}

fn height_key(height: i32) -> [u8; 4] {
    (height as u32).to_be_bytes()
}
