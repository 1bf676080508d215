// ABOUTME: In-memory store backend for tests and ephemeral runs.

use parking_lot::Mutex;
use std::collections::BTreeMap;

use super::{Backend, Collection, StoreError};

#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Mutex<BTreeMap<(Collection, String), Vec<u8>>>,
}

impl Backend for MemoryBackend {
    fn read(&self, collection: Collection, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .records
            .lock()
            .get(&(collection, key.to_string()))
            .cloned())
    }

    fn write(&self, collection: Collection, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.records
            .lock()
            .insert((collection, key.to_string()), bytes.to_vec());
        Ok(())
    }

    fn keys(&self, collection: Collection) -> Result<Vec<String>, StoreError> {
        Ok(self
            .records
            .lock()
            .keys()
            .filter(|(c, _)| *c == collection)
            .map(|(_, key)| key.clone())
            .collect())
    }

    fn delete(&self, collection: Collection, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .records
            .lock()
            .remove(&(collection, key.to_string()))
            .is_some())
    }
}
