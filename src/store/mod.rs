// ABOUTME: Durable state: typed JSON records over a pluggable byte backend.
// ABOUTME: Also hosts the operator inbox and the single-daemon state lock.

mod error;
mod file;
mod inbox;
mod lock;
mod memory;

use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::ResultExt;
use std::path::Path;
use std::sync::Arc;

pub use error::{StoreError, StoreErrorKind};
pub use file::FileBackend;
pub use inbox::Inbox;
pub use lock::{LockInfo, StateLock};
pub use memory::MemoryBackend;

use error::{DecodeSnafu, EncodeSnafu};

/// Record families kept by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Runs,
    Deployments,
    Routers,
    Services,
    /// Service name to the id of its most recent deployment.
    Live,
    Inbox,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Runs => "runs",
            Collection::Deployments => "deployments",
            Collection::Routers => "routers",
            Collection::Services => "services",
            Collection::Live => "live",
            Collection::Inbox => "inbox",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw record storage. Writes must be atomic per record.
pub trait Backend: Send + Sync {
    fn read(&self, collection: Collection, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn write(&self, collection: Collection, key: &str, bytes: &[u8]) -> Result<(), StoreError>;
    /// Keys in ascending order.
    fn keys(&self, collection: Collection) -> Result<Vec<String>, StoreError>;
    fn delete(&self, collection: Collection, key: &str) -> Result<bool, StoreError>;
}

/// Cheaply cloneable handle to the state store.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn Backend>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    pub fn new(backend: impl Backend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// In-process store, lost on exit.
    pub fn memory() -> Self {
        Self::new(MemoryBackend::default())
    }

    /// File-backed store rooted at `dir`, created if missing.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(FileBackend::open(dir)?))
    }

    pub fn put<T: Serialize>(
        &self,
        collection: Collection,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(value).context(EncodeSnafu { collection, key })?;
        self.backend.write(collection, key, &bytes)
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        collection: Collection,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        let Some(bytes) = self.backend.read(collection, key)? else {
            return Ok(None);
        };
        let value = serde_json::from_slice(&bytes).context(DecodeSnafu { collection, key })?;
        Ok(Some(value))
    }

    pub fn keys(&self, collection: Collection) -> Result<Vec<String>, StoreError> {
        self.backend.keys(collection)
    }

    /// Every record in key order.
    pub fn list<T: DeserializeOwned>(&self, collection: Collection) -> Result<Vec<T>, StoreError> {
        let mut values = Vec::new();
        for key in self.keys(collection)? {
            if let Some(value) = self.get(collection, &key)? {
                values.push(value);
            }
        }
        Ok(values)
    }

    pub fn remove(&self, collection: Collection, key: &str) -> Result<bool, StoreError> {
        self.backend.delete(collection, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    #[test]
    fn typed_records_round_trip() {
        let store = Store::memory();
        let note = Note {
            text: "hello".to_string(),
        };
        store.put(Collection::Runs, "run-1", &note).unwrap();

        let back: Option<Note> = store.get(Collection::Runs, "run-1").unwrap();
        assert_eq!(back, Some(note));
        assert!(store.get::<Note>(Collection::Deployments, "run-1").unwrap().is_none());
    }

    #[test]
    fn decode_error_names_the_record() {
        let backend = MemoryBackend::default();
        backend.write(Collection::Live, "web", b"not json").unwrap();
        let store = Store::new(backend);

        let err = store.get::<Note>(Collection::Live, "web").unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::Corrupt);
        assert!(err.to_string().contains("live/web"));
    }
}
