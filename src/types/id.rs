// ABOUTME: Phantom-typed identifiers for pools, deployments, runs, and replicas.
// ABOUTME: Prevents passing a RunId where a DeploymentId is expected.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering as CmpOrdering;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

/// Marker types for phantom type parameters.
/// Empty enums cannot be instantiated and need no trait bounds.
pub enum PoolMarker {}
pub enum DeploymentMarker {}
pub enum RunMarker {}
pub enum ReplicaMarker {}

/// Prefix used when generating identifiers of a given kind.
pub trait IdKind {
    const PREFIX: &'static str;
}

impl IdKind for PoolMarker {
    const PREFIX: &'static str = "pool";
}

impl IdKind for DeploymentMarker {
    const PREFIX: &'static str = "dep";
}

impl IdKind for RunMarker {
    const PREFIX: &'static str = "run";
}

impl IdKind for ReplicaMarker {
    const PREFIX: &'static str = "rep";
}

/// A type-safe identifier.
///
/// The phantom parameter keeps identifiers of different record kinds from
/// being mixed up, while the wire representation stays a plain string.
#[must_use = "IDs reference durable records and should not be ignored"]
pub struct Id<T> {
    value: String,
    _marker: PhantomData<T>,
}

impl<T> Id<T> {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            _marker: PhantomData,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn into_inner(self) -> String {
        self.value
    }
}

impl<T: IdKind> Id<T> {
    /// Generate a fresh identifier: `<prefix>-<utc timestamp>-<pid>-<seq>`.
    ///
    /// Timestamps sort lexically, so generated ids of one kind order by
    /// creation time within a process.
    pub fn generate() -> Self {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%3f");
        Self::new(format!(
            "{}-{}-{}-{:04}",
            T::PREFIX,
            stamp,
            std::process::id(),
            seq
        ))
    }
}

// Manual impls: T is only a marker, so no bounds on T are required.

impl<T> std::fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Id").field(&self.value).finish()
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        Self::new(self.value.clone())
    }
}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.value.cmp(&other.value)
    }
}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<T> std::fmt::Display for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}

impl<T> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

pub type PoolId = Id<PoolMarker>;
pub type DeploymentId = Id<DeploymentMarker>;
pub type RunId = Id<RunMarker>;
pub type ReplicaId = Id<ReplicaMarker>;
