//! Typed client for an eventually-consistent key-value store.
//!
//! The store keeps every concurrent version of a key (siblings) instead
//! of picking a winner. [`Client::load`] fetches all siblings, asks the
//! record type to resolve them into one canonical value, and writes the
//! resolution back. Writes carry the causal context of the version they
//! read; a write without one (or with a stale one) creates a new sibling
//! rather than overwriting anything.
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

pub mod memory;

pub use memory::MemoryBackend;

pub const FEEDS_BUCKET: &str = "feeds";
pub const ITEMS_BUCKET: &str = "items";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no value stored under the requested key")]
    NotFound,
    #[error("failed to encode or decode a stored record: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Opaque token tying a write to the version it descends from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CausalContext(pub(crate) u64);

/// One sibling version: the serialized record plus its secondary-index
/// entries.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredValue {
    pub data: Vec<u8>,
    pub indexes: BTreeMap<String, String>,
}

/// Everything currently stored under one key.
#[derive(Debug, Clone)]
pub struct VersionedValue {
    pub siblings: Vec<StoredValue>,
    pub context: CausalContext,
}

/// Raw store operations. Object-safe so the service can run against any
/// backing store; the in-process [`MemoryBackend`] implements the full
/// sibling semantics.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Every sibling under `key`, or `None` when nothing is stored.
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<VersionedValue>, StoreError>;

    /// Stores `value`. A put whose context matches the current version
    /// replaces all siblings; anything else (no context, stale context)
    /// adds a sibling. Returns the context of the stored version.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        value: StoredValue,
        context: Option<CausalContext>,
    ) -> Result<CausalContext, StoreError>;

    /// Idempotent removal.
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError>;

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError>;

    /// Keys whose secondary index `index` has a value within `[lo, hi]`.
    /// Indexes named `*_int` compare numerically, everything else as
    /// plain strings.
    async fn index_query_range(
        &self,
        bucket: &str,
        index: &str,
        lo: &str,
        hi: &str,
    ) -> Result<Vec<String>, StoreError>;
}

/// A value the typed client knows how to persist.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync {
    const BUCKET: &'static str;

    /// Secondary-index entries derived from the record's fields.
    fn indexes(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }

    /// Collapse sibling versions into one canonical record. Invoked with
    /// at least two siblings; must be associative, commutative, and
    /// idempotent so any reader converges on the same value.
    fn resolve(siblings: Vec<Self>) -> Self;
}

/// A record together with the key and causal context it was loaded (or
/// last saved) under.
#[derive(Debug, Clone)]
pub struct Stored<R> {
    pub record: R,
    key: String,
    context: Option<CausalContext>,
}

impl<R: Record> Stored<R> {
    /// Wraps a record that has never been stored. The first save carries
    /// no causal context, so it siblings with any concurrent creator.
    pub fn new(key: impl Into<String>, record: R) -> Self {
        Stored {
            record,
            key: key.into(),
            context: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[derive(Clone)]
pub struct Client {
    backend: Arc<dyn Backend>,
}

impl Client {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Client { backend }
    }

    /// Loads the record under `key`, resolving siblings when the store
    /// returns more than one and writing the resolution back so later
    /// readers see a single value.
    pub async fn load<R: Record>(&self, key: &str) -> Result<Stored<R>, StoreError> {
        let Some(versioned) = self.backend.get(R::BUCKET, key).await? else {
            return Err(StoreError::NotFound);
        };

        let mut siblings = Vec::with_capacity(versioned.siblings.len());
        for value in &versioned.siblings {
            siblings.push(serde_json::from_slice::<R>(&value.data)?);
        }

        let sibling_count = siblings.len();
        let record = if sibling_count == 1 {
            siblings.pop().expect("one sibling")
        } else {
            R::resolve(siblings)
        };

        let mut stored = Stored {
            record,
            key: key.to_string(),
            context: Some(versioned.context),
        };
        if sibling_count > 1 {
            self.save(&mut stored).await?;
        }
        Ok(stored)
    }

    /// Persists the record, updating the causal context in place so a
    /// later save descends from this one.
    pub async fn save<R: Record>(&self, stored: &mut Stored<R>) -> Result<(), StoreError> {
        let value = StoredValue {
            data: serde_json::to_vec(&stored.record)?,
            indexes: stored
                .record
                .indexes()
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        };
        let context = self
            .backend
            .put(R::BUCKET, &stored.key, value, stored.context)
            .await?;
        stored.context = Some(context);
        Ok(())
    }

    pub async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.backend.delete(bucket, key).await
    }

    pub async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        self.backend.exists(bucket, key).await
    }

    pub async fn index_query_range(
        &self,
        bucket: &str,
        index: &str,
        lo: &str,
        hi: &str,
    ) -> Result<Vec<String>, StoreError> {
        self.backend.index_query_range(bucket, index, lo, hi).await
    }
}
