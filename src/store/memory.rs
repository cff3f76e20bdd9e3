//! In-process store backend with full sibling semantics.
//!
//! Each key tracks a version counter alongside its sibling set. A put
//! presenting the current version's context replaces the whole set; a
//! put with no context, or one from before another writer got in,
//! lands as an additional sibling. This is the same convergence model
//! the service expects from a real cluster, so the updater and resolver
//! can be exercised against it unchanged.
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{Backend, CausalContext, StoreError, StoredValue, VersionedValue};

#[derive(Debug, Default)]
struct Entry {
    version: u64,
    siblings: Vec<StoredValue>,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    buckets: Mutex<HashMap<String, HashMap<String, Entry>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend::default()
    }

    /// Number of sibling versions currently stored under a key. Test
    /// hook; real backends don't expose this.
    pub fn sibling_count(&self, bucket: &str, key: &str) -> usize {
        let buckets = self.buckets.lock().expect("store lock");
        buckets
            .get(bucket)
            .and_then(|entries| entries.get(key))
            .map(|entry| entry.siblings.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<VersionedValue>, StoreError> {
        let buckets = self.buckets.lock().expect("store lock");
        Ok(buckets
            .get(bucket)
            .and_then(|entries| entries.get(key))
            .map(|entry| VersionedValue {
                siblings: entry.siblings.clone(),
                context: CausalContext(entry.version),
            }))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        value: StoredValue,
        context: Option<CausalContext>,
    ) -> Result<CausalContext, StoreError> {
        let mut buckets = self.buckets.lock().expect("store lock");
        let entry = buckets
            .entry(bucket.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default();

        match context {
            Some(CausalContext(version)) if version == entry.version => {
                entry.siblings = vec![value];
            }
            _ => {
                // Concurrent or uninformed writer: keep what's there.
                entry.siblings.push(value);
            }
        }
        entry.version += 1;
        Ok(CausalContext(entry.version))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let mut buckets = self.buckets.lock().expect("store lock");
        if let Some(entries) = buckets.get_mut(bucket) {
            entries.remove(key);
        }
        Ok(())
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        let buckets = self.buckets.lock().expect("store lock");
        Ok(buckets
            .get(bucket)
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false))
    }

    async fn index_query_range(
        &self,
        bucket: &str,
        index: &str,
        lo: &str,
        hi: &str,
    ) -> Result<Vec<String>, StoreError> {
        let numeric = index.ends_with("_int");
        let buckets = self.buckets.lock().expect("store lock");

        let Some(entries) = buckets.get(bucket) else {
            return Ok(Vec::new());
        };

        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| {
                entry.siblings.iter().any(|sibling| {
                    sibling
                        .indexes
                        .get(index)
                        .map(|value| in_range(value, lo, hi, numeric))
                        .unwrap_or(false)
                })
            })
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

fn in_range(value: &str, lo: &str, hi: &str, numeric: bool) -> bool {
    if numeric {
        match (
            value.parse::<i64>(),
            lo.parse::<i64>(),
            hi.parse::<i64>(),
        ) {
            (Ok(value), Ok(lo), Ok(hi)) => lo <= value && value <= hi,
            _ => false,
        }
    } else {
        lo <= value && value <= hi
    }
}
