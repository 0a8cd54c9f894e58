//! Testcase Cache-Aside Store
//!
//! **Lookup:**
//! 1. Cache hit: decode the cached blob and return it as is
//! 2. Cache miss: fetch from the data source, decode, write the full
//!    collection to the cache, return it
//!
//! The store never invalidates entries. Expiry belongs to the cache backend.

mod cache;
mod source;

pub use cache::{MemoryCache, RedisCache};
pub use source::{FileSource, HttpSource};

use crate::error::TestcaseError;
use async_trait::async_trait;
use gavel_common::types::TestElement;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Ordered test elements of one problem. Serialized as a bare JSON array of
/// `{id, in, out}` objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Testcase {
    pub elements: Vec<TestElement>,
}

impl Testcase {
    pub fn new(elements: Vec<TestElement>) -> Self {
        Self { elements }
    }

    pub fn decode(problem_id: &str, blob: &[u8]) -> Result<Self, TestcaseError> {
        serde_json::from_slice(blob).map_err(|source| TestcaseError::InvalidTestcaseData {
            problem_id: problem_id.to_string(),
            source,
        })
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Keep only the elements flagged hidden.
    pub fn hidden_only(self) -> Self {
        Self {
            elements: self.elements.into_iter().filter(|e| e.hidden).collect(),
        }
    }
}

/// Where testcase blobs come from on a cache miss.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn get(&self, problem_id: &str) -> Result<Vec<u8>, TestcaseError>;
}

/// Byte cache keyed by problem id. Implementations must make each `get` and
/// `set` atomic per key.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, TestcaseError>;
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), TestcaseError>;
    async fn exists(&self, key: &str) -> Result<bool, TestcaseError>;
}

#[derive(Clone)]
pub struct TestcaseStore {
    source: Arc<dyn DataSource>,
    cache: Arc<dyn CacheBackend>,
}

impl TestcaseStore {
    pub fn new(source: Arc<dyn DataSource>, cache: Arc<dyn CacheBackend>) -> Self {
        Self { source, cache }
    }

    pub async fn get(&self, problem_id: &str) -> Result<Testcase, TestcaseError> {
        if let Some(blob) = self.cache.get(problem_id).await? {
            debug!(problem_id, "Testcase cache hit");
            return Testcase::decode(problem_id, &blob);
        }

        let blob = self.source.get(problem_id).await?;
        let testcase = Testcase::decode(problem_id, &blob)?;
        // Only blobs that decoded cleanly are cached
        self.cache.set(problem_id, &blob).await?;

        info!(problem_id, elements = testcase.len(), "Testcase fetched and cached");
        Ok(testcase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSource;

    const BLOB: &str = r#"[{"id":1,"in":"1 2\n","out":"3\n"},{"id":2,"in":"","out":"0","hidden":true}]"#;

    fn store(source: Arc<FakeSource>, cache: Arc<MemoryCache>) -> TestcaseStore {
        TestcaseStore::new(source, cache)
    }

    #[test]
    fn test_round_trip() {
        let testcase = Testcase::decode("1", BLOB.as_bytes()).unwrap();
        assert_eq!(testcase.len(), 2);
        assert!(testcase.elements[1].hidden);

        let again = Testcase::decode("1", &testcase.encode().unwrap()).unwrap();
        assert_eq!(again, testcase);
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        let err = Testcase::decode("9", br#"{"id":1}"#).unwrap_err();
        assert!(matches!(err, TestcaseError::InvalidTestcaseData { problem_id, .. } if problem_id == "9"));
        assert!(Testcase::decode("9", b"not json").is_err());
        assert!(Testcase::decode("9", br#"[{"id":"x","in":"","out":""}]"#).is_err());
    }

    #[test]
    fn test_hidden_only() {
        let testcase = Testcase::decode("1", BLOB.as_bytes()).unwrap().hidden_only();
        assert_eq!(testcase.len(), 1);
        assert_eq!(testcase.elements[0].id, 2);
    }

    #[tokio::test]
    async fn test_miss_fetches_and_populates() {
        let source = Arc::new(FakeSource::default().with("1", BLOB));
        let cache = Arc::new(MemoryCache::new());
        let store = store(source.clone(), cache.clone());

        let testcase = store.get("1").await.unwrap();
        assert_eq!(testcase.len(), 2);
        assert_eq!(source.fetch_count(), 1);
        assert!(cache.exists("1").await.unwrap());
    }

    #[tokio::test]
    async fn test_hit_skips_source() {
        let source = Arc::new(FakeSource::default().with("1", BLOB));
        let cache = Arc::new(MemoryCache::new());
        let store = store(source.clone(), cache.clone());

        let first = store.get("1").await.unwrap();
        let second = store.get("1").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_cached_blob_is_returned_unchanged() {
        let source = Arc::new(FakeSource::default());
        let cache = Arc::new(MemoryCache::new());
        cache.set("5", br#"[{"id":7,"in":"a","out":"b"}]"#).await.unwrap();

        let testcase = store(source.clone(), cache).get("5").await.unwrap();
        assert_eq!(testcase.elements[0].id, 7);
        assert_eq!(source.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_source_failure() {
        let store = store(Arc::new(FakeSource::default()), Arc::new(MemoryCache::new()));
        let err = store.get("404").await.unwrap_err();
        assert!(matches!(err, TestcaseError::Source { .. }));
    }

    #[tokio::test]
    async fn test_invalid_data_is_not_cached() {
        let source = Arc::new(FakeSource::default().with("3", "{broken"));
        let cache = Arc::new(MemoryCache::new());
        let store = store(source, cache.clone());

        let err = store.get("3").await.unwrap_err();
        assert!(matches!(err, TestcaseError::InvalidTestcaseData { .. }));
        assert!(!cache.exists("3").await.unwrap());
    }
}
