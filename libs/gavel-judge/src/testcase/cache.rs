use super::CacheBackend;
use crate::error::TestcaseError;
use async_trait::async_trait;
use gavel_common::redis::testcase_key;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Mutex;

fn cache_error(e: redis::RedisError) -> TestcaseError {
    TestcaseError::Cache(e.to_string())
}

/// Redis-backed cache. Entries expire after `ttl_secs`.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    ttl_secs: u64,
}

impl RedisCache {
    pub fn new(conn: ConnectionManager, ttl_secs: u64) -> Self {
        Self { conn, ttl_secs }
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, TestcaseError> {
        let mut conn = self.conn.clone();
        conn.get(testcase_key(key)).await.map_err(cache_error)
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), TestcaseError> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(testcase_key(key))
            .arg(value.to_vec())
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(cache_error)
    }

    async fn exists(&self, key: &str) -> Result<bool, TestcaseError> {
        let mut conn = self.conn.clone();
        conn.exists(testcase_key(key)).await.map_err(cache_error)
    }
}

/// Process-local cache without expiry, for one-shot tools and tests.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>, TestcaseError> {
        self.entries
            .lock()
            .map_err(|_| TestcaseError::Cache("memory cache poisoned".to_string()))
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, TestcaseError> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), TestcaseError> {
        self.lock()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, TestcaseError> {
        Ok(self.lock()?.contains_key(key))
    }
}
