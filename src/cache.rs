//! Preprocessed-story cache.
//!
//! The gateway stores one opaque blob per `{suggestion_type}:{story_id}`
//! key. The backend is selected by `FIG_CACHE_URL`: `memory://` for an
//! in-process map, `redis://` for a shared Redis instance (behind the
//! `redis-cache` feature).

use crate::error::{FigmentError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Get/set access to preprocessed story blobs.
#[async_trait]
pub trait StoryCache: Send + Sync {
    /// Fetch the blob stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Store `value` under `key`, replacing any previous blob.
    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()>;
}

/// Build the cache backend selected by `url`.
pub async fn from_url(url: &str) -> Result<Arc<dyn StoryCache>> {
    if url.starts_with("memory://") {
        return Ok(Arc::new(MemoryCache::new()));
    }

    #[cfg(feature = "redis-cache")]
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        return Ok(Arc::new(redis_cache::RedisCache::connect(url).await?));
    }

    #[cfg(not(feature = "redis-cache"))]
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        return Err(FigmentError::Config(
            "redis cache requested but the `redis-cache` feature is disabled".to_owned(),
        ));
    }

    Err(FigmentError::Config(format!(
        "unsupported cache URL: {url}"
    )))
}

/// In-process cache for single-node deployments and tests.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoryCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.entries.write().await.insert(key.to_owned(), value);
        Ok(())
    }
}

#[cfg(feature = "redis-cache")]
mod redis_cache {
    use super::*;
    use redis::AsyncCommands;

    /// Redis-backed cache; blobs are stored as JSON strings.
    pub struct RedisCache {
        connection: redis::aio::ConnectionManager,
    }

    impl RedisCache {
        /// Connect to the Redis instance described by `url`.
        ///
        /// The URL carries host, port, database index, and credentials using
        /// the redis crate's standard syntax.
        pub async fn connect(url: &str) -> Result<Self> {
            let client = redis::Client::open(url)
                .map_err(|e| FigmentError::Config(format!("invalid redis URL: {e}")))?;
            let connection = client
                .get_connection_manager()
                .await
                .map_err(|e| FigmentError::Cache(format!("redis connect: {e}")))?;
            Ok(Self { connection })
        }
    }

    #[async_trait]
    impl StoryCache for RedisCache {
        async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
            let mut connection = self.connection.clone();
            let raw: Option<String> = connection
                .get(key)
                .await
                .map_err(|e| FigmentError::Cache(format!("redis get: {e}")))?;
            match raw {
                Some(raw) => serde_json::from_str(&raw)
                    .map(Some)
                    .map_err(|e| FigmentError::Cache(format!("corrupt cache entry: {e}"))),
                None => Ok(None),
            }
        }

        async fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
            let raw = serde_json::to_string(&value)
                .map_err(|e| FigmentError::Cache(format!("encode cache entry: {e}")))?;
            let mut connection = self.connection.clone();
            connection
                .set::<_, _, ()>(key, raw)
                .await
                .map_err(|e| FigmentError::Cache(format!("redis set: {e}")))
        }
    }
}
