use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// TTL-bounded key-value store shared by the aggregator, engine and status
/// tracker. Passed explicitly into each component so tests can substitute
/// [`MemoryCache`] for the redis-backed implementation.
///
/// A `ttl_seconds` of zero means the value is already expired: implementations
/// must not store it.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get_raw(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn set_raw(&self, key: &str, value: &str, ttl_seconds: u64) -> anyhow::Result<()>;

    /// Resets the TTL of an existing key. Missing keys are a no-op.
    async fn expire(&self, key: &str, ttl_seconds: u64) -> anyhow::Result<()>;

    /// Pushes onto the front of a capped list and refreshes its TTL.
    async fn list_push_front(
        &self,
        key: &str,
        value: &str,
        max_len: usize,
        ttl_seconds: u64,
    ) -> anyhow::Result<()>;

    /// Reads `limit` entries starting at `offset`, newest first.
    async fn list_range(&self, key: &str, offset: usize, limit: usize)
        -> anyhow::Result<Vec<String>>;
}

/// Fetch and deserialize a cached JSON value.
pub async fn cache_get<T: DeserializeOwned>(
    cache: &dyn Cache,
    key: &str,
) -> anyhow::Result<Option<T>> {
    match cache.get_raw(key).await? {
        Some(raw) => match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Failed to deserialize cached value at {}: {}", key, e);
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

/// Serialize and store a JSON value with a TTL.
pub async fn cache_set<T: Serialize>(
    cache: &dyn Cache,
    key: &str,
    value: &T,
    ttl_seconds: u64,
) -> anyhow::Result<()> {
    let raw = serde_json::to_string(value)?;
    cache.set_raw(key, &raw, ttl_seconds).await
}

/// Redis-backed cache used in production.
#[derive(Clone)]
pub struct RedisCache {
    conn: redis::aio::ConnectionManager,
}

impl RedisCache {
    pub async fn new(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_tokio_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get_raw(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_raw(&self, key: &str, value: &str, ttl_seconds: u64) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        if ttl_seconds == 0 {
            let _: () = conn.del(key).await?;
            return Ok(());
        }
        let _: () = conn.set_ex(key, value, ttl_seconds as usize).await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: bool = conn.expire(key, ttl_seconds as usize).await?;
        Ok(())
    }

    async fn list_push_front(
        &self,
        key: &str,
        value: &str,
        max_len: usize,
        ttl_seconds: u64,
    ) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(key, value).await?;
        let _: () = conn.ltrim(key, 0, max_len as isize - 1).await?;
        let _: bool = conn.expire(key, ttl_seconds as usize).await?;
        Ok(())
    }

    async fn list_range(
        &self,
        key: &str,
        offset: usize,
        limit: usize,
    ) -> anyhow::Result<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let stop = offset + limit - 1;
        let items: Vec<String> = conn.lrange(key, offset as isize, stop as isize).await?;
        Ok(items)
    }
}

struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

struct MemoryList {
    items: Vec<String>,
    expires_at: Instant,
}

/// In-memory cache with real TTL semantics, used in tests and local runs
/// without redis. Reads past the deadline behave exactly like a missing key.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, MemoryEntry>,
    lists: DashMap<String, MemoryList>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn deadline(ttl_seconds: u64) -> Instant {
        Instant::now() + Duration::from_secs(ttl_seconds)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get_raw(&self, key: &str) -> anyhow::Result<Option<String>> {
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > Instant::now() {
                return Ok(Some(entry.value.clone()));
            }
        }
        // Lazily drop the expired entry
        self.entries.remove_if(key, |_, e| e.expires_at <= Instant::now());
        Ok(None)
    }

    async fn set_raw(&self, key: &str, value: &str, ttl_seconds: u64) -> anyhow::Result<()> {
        if ttl_seconds == 0 {
            self.entries.remove(key);
            debug!("Skipping cache write for already-expired key {}", key);
            return Ok(());
        }
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Self::deadline(ttl_seconds),
            },
        );
        Ok(())
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> anyhow::Result<()> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Self::deadline(ttl_seconds);
        }
        if let Some(mut list) = self.lists.get_mut(key) {
            list.expires_at = Self::deadline(ttl_seconds);
        }
        Ok(())
    }

    async fn list_push_front(
        &self,
        key: &str,
        value: &str,
        max_len: usize,
        ttl_seconds: u64,
    ) -> anyhow::Result<()> {
        let mut list = self.lists.entry(key.to_string()).or_insert_with(|| MemoryList {
            items: Vec::new(),
            expires_at: Self::deadline(ttl_seconds),
        });
        if list.expires_at <= Instant::now() {
            list.items.clear();
        }
        list.items.insert(0, value.to_string());
        list.items.truncate(max_len);
        list.expires_at = Self::deadline(ttl_seconds);
        Ok(())
    }

    async fn list_range(
        &self,
        key: &str,
        offset: usize,
        limit: usize,
    ) -> anyhow::Result<Vec<String>> {
        match self.lists.get(key) {
            Some(list) if list.expires_at > Instant::now() => Ok(list
                .items
                .iter()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect()),
            _ => Ok(Vec::new()),
        }
    }
}
