//! # User-Group Cache
//!
//! A read-through cache in front of the user-group lookup, the one lookup
//! hot enough to be cached.
//!
//! ## Read Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  find_user_group(db, "u1", bypass_cache)                                │
//! │       │                                                                 │
//! │       ├── bypass_cache? ──────────────────────────────┐                 │
//! │       ▼                                               │                 │
//! │  cache.get("user_group:u1")                           │                 │
//! │       │                                               │                 │
//! │       ├── hit ──► decode ──► return                   │                 │
//! │       ├── miss / backend error / bad value ───────────┤                 │
//! │       │                                               ▼                 │
//! │       │                               UserGroupRepository (Postgres)   │
//! │       │                                               │                 │
//! │       │                            cache.set(key, json, ttl)            │
//! │       │                            (failure logged, value still        │
//! │       │                             returned)                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A bypassed read still refreshes the cached entry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use syllabus_core::UserGroup;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::DbResult;
use crate::executor::Executor;
use crate::repository::user_group::UserGroupRepository;

// =============================================================================
// Cache Backends
// =============================================================================

/// Key/value store with per-entry expiry.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> DbResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> DbResult<()>;

    async fn delete(&self, key: &str) -> DbResult<()>;
}

/// Process-local cache, for a single instance or for tests.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        MemoryCache::default()
    }

    /// Number of stored entries, expired ones included until next read.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> DbResult<Option<String>> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some((value, expires_at)) if *expires_at > Instant::now() => {
                    return Ok(Some(value.clone()))
                }
                Some(_) => {}
            }
        }
        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> DbResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> DbResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Redis-backed cache shared between instances.
#[derive(Clone)]
pub struct RedisCache {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisCache {
    /// Connects to `url` (e.g. `redis://localhost:6379`).
    pub async fn connect(url: &str) -> DbResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        debug!("Redis cache connected");
        Ok(RedisCache { conn })
    }
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache").finish_non_exhaustive()
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> DbResult<()> {
        let mut conn = self.conn.clone();
        // SET EX rejects a zero expiry.
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, seconds).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> DbResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Cache key layout and entry lifetime.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Default: 5 minutes
    pub ttl: Duration,

    /// Keys are `<key_prefix>:<user_id>`.
    /// Default: "user_group"
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            ttl: Duration::from_secs(300),
            key_prefix: "user_group".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn key(&self, user_id: &str) -> String {
        format!("{}:{}", self.key_prefix, user_id)
    }
}

// =============================================================================
// CachedUserGroupRepository
// =============================================================================

/// [`UserGroupRepository::find_user_group`] behind a cache.
///
/// ## Example
/// ```rust,ignore
/// let cache = Arc::new(RedisCache::connect("redis://localhost").await?);
/// let groups = CachedUserGroupRepository::new(cache, CacheConfig::default());
/// let group = groups.find_user_group(db.pool(), "user-1", false).await?;
/// ```
#[derive(Clone)]
pub struct CachedUserGroupRepository {
    inner: UserGroupRepository,
    cache: Arc<dyn Cache>,
    config: CacheConfig,
}

impl CachedUserGroupRepository {
    pub fn new(cache: Arc<dyn Cache>, config: CacheConfig) -> Self {
        CachedUserGroupRepository {
            inner: UserGroupRepository,
            cache,
            config,
        }
    }

    /// The user's origin group, from cache unless `bypass_cache` is set.
    ///
    /// Cache failures never fail the call; they are logged and the lookup
    /// goes to the database. Database errors, including
    /// [`DbError::NotFound`](crate::error::DbError::NotFound), are returned as-is and never cached.
    #[tracing::instrument(name = "CachedUserGroupRepo.FindUserGroup", skip_all, fields(user_id = %user_id, bypass_cache = bypass_cache))]
    pub async fn find_user_group(
        &self,
        db: &dyn Executor,
        user_id: &str,
        bypass_cache: bool,
    ) -> DbResult<UserGroup> {
        let key = self.config.key(user_id);

        if !bypass_cache {
            match self.cache.get(&key).await {
                Ok(Some(cached)) => match serde_json::from_str::<UserGroup>(&cached) {
                    Ok(group) => {
                        debug!("User group cache hit");
                        return Ok(group);
                    }
                    Err(e) => warn!(error = %e, "Discarding undecodable cached user group"),
                },
                Ok(None) => debug!("User group cache miss"),
                Err(e) => warn!(error = %e, "User group cache read failed"),
            }
        }

        let group = self.inner.find_user_group(db, user_id).await?;

        match serde_json::to_string(&group) {
            Ok(encoded) => {
                if let Err(e) = self.cache.set(&key, &encoded, self.config.ttl).await {
                    warn!(error = %e, "User group cache write failed");
                }
            }
            Err(e) => warn!(error = %e, "User group not cacheable"),
        }

        Ok(group)
    }

    /// Drops the cached entry for `user_id`.
    pub async fn invalidate(&self, user_id: &str) -> DbResult<()> {
        self.cache.delete(&self.config.key(user_id)).await
    }
}

impl std::fmt::Debug for CachedUserGroupRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedUserGroupRepository")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::testing::{row_of, MockExecutor};

    /// Backend that fails every call.
    struct BrokenCache;

    #[async_trait]
    impl Cache for BrokenCache {
        async fn get(&self, _key: &str) -> DbResult<Option<String>> {
            Err(DbError::Cache("connection refused".to_string()))
        }

        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> DbResult<()> {
            Err(DbError::Cache("connection refused".to_string()))
        }

        async fn delete(&self, _key: &str) -> DbResult<()> {
            Err(DbError::Cache("connection refused".to_string()))
        }
    }

    fn origin_group() -> UserGroup {
        UserGroup::new("user-1", "USER_GROUP_TEACHER")
    }

    #[tokio::test]
    async fn test_memory_cache_expires() {
        let cache = MemoryCache::new();
        cache.set("k", "v", Duration::from_millis(20)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_second_read_served_from_cache() {
        let cache = Arc::new(MemoryCache::new());
        let repo = CachedUserGroupRepository::new(cache.clone(), CacheConfig::default());
        let db = MockExecutor::new();
        db.push_rows(vec![row_of(&origin_group())]);

        let first = repo.find_user_group(&db, "user-1", false).await.unwrap();
        let second = repo.find_user_group(&db, "user-1", false).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(db.executed().len(), 1);
        assert!(cache.get("user_group:user-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_bypass_goes_to_database() {
        let cache = Arc::new(MemoryCache::new());
        let repo = CachedUserGroupRepository::new(cache, CacheConfig::default());
        let db = MockExecutor::new();
        db.push_rows(vec![row_of(&origin_group())]);
        db.push_rows(vec![row_of(&origin_group())]);

        repo.find_user_group(&db, "user-1", false).await.unwrap();
        repo.find_user_group(&db, "user-1", true).await.unwrap();

        assert_eq!(db.executed().len(), 2);
    }

    #[tokio::test]
    async fn test_broken_cache_falls_back_to_database() {
        let repo = CachedUserGroupRepository::new(Arc::new(BrokenCache), CacheConfig::default());
        let db = MockExecutor::new();
        db.push_rows(vec![row_of(&origin_group())]);

        let group = repo.find_user_group(&db, "user-1", false).await.unwrap();
        assert_eq!(group.group_id, "USER_GROUP_TEACHER");
    }

    #[tokio::test]
    async fn test_not_found_is_not_cached() {
        let cache = Arc::new(MemoryCache::new());
        let repo = CachedUserGroupRepository::new(cache.clone(), CacheConfig::default());
        let db = MockExecutor::new();
        db.push_rows(Vec::new());

        let err = repo.find_user_group(&db, "ghost", false).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalidate_removes_entry() {
        let cache = Arc::new(MemoryCache::new());
        let repo = CachedUserGroupRepository::new(
            cache.clone(),
            CacheConfig::default().key_prefix("ug"),
        );
        cache.set("ug:user-1", "{}", Duration::from_secs(60)).await.unwrap();

        repo.invalidate("user-1").await.unwrap();
        assert_eq!(cache.get("ug:user-1").await.unwrap(), None);
    }
}
