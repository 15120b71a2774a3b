use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use fast_track_core::api::{session_key, SESSION_KEY_PREFIX};
use fast_track_core::Session;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Whole-record session storage. Every write resets the record's expiry.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Session>, StorageError>;

    async fn put(&self, session: &Session) -> Result<(), StorageError>;

    async fn delete(&self, id: &str) -> Result<(), StorageError>;

    /// Every readable session record. Keys under the prefix that do not hold a
    /// session are skipped.
    async fn scan(&self) -> Result<Vec<Session>, StorageError>;

    fn backend(&self) -> &'static str;
}

/// Case-insensitive match on the owner email, newest start first.
pub async fn sessions_for_email(
    store: &dyn SessionStore,
    email: &str,
) -> Result<Vec<Session>, StorageError> {
    let wanted = email.to_lowercase();
    let mut found: Vec<Session> = store
        .scan()
        .await?
        .into_iter()
        .filter(|s| {
            s.email
                .as_deref()
                .is_some_and(|e| e.to_lowercase() == wanted)
        })
        .collect();
    found.sort_by(|a, b| b.start_time.cmp(&a.start_time));
    Ok(found)
}

#[derive(Clone)]
pub struct RedisSessionStore {
    redis: ConnectionManager,
    ttl_seconds: u64,
}

impl RedisSessionStore {
    pub async fn connect(redis_url: &str, ttl_seconds: u64) -> Result<Self, StorageError> {
        let client = Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;
        Ok(Self { redis, ttl_seconds })
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, id: &str) -> Result<Option<Session>, StorageError> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.get(session_key(id)).await?;
        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, session: &Session) -> Result<(), StorageError> {
        let mut conn = self.redis.clone();
        let serialized = serde_json::to_string(session)?;
        redis::cmd("SETEX")
            .arg(session_key(&session.id))
            .arg(self.ttl_seconds)
            .arg(&serialized)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(session_key(id)).await?;
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<Session>, StorageError> {
        let mut conn = self.redis.clone();
        let mut cursor: u64 = 0;
        let mut results = Vec::new();
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .cursor_arg(cursor)
                .arg("MATCH")
                .arg(format!("{SESSION_KEY_PREFIX}*"))
                .arg("COUNT")
                .arg(100u32)
                .query_async(&mut conn)
                .await?;
            cursor = next_cursor;
            if !keys.is_empty() {
                let values: Vec<Option<String>> =
                    redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;
                for (key, value) in keys.iter().zip(values) {
                    let Some(value) = value else { continue };
                    match serde_json::from_str::<Session>(&value) {
                        Ok(session) => results.push(session),
                        Err(err) => debug!(key = %key, error = %err, "skipping non-session record"),
                    }
                }
            }
            if cursor == 0 {
                break;
            }
        }
        Ok(results)
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

/// Process-local store with the same expiry semantics as Redis. Used when no
/// Redis URL is configured and in tests.
pub struct MemorySessionStore {
    ttl: Duration,
    records: RwLock<HashMap<String, (Session, Instant)>>,
}

impl MemorySessionStore {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            ttl: Duration::from_secs(ttl_seconds),
            records: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, id: &str) -> Result<Option<Session>, StorageError> {
        let now = Instant::now();
        let mut records = self.records.write().await;
        match records.get(id) {
            Some((session, expires_at)) if *expires_at > now => Ok(Some(session.clone())),
            Some(_) => {
                records.remove(id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, session: &Session) -> Result<(), StorageError> {
        let expires_at = Instant::now() + self.ttl;
        self.records
            .write()
            .await
            .insert(session.id.clone(), (session.clone(), expires_at));
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.records.write().await.remove(id);
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<Session>, StorageError> {
        let now = Instant::now();
        let mut records = self.records.write().await;
        records.retain(|_, (_, expires_at)| *expires_at > now);
        Ok(records.values().map(|(session, _)| session.clone()).collect())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fast_track_core::timefmt::now_millis;

    #[test_timeout::tokio_timeout_test(paused)]
    async fn memory_records_expire_after_ttl() {
        let store = MemorySessionStore::new(60);
        let session = Session::new("ttl", now_millis(), 16.0);
        store.put(&session).await.unwrap();
        assert_eq!(store.get(&session.id).await.unwrap(), Some(session.clone()));

        tokio::time::advance(Duration::from_secs(59)).await;
        store.put(&session).await.unwrap();
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(store.get(&session.id).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get(&session.id).await.unwrap(), None);
        assert!(store.records.read().await.is_empty());
        assert!(store.scan().await.unwrap().is_empty());
    }

    #[test_timeout::tokio_timeout_test]
    async fn email_lookup_ignores_case_and_missing_owner() {
        let store = MemorySessionStore::new(60);
        let older = Session::new("older", now_millis() - chrono::Duration::days(2), 16.0)
            .with_email(Some("Faster@Example.com".into()));
        let newer = Session::new("newer", now_millis(), 16.0)
            .with_email(Some("faster@example.com".into()));
        let anonymous = Session::new("anon", now_millis(), 16.0);
        for session in [&older, &newer, &anonymous] {
            store.put(session).await.unwrap();
        }

        let found = sessions_for_email(&store, "FASTER@example.com").await.unwrap();
        let names: Vec<_> = found.into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["newer", "older"]);
        assert!(sessions_for_email(&store, "other@example.com")
            .await
            .unwrap()
            .is_empty());
    }
}
