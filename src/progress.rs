//! Progress / status store
//!
//! Rebuild runs publish a JSON status document under `<prefix>:<run_id>` with
//! a TTL. The store is observability only: the orchestrator never reads it back
//! to decide what to do next, apart from answering status requests for runs it
//! no longer tracks in memory.
//!
//! Two backends are provided:
//!
//! - [`InMemoryProgressStore`]: TTL'd map, used in tests and single-process
//!   deployments
//! - [`RedisProgressStore`]: `SET key blob EX ttl` / `GET key` over a
//!   multiplexed connection

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use redis::aio::MultiplexedConnection;
use redis::Client;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::ProgressError;

/// TTL'd key/value interface for human-observable progress
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Store a blob, replacing any previous value and resetting its TTL
    async fn put(&self, key: &str, blob: String, ttl: Duration) -> Result<(), ProgressError>;

    /// Fetch a blob if present and not expired
    async fn get(&self, key: &str) -> Result<Option<String>, ProgressError>;
}

// ============================================================================
// In-memory backend
// ============================================================================

#[derive(Debug, Clone)]
struct Entry {
    blob: String,
    expires_at_ms: i64,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Utc::now().timestamp_millis() >= self.expires_at_ms
    }
}

/// Process-local progress store with lazy expiry
#[derive(Debug, Default)]
pub struct InMemoryProgressStore {
    entries: DashMap<String, Entry>,
}

impl InMemoryProgressStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_expired()).count()
    }

    /// Whether no live entries remain
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired());
        before - self.entries.len()
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn put(&self, key: &str, blob: String, ttl: Duration) -> Result<(), ProgressError> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at_ms = Utc::now().timestamp_millis().saturating_add(ttl_ms);
        self.entries.insert(
            key.to_string(),
            Entry {
                blob,
                expires_at_ms,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ProgressError> {
        let hit = self.entries.get(key).map(|e| e.clone());
        match hit {
            Some(entry) if entry.is_expired() => {
                self.entries.remove(key);
                Ok(None)
            },
            Some(entry) => Ok(Some(entry.blob)),
            None => Ok(None),
        }
    }
}

// ============================================================================
// Redis backend
// ============================================================================

/// Progress store on Redis
///
/// The connection is opened lazily and re-opened after a failed command.
pub struct RedisProgressStore {
    client: Client,
    url: String,
    connection: RwLock<Option<MultiplexedConnection>>,
    command_timeout: Duration,
}

impl RedisProgressStore {
    /// Create a store for the given URL without connecting yet
    pub fn new(url: &str) -> Result<Self, ProgressError> {
        let client = Client::open(url)
            .map_err(|e| ProgressError::Connection(format!("{}: {}", redact_url(url), e)))?;
        Ok(Self {
            client,
            url: url.to_string(),
            connection: RwLock::new(None),
            command_timeout: Duration::from_secs(2),
        })
    }

    /// Override the per-command timeout
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    async fn connection(&self) -> Result<MultiplexedConnection, ProgressError> {
        if let Some(conn) = self.connection.read().await.as_ref() {
            return Ok(conn.clone());
        }

        let conn = tokio::time::timeout(
            self.command_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| ProgressError::Connection("Connection timeout".to_string()))?
        .map_err(|e| ProgressError::Connection(format!("{}: {}", redact_url(&self.url), e)))?;

        *self.connection.write().await = Some(conn.clone());
        debug!(url = %redact_url(&self.url), "Progress store connection established");
        Ok(conn)
    }

    async fn reset(&self) {
        *self.connection.write().await = None;
    }

    async fn run<T: redis::FromRedisValue + Send>(
        &self,
        cmd: redis::Cmd,
    ) -> Result<T, ProgressError> {
        let mut conn = self.connection().await?;
        let result = tokio::time::timeout(self.command_timeout, cmd.query_async::<T>(&mut conn)).await;
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    self.reset().await;
                }
                Err(ProgressError::Command(e.to_string()))
            },
            Err(_) => {
                self.reset().await;
                Err(ProgressError::Command("Command timeout".to_string()))
            },
        }
    }
}

#[async_trait]
impl ProgressStore for RedisProgressStore {
    async fn put(&self, key: &str, blob: String, ttl: Duration) -> Result<(), ProgressError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(blob).arg("EX").arg(ttl.as_secs().max(1));
        self.run::<()>(cmd).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ProgressError> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.run::<Option<String>>(cmd).await
    }
}

/// Strip credentials from a Redis URL before it reaches a log or error
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => {
            format!("{}***{}", &url[..scheme + 3], &url[at..])
        },
        _ => url.to_string(),
    }
}
