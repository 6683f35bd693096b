//! Connection registry.
//!
//! Caches one live connection per connection string. Lookups that miss run
//! the retry loop once per key; concurrent callers for the same key wait for
//! that single attempt instead of racing their own.
//!
//! # Concurrency
//!
//! - The key map sits behind a `tokio::sync::RwLock` that is never held across
//!   a driver call. Callers clone the per-key cell out under a brief lock and
//!   initialize it after releasing the lock.
//! - Each key owns an `Arc<OnceCell>`; `get_or_try_init` gives single-flight
//!   initialization. A failed initialization leaves the cell empty so the next
//!   caller starts a fresh attempt. The last caller holding an empty cell
//!   removes its key, so only successful connects stay in the map.
//! - [`evict`](ConnectionRegistry::evict) removing a key while its cell is
//!   still initializing orphans that cell: its waiters still get the
//!   connection, but it is not cached.

use crate::db::driver::{Driver, SqlxDriver};
use crate::db::manager::{RelationalDatabaseManager, mask_connection_string};
use crate::db::retry::{RetryPolicy, open_with_retry};
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionInfo, Engine};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock, watch};
use tracing::{debug, info};

struct RegistryEntry<C> {
    connection: C,
    engine: Engine,
    connected_at: DateTime<Utc>,
    attempts: u32,
}

type Slot<C> = Arc<OnceCell<RegistryEntry<C>>>;

/// Cache from connection string to connection handle.
pub struct ConnectionRegistry<D: Driver = SqlxDriver> {
    driver: D,
    policy: RetryPolicy,
    entries: RwLock<HashMap<String, Slot<D::Connection>>>,
    shutdown: watch::Sender<bool>,
}

impl<D: Driver> ConnectionRegistry<D> {
    /// Create an empty registry with the default retry policy.
    pub fn new(driver: D) -> Self {
        Self::with_policy(driver, RetryPolicy::default())
    }

    pub fn with_policy(driver: D, policy: RetryPolicy) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            driver,
            policy,
            entries: RwLock::new(HashMap::new()),
            shutdown,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Return the cached connection for this database, connecting on first use.
    pub async fn acquire<M>(&self, manager: &M) -> DbResult<D::Connection>
    where
        M: RelationalDatabaseManager + ?Sized,
    {
        let key = manager.connection_string();
        let slot = self.slot(&key).await;

        if let Some(entry) = slot.get() {
            debug!(engine = %entry.engine, "Connection cache hit");
            return Ok(entry.connection.clone());
        }

        let initialized = slot
            .get_or_try_init(|| async {
                info!(
                    engine = %manager.engine(),
                    dsn = %manager.masked_connection_string(),
                    "Opening connection"
                );
                let opened =
                    open_with_retry(&self.driver, manager, &self.policy, self.shutdown.subscribe())
                        .await?;
                info!(
                    engine = %manager.engine(),
                    dsn = %manager.masked_connection_string(),
                    attempts = opened.attempts,
                    "Connection cached"
                );
                Ok::<_, DbError>(RegistryEntry {
                    connection: opened.connection,
                    engine: manager.engine(),
                    connected_at: Utc::now(),
                    attempts: opened.attempts,
                })
            })
            .await;

        let err = match initialized {
            Ok(entry) => return Ok(entry.connection.clone()),
            Err(err) => err,
        };
        self.discard_empty(&key, slot).await;
        Err(err)
    }

    /// Remove a key whose cell never initialized once no other caller holds it.
    async fn discard_empty(&self, key: &str, slot: Slot<D::Connection>) {
        let mut entries = self.entries.write().await;
        // Clones are only made under this lock: the map plus ours means unused.
        let unused = slot.get().is_none()
            && Arc::strong_count(&slot) == 2
            && entries.get(key).is_some_and(|current| Arc::ptr_eq(current, &slot));
        // Release before unlocking so the next failing caller sees the final count.
        drop(slot);
        if unused {
            entries.remove(key);
            debug!(dsn = %mask_connection_string(key), "Discarded failed connection slot");
        }
    }

    /// Get or create the cell for a key.
    async fn slot(&self, key: &str) -> Slot<D::Connection> {
        {
            let entries = self.entries.read().await;
            if let Some(slot) = entries.get(key) {
                return Arc::clone(slot);
            }
        }

        let mut entries = self.entries.write().await;
        // Double-check after acquiring write lock
        Arc::clone(
            entries
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new())),
        )
    }

    /// Cached connection for a connection string, without connecting.
    pub async fn get(&self, key: &str) -> Option<D::Connection> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .and_then(|slot| slot.get())
            .map(|entry| entry.connection.clone())
    }

    /// Whether a connection is cached for this connection string.
    pub async fn contains(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }

    /// Details about a cached connection.
    pub async fn info(&self, key: &str) -> Option<ConnectionInfo> {
        let entries = self.entries.read().await;
        entries.get(key).and_then(|slot| slot.get()).map(|entry| ConnectionInfo {
            engine: entry.engine,
            connection_string: mask_connection_string(key),
            connected_at: entry.connected_at,
            attempts: entry.attempts,
        })
    }

    /// Number of cached connections. Keys still connecting are not counted.
    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        entries.values().filter(|slot| slot.get().is_some()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Connection strings of every cached connection, sorted.
    ///
    /// Keys are unmasked and carry passwords; use [`list`](Self::list) for
    /// anything that is displayed or logged.
    pub async fn keys(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(_, slot)| slot.get().is_some())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Details of every cached connection, ordered by masked connection string.
    pub async fn list(&self) -> Vec<ConnectionInfo> {
        let entries = self.entries.read().await;
        let mut infos: Vec<ConnectionInfo> = entries
            .iter()
            .filter_map(|(key, slot)| {
                slot.get().map(|entry| ConnectionInfo {
                    engine: entry.engine,
                    connection_string: mask_connection_string(key),
                    connected_at: entry.connected_at,
                    attempts: entry.attempts,
                })
            })
            .collect();
        infos.sort_by(|a, b| a.connection_string.cmp(&b.connection_string));
        infos
    }

    /// Drop the cached connection for this database and close it.
    ///
    /// Returns `true` if a connection was cached. The next
    /// [`acquire`](Self::acquire) connects again.
    pub async fn evict<M>(&self, manager: &M) -> bool
    where
        M: RelationalDatabaseManager + ?Sized,
    {
        let key = manager.connection_string();
        let removed = {
            let mut entries = self.entries.write().await;
            entries.remove(&key)
        }; // Write lock released here

        let connection = removed.and_then(|slot| slot.get().map(|entry| entry.connection.clone()));
        match connection {
            Some(connection) => {
                info!(dsn = %manager.masked_connection_string(), "Evicting connection");
                self.driver.close(connection).await;
                true
            }
            None => false,
        }
    }

    /// Close every cached connection and empty the registry.
    pub async fn close_all(&self) {
        // Drain under lock, close outside lock
        let drained: Vec<_> = {
            let mut entries = self.entries.write().await;
            entries.drain().collect()
        };

        for (key, slot) in drained {
            if let Some(entry) = slot.get() {
                info!(dsn = %mask_connection_string(&key), "Closing connection");
                self.driver.close(entry.connection.clone()).await;
            }
        }
        info!("All connections closed");
    }

    /// Cancel every in-flight and future connection attempt.
    ///
    /// Cached connections stay available; lookups that would need to connect
    /// fail with [`DbError::Cancelled`].
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

impl Default for ConnectionRegistry<SqlxDriver> {
    fn default() -> Self {
        Self::new(SqlxDriver::new())
    }
}

impl<D: Driver> std::fmt::Debug for ConnectionRegistry<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("policy", &self.policy)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::db::dial::DialHandle;
    use crate::models::Descriptor;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Driver that hands out increasing ids and counts calls.
    #[derive(Default)]
    struct CountingDriver {
        opens: AtomicU32,
        closes: AtomicU32,
    }

    #[async_trait]
    impl Driver for CountingDriver {
        type Connection = u32;

        async fn open(&self, _dial: DialHandle, _config: &ClientConfig) -> DbResult<u32> {
            Ok(self.opens.fetch_add(1, Ordering::SeqCst) + 1)
        }

        async fn close(&self, _connection: u32) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Driver whose server rejects every login.
    struct RefusingDriver;

    #[async_trait]
    impl Driver for RefusingDriver {
        type Connection = u32;

        async fn open(&self, _dial: DialHandle, _config: &ClientConfig) -> DbResult<u32> {
            Err(DbError::authentication("Access denied for user 'root'"))
        }
    }

    fn descriptor(database: &str) -> Descriptor {
        Descriptor::new(Engine::MySql, "127.0.0.1", 3306, "root", "123", database)
    }

    #[tokio::test]
    async fn test_registry_starts_empty() {
        let registry = ConnectionRegistry::new(CountingDriver::default());
        assert!(registry.is_empty().await);
        assert!(registry.list().await.is_empty());
        assert!(!registry.is_shut_down());
    }

    #[tokio::test]
    async fn test_pending_slot_is_not_counted() {
        let registry = ConnectionRegistry::new(CountingDriver::default());
        let _slot = registry.slot("pending").await;
        assert_eq!(registry.len().await, 0);
        assert!(!registry.contains("pending").await);
    }

    #[tokio::test]
    async fn test_info_masks_password() {
        let registry = ConnectionRegistry::new(CountingDriver::default());
        let db = descriptor("tests");
        registry.acquire(&db).await.unwrap();

        let info = registry.info(&db.connection_string()).await.unwrap();
        assert_eq!(info.engine, Engine::MySql);
        assert_eq!(info.attempts, 1);
        assert_eq!(info.connection_string, "root:****@tcp(127.0.0.1:3306)/tests?");
    }

    #[tokio::test]
    async fn test_evict_closes_and_reconnects() {
        let registry = ConnectionRegistry::new(CountingDriver::default());
        let db = descriptor("tests");

        assert_eq!(registry.acquire(&db).await.unwrap(), 1);
        assert!(registry.evict(&db).await);
        assert!(!registry.evict(&db).await);
        assert_eq!(registry.driver().closes.load(Ordering::SeqCst), 1);

        assert_eq!(registry.acquire(&db).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = ConnectionRegistry::new(CountingDriver::default());
        registry.acquire(&descriptor("a")).await.unwrap();
        registry.acquire(&descriptor("b")).await.unwrap();
        assert_eq!(registry.len().await, 2);

        registry.close_all().await;
        assert!(registry.is_empty().await);
        assert_eq!(registry.driver().closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shutdown_keeps_cached_connections() {
        let registry = ConnectionRegistry::new(CountingDriver::default());
        let cached = descriptor("cached");
        registry.acquire(&cached).await.unwrap();

        registry.shutdown();
        assert!(registry.is_shut_down());
        assert_eq!(registry.acquire(&cached).await.unwrap(), 1);
        assert!(matches!(
            registry.acquire(&descriptor("fresh")).await,
            Err(DbError::Cancelled)
        ));
        assert_eq!(registry.entries.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_acquire_leaves_no_slot() {
        let registry = ConnectionRegistry::new(RefusingDriver);

        for i in 0..100 {
            let db = descriptor(&format!("db{}", i));
            assert!(matches!(
                registry.acquire(&db).await,
                Err(DbError::Authentication { .. })
            ));
        }

        assert!(registry.is_empty().await);
        assert!(registry.entries.read().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_leave_no_slot() {
        let registry = Arc::new(ConnectionRegistry::new(RefusingDriver));
        let db = descriptor("tests");

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let db = db.clone();
                tokio::spawn(async move { registry.acquire(&db).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_err());
        }

        assert!(registry.entries.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_keys_lists_cached_connection_strings() {
        let registry = ConnectionRegistry::new(CountingDriver::default());
        assert!(registry.keys().await.is_empty());

        let b = descriptor("b");
        let a = descriptor("a");
        registry.acquire(&b).await.unwrap();
        registry.acquire(&a).await.unwrap();
        let _pending = registry.slot("pending").await;

        assert_eq!(
            registry.keys().await,
            vec![a.connection_string(), b.connection_string()]
        );
        assert!(registry.get(&a.connection_string()).await.is_some());
    }
}
