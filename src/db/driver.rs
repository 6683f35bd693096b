//! Client-library adapters.
//!
//! The registry never talks to a database itself. It hands a [`DialHandle`]
//! and the descriptor's [`ClientConfig`] to a [`Driver`], which opens the
//! connection. [`SqlxDriver`] is the production implementation; tests plug in
//! fakes.

use crate::config::ClientConfig;
use crate::db::dial::DialHandle;
use crate::error::{DbError, DbResult};
use crate::impl_db_dispatch;
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, MySqlPool, PgPool};
use tracing::debug;

/// Opens connections for the registry.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Cached connection handle. Cloning must be cheap and share the
    /// underlying connection.
    type Connection: Clone + Send + Sync + 'static;

    /// Make a single connection attempt.
    async fn open(&self, dial: DialHandle, config: &ClientConfig) -> DbResult<Self::Connection>;

    /// Release a handle removed from the registry.
    async fn close(&self, _connection: Self::Connection) {}
}

/// Database-specific connection pool. MariaDB is served by the MySQL pool.
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
}

impl DbPool {
    /// Close the connection pool.
    pub async fn close(&self) {
        impl_db_dispatch!(self, {
            MySql(pool) => pool.close().await,
            Postgres(pool) => pool.close().await,
        })
    }

    pub fn is_closed(&self) -> bool {
        impl_db_dispatch!(self, {
            MySql(pool) => pool.is_closed(),
            Postgres(pool) => pool.is_closed(),
        })
    }
}

/// Query the server version over an open pool.
pub async fn server_version(pool: &DbPool) -> DbResult<String> {
    let version = impl_db_dispatch!(pool, {
        MySql(p) => sqlx::query_scalar::<_, String>("SELECT version()").fetch_one(p).await?,
        Postgres(p) => sqlx::query_scalar::<_, String>("SELECT version()").fetch_one(p).await?,
    });
    debug!(version = %version, "Got server version");
    Ok(version)
}

/// [`Driver`] backed by `sqlx` pools.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlxDriver;

impl SqlxDriver {
    pub fn new() -> Self {
        Self
    }

    async fn open_mysql(
        &self,
        options: MySqlConnectOptions,
        config: &ClientConfig,
    ) -> DbResult<DbPool> {
        let options = if config.log_statements {
            options
        } else {
            options.disable_statement_logging()
        };

        let pool = MySqlPoolOptions::new()
            .min_connections(config.min_connections_or_default())
            .max_connections(config.max_connections_or_default())
            .acquire_timeout(config.acquire_timeout_or_default())
            .idle_timeout(Some(config.idle_timeout_or_default()))
            .test_before_acquire(config.test_before_acquire_or_default())
            .connect_with(options)
            .await
            .map_err(|e| connect_error(e, config))?;
        Ok(DbPool::MySql(pool))
    }

    async fn open_postgres(
        &self,
        options: PgConnectOptions,
        config: &ClientConfig,
    ) -> DbResult<DbPool> {
        let options = if config.log_statements {
            options
        } else {
            options.disable_statement_logging()
        };

        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections_or_default())
            .max_connections(config.max_connections_or_default())
            .acquire_timeout(config.acquire_timeout_or_default())
            .idle_timeout(Some(config.idle_timeout_or_default()))
            .test_before_acquire(config.test_before_acquire_or_default())
            .connect_with(options)
            .await
            .map_err(|e| connect_error(e, config))?;
        Ok(DbPool::Postgres(pool))
    }
}

/// Map a pool connect failure, reporting the configured acquire timeout.
fn connect_error(err: sqlx::Error, config: &ClientConfig) -> DbError {
    match err {
        sqlx::Error::PoolTimedOut => DbError::timeout(
            "connection pool acquire",
            config.acquire_timeout_or_default().as_secs(),
        ),
        other => other.into(),
    }
}

#[async_trait]
impl Driver for SqlxDriver {
    type Connection = DbPool;

    async fn open(&self, dial: DialHandle, config: &ClientConfig) -> DbResult<DbPool> {
        config.validate().map_err(DbError::invalid_input)?;

        match dial {
            DialHandle::MySql(options) | DialHandle::MariaDb(options) => {
                self.open_mysql(options, config).await
            }
            DialHandle::Postgres(options) => self.open_postgres(options, config).await,
            DialHandle::SqlServer { .. } => Err(DbError::unsupported_engine(
                "SQL Server (no sqlx backend is available for it)",
            )),
        }
    }

    async fn close(&self, connection: DbPool) {
        connection.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Descriptor, Engine};

    #[tokio::test]
    async fn test_sqlserver_is_terminal() {
        let descriptor = Descriptor::new(Engine::SqlServer, "127.0.0.1", 1433, "root", "123", "tests");
        let err = SqlxDriver::new()
            .open(DialHandle::from_descriptor(&descriptor), &ClientConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UnsupportedEngine { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_pool_timeout_reports_configured_acquire_timeout() {
        let config = ClientConfig {
            acquire_timeout_secs: Some(5),
            ..ClientConfig::default()
        };
        let err = connect_error(sqlx::Error::PoolTimedOut, &config);
        assert!(matches!(err, DbError::Timeout { elapsed_secs: 5, .. }));
        assert!(err.is_retryable());

        let err = connect_error(sqlx::Error::PoolTimedOut, &ClientConfig::default());
        assert!(matches!(err, DbError::Timeout { elapsed_secs: 30, .. }));
    }

    #[tokio::test]
    async fn test_invalid_client_config_is_rejected_before_dialing() {
        let descriptor = Descriptor::new(Engine::Postgres, "127.0.0.1", 5432, "postgres", "", "");
        let config = ClientConfig {
            max_connections: Some(0),
            ..Default::default()
        };
        let err = SqlxDriver::new()
            .open(DialHandle::from_descriptor(&descriptor), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_lazy_pool_close() {
        let pool = DbPool::Postgres(PgPool::connect_lazy("postgres://localhost/db").unwrap());
        assert!(!pool.is_closed());
        pool.close().await;
        assert!(pool.is_closed());
    }
}
