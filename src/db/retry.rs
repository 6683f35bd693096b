//! Connection attempts and the retry loop.
//!
//! [`open`] makes exactly one attempt. [`open_with_retry`] repeats it every
//! [`retry_interval`](RelationalDatabaseManager::retry_interval) while the
//! error is retryable and the [`RetryPolicy`] allows another attempt. The
//! sleep runs on the tokio clock and races a shutdown signal, so the loop can
//! be cancelled and driven by a paused clock in tests.

use crate::config::DEFAULT_MAX_CONNECT_ATTEMPTS;
use crate::db::driver::Driver;
use crate::db::manager::RelationalDatabaseManager;
use crate::error::{DbError, DbResult};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Bounds on the retry loop. `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: Option<u32>,
    /// Time since the first attempt after which no new attempt starts.
    pub max_elapsed: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(DEFAULT_MAX_CONNECT_ATTEMPTS),
            max_elapsed: None,
        }
    }
}

impl RetryPolicy {
    /// Retry retryable errors forever.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            max_elapsed: None,
        }
    }

    /// At most `attempts` attempts, with no time limit.
    pub fn attempts(attempts: u32) -> Self {
        Self {
            max_attempts: Some(attempts.max(1)),
            max_elapsed: None,
        }
    }

    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = Some(max_elapsed);
        self
    }

    /// Whether another attempt may start after `attempts` have been made and
    /// the next one would begin at `next_start` since the first.
    fn permits(&self, attempts: u32, next_start: Duration) -> bool {
        self.max_attempts.is_none_or(|max| attempts < max)
            && self.max_elapsed.is_none_or(|max| next_start <= max)
    }
}

/// A connection together with the number of attempts it took.
#[derive(Debug, Clone)]
pub struct Opened<C> {
    pub connection: C,
    pub attempts: u32,
}

/// Make a single connection attempt and return the driver's result verbatim.
pub async fn open<D, M>(driver: &D, manager: &M) -> DbResult<D::Connection>
where
    D: Driver,
    M: RelationalDatabaseManager + ?Sized,
{
    driver
        .open(manager.dial_handle(), manager.client_config())
        .await
}

/// Attempt to connect until success, a terminal error, policy exhaustion or
/// shutdown.
///
/// Terminal errors are returned as-is. Exhaustion yields
/// [`DbError::RetriesExhausted`] wrapping the last error, shutdown
/// [`DbError::Cancelled`].
pub async fn open_with_retry<D, M>(
    driver: &D,
    manager: &M,
    policy: &RetryPolicy,
    mut shutdown: watch::Receiver<bool>,
) -> DbResult<Opened<D::Connection>>
where
    D: Driver,
    M: RelationalDatabaseManager + ?Sized,
{
    let interval = manager.retry_interval();
    let started = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        if *shutdown.borrow() {
            return Err(DbError::Cancelled);
        }

        attempts = attempts.saturating_add(1);
        let result = tokio::select! {
            result = open(driver, manager) => result,
            _ = cancelled(&mut shutdown) => return Err(DbError::Cancelled),
        };

        let err = match result {
            Ok(connection) => {
                if attempts > 1 {
                    info!(
                        engine = %manager.engine(),
                        dsn = %manager.masked_connection_string(),
                        attempts,
                        "Connected after retrying"
                    );
                }
                return Ok(Opened {
                    connection,
                    attempts,
                });
            }
            Err(err) => err,
        };

        if !err.is_retryable() {
            warn!(
                engine = %manager.engine(),
                dsn = %manager.masked_connection_string(),
                error = %err,
                "Connection failed with a non-retryable error"
            );
            return Err(err);
        }

        if !policy.permits(attempts, started.elapsed() + interval) {
            warn!(
                engine = %manager.engine(),
                dsn = %manager.masked_connection_string(),
                attempts,
                error = %err,
                "Giving up on connection"
            );
            return Err(DbError::retries_exhausted(attempts, err));
        }

        warn!(
            engine = %manager.engine(),
            dsn = %manager.masked_connection_string(),
            attempt = attempts,
            retry_in = ?interval,
            error = %err,
            "Cannot connect, retrying"
        );

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancelled(&mut shutdown) => {
                debug!("Retry loop cancelled during backoff");
                return Err(DbError::Cancelled);
            }
        }
    }
}

/// Resolves once the shutdown flag is set. Never resolves if the sender is gone.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
