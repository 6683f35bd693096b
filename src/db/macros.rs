//! Pool dispatch macro.
//!
//! Expands to a `match` over the [`DbPool`](crate::db::DbPool) variants so
//! per-backend code reads linearly with zero runtime overhead.

/// Macro for generating `DbPool` dispatch match arms.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(pool, {
///     MySql(p) => p.close().await,
///     Postgres(p) => p.close().await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($pool:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $pool {
            $(
                $crate::db::driver::DbPool::$variant($p) => $body,
            )+
        }
    };
}
