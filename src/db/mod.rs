//! Connection layer.
//!
//! This module provides everything between a descriptor and a live connection:
//! - The capability contract a registrable database implements
//! - Engine-specific dial handles
//! - Client-library drivers (sqlx-backed by default)
//! - Single attempts and the retry loop
//! - The single-flight connection registry
//! - Pool dispatch macro for reducing code duplication

pub mod dial;
pub mod driver;
#[macro_use]
pub mod macros;
pub mod manager;
pub mod registry;
pub mod retry;

pub use dial::DialHandle;
pub use driver::{DbPool, Driver, SqlxDriver, server_version};
pub use manager::{RelationalDatabaseManager, mask_connection_string};
pub use registry::ConnectionRegistry;
pub use retry::{Opened, RetryPolicy, open, open_with_retry};
