//! DB Registry Library
//!
//! Builds connection strings for MySQL, MariaDB, PostgreSQL and SQL Server,
//! opens connections through a pluggable driver with a bounded retry loop,
//! and caches one live connection per connection string.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{ClientConfig, Config};
pub use db::{ConnectionRegistry, Driver, RelationalDatabaseManager, RetryPolicy};
pub use error::{DbError, DbResult};
pub use models::{Descriptor, Engine};
