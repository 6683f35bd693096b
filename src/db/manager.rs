//! The capability set a value needs to be served by the connection registry.

use crate::config::ClientConfig;
use crate::db::dial::DialHandle;
use crate::models::{Descriptor, Engine};
use std::time::Duration;

/// A relational database the registry can connect to.
///
/// The registry keys its cache on [`connection_string`](Self::connection_string),
/// so two values rendering the same string share one connection.
pub trait RelationalDatabaseManager: Send + Sync {
    /// Canonical connection string; also the cache key.
    fn connection_string(&self) -> String;

    fn engine(&self) -> Engine;

    /// Pause between failed connection attempts.
    fn retry_interval(&self) -> Duration;

    /// Client-library settings, passed to the driver unmodified.
    fn client_config(&self) -> &ClientConfig;

    /// Engine-specific dial handle. Building it performs no I/O.
    fn dial_handle(&self) -> DialHandle;

    /// Connection string safe for logs.
    fn masked_connection_string(&self) -> String {
        mask_connection_string(&self.connection_string())
    }
}

impl RelationalDatabaseManager for Descriptor {
    fn connection_string(&self) -> String {
        Descriptor::connection_string(self)
    }

    fn engine(&self) -> Engine {
        Descriptor::engine(self)
    }

    fn retry_interval(&self) -> Duration {
        Descriptor::retry_interval(self)
    }

    fn client_config(&self) -> &ClientConfig {
        Descriptor::client_config(self)
    }

    fn dial_handle(&self) -> DialHandle {
        DialHandle::from_descriptor(self)
    }
}

/// Replace the password in a connection string with `****`.
///
/// Handles both the key/value grammar (`password=...`) and the
/// `user:password@host` grammar. Passwords may themselves contain `:`, `@`
/// and spaces.
pub fn mask_connection_string(dsn: &str) -> String {
    let first = |c: char| dsn.find(c).unwrap_or(dsn.len());
    if first('=') < first(':').min(first('@')) {
        mask_key_value(dsn)
    } else {
        mask_userinfo(dsn)
    }
}

fn mask_key_value(dsn: &str) -> String {
    let Some(start) = dsn.find(" password=") else {
        return dsn.to_string();
    };
    let value_start = start + " password=".len();
    let rest = &dsn[value_start..];
    // dbname always follows the password
    let value_len = rest
        .find(" dbname=")
        .or_else(|| rest.find(' '))
        .unwrap_or(rest.len());
    format!("{}****{}", &dsn[..value_start], &rest[value_len..])
}

fn mask_userinfo(dsn: &str) -> String {
    let user_start = dsn
        .find("://")
        .filter(|&i| dsn[..i].chars().all(|c| c.is_ascii_alphanumeric() || c == '+'))
        .map(|i| i + "://".len())
        .unwrap_or(0);

    // The host part never contains `@`, so the last one ends the password.
    let at = dsn.rfind("@tcp(").or_else(|| dsn.rfind('@'));
    let Some(at) = at.filter(|&at| at >= user_start) else {
        return dsn.to_string();
    };

    match dsn[user_start..at].find(':') {
        Some(colon) => format!("{}****{}", &dsn[..user_start + colon + 1], &dsn[at..]),
        None => dsn.to_string(),
    }
}
