//! Engine-specific dial handles.
//!
//! A [`DialHandle`] is what the driver needs to physically open a connection:
//! `sqlx` connect options for the engines `sqlx` speaks, the raw connection
//! string otherwise. Building one performs no I/O.

use crate::models::{Descriptor, Engine};
use sqlx::mysql::{MySqlConnectOptions, MySqlSslMode};
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::str::FromStr;
use tracing::{debug, warn};

/// Engine-tagged dial handle.
#[derive(Debug, Clone)]
pub enum DialHandle {
    MySql(MySqlConnectOptions),
    MariaDb(MySqlConnectOptions),
    Postgres(PgConnectOptions),
    SqlServer { connection_string: String },
}

impl DialHandle {
    /// Build the dial handle for a descriptor.
    pub fn from_descriptor(descriptor: &Descriptor) -> Self {
        match descriptor.engine() {
            Engine::MySql => Self::MySql(mysql_options(descriptor)),
            Engine::MariaDb => Self::MariaDb(mysql_options(descriptor)),
            Engine::Postgres => Self::Postgres(postgres_options(descriptor)),
            Engine::SqlServer => Self::SqlServer {
                connection_string: descriptor.connection_string(),
            },
        }
    }

    pub fn engine(&self) -> Engine {
        match self {
            Self::MySql(_) => Engine::MySql,
            Self::MariaDb(_) => Engine::MariaDb,
            Self::Postgres(_) => Engine::Postgres,
            Self::SqlServer { .. } => Engine::SqlServer,
        }
    }
}

fn mysql_options(descriptor: &Descriptor) -> MySqlConnectOptions {
    let mut options = MySqlConnectOptions::new()
        .host(descriptor.host())
        .port(descriptor.port())
        .username(descriptor.user())
        .charset("utf8mb4");

    if !descriptor.password().is_empty() {
        options = options.password(descriptor.password());
    }
    if !descriptor.database().is_empty() {
        options = options.database(descriptor.database());
    }

    for (key, value) in descriptor.options() {
        match key.as_str() {
            "charset" => options = options.charset(value),
            "collation" => options = options.collation(value),
            "tls" | "ssl-mode" | "sslmode" => match mysql_ssl_mode(value) {
                Some(mode) => options = options.ssl_mode(mode),
                None => warn!(option = %key, value = %value, "Ignoring unrecognised TLS mode"),
            },
            _ => debug!(option = %key, "Option has no MySQL connect equivalent, ignoring"),
        }
    }

    options
}

/// Accepts `sqlx` mode names and the `true`/`false`/`skip-verify` spelling
/// common in MySQL DSNs.
fn mysql_ssl_mode(value: &str) -> Option<MySqlSslMode> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "skip-verify" => Some(MySqlSslMode::Required),
        "false" => Some(MySqlSslMode::Disabled),
        other => MySqlSslMode::from_str(other).ok(),
    }
}

fn postgres_options(descriptor: &Descriptor) -> PgConnectOptions {
    let mut options = PgConnectOptions::new()
        .host(descriptor.host())
        .port(descriptor.port())
        .username(descriptor.user());

    if !descriptor.password().is_empty() {
        options = options.password(descriptor.password());
    }
    if !descriptor.database().is_empty() {
        options = options.database(descriptor.database());
    }

    let mut runtime_params: Vec<(&str, &str)> = Vec::new();
    for (key, value) in descriptor.options() {
        match key.as_str() {
            "sslmode" => match PgSslMode::from_str(value) {
                Ok(mode) => options = options.ssl_mode(mode),
                Err(_) => warn!(option = %key, value = %value, "Ignoring unrecognised sslmode"),
            },
            "application_name" => options = options.application_name(value),
            _ => runtime_params.push((key.as_str(), value.as_str())),
        }
    }

    if !runtime_params.is_empty() {
        options = options.options(runtime_params);
    }

    options
}
