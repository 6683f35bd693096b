//! Error types for the connection registry.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Every variant is classified as retryable or terminal through [`DbError::is_retryable`],
//! which is what the retry loop consults between attempts.

use crate::config::DEFAULT_ACQUIRE_TIMEOUT_SECS;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Database '{database}' not found: {hint}")]
    DatabaseNotFound { database: String, hint: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Unsupported database engine: {engine}")]
    UnsupportedEngine { engine: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Giving up after {attempts} connection attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: Box<DbError>,
    },

    #[error("Connection attempt cancelled")]
    Cancelled,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create a database not found error.
    pub fn database_not_found(database: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::DatabaseNotFound {
            database: database.into(),
            hint: hint.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create an unsupported engine error.
    pub fn unsupported_engine(engine: impl Into<String>) -> Self {
        Self::UnsupportedEngine {
            engine: engine.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Wrap the last attempt's error once the retry policy is used up.
    pub fn retries_exhausted(attempts: u32, last_error: DbError) -> Self {
        Self::RetriesExhausted {
            attempts,
            last_error: Box::new(last_error),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Authentication { .. } => {
                Some("Verify the username and password of the descriptor")
            }
            Self::DatabaseNotFound { hint, .. } => Some(hint),
            Self::RetriesExhausted { last_error, .. } => last_error.suggestion(),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    ///
    /// Only transient transport failures qualify. Bad credentials, unknown
    /// databases and malformed input fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::invalid_input(format!(
                "Invalid connection configuration: {}",
                msg
            )),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                classify_server_error(db_err.message(), code.as_deref())
            }
            sqlx::Error::PoolTimedOut => {
                DbError::timeout("connection pool acquire", DEFAULT_ACQUIRE_TIMEOUT_SECS)
            }
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::WorkerCrashed => DbError::connection(
                "Database worker crashed",
                "Check database server status",
            ),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Classify an error reported by the server during the handshake.
///
/// SQLSTATE `28000`/`28P01` and MySQL code `1045` are authentication failures,
/// `3D000` and MySQL `1049` an unknown database. Everything else is treated as
/// a transient connection failure.
fn classify_server_error(message: &str, code: Option<&str>) -> DbError {
    let lower = message.to_lowercase();

    match code {
        Some("28000") | Some("28P01") | Some("1045") => {
            return DbError::authentication(message);
        }
        Some("3D000") | Some("1049") => {
            return DbError::database_not_found(
                extract_quoted(message).unwrap_or_default(),
                "Check that the database name exists",
            );
        }
        _ => {}
    }

    if lower.contains("password authentication failed") || lower.contains("access denied") {
        return DbError::authentication(message);
    }

    if lower.contains("unknown database") || lower.contains("does not exist") {
        return DbError::database_not_found(
            extract_quoted(message).unwrap_or_default(),
            "Check that the database name exists",
        );
    }

    DbError::connection(message, "Check that the database server is running and accessible")
}

/// First `'quoted'` or `"quoted"` token in a server message.
fn extract_quoted(message: &str) -> Option<String> {
    let start = message.find(['\'', '"'])?;
    let quote = message[start..].chars().next()?;
    let rest = &message[start + 1..];
    let end = rest.find(quote)?;
    Some(rest[..end].to_string())
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
