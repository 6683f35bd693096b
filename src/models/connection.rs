//! Connection-related data models.

use crate::models::Engine;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Information about a cached connection (no secrets exposed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub engine: Engine,
    /// Connection string with the password masked.
    pub connection_string: String,
    pub connected_at: DateTime<Utc>,
    /// Attempts it took to establish the connection.
    pub attempts: u32,
}
