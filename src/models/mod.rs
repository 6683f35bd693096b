//! Data models for the connection registry.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod descriptor;

// Re-export commonly used types
pub use connection::ConnectionInfo;
pub use descriptor::{Descriptor, Engine};
