//! Shared types, error taxonomy, and small utilities used across all warmbox crates.

pub mod error;
pub mod types;

pub use {
    error::{Error, ErrorKind, FromMessage, Result},
    types::{NetworkPolicy, ResourceLimits},
};

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
