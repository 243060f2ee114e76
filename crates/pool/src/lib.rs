//! Warm pool of sandbox containers.
//!
//! [`PoolManager`] keeps a target number of pre-created containers ready,
//! binds them to sessions on demand, and recycles idle or dead ones from a
//! periodic maintenance task. When the container runtime is missing, the
//! manager stays disabled and every status call reports an empty pool.

pub mod entry;
pub mod error;
pub mod manager;

pub use {
    entry::{PoolEntry, PoolStats},
    error::{PoolError, Result},
    manager::PoolManager,
};
