//! Metrics definitions and export for warmbox.
//!
//! Instrumentation sites use the `metrics` crate facade re-exported here. When
//! no recorder is installed the macros are no-ops. With the `prometheus`
//! feature, [`init_metrics`] installs a Prometheus recorder whose handle can
//! render the text exposition format.
//!
//! ```rust,ignore
//! use warmbox_metrics::{counter, gauge, pool};
//!
//! counter!(pool::CONTAINERS_CREATED_TOTAL).increment(1);
//! gauge!(pool::WARM).set(2.0);
//! ```

mod definitions;
mod recorder;

pub use {
    definitions::*,
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
