//! Configuration loading, validation and env substitution.
//!
//! Config files: `warmbox.toml`, `warmbox.yaml`, or `warmbox.json`
//! Searched in `./` then `~/.config/warmbox/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-fallback}` substitution in all string
//! values, and `WARMBOX_*` environment overrides applied after the file.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{apply_env_overrides, config_dir, data_dir, discover_and_load, load_config},
    schema::{DatabaseConfig, PoolConfig, RuntimeConfig, WarmboxConfig},
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
