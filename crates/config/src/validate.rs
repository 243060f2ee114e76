//! Semantic validation of a loaded configuration.

use crate::schema::WarmboxConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "pool.max_containers"
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    fn push(&mut self, severity: Severity, path: &str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path: path.to_string(),
            message: message.into(),
        });
    }
}

/// Check cross-field constraints that serde cannot express.
#[must_use]
pub fn validate(config: &WarmboxConfig) -> ValidationResult {
    let mut result = ValidationResult::default();
    let pool = &config.pool;

    if pool.max_containers == 0 {
        result.push(
            Severity::Error,
            "pool.max_containers",
            "must be at least 1",
        );
    }
    if pool.warm_pool_size > pool.max_containers {
        result.push(
            Severity::Error,
            "pool.warm_pool_size",
            format!(
                "warm pool target {} exceeds max_containers {}",
                pool.warm_pool_size, pool.max_containers
            ),
        );
    }
    if pool.maintenance_interval_secs == 0 {
        result.push(
            Severity::Warning,
            "pool.maintenance_interval_secs",
            "0 is clamped to 1 second",
        );
    }
    if pool.default_image.trim().is_empty() {
        result.push(Severity::Error, "pool.default_image", "must not be empty");
    }

    if !(config.limits.cpu_limit > 0.0) {
        result.push(Severity::Error, "limits.cpu_limit", "must be positive");
    }
    if config.limits.memory_limit_mb == 0 {
        result.push(
            Severity::Error,
            "limits.memory_limit_mb",
            "must be positive",
        );
    }

    if config.runtime.container_prefix.trim().is_empty() {
        result.push(
            Severity::Error,
            "runtime.container_prefix",
            "must not be empty; stale cleanup matches on it",
        );
    }

    result
}
