//! Config schema types.

use std::{path::PathBuf, time::Duration};

use {
    serde::{Deserialize, Serialize},
    warmbox_common::ResourceLimits,
};

/// Default container image used when none is configured.
pub const DEFAULT_IMAGE: &str = "ubuntu:24.04";

/// Name prefix shared by every container this system creates.
pub const DEFAULT_CONTAINER_PREFIX: &str = "warmbox-sandbox";

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmboxConfig {
    pub pool: PoolConfig,
    pub runtime: RuntimeConfig,
    /// System default limits, used whenever an agent has no stored override.
    pub limits: ResourceLimits,
    pub database: DatabaseConfig,
}

/// Process-wide pool tuning. Not mutated after the pool manager is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Target count of unassigned containers kept ready.
    pub warm_pool_size: usize,
    /// Hard cap on live containers, warm and assigned together.
    pub max_containers: usize,
    /// How long an assigned container may sit before it is recycled.
    pub idle_timeout_ms: u64,
    pub default_image: String,
    pub maintenance_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            warm_pool_size: 2,
            max_containers: 10,
            idle_timeout_ms: 30 * 60 * 1000,
            default_image: DEFAULT_IMAGE.into(),
            maintenance_interval_secs: 30,
        }
    }
}

impl PoolConfig {
    /// Maintenance tick, never shorter than one second.
    #[must_use]
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs.max(1))
    }
}

/// Container runtime CLI settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Runtime binary looked up on `PATH` (e.g. `"docker"`, `"podman"`).
    pub binary: String,
    pub container_prefix: String,
    /// Timeout for create/start/rm/inspect/ps.
    pub command_timeout_secs: u64,
    /// Timeout for the `version` availability probe.
    pub probe_timeout_secs: u64,
    /// Default timeout for `exec` into a container.
    pub exec_timeout_secs: u64,
    /// Grace period handed to `stop -t` before the runtime kills the container.
    pub stop_grace_secs: u64,
    /// Command appended after the image so created containers stay alive once
    /// started. Empty keeps the image's own entrypoint/cmd.
    pub keepalive_command: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            binary: "docker".into(),
            container_prefix: DEFAULT_CONTAINER_PREFIX.into(),
            command_timeout_secs: 30,
            probe_timeout_secs: 5,
            exec_timeout_secs: 300,
            stop_grace_secs: 10,
            keepalive_command: vec!["sleep".into(), "infinity".into()],
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    #[must_use]
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }

    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

/// Policy database location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file. Defaults to `<data_dir>/warmbox.db`.
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    #[must_use]
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| crate::loader::data_dir().join("warmbox.db"))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, warmbox_common::NetworkPolicy};

    #[test]
    fn defaults_are_sane() {
        let cfg = WarmboxConfig::default();
        assert_eq!(cfg.pool.warm_pool_size, 2);
        assert_eq!(cfg.pool.max_containers, 10);
        assert_eq!(cfg.runtime.binary, "docker");
        assert_eq!(cfg.runtime.container_prefix, "warmbox-sandbox");
        assert_eq!(cfg.limits.network_policy, NetworkPolicy::None);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: WarmboxConfig = toml::from_str(
            r#"
            [pool]
            warm_pool_size = 4

            [limits]
            memory_limit_mb = 2048
            "#,
        )
        .unwrap();
        assert_eq!(cfg.pool.warm_pool_size, 4);
        assert_eq!(cfg.pool.max_containers, 10);
        assert_eq!(cfg.limits.memory_limit_mb, 2048);
        assert_eq!(cfg.limits.cpu_limit, 1.0);
    }

    #[test]
    fn maintenance_interval_clamped() {
        let pool = PoolConfig {
            maintenance_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(pool.maintenance_interval(), Duration::from_secs(1));
    }
}
