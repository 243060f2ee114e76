use std::path::PathBuf;

use {
    serde::{Deserialize, Serialize},
    warmbox_common::{NetworkPolicy, ResourceLimits, now_ms},
};

/// Everything needed to create one container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Generated by warmbox; the container name is derived from it.
    pub id: String,
    /// Owning agent. Empty for warm containers created before any assignment.
    pub agent_id: String,
    pub image: String,
    pub cpu_limit: f64,
    pub memory_limit_mb: u64,
    pub network_policy: NetworkPolicy,
    /// 0 = unlimited.
    pub timeout_seconds: u64,
    pub read_only_mounts: Vec<PathBuf>,
    /// Host directory bound read-write at [`WORKSPACE_MOUNT`](crate::WORKSPACE_MOUNT).
    pub work_dir: Option<PathBuf>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl SandboxConfig {
    /// Fresh config with a new sandbox id, copying the policy-controlled fields
    /// from `limits`.
    #[must_use]
    pub fn new(agent_id: impl Into<String>, image: impl Into<String>, limits: &ResourceLimits) -> Self {
        let now = now_ms();
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            agent_id: agent_id.into(),
            image: image.into(),
            cpu_limit: limits.cpu_limit,
            memory_limit_mb: limits.memory_limit_mb,
            network_policy: limits.network_policy,
            timeout_seconds: limits.timeout_seconds,
            read_only_mounts: Vec::new(),
            work_dir: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_read_only_mounts(mut self, mounts: Vec<PathBuf>) -> Self {
        self.read_only_mounts = mounts;
        self
    }

    #[must_use]
    pub fn with_work_dir(mut self, work_dir: Option<PathBuf>) -> Self {
        self.work_dir = work_dir;
        self
    }
}

/// Lifecycle state reported by the runtime, normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Creating,
    /// Created and startable, not yet running.
    Ready,
    Running,
    Stopped,
    Error,
}

impl ContainerStatus {
    /// Map a runtime state string (`State.Status`) to a status.
    #[must_use]
    pub fn from_runtime_state(state: &str) -> Self {
        match state {
            "created" => Self::Ready,
            "running" => Self::Running,
            "restarting" => Self::Creating,
            "exited" | "paused" | "removing" => Self::Stopped,
            _ => Self::Error,
        }
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Creating => f.write_str("creating"),
            Self::Ready => f.write_str("ready"),
            Self::Running => f.write_str("running"),
            Self::Stopped => f.write_str("stopped"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// Result of inspecting one container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
    /// Exit code of the main process when stopped.
    pub exit_code: Option<i32>,
    /// Runtime-reported error string, if any.
    pub error: Option<String>,
}

/// Captured result of one runtime subprocess.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("created", ContainerStatus::Ready)]
    #[case("running", ContainerStatus::Running)]
    #[case("restarting", ContainerStatus::Creating)]
    #[case("exited", ContainerStatus::Stopped)]
    #[case("paused", ContainerStatus::Stopped)]
    #[case("dead", ContainerStatus::Error)]
    #[case("", ContainerStatus::Error)]
    fn maps_runtime_states(#[case] state: &str, #[case] expected: ContainerStatus) {
        assert_eq!(ContainerStatus::from_runtime_state(state), expected);
    }

    #[test]
    fn sandbox_config_copies_limits() {
        let limits = ResourceLimits {
            cpu_limit: 0.5,
            memory_limit_mb: 256,
            network_policy: NetworkPolicy::Restricted,
            timeout_seconds: 60,
            ..Default::default()
        };
        let a = SandboxConfig::new("agent-1", "alpine:3.20", &limits);
        let b = SandboxConfig::new("", "alpine:3.20", &limits);
        assert_ne!(a.id, b.id);
        assert_eq!(a.agent_id, "agent-1");
        assert_eq!(a.cpu_limit, 0.5);
        assert_eq!(a.memory_limit_mb, 256);
        assert_eq!(a.network_policy, NetworkPolicy::Restricted);
        assert_eq!(a.timeout_seconds, 60);
        assert!(a.work_dir.is_none());
        assert_eq!(a.created_at, a.updated_at);
    }
}
