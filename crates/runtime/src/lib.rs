//! Container runtime adapter.
//!
//! A thin, stateless layer over the runtime's command-line interface. Every
//! call spawns the runtime binary with a bounded timeout. [`DockerCli`] is the
//! production backend; the pool manager only sees [`ContainerRuntime`].

mod command;
pub mod docker;
pub mod error;
pub mod types;
pub mod workdir;

use std::time::Duration;

use {async_trait::async_trait, warmbox_common::ResourceLimits};

pub use {
    docker::DockerCli,
    error::{Result, RuntimeError},
    types::{CommandOutput, ContainerInfo, ContainerStatus, SandboxConfig},
    workdir::validate_work_dir,
};

/// Mount point of the read-write work directory inside the container.
pub const WORKSPACE_MOUNT: &str = "/workspace";

/// Environment variable carrying the sandbox timeout to the entrypoint.
pub const TIMEOUT_ENV: &str = "WARMBOX_TIMEOUT_SECONDS";

/// Operations the pool manager needs from a container engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Human-readable backend name (e.g. "docker").
    fn backend_name(&self) -> &'static str;

    /// Short, bounded probe. Never fails: any problem means `false`.
    async fn is_available(&self) -> bool;

    /// Create (but do not start) a container. Returns the runtime's container ID.
    async fn create_container(
        &self,
        config: &SandboxConfig,
        limits: &ResourceLimits,
    ) -> Result<String>;

    async fn start_container(&self, container_id: &str) -> Result<()>;

    /// Graceful stop, escalating to a kill. Returns whether the container ended
    /// up stopped; failures are logged, never raised. `None` uses the backend's
    /// configured grace period.
    async fn stop_container(&self, container_id: &str, grace: Option<Duration>) -> bool;

    /// Force removal. Failures are logged, never raised.
    async fn remove_container(&self, container_id: &str);

    /// Run `command` through `sh -c` inside a running container. `None` uses
    /// the backend's configured exec timeout.
    async fn exec_in_container(
        &self,
        container_id: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput>;

    /// `None` when the container cannot be inspected or the output is unusable.
    async fn container_status(&self, container_id: &str) -> Option<ContainerInfo>;

    /// IDs of every container (running or not) carrying this system's name prefix.
    async fn list_sandbox_containers(&self) -> Result<Vec<String>>;
}
