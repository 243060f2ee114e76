//! Docker-compatible CLI backend (`docker`, `podman`, ...).

use std::{path::Path, time::Duration};

use {
    async_trait::async_trait,
    serde::Deserialize,
    tracing::{debug, info, warn},
    warmbox_common::{NetworkPolicy, ResourceLimits},
    warmbox_config::RuntimeConfig,
};

use crate::{
    ContainerRuntime, TIMEOUT_ENV, WORKSPACE_MOUNT,
    command::{check, run},
    error::{Result, RuntimeError},
    types::{CommandOutput, ContainerInfo, ContainerStatus, SandboxConfig},
    workdir::validate_work_dir,
};

/// Extra seconds the `stop` subprocess gets beyond the grace period.
const STOP_TIMEOUT_SLACK: Duration = Duration::from_secs(5);

/// Drives a Docker-compatible runtime through its CLI.
pub struct DockerCli {
    config: RuntimeConfig,
}

impl DockerCli {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    fn binary(&self) -> &str {
        &self.config.binary
    }

    /// Container name for a sandbox: `<prefix>-<sandbox id>`.
    #[must_use]
    pub fn container_name(&self, sandbox_id: &str) -> String {
        format!("{}-{}", self.config.container_prefix, sandbox_id)
    }

    async fn exec(&self, args: Vec<String>, timeout: Duration) -> Result<CommandOutput> {
        run(self.binary(), &args, timeout).await
    }

    /// Deadline for a command run inside a sandbox.
    fn exec_timeout(&self, requested: Option<Duration>) -> Duration {
        requested.unwrap_or_else(|| self.config.exec_timeout())
    }

    fn resource_args(limits: &ResourceLimits) -> Vec<String> {
        let mut args = Vec::new();
        if limits.cpu_limit > 0.0 {
            args.extend(["--cpus".to_string(), limits.cpu_limit.to_string()]);
        }
        if limits.memory_limit_mb > 0 {
            let mem = format!("{}m", limits.memory_limit_mb);
            // Equal swap ceiling disables swap on top of the memory limit.
            args.extend(["--memory".to_string(), mem.clone()]);
            args.extend(["--memory-swap".to_string(), mem]);
        }
        if limits.pids_limit > 0 {
            args.extend(["--pids-limit".to_string(), limits.pids_limit.to_string()]);
        }
        if limits.storage_limit_mb > 0 {
            args.extend([
                "--storage-opt".to_string(),
                format!("size={}m", limits.storage_limit_mb),
            ]);
        }
        args
    }

    fn network_args(policy: NetworkPolicy) -> Vec<String> {
        match policy {
            NetworkPolicy::None => vec!["--network".to_string(), "none".to_string()],
            // Interface stays up, but no resolver is reachable.
            NetworkPolicy::Restricted => vec!["--dns".to_string(), "0.0.0.0".to_string()],
            NetworkPolicy::Host => Vec::new(),
        }
    }

    /// Build the full `create` argument list. `work_dir` must already be validated.
    fn create_args(
        &self,
        config: &SandboxConfig,
        limits: &ResourceLimits,
        work_dir: Option<&Path>,
    ) -> Vec<String> {
        let mut args = vec![
            "create".to_string(),
            "--name".to_string(),
            self.container_name(&config.id),
            "--label".to_string(),
            format!("warmbox.sandbox-id={}", config.id),
            "--security-opt".to_string(),
            "no-new-privileges".to_string(),
        ];
        if !config.agent_id.is_empty() {
            args.extend([
                "--label".to_string(),
                format!("warmbox.agent-id={}", config.agent_id),
            ]);
        }

        args.extend(Self::resource_args(limits));
        args.extend(Self::network_args(config.network_policy));

        for mount in &config.read_only_mounts {
            let host = mount.display();
            args.extend(["-v".to_string(), format!("{host}:{host}:ro")]);
        }
        if let Some(dir) = work_dir {
            args.extend([
                "-v".to_string(),
                format!("{}:{WORKSPACE_MOUNT}:rw", dir.display()),
                "-w".to_string(),
                WORKSPACE_MOUNT.to_string(),
            ]);
        }

        args.extend([
            "-e".to_string(),
            format!("{TIMEOUT_ENV}={}", config.timeout_seconds),
        ]);

        args.push(config.image.clone());
        args.extend(self.config.keepalive_command.iter().cloned());
        args
    }

    async fn kill(&self, container_id: &str) -> bool {
        let args = vec!["kill".to_string(), container_id.to_string()];
        match self.exec(args, self.config.command_timeout()).await {
            Ok(out) if out.success() => true,
            Ok(out) => {
                warn!(container_id, stderr = %out.stderr.trim(), "container kill failed");
                false
            },
            Err(e) => {
                warn!(container_id, error = %e, "container kill failed");
                false
            },
        }
    }
}

/// Subset of `inspect --format {{json .}}` we care about.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectOutput {
    id: String,
    #[serde(default)]
    name: String,
    state: InspectState,
    #[serde(default)]
    config: Option<InspectConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    #[serde(default)]
    status: String,
    #[serde(default)]
    exit_code: Option<i32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    image: String,
}

fn parse_inspect(stdout: &str) -> Result<ContainerInfo> {
    let raw: InspectOutput = serde_json::from_str(stdout.trim())
        .map_err(|e| RuntimeError::InvalidOutput(format!("inspect: {e}")))?;

    let error = raw.state.error.filter(|e| !e.is_empty());
    let mut status = ContainerStatus::from_runtime_state(&raw.state.status);
    if error.is_some() && status != ContainerStatus::Running {
        status = ContainerStatus::Error;
    }

    Ok(ContainerInfo {
        id: raw.id,
        name: raw.name.trim_start_matches('/').to_string(),
        image: raw.config.map(|c| c.image).unwrap_or_default(),
        status,
        exit_code: raw.state.exit_code,
        error,
    })
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    fn backend_name(&self) -> &'static str {
        "docker"
    }

    async fn is_available(&self) -> bool {
        let args = vec![
            "version".to_string(),
            "--format".to_string(),
            "{{.Server.Version}}".to_string(),
        ];
        match self.exec(args, self.config.probe_timeout()).await {
            Ok(out) if out.success() && !out.stdout.trim().is_empty() => {
                debug!(version = %out.stdout.trim(), "container runtime available");
                true
            },
            Ok(out) => {
                debug!(stderr = %out.stderr.trim(), "container runtime daemon not reachable");
                false
            },
            Err(e) => {
                debug!(error = %e, "container runtime not available");
                false
            },
        }
    }

    async fn create_container(
        &self,
        config: &SandboxConfig,
        limits: &ResourceLimits,
    ) -> Result<String> {
        let work_dir = match config.work_dir.as_deref() {
            Some(path) => Some(validate_work_dir(path).await?),
            None => None,
        };

        let args = self.create_args(config, limits, work_dir.as_deref());
        let output = self.exec(args, self.config.command_timeout()).await?;
        let output = check(self.binary(), "create", output)?;

        let container_id = output.stdout.trim().to_string();
        if container_id.is_empty() {
            return Err(RuntimeError::InvalidOutput(
                "create returned an empty container ID".into(),
            ));
        }

        info!(
            container_id,
            sandbox_id = %config.id,
            agent_id = %config.agent_id,
            image = %config.image,
            "created sandbox container"
        );
        Ok(container_id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        let args = vec!["start".to_string(), container_id.to_string()];
        let output = self.exec(args, self.config.command_timeout()).await?;
        check(self.binary(), "start", output)?;
        debug!(container_id, "started sandbox container");
        Ok(())
    }

    async fn stop_container(&self, container_id: &str, grace: Option<Duration>) -> bool {
        let grace = grace.unwrap_or_else(|| self.config.stop_grace());
        let args = vec![
            "stop".to_string(),
            "-t".to_string(),
            grace.as_secs().to_string(),
            container_id.to_string(),
        ];

        match self.exec(args, grace + STOP_TIMEOUT_SLACK).await {
            Ok(out) if out.success() => {
                debug!(container_id, "stopped sandbox container");
                true
            },
            Ok(out) => {
                warn!(container_id, stderr = %out.stderr.trim(), "graceful stop failed, killing");
                self.kill(container_id).await
            },
            Err(e) => {
                warn!(container_id, error = %e, "graceful stop failed, killing");
                self.kill(container_id).await
            },
        }
    }

    async fn remove_container(&self, container_id: &str) {
        let args = vec![
            "rm".to_string(),
            "-f".to_string(),
            container_id.to_string(),
        ];
        match self.exec(args, self.config.command_timeout()).await {
            Ok(out) if out.success() => debug!(container_id, "removed sandbox container"),
            Ok(out) => {
                warn!(container_id, stderr = %out.stderr.trim(), "failed to remove container");
            },
            Err(e) => warn!(container_id, error = %e, "failed to remove container"),
        }
    }

    async fn exec_in_container(
        &self,
        container_id: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput> {
        let args = vec![
            "exec".to_string(),
            container_id.to_string(),
            "sh".to_string(),
            "-c".to_string(),
            command.to_string(),
        ];
        self.exec(args, self.exec_timeout(timeout)).await
    }

    async fn container_status(&self, container_id: &str) -> Option<ContainerInfo> {
        let args = vec![
            "inspect".to_string(),
            "--format".to_string(),
            "{{json .}}".to_string(),
            container_id.to_string(),
        ];
        let output = match self.exec(args, self.config.command_timeout()).await {
            Ok(out) if out.success() => out,
            Ok(out) => {
                debug!(container_id, stderr = %out.stderr.trim(), "inspect failed");
                return None;
            },
            Err(e) => {
                debug!(container_id, error = %e, "inspect failed");
                return None;
            },
        };

        match parse_inspect(&output.stdout) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(container_id, error = %e, "unparsable inspect output");
                None
            },
        }
    }

    async fn list_sandbox_containers(&self) -> Result<Vec<String>> {
        let args = vec![
            "ps".to_string(),
            "-a".to_string(),
            "--filter".to_string(),
            format!("name={}", self.config.container_prefix),
            "--format".to_string(),
            "{{.ID}}".to_string(),
        ];
        let output = self.exec(args, self.config.command_timeout()).await?;
        let output = check(self.binary(), "ps", output)?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::path::PathBuf};

    fn cli() -> DockerCli {
        DockerCli::new(RuntimeConfig::default())
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Vec<&'a str> {
        args.windows(2)
            .filter(|w| w[0] == flag)
            .map(|w| w[1].as_str())
            .collect()
    }

    #[test]
    fn container_name_uses_prefix() {
        assert_eq!(cli().container_name("abc123"), "warmbox-sandbox-abc123");
    }

    #[test]
    fn exec_falls_back_to_configured_timeout() {
        let runtime = DockerCli::new(RuntimeConfig {
            exec_timeout_secs: 42,
            ..Default::default()
        });
        assert_eq!(runtime.exec_timeout(None), Duration::from_secs(42));
        assert_eq!(
            runtime.exec_timeout(Some(Duration::from_secs(3))),
            Duration::from_secs(3)
        );
        assert_eq!(cli().exec_timeout(None), Duration::from_secs(300));
    }

    #[test]
    fn create_args_translate_limits() {
        let limits = ResourceLimits {
            cpu_limit: 1.5,
            memory_limit_mb: 768,
            pids_limit: 64,
            storage_limit_mb: 2048,
            ..Default::default()
        };
        let config = SandboxConfig::new("agent-7", "alpine:3.20", &limits);
        let args = cli().create_args(&config, &limits, None);

        assert_eq!(args[0], "create");
        assert_eq!(value_after(&args, "--name"), [format!("warmbox-sandbox-{}", config.id)]);
        assert_eq!(value_after(&args, "--cpus"), ["1.5"]);
        assert_eq!(value_after(&args, "--memory"), ["768m"]);
        assert_eq!(value_after(&args, "--memory-swap"), ["768m"]);
        assert_eq!(value_after(&args, "--pids-limit"), ["64"]);
        assert_eq!(value_after(&args, "--storage-opt"), ["size=2048m"]);
        assert!(value_after(&args, "--label").contains(&"warmbox.agent-id=agent-7"));
        assert_eq!(
            value_after(&args, "-e"),
            [format!("{TIMEOUT_ENV}={}", limits.timeout_seconds)]
        );
        // image, then the keepalive command
        let image_pos = args.iter().position(|a| a == "alpine:3.20").unwrap();
        assert_eq!(&args[image_pos + 1..], ["sleep", "infinity"]);
    }

    #[test]
    fn warm_container_has_no_agent_label() {
        let config = SandboxConfig::new("", "alpine:3.20", &ResourceLimits::default());
        let args = cli().create_args(&config, &ResourceLimits::default(), None);
        assert!(!args.iter().any(|a| a.starts_with("warmbox.agent-id=")));
    }

    #[test]
    fn network_policy_flags() {
        assert_eq!(DockerCli::network_args(NetworkPolicy::None), ["--network", "none"]);
        assert_eq!(DockerCli::network_args(NetworkPolicy::Restricted), ["--dns", "0.0.0.0"]);
        assert!(DockerCli::network_args(NetworkPolicy::Host).is_empty());
    }

    #[test]
    fn zero_limits_emit_no_flags() {
        let limits = ResourceLimits {
            cpu_limit: 0.0,
            memory_limit_mb: 0,
            pids_limit: 0,
            storage_limit_mb: 0,
            ..Default::default()
        };
        assert!(DockerCli::resource_args(&limits).is_empty());
    }

    #[test]
    fn mounts_are_ro_and_workdir_rw() {
        let config = SandboxConfig::new("a", "img", &ResourceLimits::default())
            .with_read_only_mounts(vec![PathBuf::from("/opt/tools")]);
        let args = cli().create_args(
            &config,
            &ResourceLimits::default(),
            Some(Path::new("/srv/work")),
        );
        assert_eq!(
            value_after(&args, "-v"),
            ["/opt/tools:/opt/tools:ro", "/srv/work:/workspace:rw"]
        );
        assert_eq!(value_after(&args, "-w"), ["/workspace"]);
    }

    #[tokio::test]
    async fn create_rejects_traversal_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let config = SandboxConfig::new("a", "img", &ResourceLimits::default())
            .with_work_dir(Some(dir.path().join("..").join("..")));
        // Unresolvable binary proves the check runs before any subprocess.
        let runtime = DockerCli::new(RuntimeConfig {
            binary: "warmbox-definitely-not-installed".into(),
            ..Default::default()
        });
        let err = runtime
            .create_container(&config, &ResourceLimits::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn unavailable_binary_is_not_available() {
        let runtime = DockerCli::new(RuntimeConfig {
            binary: "warmbox-definitely-not-installed".into(),
            ..Default::default()
        });
        assert!(!runtime.is_available().await);
        assert!(runtime.container_status("abc").await.is_none());
        assert!(!runtime.stop_container("abc", Some(Duration::from_secs(1))).await);
        runtime.remove_container("abc").await;
    }

    #[test]
    fn parses_inspect_json() {
        let json = r#"{
            "Id": "f00dfeed",
            "Name": "/warmbox-sandbox-abc",
            "State": {"Status": "created", "Running": false, "ExitCode": 0, "Error": ""},
            "Config": {"Image": "ubuntu:24.04"}
        }"#;
        let info = parse_inspect(json).unwrap();
        assert_eq!(info.id, "f00dfeed");
        assert_eq!(info.name, "warmbox-sandbox-abc");
        assert_eq!(info.image, "ubuntu:24.04");
        assert_eq!(info.status, ContainerStatus::Ready);
        assert!(info.error.is_none());
    }

    #[test]
    fn inspect_error_state_wins_over_exited() {
        let json = r#"{"Id": "x", "State": {"Status": "exited", "ExitCode": 137, "Error": "OCI runtime create failed"}}"#;
        let info = parse_inspect(json).unwrap();
        assert_eq!(info.status, ContainerStatus::Error);
        assert_eq!(info.exit_code, Some(137));
    }

    #[test]
    fn garbage_inspect_output_is_invalid() {
        assert!(matches!(
            parse_inspect("not json"),
            Err(RuntimeError::InvalidOutput(_))
        ));
    }
}
