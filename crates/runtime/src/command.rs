//! Bounded execution of runtime CLI subprocesses.

use std::{process::Stdio, time::Duration};

use tracing::debug;

#[cfg(feature = "metrics")]
use warmbox_metrics::{counter, histogram, labels, runtime as runtime_metrics};

use crate::{
    error::{Result, RuntimeError},
    types::CommandOutput,
};

/// Run `binary args...`, capturing stdout/stderr, and kill it if it outlives
/// `timeout`.
///
/// A non-zero exit is not an error here; see [`CommandOutput::success`] and
/// [`check`].
pub(crate) async fn run(binary: &str, args: &[String], timeout: Duration) -> Result<CommandOutput> {
    let operation = args.first().map_or("", String::as_str);
    debug!(binary, ?args, timeout_secs = timeout.as_secs(), "running runtime command");

    #[cfg(feature = "metrics")]
    let started = std::time::Instant::now();
    #[cfg(feature = "metrics")]
    counter!(runtime_metrics::COMMANDS_TOTAL, labels::OPERATION => operation.to_string())
        .increment(1);

    let child = tokio::process::Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Dropping the wait future on timeout drops the child, which sends SIGKILL.
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| {
            #[cfg(feature = "metrics")]
            counter!(runtime_metrics::COMMAND_FAILURES_TOTAL, labels::OPERATION => operation.to_string())
                .increment(1);
            RuntimeError::Spawn {
                binary: binary.to_string(),
                source,
            }
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            return Err(RuntimeError::Spawn {
                binary: binary.to_string(),
                source,
            });
        },
        Err(_) => {
            #[cfg(feature = "metrics")]
            counter!(runtime_metrics::COMMAND_TIMEOUTS_TOTAL, labels::OPERATION => operation.to_string())
                .increment(1);
            return Err(RuntimeError::Timeout {
                command: format!("{binary} {operation}"),
                timeout,
            });
        },
    };

    let result = CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    #[cfg(feature = "metrics")]
    {
        histogram!(runtime_metrics::COMMAND_DURATION_SECONDS, labels::OPERATION => operation.to_string())
            .record(started.elapsed().as_secs_f64());
        if !result.success() {
            counter!(runtime_metrics::COMMAND_FAILURES_TOTAL, labels::OPERATION => operation.to_string())
                .increment(1);
        }
    }

    debug!(binary, operation, exit_code = result.exit_code, "runtime command finished");
    Ok(result)
}

/// Turn a non-zero exit into [`RuntimeError::CommandFailed`].
pub(crate) fn check(binary: &str, operation: &str, output: CommandOutput) -> Result<CommandOutput> {
    if output.success() {
        return Ok(output);
    }
    Err(RuntimeError::CommandFailed {
        command: format!("{binary} {operation}"),
        exit_code: output.exit_code,
        stderr: output.stderr.trim().to_string(),
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let out = run("sh", &args(&["-c", "echo hi; echo err >&2; exit 3"]), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout.trim(), "hi");
        assert_eq!(out.stderr.trim(), "err");
        assert!(!out.success());
    }

    #[tokio::test]
    async fn times_out_long_commands() {
        let err = run("sh", &args(&["-c", "sleep 5"]), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Timeout { .. }));
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let err = run("warmbox-definitely-not-installed", &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Spawn { .. }));
    }

    #[test]
    fn check_maps_failure() {
        let failed = CommandOutput {
            exit_code: 125,
            stdout: String::new(),
            stderr: "no such image\n".into(),
        };
        let err = check("docker", "create", failed).unwrap_err();
        assert_eq!(
            err.to_string(),
            "docker create failed (exit code 125): no such image"
        );
        assert!(check("docker", "start", CommandOutput::default()).is_ok());
    }
}
