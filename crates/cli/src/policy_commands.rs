use std::path::PathBuf;

use {
    anyhow::Result,
    clap::Subcommand,
    warmbox_common::NetworkPolicy,
    warmbox_config::WarmboxConfig,
    warmbox_policy::{PolicyStore, PolicyUpdate, SqlitePolicyStore},
};

use crate::db;

#[derive(Subcommand)]
pub enum PolicyAction {
    /// Show the effective limits for an agent and its stored override, if any.
    Get { agent_id: String },
    /// Create or update an agent's override. Omitted flags keep their current value.
    Set {
        agent_id: String,
        /// Image used instead of the pool default.
        #[arg(long)]
        image: Option<String>,
        /// CPU cores (fractional allowed).
        #[arg(long)]
        cpu: Option<f64>,
        /// Memory limit in MB.
        #[arg(long)]
        memory: Option<u64>,
        /// none, host, or restricted.
        #[arg(long)]
        network: Option<NetworkPolicy>,
        /// Execution timeout in seconds.
        #[arg(long)]
        timeout: Option<u64>,
        /// Host path mounted read-only at the same path. Repeatable; replaces
        /// the stored list when given.
        #[arg(long = "mount")]
        mounts: Vec<PathBuf>,
        /// Host directory mounted read-write as the workspace.
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },
    /// Delete an agent's override so it falls back to the defaults.
    Remove { agent_id: String },
    /// List all stored overrides, newest first.
    List,
}

pub async fn handle_policy(config: &WarmboxConfig, action: PolicyAction) -> Result<()> {
    let pool = db::open(config).await?;
    let store = SqlitePolicyStore::new(pool, config.limits.clone());

    match action {
        PolicyAction::Get { agent_id } => get(&store, &agent_id).await,
        PolicyAction::Set {
            agent_id,
            image,
            cpu,
            memory,
            network,
            timeout,
            mounts,
            work_dir,
        } => {
            let update = PolicyUpdate {
                image,
                cpu_limit: cpu,
                memory_limit_mb: memory,
                network_policy: network,
                timeout_seconds: timeout,
                read_only_mounts: (!mounts.is_empty()).then_some(mounts),
                work_dir,
            };
            validate_update(&update)?;
            let policy = store.set_agent_policy(&agent_id, update).await?;
            println!("{}", serde_json::to_string_pretty(&policy)?);
            Ok(())
        },
        PolicyAction::Remove { agent_id } => {
            if store.remove_agent_policy(&agent_id).await? {
                println!("Removed policy for '{agent_id}'.");
            } else {
                println!("No policy stored for '{agent_id}'.");
            }
            Ok(())
        },
        PolicyAction::List => list(&store).await,
    }
}

async fn get(store: &SqlitePolicyStore, agent_id: &str) -> Result<()> {
    let limits = store.get_agent_policy(agent_id).await?;
    println!("Effective limits for '{agent_id}':");
    println!("{}", serde_json::to_string_pretty(&limits)?);

    match store.get_agent_override(agent_id).await? {
        Some(policy) => {
            println!("Stored override:");
            println!("{}", serde_json::to_string_pretty(&policy)?);
        },
        None => println!("No stored override (system defaults apply)."),
    }
    Ok(())
}

async fn list(store: &SqlitePolicyStore) -> Result<()> {
    let policies = store.list_agent_policies().await?;
    if policies.is_empty() {
        println!("No agent policies stored.");
        return Ok(());
    }
    println!(
        "{:<24} {:>6} {:>10} {:<11} {:>8}  IMAGE",
        "AGENT", "CPU", "MEMORY", "NETWORK", "TIMEOUT"
    );
    for p in &policies {
        println!(
            "{:<24} {:>6} {:>8}MB {:<11} {:>7}s  {}",
            p.agent_id,
            p.cpu_limit,
            p.memory_limit_mb,
            p.network_policy,
            p.timeout_seconds,
            p.image.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

/// Reject values the runtime would refuse at container creation.
fn validate_update(update: &PolicyUpdate) -> Result<()> {
    if let Some(cpu) = update.cpu_limit
        && !(cpu > 0.0)
    {
        anyhow::bail!("--cpu must be positive, got {cpu}");
    }
    if update.memory_limit_mb == Some(0) {
        anyhow::bail!("--memory must be at least 1 MB");
    }
    if update.image.as_deref().is_some_and(str::is_empty) {
        anyhow::bail!("--image must not be empty");
    }
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_cpu() {
        for cpu in [0.0, -1.0, f64::NAN] {
            let update = PolicyUpdate {
                cpu_limit: Some(cpu),
                ..Default::default()
            };
            assert!(validate_update(&update).is_err(), "cpu {cpu} accepted");
        }
    }

    #[test]
    fn rejects_zero_memory_and_empty_image() {
        let update = PolicyUpdate {
            memory_limit_mb: Some(0),
            ..Default::default()
        };
        assert!(validate_update(&update).is_err());

        let update = PolicyUpdate {
            image: Some(String::new()),
            ..Default::default()
        };
        assert!(validate_update(&update).is_err());
    }

    #[test]
    fn accepts_partial_update() {
        let update = PolicyUpdate {
            cpu_limit: Some(0.5),
            network_policy: Some(NetworkPolicy::Restricted),
            ..Default::default()
        };
        assert!(validate_update(&update).is_ok());
    }

    #[tokio::test]
    async fn set_then_get_through_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = WarmboxConfig::default();
        config.database.path = Some(dir.path().join("nested").join("warmbox.db"));

        handle_policy(&config, PolicyAction::Set {
            agent_id: "agent-a".into(),
            image: Some("python:3.12".into()),
            cpu: Some(2.0),
            memory: None,
            network: None,
            timeout: None,
            mounts: vec![],
            work_dir: None,
        })
        .await
        .unwrap();

        let pool = db::open(&config).await.unwrap();
        let store = SqlitePolicyStore::new(pool, config.limits.clone());
        let limits = store.get_agent_policy("agent-a").await.unwrap();
        assert_eq!(limits.cpu_limit, 2.0);
        assert_eq!(limits.memory_limit_mb, config.limits.memory_limit_mb);
    }
}
