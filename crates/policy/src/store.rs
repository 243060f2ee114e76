use std::path::PathBuf;

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tracing::{debug, info},
    warmbox_common::{NetworkPolicy, ResourceLimits, now_ms},
};

use crate::error::{Context, Result};

/// A stored per-agent override row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPolicy {
    pub agent_id: String,
    /// Image used instead of the pool default when creating for this agent.
    pub image: Option<String>,
    pub cpu_limit: f64,
    pub memory_limit_mb: u64,
    pub network_policy: NetworkPolicy,
    pub timeout_seconds: u64,
    pub read_only_mounts: Vec<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl AgentPolicy {
    /// Effective limits: stored fields over `defaults`. Pids and storage
    /// ceilings are not persisted and always come from `defaults`.
    #[must_use]
    pub fn limits(&self, defaults: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            cpu_limit: self.cpu_limit,
            memory_limit_mb: self.memory_limit_mb,
            network_policy: self.network_policy,
            timeout_seconds: self.timeout_seconds,
            ..defaults.clone()
        }
    }
}

/// Partial override. `None` fields keep the current (or default) value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyUpdate {
    pub image: Option<String>,
    pub cpu_limit: Option<f64>,
    pub memory_limit_mb: Option<u64>,
    pub network_policy: Option<NetworkPolicy>,
    pub timeout_seconds: Option<u64>,
    pub read_only_mounts: Option<Vec<PathBuf>>,
    pub work_dir: Option<PathBuf>,
}

/// Persistence seam for agent policies.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Effective limits for `agent_id`: the system default when no row exists.
    async fn get_agent_policy(&self, agent_id: &str) -> Result<ResourceLimits>;

    /// The raw stored row, if any.
    async fn get_agent_override(&self, agent_id: &str) -> Result<Option<AgentPolicy>>;

    /// Merge `update` over the current effective policy and upsert the row.
    async fn set_agent_policy(&self, agent_id: &str, update: PolicyUpdate) -> Result<AgentPolicy>;

    /// Returns whether a row was actually deleted.
    async fn remove_agent_policy(&self, agent_id: &str) -> Result<bool>;

    /// All stored overrides, most recently created first.
    async fn list_agent_policies(&self) -> Result<Vec<AgentPolicy>>;
}

/// SQLite-backed policy store.
pub struct SqlitePolicyStore {
    pool: sqlx::SqlitePool,
    defaults: ResourceLimits,
}

impl SqlitePolicyStore {
    pub fn new(pool: sqlx::SqlitePool, defaults: ResourceLimits) -> Self {
        Self { pool, defaults }
    }

    #[must_use]
    pub fn defaults(&self) -> &ResourceLimits {
        &self.defaults
    }
}

#[derive(sqlx::FromRow)]
struct PolicyRow {
    agent_id: String,
    image: Option<String>,
    cpu_limit: f64,
    memory_limit_mb: i64,
    network_policy: String,
    timeout_seconds: i64,
    read_only_mounts: String,
    work_dir: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<PolicyRow> for AgentPolicy {
    type Error = crate::Error;

    fn try_from(r: PolicyRow) -> Result<Self> {
        let network_policy = r
            .network_policy
            .parse::<NetworkPolicy>()
            .with_context(|| format!("agent {}", r.agent_id))?;
        let read_only_mounts: Vec<PathBuf> = serde_json::from_str(&r.read_only_mounts)?;
        Ok(Self {
            agent_id: r.agent_id,
            image: r.image,
            cpu_limit: r.cpu_limit,
            memory_limit_mb: r.memory_limit_mb.max(0) as u64,
            network_policy,
            timeout_seconds: r.timeout_seconds.max(0) as u64,
            read_only_mounts,
            work_dir: r.work_dir.map(PathBuf::from),
            created_at: r.created_at as u64,
            updated_at: r.updated_at as u64,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT agent_id, image, cpu_limit, memory_limit_mb, network_policy, \
     timeout_seconds, read_only_mounts, work_dir, created_at, updated_at FROM agent_policies";

#[async_trait]
impl PolicyStore for SqlitePolicyStore {
    async fn get_agent_policy(&self, agent_id: &str) -> Result<ResourceLimits> {
        Ok(match self.get_agent_override(agent_id).await? {
            Some(row) => row.limits(&self.defaults),
            None => self.defaults.clone(),
        })
    }

    async fn get_agent_override(&self, agent_id: &str) -> Result<Option<AgentPolicy>> {
        let row = sqlx::query_as::<_, PolicyRow>(&format!("{SELECT_COLUMNS} WHERE agent_id = ?"))
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(AgentPolicy::try_from).transpose()
    }

    async fn set_agent_policy(&self, agent_id: &str, update: PolicyUpdate) -> Result<AgentPolicy> {
        let now = now_ms();
        let current = self.get_agent_override(agent_id).await?;
        let base = current.unwrap_or_else(|| AgentPolicy {
            agent_id: agent_id.to_string(),
            image: None,
            cpu_limit: self.defaults.cpu_limit,
            memory_limit_mb: self.defaults.memory_limit_mb,
            network_policy: self.defaults.network_policy,
            timeout_seconds: self.defaults.timeout_seconds,
            read_only_mounts: Vec::new(),
            work_dir: None,
            created_at: now,
            updated_at: now,
        });

        let merged = AgentPolicy {
            image: update.image.or(base.image),
            cpu_limit: update.cpu_limit.unwrap_or(base.cpu_limit),
            memory_limit_mb: update.memory_limit_mb.unwrap_or(base.memory_limit_mb),
            network_policy: update.network_policy.unwrap_or(base.network_policy),
            timeout_seconds: update.timeout_seconds.unwrap_or(base.timeout_seconds),
            read_only_mounts: update.read_only_mounts.unwrap_or(base.read_only_mounts),
            work_dir: update.work_dir.or(base.work_dir),
            updated_at: now,
            ..base
        };

        sqlx::query(
            r#"INSERT INTO agent_policies (agent_id, image, cpu_limit, memory_limit_mb, network_policy, timeout_seconds, read_only_mounts, work_dir, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(agent_id) DO UPDATE SET
                 image = excluded.image,
                 cpu_limit = excluded.cpu_limit,
                 memory_limit_mb = excluded.memory_limit_mb,
                 network_policy = excluded.network_policy,
                 timeout_seconds = excluded.timeout_seconds,
                 read_only_mounts = excluded.read_only_mounts,
                 work_dir = excluded.work_dir,
                 updated_at = excluded.updated_at"#,
        )
        .bind(&merged.agent_id)
        .bind(&merged.image)
        .bind(merged.cpu_limit)
        .bind(merged.memory_limit_mb as i64)
        .bind(merged.network_policy.as_str())
        .bind(merged.timeout_seconds as i64)
        .bind(serde_json::to_string(&merged.read_only_mounts)?)
        .bind(
            merged
                .work_dir
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        )
        .bind(merged.created_at as i64)
        .bind(merged.updated_at as i64)
        .execute(&self.pool)
        .await?;

        info!(agent_id, "agent policy saved");
        Ok(merged)
    }

    async fn remove_agent_policy(&self, agent_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM agent_policies WHERE agent_id = ?")
            .bind(agent_id)
            .execute(&self.pool)
            .await?;
        let removed = result.rows_affected() > 0;
        debug!(agent_id, removed, "agent policy remove");
        Ok(removed)
    }

    async fn list_agent_policies(&self) -> Result<Vec<AgentPolicy>> {
        let rows = sqlx::query_as::<_, PolicyRow>(&format!(
            "{SELECT_COLUMNS} ORDER BY created_at DESC, rowid DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AgentPolicy::try_from).collect()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqlitePolicyStore {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::run_migrations(&pool).await.unwrap();
        SqlitePolicyStore::new(pool, ResourceLimits::default())
    }

    #[tokio::test]
    async fn test_missing_agent_gets_defaults() {
        let store = test_store().await;
        let limits = store.get_agent_policy("nobody").await.unwrap();
        assert_eq!(limits, ResourceLimits::default());
        assert!(store.get_agent_override("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_then_get_merges_over_defaults() {
        let store = test_store().await;
        store
            .set_agent_policy("a1", PolicyUpdate {
                cpu_limit: Some(2.0),
                network_policy: Some(NetworkPolicy::Restricted),
                ..Default::default()
            })
            .await
            .unwrap();

        let limits = store.get_agent_policy("a1").await.unwrap();
        let defaults = ResourceLimits::default();
        assert_eq!(limits.cpu_limit, 2.0);
        assert_eq!(limits.network_policy, NetworkPolicy::Restricted);
        assert_eq!(limits.memory_limit_mb, defaults.memory_limit_mb);
        assert_eq!(limits.pids_limit, defaults.pids_limit);
        assert_eq!(limits.storage_limit_mb, defaults.storage_limit_mb);
    }

    #[tokio::test]
    async fn test_second_set_keeps_previous_fields() {
        let store = test_store().await;
        store
            .set_agent_policy("a1", PolicyUpdate {
                cpu_limit: Some(0.5),
                image: Some("python:3.12".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let first = store.get_agent_override("a1").await.unwrap().unwrap();

        let second = store
            .set_agent_policy("a1", PolicyUpdate {
                memory_limit_mb: Some(4096),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(second.cpu_limit, 0.5);
        assert_eq!(second.memory_limit_mb, 4096);
        assert_eq!(second.image.as_deref(), Some("python:3.12"));
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);

        let stored = store.get_agent_override("a1").await.unwrap().unwrap();
        assert_eq!(stored, second);
    }

    #[tokio::test]
    async fn test_mounts_and_work_dir_roundtrip() {
        let store = test_store().await;
        store
            .set_agent_policy("a1", PolicyUpdate {
                read_only_mounts: Some(vec![PathBuf::from("/opt/data")]),
                work_dir: Some(PathBuf::from("/srv/agents/a1")),
                ..Default::default()
            })
            .await
            .unwrap();
        let row = store.get_agent_override("a1").await.unwrap().unwrap();
        assert_eq!(row.read_only_mounts, vec![PathBuf::from("/opt/data")]);
        assert_eq!(row.work_dir, Some(PathBuf::from("/srv/agents/a1")));
    }

    #[tokio::test]
    async fn test_remove_restores_defaults_and_is_idempotent() {
        let store = test_store().await;
        store
            .set_agent_policy("a1", PolicyUpdate {
                timeout_seconds: Some(5),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(store.remove_agent_policy("a1").await.unwrap());
        assert!(!store.remove_agent_policy("a1").await.unwrap());
        assert_eq!(
            store.get_agent_policy("a1").await.unwrap(),
            ResourceLimits::default()
        );
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let store = test_store().await;
        for agent in ["first", "second", "third"] {
            store
                .set_agent_policy(agent, PolicyUpdate::default())
                .await
                .unwrap();
        }
        // Updating an old row must not move it.
        store
            .set_agent_policy("first", PolicyUpdate {
                cpu_limit: Some(3.0),
                ..Default::default()
            })
            .await
            .unwrap();

        let ids: Vec<String> = store
            .list_agent_policies()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.agent_id)
            .collect();
        assert_eq!(ids, ["third", "second", "first"]);
    }

    #[tokio::test]
    async fn test_policies_survive_reopening_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("policies.db").display());

        let pool = sqlx::SqlitePool::connect(&url).await.unwrap();
        crate::run_migrations(&pool).await.unwrap();
        SqlitePolicyStore::new(pool.clone(), ResourceLimits::default())
            .set_agent_policy("a1", PolicyUpdate {
                image: Some("python:3.12".into()),
                memory_limit_mb: Some(2048),
                read_only_mounts: Some(vec!["/opt/data".into()]),
                ..Default::default()
            })
            .await
            .unwrap();
        pool.close().await;

        let pool = sqlx::SqlitePool::connect(&url).await.unwrap();
        crate::run_migrations(&pool).await.unwrap();
        let store = SqlitePolicyStore::new(pool, ResourceLimits::default());
        let policy = store.get_agent_override("a1").await.unwrap().unwrap();
        assert_eq!(policy.image.as_deref(), Some("python:3.12"));
        assert_eq!(policy.memory_limit_mb, 2048);
        assert_eq!(policy.read_only_mounts, vec![PathBuf::from("/opt/data")]);
    }

    #[tokio::test]
    async fn test_corrupt_network_policy_is_an_error() {
        let store = test_store().await;
        sqlx::query(
            "INSERT INTO agent_policies (agent_id, cpu_limit, memory_limit_mb, network_policy, timeout_seconds, created_at, updated_at) \
             VALUES ('bad', 1.0, 512, 'bridge', 0, 0, 0)",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let err = store.get_agent_policy("bad").await.unwrap_err();
        assert!(err.to_string().contains("agent bad"));
    }
}
