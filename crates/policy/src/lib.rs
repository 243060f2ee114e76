//! Per-agent resource policy overrides.
//!
//! Agents without a stored row get the system default [`ResourceLimits`].
//! Rows live in the `agent_policies` SQLite table.

pub mod error;
pub mod store;

pub use {
    error::{Error, Result},
    store::{AgentPolicy, PolicyStore, PolicyUpdate, SqlitePolicyStore},
};

/// Run database migrations for the policy store.
///
/// Creates the `agent_policies` table. Safe to call on every startup.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
