use {
    anyhow::{Context, Result},
    tracing::debug,
    warmbox_config::WarmboxConfig,
};

/// Open (creating if needed) the policy database and bring its schema up to date.
pub async fn open(config: &WarmboxConfig) -> Result<sqlx::SqlitePool> {
    let path = config.database.resolved_path();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let db_url = format!("sqlite:{}?mode=rwc", path.display());
    let pool = sqlx::SqlitePool::connect(&db_url)
        .await
        .with_context(|| format!("failed to open database {}", path.display()))?;
    warmbox_policy::run_migrations(&pool)
        .await
        .context("failed to run policy migrations")?;

    debug!(path = %path.display(), "policy database ready");
    Ok(pool)
}
