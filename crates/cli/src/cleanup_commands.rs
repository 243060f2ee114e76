use {
    anyhow::Result,
    tracing::info,
    warmbox_config::WarmboxConfig,
    warmbox_runtime::{ContainerRuntime, DockerCli},
};

/// Stop and remove every container carrying the configured sandbox prefix.
///
/// Meant for when no pool is running; a live pool would lose its containers.
pub async fn handle_cleanup(config: &WarmboxConfig) -> Result<()> {
    let runtime = DockerCli::new(config.runtime.clone());
    if !runtime.is_available().await {
        anyhow::bail!(
            "container runtime '{}' is not available",
            config.runtime.binary
        );
    }

    let ids = runtime.list_sandbox_containers().await?;
    if ids.is_empty() {
        println!("No sandbox containers found.");
        return Ok(());
    }

    for id in &ids {
        runtime.stop_container(id, None).await;
        runtime.remove_container(id).await;
        info!(container_id = %id, "removed sandbox container");
    }
    println!(
        "Removed {} sandbox container{}.",
        ids.len(),
        if ids.len() == 1 {
            ""
        } else {
            "s"
        }
    );
    Ok(())
}
