use std::path::{Path, PathBuf};

use {
    tracing::{debug, warn},
    warmbox_common::{Error, Result},
};

use crate::{env_subst::substitute_env, schema::WarmboxConfig};

warmbox_common::impl_context!();

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "warmbox.toml",
    "warmbox.yaml",
    "warmbox.yml",
    "warmbox.json",
];

/// Load config from the given path (any supported format), then apply
/// `WARMBOX_*` environment overrides.
pub fn load_config(path: &Path) -> Result<WarmboxConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let raw = substitute_env(&raw);
    let mut config = parse_config(&raw, path)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./warmbox.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/warmbox/warmbox.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to defaults (plus env overrides) if nothing is found or the file
/// does not parse.
pub fn discover_and_load() -> WarmboxConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    let mut config = WarmboxConfig::default();
    apply_env_overrides(&mut config);
    config
}

fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/warmbox/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "warmbox").map(|d| d.config_dir().to_path_buf())
}

/// Returns the data directory holding the policy database.
pub fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "warmbox")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".warmbox"))
}

fn parse_config(raw: &str, path: &Path) -> Result<WarmboxConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => toml::from_str(raw).context("invalid TOML config"),
        "yaml" | "yml" => serde_yaml::from_str(raw).context("invalid YAML config"),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => Err(Error::message(format!("unsupported config format: .{ext}"))),
    }
}

/// Apply `WARMBOX_*` environment variables on top of a loaded config.
pub fn apply_env_overrides(config: &mut WarmboxConfig) {
    apply_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_overrides_with(config: &mut WarmboxConfig, lookup: impl Fn(&str) -> Option<String>) {
    fn parsed<T: std::str::FromStr>(name: &str, value: Option<String>) -> Option<T> {
        let value = value?;
        match value.trim().parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(var = name, value = %value, "ignoring unparsable environment override");
                None
            },
        }
    }

    if let Some(v) = parsed("WARMBOX_WARM_POOL_SIZE", lookup("WARMBOX_WARM_POOL_SIZE")) {
        config.pool.warm_pool_size = v;
    }
    if let Some(v) = parsed("WARMBOX_MAX_CONTAINERS", lookup("WARMBOX_MAX_CONTAINERS")) {
        config.pool.max_containers = v;
    }
    if let Some(v) = parsed("WARMBOX_IDLE_TIMEOUT_MS", lookup("WARMBOX_IDLE_TIMEOUT_MS")) {
        config.pool.idle_timeout_ms = v;
    }
    if let Some(image) = lookup("WARMBOX_DEFAULT_IMAGE").filter(|s| !s.trim().is_empty()) {
        config.pool.default_image = image;
    }
    if let Some(binary) = lookup("WARMBOX_RUNTIME_BINARY").filter(|s| !s.trim().is_empty()) {
        config.runtime.binary = binary;
    }
    if let Some(path) = lookup("WARMBOX_DATABASE_PATH").filter(|s| !s.trim().is_empty()) {
        config.database.path = Some(PathBuf::from(path));
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::io::Write};

    #[test]
    fn loads_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[pool]\nwarm_pool_size = 3\nmax_containers = 5\n\n[runtime]\nbinary = \"podman\""
        )
        .unwrap();

        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.pool.warm_pool_size, 3);
        assert_eq!(cfg.pool.max_containers, 5);
        assert_eq!(cfg.runtime.binary, "podman");
    }

    #[test]
    fn loads_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "pool:\n  idle_timeout_ms: 1000\nlimits:\n  pids_limit: 64").unwrap();

        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.pool.idle_timeout_ms, 1000);
        assert_eq!(cfg.limits.pids_limit, 64);
    }

    #[test]
    fn rejects_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("unsupported config format"));
    }

    #[test]
    fn env_overrides_apply_and_skip_garbage() {
        let mut cfg = WarmboxConfig::default();
        apply_overrides_with(&mut cfg, |name| match name {
            "WARMBOX_WARM_POOL_SIZE" => Some("7".into()),
            "WARMBOX_MAX_CONTAINERS" => Some("lots".into()),
            "WARMBOX_RUNTIME_BINARY" => Some("podman".into()),
            "WARMBOX_DATABASE_PATH" => Some("/tmp/w.db".into()),
            _ => None,
        });
        assert_eq!(cfg.pool.warm_pool_size, 7);
        assert_eq!(cfg.pool.max_containers, 10);
        assert_eq!(cfg.runtime.binary, "podman");
        assert_eq!(cfg.database.path, Some(PathBuf::from("/tmp/w.db")));
    }
}
