//! `warmbox doctor`: config validation, runtime probe and database check.
//!
//! Prints a report with `[ok]`, `[warn]`, `[fail]` or `[info]` per item and
//! exits non-zero when anything failed.

use {
    anyhow::Result,
    warmbox_config::{Severity, WarmboxConfig},
    warmbox_policy::{PolicyStore, SqlitePolicyStore},
    warmbox_runtime::{ContainerRuntime, DockerCli},
};

use crate::db;

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Ok,
    Warn,
    Fail,
    Info,
}

impl Status {
    fn label(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warn => "warn",
            Self::Fail => "fail",
            Self::Info => "info",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Self::Ok => GREEN,
            Self::Warn => YELLOW,
            Self::Fail => RED,
            Self::Info => CYAN,
        }
    }
}

struct CheckItem {
    status: Status,
    message: String,
}

struct Section {
    title: String,
    items: Vec<CheckItem>,
}

impl Section {
    fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            items: Vec::new(),
        }
    }

    fn push(&mut self, status: Status, message: impl Into<String>) {
        self.items.push(CheckItem {
            status,
            message: message.into(),
        });
    }

    fn count(&self, status: Status) -> usize {
        self.items.iter().filter(|i| i.status == status).count()
    }
}

fn print_report(sections: &[Section]) -> (usize, usize) {
    for section in sections {
        eprintln!("{BOLD}{}{RESET}", section.title);
        for item in &section.items {
            let color = item.status.color();
            let label = item.status.label();
            eprintln!("  [{color}{label}{RESET}]  {}", item.message);
        }
        eprintln!();
    }

    let errors = sections.iter().map(|s| s.count(Status::Fail)).sum();
    let warnings = sections.iter().map(|s| s.count(Status::Warn)).sum();
    (errors, warnings)
}

pub async fn handle_doctor(config: &WarmboxConfig) -> Result<()> {
    eprintln!("{BOLD}warmbox doctor{RESET}");
    eprintln!("{BOLD}=============={RESET}\n");

    let sections = vec![
        check_config(config),
        check_runtime(config).await,
        check_database(config).await,
    ];

    let (errors, warnings) = print_report(&sections);
    eprintln!("{BOLD}Summary:{RESET} {errors} error(s), {warnings} warning(s)");

    if errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn check_config(config: &WarmboxConfig) -> Section {
    let label = warmbox_config::config_dir()
        .map(|d| d.display().to_string())
        .unwrap_or_else(|| "defaults".into());
    let mut section = Section::new(format!("Config ({label})"));

    let result = warmbox_config::validate(config);
    if result.diagnostics.is_empty() {
        section.push(Status::Ok, "No config problems found");
    }
    for d in &result.diagnostics {
        let status = match d.severity {
            Severity::Error => Status::Fail,
            Severity::Warning => Status::Warn,
        };
        section.push(status, format!("{}: {}", d.path, d.message));
    }

    let pool = &config.pool;
    section.push(
        Status::Info,
        format!(
            "warm {} / max {}, idle timeout {}s, image {}",
            pool.warm_pool_size,
            pool.max_containers,
            pool.idle_timeout_ms / 1000,
            pool.default_image
        ),
    );
    section
}

async fn check_runtime(config: &WarmboxConfig) -> Section {
    let mut section = Section::new(format!("Container runtime ({})", config.runtime.binary));
    let runtime = DockerCli::new(config.runtime.clone());

    if !runtime.is_available().await {
        section.push(
            Status::Fail,
            format!(
                "'{} version' failed; the pool will start disabled",
                config.runtime.binary
            ),
        );
        return section;
    }
    section.push(Status::Ok, "Runtime daemon reachable");

    match runtime.list_sandbox_containers().await {
        Ok(ids) if ids.is_empty() => {
            section.push(Status::Ok, "No leftover sandbox containers");
        },
        Ok(ids) => section.push(
            Status::Warn,
            format!(
                "{} container(s) named {}-*; run `warmbox cleanup` if no pool is running",
                ids.len(),
                config.runtime.container_prefix
            ),
        ),
        Err(e) => section.push(Status::Warn, format!("Could not list containers: {e}")),
    }
    section
}

async fn check_database(config: &WarmboxConfig) -> Section {
    let path = config.database.resolved_path();
    let mut section = Section::new(format!("Database ({})", path.display()));

    if !path.exists() {
        section.push(
            Status::Info,
            "Database not created yet; it is created on first use",
        );
        return section;
    }

    let pool = match db::open(config).await {
        Ok(pool) => pool,
        Err(e) => {
            section.push(Status::Fail, format!("{e:#}"));
            return section;
        },
    };
    section.push(Status::Ok, "Migrations up to date");

    let store = SqlitePolicyStore::new(pool, config.limits.clone());
    match store.list_agent_policies().await {
        Ok(policies) => section.push(
            Status::Info,
            format!("{} agent policy override(s)", policies.len()),
        ),
        Err(e) => section.push(Status::Fail, format!("Could not read policies: {e}")),
    }
    section
}
