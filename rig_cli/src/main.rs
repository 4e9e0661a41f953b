mod backend;
mod cli;
mod error_fmt;
mod probe;
mod run;

use std::path::Path;
use std::time::Duration;

use clap::Parser;
use eyre::{WrapErr, eyre};
use rig_config::Config;
use rig_core::RigError;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(err) = real_main(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            println!("{}", format_error_json(&err));
        } else {
            eprintln!("{}", humanize(&err));
        }
        tracing::debug!(error = ?err, "exiting with error");
        std::process::exit(exit_code_for_error(&err));
    }
}

fn real_main(cli: Cli) -> eyre::Result<()> {
    color_eyre::install()?;

    let cfg = load_config(&cli.config)?;
    init_tracing(cli.json, &cli.log_level, &cfg.logging)?;
    tracing::debug!(config = %cli.config.display(), "config loaded");

    match cli.cmd {
        Commands::Run { max_runtime_s } => {
            let schedule = run::load_schedule(&cfg, cli.schedule.as_deref())?;
            let report =
                run::run_experiment(&cfg, schedule, max_runtime_s.map(Duration::from_secs))?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "shutdown": report.performed,
                        "faults": report.faults.iter().map(|f| f.to_string()).collect::<Vec<_>>(),
                        "detached": report.detached,
                    })
                );
            } else if report.is_clean() {
                println!("Shutdown complete.");
            } else {
                println!(
                    "Shutdown complete with {} fault(s), {} loop(s) detached.",
                    report.faults.len(),
                    report.detached.len()
                );
            }
            // Returning from main ends the process even if a loop was detached.
            Ok(())
        }
        Commands::Identify => probe::identify(&cfg, cli.json),
        Commands::ListAddr => probe::list_addr(&cfg, cli.json),
        Commands::Query { address, command } => probe::query(&cfg, address, &command, cli.json),
        Commands::SelfCheck => {
            let schedule = run::load_schedule(&cfg, cli.schedule.as_deref())?;
            probe::self_check(&cfg, schedule.len(), cli.json)
        }
    }
}

fn load_config(path: &Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| RigError::Config(format!("read {}: {e}", path.display())))?;
    let cfg = rig_config::load_toml(&text).map_err(|e: toml::de::Error| {
        RigError::Config(format!("parse {}: {}", path.display(), e.message()))
    })?;
    cfg.validate()
        .map_err(|e| RigError::Config(e.to_string()))?;
    Ok(cfg)
}

/// Console layer on stderr (pretty or JSON) plus an optional JSON-lines file
/// layer from `[logging]`. `RUST_LOG` overrides `--log-level` on the console.
fn init_tracing(json: bool, level: &str, logging: &rig_config::Logging) -> eyre::Result<()> {
    let console_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .wrap_err_with(|| format!("invalid --log-level {level:?}"))?;
    let console = if json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    };

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = vec![console];

    if let Some(file) = &logging.file {
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .ok_or_else(|| eyre!("logging.file {file:?} has no file name"))?;
        let appender = match logging.rotation.as_deref().unwrap_or("never") {
            "never" => tracing_appender::rolling::never(dir, name),
            "daily" => tracing_appender::rolling::daily(dir, name),
            "hourly" => tracing_appender::rolling::hourly(dir, name),
            other => {
                return Err(RigError::Config(format!(
                    "logging.rotation must be never|daily|hourly, got {other:?}"
                ))
                .into());
            }
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        let file_filter = EnvFilter::try_new(logging.level.as_deref().unwrap_or("info"))
            .map_err(|e| RigError::Config(format!("logging.level: {e}")))?;
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(file_filter)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| eyre!("init tracing: {e}"))
}
