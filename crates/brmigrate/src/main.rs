//! migrate - interface-to-bridge migration
//!
//! Entry point for the `migrate` command.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use brmigrate::{ConfigFile, ExecMode, IprouteBackend, MigrationConfig, MigrationReport, Migrator};
use brmigrate_common::MigrateError;

/// Move an interface's addresses and routes onto a bridge and enslave it
#[derive(Parser, Debug)]
#[command(name = "migrate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Interface to migrate
    #[arg(long)]
    iface: String,

    /// Bridge to create or reuse [default: br0]
    #[arg(long)]
    bridge: Option<String>,

    /// Print the operations instead of applying them
    #[arg(long)]
    dry_run: bool,

    /// TOML file with bridge tuning and port flags
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG overrides
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Output format for the plan
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    /// Commands, one per line, with step headers
    Text,
    /// The full report as JSON
    Json,
}

/// Initializes tracing on stderr so stdout carries only the plan
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Args) -> anyhow::Result<MigrationConfig> {
    let file = match &args.config {
        Some(path) => Some(
            ConfigFile::load(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
        ),
        None => None,
    };
    let config = MigrationConfig::from_parts(
        args.iface.clone(),
        args.bridge.clone(),
        ExecMode::from_dry_run(args.dry_run),
        file.as_ref(),
    )?;
    Ok(config)
}

fn print_report(report: &MigrationReport, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => {
            if report.mode == ExecMode::DryRun {
                for line in &report.trace {
                    println!("{}", line);
                }
            }
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(report).context("serializing report")?;
            println!("{}", json);
        }
    }
    Ok(())
}

async fn run(args: &Args) -> anyhow::Result<()> {
    let config = load_config(args)?;
    info!(
        iface = %config.iface,
        bridge = %config.bridge,
        dry_run = args.dry_run,
        "Starting migration"
    );

    let mut migrator = Migrator::new(config, IprouteBackend::new());
    let report = migrator
        .run()
        .await
        .with_context(|| format!("migrating {} to {}", args.iface, migrator.config().bridge))?;

    print_report(&report, args.format)
}

/// Exit status for a failed run: the error's own code when it is a migration error
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<MigrateError>())
        .map(MigrateError::exit_code)
        .unwrap_or(1)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("migrate: {:#}", err);
            ExitCode::from(exit_code(&err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["migrate", "--iface", "eth0"]).unwrap();
        assert_eq!(args.iface, "eth0");
        assert!(args.bridge.is_none());
        assert!(!args.dry_run);
        assert_eq!(args.log_level, "info");
    }

    #[test]
    fn test_args_dry_run_and_bridge() {
        let args =
            Args::try_parse_from(["migrate", "--iface", "eth0", "--bridge", "br1", "--dry-run"])
                .unwrap();
        let config = load_config(&args).unwrap();
        assert_eq!(config.bridge, "br1");
        assert_eq!(config.mode, ExecMode::DryRun);
    }

    #[test]
    fn test_iface_required() {
        assert!(Args::try_parse_from(["migrate"]).is_err());
    }

    #[test]
    fn test_exit_code_from_migrate_error() {
        let err = anyhow::Error::new(MigrateError::interface_not_found("eth9")).context("migrating");
        assert_eq!(exit_code(&err), 3);

        let other = anyhow::anyhow!("something else");
        assert_eq!(exit_code(&other), 1);
    }
}
