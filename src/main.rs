//! docsweep: reference integrity sweeper
//!
//! Deletes child documents whose parent is gone and prunes deprecated
//! fields once their replacement is set, driven by the `[catalog]` section
//! of the configuration.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use common::cli::{CommonArgs, CommonCommands, utils};
use common::config::Configuration;
use common::storage::open_document_store;
use std::process::ExitCode;
use sweeper::{Cancellation, Catalog, RunMode, SweepReport, SweepRunner};

/// Exit code for configuration and startup errors.
const EXIT_CONFIG_ERROR: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "docsweep", author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the catalog against the configured store
    Run(RunArgs),
    /// List catalog entries and exit
    Catalog,
    #[command(flatten)]
    Common(CommonCommands),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// What to do with matched documents
    #[arg(long, value_enum)]
    mode: RunMode,

    /// Only run the named catalog entry (repeatable)
    #[arg(long = "only", value_name = "NAME")]
    only: Vec<String>,

    /// Report format on stdout
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

/// Waits for a shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => log::info!("Received SIGINT"),
            _ = sigterm.recv() => log::info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        log::info!("Received Ctrl+C");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    utils::init_logging(&cli.common);

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}

/// Errors returned from here are configuration or startup errors; sweep
/// failures are reported through the exit code instead.
async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let config = utils::load_config(cli.common.config.as_ref())?;

    match cli.command {
        Commands::Run(args) => run(&config, args).await,
        Commands::Catalog => {
            list_catalog(&config)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Common(command) => {
            utils::handle_common_command(&command, &config)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(config: &Configuration, args: RunArgs) -> Result<ExitCode> {
    let store =
        open_document_store(&config.store).context("Failed to open the document store")?;
    let runner = SweepRunner::from_config(store, config, &args.only)?;

    if runner.catalog().is_empty() {
        log::warn!("Catalog is empty, nothing to sweep");
    }

    let cancel = Cancellation::new();
    let signal_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match wait_for_shutdown_signal().await {
                Ok(()) => {
                    log::warn!("Stopping after the in-flight chunk");
                    cancel.cancel();
                }
                Err(e) => log::error!("Signal handling unavailable: {e:#}"),
            }
        })
    };

    let report = runner.run(args.mode, &cancel).await;
    signal_task.abort();

    print_report(&report, args.output)?;

    if report.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        if report.was_cancelled() {
            log::warn!("Run was cancelled before every entry finished");
        }
        Ok(ExitCode::FAILURE)
    }
}

fn print_report(report: &SweepReport, output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Text => print!("{}", report.render_text()),
        OutputFormat::Json => {
            let json = report
                .to_json()
                .context("Failed to serialize the sweep report")?;
            println!("{json}");
        }
    }
    Ok(())
}

fn list_catalog(config: &Configuration) -> Result<()> {
    let catalog = Catalog::from_config(&config.catalog).context("Invalid catalog")?;
    if catalog.is_empty() {
        println!("Catalog is empty");
        return Ok(());
    }

    let width = catalog
        .entries()
        .iter()
        .map(|entry| entry.name().len())
        .max()
        .unwrap_or(0);
    for entry in catalog.entries() {
        println!(
            "{:<width$}  {:<11}  {}",
            entry.name(),
            entry.kind().to_string(),
            entry.describe()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_requires_mode() {
        assert!(Cli::try_parse_from(["docsweep", "run"]).is_err());

        let cli = Cli::try_parse_from([
            "docsweep",
            "-q",
            "run",
            "--mode",
            "dry-run",
            "--only",
            "a",
            "--only",
            "b",
            "--output",
            "json",
        ])
        .unwrap();
        assert!(cli.common.quiet);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.mode, RunMode::DryRun);
                assert_eq!(args.only, vec!["a", "b"]);
                assert_eq!(args.output, OutputFormat::Json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_common_commands_are_flattened() {
        let cli = Cli::try_parse_from(["docsweep", "config", "--json"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Common(CommonCommands::Config { json: true })
        ));

        let cli = Cli::try_parse_from(["docsweep", "--config", "x.toml", "validate"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Common(CommonCommands::Validate)
        ));
        assert!(cli.common.config.is_some());
    }
}
