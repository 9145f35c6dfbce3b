use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Log line format for the stderr subscriber.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Common CLI arguments shared across all binaries
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text, help = "Log line format")]
    pub log_format: LogFormat,
}

/// Commands that only inspect configuration
#[derive(Subcommand, Debug, Clone)]
pub enum CommonCommands {
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
    /// Show version information and exit
    Version,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Default filter level for the given flags. `RUST_LOG` wins when set.
    pub fn log_level(args: &CommonArgs) -> &'static str {
        if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Initialize logging based on CLI arguments.
    ///
    /// Logs go to stderr; stdout is reserved for command output.
    pub fn init_logging(args: &CommonArgs) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(log_level(args)));

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr);

        let result = match args.log_format {
            LogFormat::Text => builder.try_init(),
            LogFormat::Json => builder.json().try_init(),
        };

        if let Err(e) = result {
            eprintln!("Logging already initialized: {e}");
        }
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                if !path.exists() {
                    anyhow::bail!("Configuration file not found: {}", path.display());
                }
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            println!("docsweep Configuration:");
            println!("=======================");
            println!("Store DSN: {}", config.store.redacted_dsn());
            println!(
                "Store prefix: {}",
                if config.store.prefix.is_empty() {
                    "(none)"
                } else {
                    config.store.prefix.as_str()
                }
            );
            println!(
                "Store project: {}",
                config.store.project_id.as_deref().unwrap_or("(none)")
            );
            println!(
                "Store credential: {}",
                if config.store.credential.is_some() {
                    "(set)"
                } else {
                    "(not set)"
                }
            );
            println!("Store call timeout: {:?}", config.store.timeout);
            println!("Max operations per batch: {}", config.sweeper.max_batch_ops);
            println!(
                "Retries: {} (base delay {:?}, max delay {:?})",
                config.sweeper.max_retries, config.sweeper.base_delay, config.sweeper.max_delay
            );
            println!(
                "Revalidate before delete: {}",
                config.sweeper.revalidate_before_delete
            );
            println!(
                "Catalog: {} relations, {} field rules",
                config.catalog.relations.len(),
                config.catalog.field_rules.len()
            );
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        log::info!("Validating configuration...");
        config.validate()?;
        if config.store.has_unused_credential() {
            log::warn!(
                "store.credential is set but unused: only an s3:// DSN naming an access key \
                 without a password takes its secret from it"
            );
        }
        log::info!("Configuration validation passed");
        Ok(())
    }

    /// Handle commands that don't require a store connection
    pub fn handle_common_command(command: &CommonCommands, config: &Configuration) -> Result<()> {
        match command {
            CommonCommands::Config { json } => display_config(config, *json),
            CommonCommands::Validate => validate_config(config),
            CommonCommands::Version => {
                println!("{}", version_info());
                Ok(())
            }
        }
    }

    /// Standard version information
    pub fn version_info() -> String {
        format!(
            "{} {} ({})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_RUST_VERSION")
        )
    }
}
