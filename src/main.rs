use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use unitforge::config::CompilerConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "unitforge")]
#[command(version, about = "Concurrent multi-unit compiler driver")]
pub struct Cli {
    /// Log at debug level (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Path to the config file. Defaults to ./unitforge.toml when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Number of pool workers. Overrides unitforge.toml and UNITFORGE_WORKERS.
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile source files together and print or write their translations
    Compile {
        /// Source files; each file is one compilation unit
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Write translations here instead of printing them
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Source encoding: UTF-8, US-ASCII or ISO-8859-1
        #[arg(long)]
        encoding: Option<String>,

        /// Write the compile summary as JSON to this file
        #[arg(long)]
        summary_file: Option<PathBuf>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default unitforge.toml to the working directory
    Init,
}

fn init_logging(verbose: bool, format: LogFormat) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // Logs go to stderr so translations on stdout stay clean.
    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    let working_dir = std::env::current_dir().context("Failed to get current directory")?;

    match &cli.command {
        Commands::Compile {
            files,
            out_dir,
            encoding,
            summary_file,
        } => {
            let config = CompilerConfig::resolve(cli.config.as_deref(), &working_dir, cli.workers)?;
            let options = cmd::CompileOptions {
                out_dir: out_dir.as_deref(),
                encoding: encoding.as_deref(),
                summary_file: summary_file.as_deref(),
            };
            let clean = cmd::cmd_compile(&config, files, &options).await?;
            if !clean {
                std::process::exit(1);
            }
        }
        Commands::Config { command } => {
            cmd::cmd_config(&working_dir, &cli, command.clone())?;
        }
    }

    Ok(())
}
