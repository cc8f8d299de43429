//! VTrace - JavaScript Value Tracer
//!
//! Runs a program under the V8 inspector and records, at every pause on a
//! chosen line, the value of each expression in scope.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use eyre::Result;
use tracing::Level;

mod cmd;
mod config;
mod output;
mod project;

/// Command-line interface for VTrace
#[derive(Debug, Parser)]
#[command(name = "vtrace")]
#[command(about = "JavaScript Value Tracer - record what your expressions evaluate to at a line")]
#[command(version)]
pub struct Cli {
    /// Configuration file (default: ./vtrace.toml, then ~/.vtrace.toml)
    #[arg(long, global = true, env = "VTRACE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write a rolling log file
    #[arg(long, global = true)]
    pub log_file: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// One line per value
    #[default]
    Text,
    /// JSON array
    Json,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a program and trace the values of the expressions in scope at a line
    Trace(cmd::trace::TraceArgs),
    /// List the expressions that would be traced at a line without running anything
    Analyze(cmd::analyze::AnalyzeArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    vtrace_common::logging::init_logging("vtrace", level, cli.log_file)?;

    let config = config::VtraceConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Trace(args) => cmd::trace::run(args, config).await,
        Commands::Analyze(args) => cmd::analyze::run(args, config).await,
    }
}
