//! Command line arguments for checkrun.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::Deserialize;

/// Output format selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable terminal output
    #[default]
    Text,
    /// Machine-readable JSON
    Json,
    /// JUnit XML for CI/CD integration
    Junit,
}

#[derive(Debug, Parser)]
#[command(name = "checkrun")]
#[command(about = "Run labelled check groups and record their results", long_about = None)]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, PartialEq)]
pub enum Command {
    /// Run the checks selected by the label filter
    Run(RunArgs),

    /// List the IDs of the checks selected by the label filter
    List(ListArgs),

    /// Print version information
    Version,
}

/// Options of the `run` command. Unset options fall back to the
/// configuration file, then to built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, ClapArgs)]
pub struct RunArgs {
    /// Label expression, e.g. "common && !telco" (default: all)
    #[arg(short, long)]
    pub label_filter: Option<String>,

    /// Global timeout in seconds (default: 86400)
    #[arg(short, long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Output format
    #[arg(short, long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Write the report to FILE instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Extra catalog entries (.json or .toml)
    #[arg(long, value_name = "FILE")]
    pub catalog: Option<PathBuf>,

    /// Configuration file (default: $CHECKRUN_CONFIG)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Include captured output of every check in the report
    #[arg(short, long)]
    pub verbose: bool,
}

/// Options of the `list` command. They resolve through the same layers as
/// `run`, so both select the same checks.
#[derive(Debug, Clone, Default, PartialEq, ClapArgs)]
pub struct ListArgs {
    /// Label expression, e.g. "common && !telco" (default: all)
    #[arg(short, long)]
    pub label_filter: Option<String>,

    /// Extra catalog entries (.json or .toml)
    #[arg(long, value_name = "FILE")]
    pub catalog: Option<PathBuf>,

    /// Configuration file (default: $CHECKRUN_CONFIG)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl From<ListArgs> for RunArgs {
    fn from(args: ListArgs) -> Self {
        RunArgs {
            label_filter: args.label_filter,
            catalog: args.catalog,
            config: args.config,
            ..RunArgs::default()
        }
    }
}
