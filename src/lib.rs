//! checkrun library
//!
//! Check orchestration engine: named, labelled checks are registered into
//! ordered groups, run behind lifecycle hooks against a global deadline and
//! external interrupts, and every outcome is recorded against a catalog.
//!
//! - [`engine::check`]: a single check, its builder and result state machine
//! - [`engine::labels`]: the label expression language used to select checks
//! - [`engine::group`]: groups, hooks and failure propagation
//! - [`engine::orchestrator`]: the run loop, timeouts and interrupts
//! - [`engine::result`]: result records and summaries
//! - [`data::catalog`]: claim catalog metadata keyed by check ID
//! - [`checks`]: the built-in checks
//!
//! # Example
//!
//! ```no_run
//! use checkrun::{run_checks, RunConfig};
//!
//! let config = RunConfig::default();
//! let report = run_checks(&config).expect("run failed");
//! println!("Checks passed: {}", report.summary().passed);
//! ```

pub mod checks;
pub mod cli;
pub mod config;
pub mod data;
pub mod engine;
pub mod version;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use cli::args::{OutputFormat, RunArgs};
use config::{ConfigError, FileConfig};
use data::catalog::{Catalog, CatalogError, DEFAULT_TAGS};
use engine::labels::{expand_all_keyword, LabelsExpr, LabelsExprError};
use engine::signals::install_signal_handler;

// Re-exports for public API
pub use engine::check::Check;
pub use engine::group::ChecksGroup;
pub use engine::orchestrator::Orchestrator;
pub use engine::result::{ResultRecord, ResultSummary, RunReport};

/// Outcome of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckState {
    Passed,
    Skipped,
    Failed,
    Error,
    Aborted,
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckState::Passed => write!(f, "passed"),
            CheckState::Skipped => write!(f, "skipped"),
            CheckState::Failed => write!(f, "failed"),
            CheckState::Error => write!(f, "error"),
            CheckState::Aborted => write!(f, "aborted"),
        }
    }
}

/// Error types for checkrun operations.
#[derive(Debug, Error)]
pub enum CheckrunError {
    #[error("could not create a label evaluator, err: {0}")]
    LabelsExpr(#[from] LabelsExprError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{count} errors found in checks/groups")]
    ChecksErrors { count: usize },
    #[error("run aborted: {reason}")]
    Aborted { reason: String },
    #[error("failed to spawn group worker: {source}")]
    Spawn {
        #[source]
        source: std::io::Error,
    },
    #[error("failed to install the SIGINT/SIGTERM handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

/// Process exit codes of the binary.
pub const EXIT_PASSED: u8 = 0;
pub const EXIT_FAILED: u8 = 1;
pub const EXIT_ERRORS: u8 = 2;
pub const EXIT_RUNTIME_ERROR: u8 = 3;

/// Exit code for a finished run: errors and aborts outrank failed checks.
pub fn exit_code(report: &RunReport) -> u8 {
    if !report.errors.is_empty() || report.is_aborted() {
        EXIT_ERRORS
    } else if report.failed_checks > 0 {
        EXIT_FAILED
    } else {
        EXIT_PASSED
    }
}

/// Default global deadline of a run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub label_filter: String,
    pub timeout: Duration,
    pub format: OutputFormat,
    pub output: Option<PathBuf>,
    pub catalog: Option<PathBuf>,
    /// Tags the `all` keyword expands to.
    pub tags: Vec<String>,
    pub handle_signals: bool,
    pub log_level: Option<String>,
    /// Kernel modules allowed to taint the kernel.
    pub accepted_kernel_taints: Vec<String>,
    pub no_color: bool,
    pub verbose: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            label_filter: "all".to_string(),
            timeout: DEFAULT_TIMEOUT,
            format: OutputFormat::Text,
            output: None,
            catalog: None,
            tags: DEFAULT_TAGS.iter().map(|t| t.to_string()).collect(),
            handle_signals: true,
            log_level: None,
            accepted_kernel_taints: Vec::new(),
            no_color: false,
            verbose: false,
        }
    }
}

impl RunConfig {
    /// Create configuration from command line arguments, layered over the
    /// configuration file named by `--config` or `CHECKRUN_CONFIG`.
    pub fn from_args(args: &RunArgs) -> Result<Self, ConfigError> {
        let file = match config::resolve_config_path(args.config.as_deref()) {
            Some(path) => Some(FileConfig::load(&path)?),
            None => None,
        };
        Self::from_sources(args, file)
    }

    /// Defaults, then file values, then command line values.
    pub fn from_sources(args: &RunArgs, file: Option<FileConfig>) -> Result<Self, ConfigError> {
        let mut config = RunConfig::default();
        if let Some(file) = file {
            file.apply(&mut config)?;
        }

        if let Some(filter) = &args.label_filter {
            config.label_filter = filter.clone();
        }
        if let Some(secs) = args.timeout {
            if secs == 0 {
                return Err(ConfigError::ZeroTimeout);
            }
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(format) = args.format {
            config.format = format;
        }
        if args.output.is_some() {
            config.output = args.output.clone();
        }
        if args.catalog.is_some() {
            config.catalog = args.catalog.clone();
        }
        config.no_color |= args.no_color;
        config.verbose |= args.verbose;

        Ok(config)
    }

    /// Parse the label filter, expanding the `all` keyword.
    pub fn labels_expr(&self) -> Result<LabelsExpr, LabelsExprError> {
        LabelsExpr::parse(&expand_all_keyword(&self.label_filter, &self.tags))
    }
}

/// Orchestrator with the built-in checks and catalog, plus the catalog file
/// named in `config`.
pub fn build_orchestrator(config: &RunConfig) -> Result<Orchestrator, CheckrunError> {
    let orchestrator = Orchestrator::new(checks::catalog());
    if let Some(path) = &config.catalog {
        orchestrator.add_catalog(Catalog::load(path)?);
    }
    checks::load_checks(&orchestrator, &config.accepted_kernel_taints);
    Ok(orchestrator)
}

/// IDs of the built-in checks `config` selects, in registration order.
pub fn list_checks(config: &RunConfig) -> Result<Vec<String>, CheckrunError> {
    let expr = config.labels_expr()?;
    let orchestrator = build_orchestrator(config)?;
    Ok(orchestrator.filter_check_ids(&expr))
}

/// Run the built-in checks.
///
/// This is the main entry point of the library. Check failures are part of
/// the returned report; only a bad label filter, a missing catalog entry or
/// a setup failure is an error.
pub fn run_checks(config: &RunConfig) -> Result<RunReport, CheckrunError> {
    let expr = config.labels_expr()?;
    let orchestrator = build_orchestrator(config)?;

    if config.handle_signals {
        install_signal_handler(&orchestrator.interrupter())?;
    }

    orchestrator.run(&expr, config.timeout)
}
