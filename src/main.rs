//! checkrun CLI entry point
//!
//! Runs the built-in check groups and reports their results.

use std::fs;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use checkrun::cli::args::{Args, Command, RunArgs};
use checkrun::cli::output::get_formatter;
use checkrun::version::get_build_info;
use checkrun::{exit_code, list_checks, run_checks, RunConfig, EXIT_RUNTIME_ERROR};

fn main() -> ExitCode {
    let args = Args::parse();

    match dispatch(args) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_RUNTIME_ERROR)
        }
    }
}

fn dispatch(args: Args) -> anyhow::Result<u8> {
    match args.command {
        Command::Version => {
            println!("{}", get_build_info());
            Ok(0)
        }
        Command::List(list_args) => {
            let config = RunConfig::from_args(&RunArgs::from(list_args))
                .context("failed to load configuration")?;
            init_tracing(config.log_level.as_deref());
            for id in list_checks(&config).context("failed to list checks")? {
                println!("{}", id);
            }
            Ok(0)
        }
        Command::Run(run_args) => run(&run_args),
    }
}

/// `RUST_LOG` wins over the configured level, which wins over `info`.
fn init_tracing(level: Option<&str>) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout is reserved for the report.
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .try_init();
}

fn run(args: &RunArgs) -> anyhow::Result<u8> {
    let config = RunConfig::from_args(args).context("failed to load configuration")?;
    init_tracing(config.log_level.as_deref());

    let report = run_checks(&config).context("failed to run checks")?;

    let formatter = get_formatter(config.format, config.no_color, config.verbose);
    let output = formatter.format(&report);

    match &config.output {
        Some(path) => fs::write(path, &output)
            .with_context(|| format!("failed to write report to {}", path.display()))?,
        None => println!("{}", output),
    }

    Ok(exit_code(&report))
}
