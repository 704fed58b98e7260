//! CLI integration tests.
//!
//! Tests for argument parsing and how arguments and configuration files
//! combine into a run configuration.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use checkrun::cli::args::{Args, Command, ListArgs, OutputFormat, RunArgs};
use checkrun::config::{ConfigError, FileConfig};
use checkrun::{build_orchestrator, list_checks, run_checks, RunConfig};

fn parse(args: &[&str]) -> Result<Args, clap::Error> {
    Args::try_parse_from(std::iter::once("checkrun").chain(args.iter().copied()))
}

fn run_args(args: &[&str]) -> RunArgs {
    match parse(args).unwrap().command {
        Command::Run(run) => run,
        other => panic!("expected run command, got {:?}", other),
    }
}

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    write!(file, "{}", contents).unwrap();
    file
}

#[test]
fn test_run_command_with_all_options() {
    let args = run_args(&[
        "run",
        "--label-filter",
        "common && !telco",
        "--timeout",
        "30",
        "--format",
        "junit",
        "--output",
        "report.xml",
        "--no-color",
        "--verbose",
    ]);

    let config = RunConfig::from_sources(&args, None).unwrap();
    assert_eq!(config.label_filter, "common && !telco");
    assert_eq!(config.timeout, Duration::from_secs(30));
    assert_eq!(config.format, OutputFormat::Junit);
    assert_eq!(config.output, Some(PathBuf::from("report.xml")));
    assert!(config.no_color);
    assert!(config.verbose);
}

#[test]
fn test_short_flags() {
    let args = run_args(&["run", "-l", "telco", "-t", "5", "-f", "json", "-o", "out.json", "-v"]);
    assert_eq!(args.label_filter.as_deref(), Some("telco"));
    assert_eq!(args.timeout, Some(5));
    assert_eq!(args.format, Some(OutputFormat::Json));
    assert_eq!(args.output, Some(PathBuf::from("out.json")));
    assert!(args.verbose);
}

#[test]
fn test_list_and_version_commands() {
    assert_eq!(parse(&["version"]).unwrap().command, Command::Version);
    assert_eq!(
        parse(&["list"]).unwrap().command,
        Command::List(ListArgs::default())
    );
}

#[test]
fn test_invalid_arguments() {
    assert!(parse(&[]).is_err());
    assert!(parse(&["check"]).is_err());
    assert!(parse(&["run", "--format", "xml"]).is_err());
    assert!(parse(&["run", "--timeout"]).is_err());
    assert!(parse(&["run", "--timeout", "-5"]).is_err());
}

#[test]
fn test_config_file_layered_under_arguments() {
    let file = config_file(
        r#"
label_filter = "extended"
timeout_secs = 900
format = "json"
accepted_kernel_taints = ["nvidia"]
"#,
    );
    let args = run_args(&[
        "run",
        "--config",
        file.path().to_str().unwrap(),
        "--format",
        "text",
    ]);

    let config = RunConfig::from_args(&args).unwrap();
    assert_eq!(config.label_filter, "extended");
    assert_eq!(config.timeout, Duration::from_secs(900));
    assert_eq!(config.format, OutputFormat::Text);
    assert_eq!(config.accepted_kernel_taints, vec!["nvidia"]);
}

#[test]
fn test_bad_config_file_is_reported() {
    let file = config_file("timeout_secs = \"soon\"\n");
    let args = run_args(&["run", "--config", file.path().to_str().unwrap()]);
    assert!(matches!(
        RunConfig::from_args(&args),
        Err(ConfigError::Parse { .. })
    ));
}

#[test]
fn test_zero_timeout_is_rejected() {
    let args = run_args(&["run", "--timeout", "0"]);
    assert!(matches!(
        RunConfig::from_sources(&args, None),
        Err(ConfigError::ZeroTimeout)
    ));
    let file = FileConfig {
        timeout_secs: Some(0),
        ..FileConfig::default()
    };
    assert!(RunConfig::from_sources(&RunArgs::default(), Some(file)).is_err());
}

#[test]
fn test_invalid_label_filter_fails_run() {
    let config = RunConfig {
        label_filter: "common &&".to_string(),
        handle_signals: false,
        ..RunConfig::default()
    };
    let err = run_checks(&config).unwrap_err();
    assert!(err
        .to_string()
        .starts_with("could not create a label evaluator, err:"));
}

#[test]
fn test_extra_catalog_file_is_loaded() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(
        file,
        r#"{{"entry": [{{"test_id": "custom", "suite": "site", "description": "Site specific"}}]}}"#
    )
    .unwrap();

    let config = RunConfig {
        catalog: Some(file.path().to_path_buf()),
        ..RunConfig::default()
    };
    let orchestrator = build_orchestrator(&config).unwrap();
    assert!(orchestrator.catalog().contains("site-custom"));
    assert!(orchestrator
        .catalog()
        .contains("platform-alteration-tainted-node-kernel"));
}

#[test]
fn test_built_in_run_records_every_check() {
    let config = RunConfig {
        handle_signals: false,
        ..RunConfig::default()
    };
    let report = run_checks(&config).unwrap();
    assert_eq!(report.results.len(), 1);
    assert!(report
        .results
        .get("platform-alteration-tainted-node-kernel")
        .is_some());
    assert!(report.errors.is_empty());
}

#[test]
fn test_list_honours_config_file() {
    let file = config_file("tags = [\"telco\"]\n");
    let list_args = ListArgs {
        config: Some(file.path().to_path_buf()),
        ..ListArgs::default()
    };
    let config = RunConfig::from_args(&RunArgs::from(list_args)).unwrap();
    assert_eq!(config.tags, vec!["telco"]);
    assert!(list_checks(&config).unwrap().is_empty());

    let list_args = ListArgs {
        label_filter: Some("common".to_string()),
        config: Some(file.path().to_path_buf()),
        ..ListArgs::default()
    };
    let config = RunConfig::from_args(&RunArgs::from(list_args)).unwrap();
    assert_eq!(
        list_checks(&config).unwrap(),
        vec!["platform-alteration-tainted-node-kernel"]
    );
}
