//! CLI module for argument parsing and output formatting.
//!
//! Arguments are parsed with clap; the formatters render a finished run
//! report as text, JSON or JUnit XML.

pub mod args;
pub mod output;
