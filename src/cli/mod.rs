//! Command-line interface.
//!
//! Argument parsing, subcommand execution, and output formatting for
//! the `ensemble-rs` binary.

mod commands;
mod output;
mod parser;

pub use commands::execute;
pub use output::{OutputFormat, exit_code_for, format_error};
pub use parser::{Cli, Commands};
