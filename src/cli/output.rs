//! Output formatting for the CLI.

use serde_json::json;

use crate::error::Error;

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// One JSON document.
    Json,
}

impl OutputFormat {
    /// Parses the `--format` flag value; unknown values fall back to
    /// text.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Formats an error for the selected output format.
#[must_use]
pub fn format_error(error: &Error, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => error.to_string(),
        OutputFormat::Json => json!({
            "error": {
                "kind": error.kind(),
                "message": error.to_string(),
            }
        })
        .to_string(),
    }
}

/// The process exit code for an error, per the documented contract:
/// 1 config error, 2 store unreachable, 3 anything else.
#[must_use]
pub fn exit_code_for(error: &Error) -> u8 {
    match error {
        Error::Config { .. } => 1,
        Error::Store(crate::error::StoreError::Unavailable { .. }) => 2,
        _ => 3,
    }
}
