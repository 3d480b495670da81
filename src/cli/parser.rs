//! Command-line argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Multi-agent orchestration runtime with a hybrid retrieval core.
#[derive(Debug, Parser)]
#[command(name = "ensemble-rs", version, about, propagate_version = true)]
pub struct Cli {
    /// Output format: text or json.
    #[arg(long, global = true, default_value = "text")]
    pub format: String,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Initialize the data stores at their configured locations.
    Init,

    /// Ingest a file into a collection (chunk, embed, upsert).
    Ingest {
        /// Target collection (websites, conversations, knowledge).
        collection: String,
        /// File to ingest.
        #[arg(long)]
        file: PathBuf,
        /// Document title; defaults to the file name.
        #[arg(long)]
        title: Option<String>,
        /// Source kind: website, conversation, knowledge, meeting_note.
        #[arg(long, default_value = "knowledge")]
        source: String,
    },

    /// One-shot retrieval over the collections.
    Search {
        /// Query text.
        query: String,
        /// Collections to search; all recognized when omitted.
        #[arg(long)]
        collection: Vec<String>,
        /// Maximum results.
        #[arg(long, default_value_t = 8)]
        k: usize,
        /// Search mode: hybrid, vector, or keyword.
        #[arg(long, default_value = "hybrid")]
        mode: String,
    },

    /// Produce a day plan.
    Plan {
        /// Target date (ISO or natural language); today when omitted.
        #[arg(long)]
        date: Option<String>,
        /// Ask the LLM for extra focus statements.
        #[arg(long)]
        llm_focus: bool,
    },

    /// Build or fetch a brainstorm report for a task.
    Brainstorm {
        /// The request, e.g. `task id T1` or `improve task id T1`.
        request: Vec<String>,
    },

    /// Interactive line-oriented session over stdin/stdout.
    Session,

    /// Report store health (counts, embedding coverage, indices).
    Health,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_structure_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_search() {
        let cli = Cli::parse_from([
            "ensemble-rs",
            "search",
            "chromadb usage",
            "--collection",
            "knowledge",
            "--k",
            "3",
        ]);
        match cli.command {
            Commands::Search {
                query,
                collection,
                k,
                mode,
            } => {
                assert_eq!(query, "chromadb usage");
                assert_eq!(collection, vec!["knowledge"]);
                assert_eq!(k, 3);
                assert_eq!(mode, "hybrid");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_plan_with_date() {
        let cli = Cli::parse_from(["ensemble-rs", "plan", "--date", "tomorrow"]);
        match cli.command {
            Commands::Plan { date, llm_focus } => {
                assert_eq!(date.as_deref(), Some("tomorrow"));
                assert!(!llm_focus);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_brainstorm_joins_words() {
        let cli = Cli::parse_from(["ensemble-rs", "brainstorm", "task", "id", "T1"]);
        match cli.command {
            Commands::Brainstorm { request } => {
                assert_eq!(request.join(" "), "task id T1");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_format_flag() {
        let cli = Cli::parse_from(["ensemble-rs", "--format", "json", "health"]);
        assert_eq!(cli.format, "json");
    }
}
