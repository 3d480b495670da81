//! Subcommand execution.
//!
//! Builds the service stack and runs one subcommand to a string (or the
//! interactive session loop). The binary ships with the offline
//! provider: every LLM-assisted path takes its deterministic fallback
//! (regex intent parsing, rule-based extraction, template brainstorms);
//! deployments embed the crate and supply a real [`LlmProvider`].

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use super::output::OutputFormat;
use super::parser::{Cli, Commands};
use crate::Result;
use crate::agent::{AgentRouter, Fragment};
use crate::config::Settings;
use crate::core::{Collection, Document, SourceKind};
use crate::error::{Error, StoreError};
use crate::llm::{LlmProvider, ScriptedProvider};
use crate::retrieve::{SearchMode, SearchOptions};
use crate::services::Services;

/// Directory for brainstorm artifacts, relative to the working
/// directory.
const BRAINSTORM_DIR: &str = "brainstorms";

/// Executes one parsed CLI invocation.
///
/// # Errors
///
/// Returns configuration, store, and pipeline errors; the binary maps
/// them to exit codes.
pub async fn execute(cli: Cli) -> Result<String> {
    let format = OutputFormat::parse(&cli.format);
    let settings = Settings::from_env()?;
    let provider: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider::unavailable());
    let services = Arc::new(Services::durable(
        settings,
        provider,
        PathBuf::from(BRAINSTORM_DIR),
    )?);

    match cli.command {
        Commands::Init => init(&services).await,
        Commands::Ingest {
            collection,
            file,
            title,
            source,
        } => ingest(&services, &collection, &file, title.as_deref(), &source).await,
        Commands::Search {
            query,
            collection,
            k,
            mode,
        } => search(&services, &query, &collection, k, &mode, format).await,
        Commands::Plan { date, llm_focus } => plan(&services, date, llm_focus, format).await,
        Commands::Brainstorm { request } => brainstorm(&services, &request.join(" ")).await,
        Commands::Session => session(services).await,
        Commands::Health => health(&services, format).await,
    }
}

async fn init(services: &Arc<Services>) -> Result<String> {
    // Opening the stores created the schemas; touch them to verify
    let mut lines = vec!["Initialized stores:".to_string()];
    for collection in Collection::all_recognized() {
        let count = services.vector_store.count(&collection.name).await?;
        lines.push(format!(
            "  {} ({}/{} chars, {} rows)",
            collection.name, collection.chunk_size, collection.chunk_overlap, count
        ));
    }
    let graph = services.graph_store.health_check().await?;
    lines.push(format!(
        "  graph ({} entities, {} relationships)",
        graph.entity_count, graph.relationship_count
    ));
    Ok(lines.join("\n") + "\n")
}

async fn ingest(
    services: &Arc<Services>,
    collection_name: &str,
    file: &std::path::Path,
    title: Option<&str>,
    source: &str,
) -> Result<String> {
    let collection =
        Collection::recognized(collection_name).ok_or_else(|| {
            Error::Store(StoreError::UnknownCollection {
                name: collection_name.to_string(),
            })
        })?;
    let source_kind = SourceKind::parse(source).ok_or_else(|| Error::Input {
        message: format!("unknown source kind: {source}"),
    })?;

    let body = std::fs::read_to_string(file).map_err(|e| Error::Input {
        message: format!("cannot read {}: {e}", file.display()),
    })?;
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());
    let title = title.unwrap_or(&file_name);

    let document = Document::new(
        &file_name,
        source_kind,
        &file.to_string_lossy(),
        title,
        &body,
    );
    let chunks = crate::chunking::chunk(&document.body, &collection, &document.info())
        .map_err(Error::Chunking)?;
    let chunk_count = chunks.len();
    let written = services
        .vector_store
        .upsert(&collection.name, chunks)
        .await?;

    Ok(format!(
        "Ingested {title:?}: {chunk_count} chunks, {written} rows written to {}\n",
        collection.name
    ))
}

async fn search(
    services: &Arc<Services>,
    query: &str,
    collections: &[String],
    k: usize,
    mode: &str,
    format: OutputFormat,
) -> Result<String> {
    let mode = match mode {
        "vector" => SearchMode::Vector,
        "keyword" => SearchMode::Keyword,
        _ => SearchMode::Hybrid,
    };
    let options = SearchOptions {
        mode,
        ..SearchOptions::default()
    };
    let results = services
        .retriever
        .search(query, collections, k, &options, &CancellationToken::new())
        .await?;

    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(&results).map_err(|e| Error::Internal {
                message: format!("serialize results: {e}"),
            })
        }
        OutputFormat::Text => {
            if results.is_empty() {
                return Ok("No results.\n".to_string());
            }
            let lines: Vec<String> = results
                .iter()
                .enumerate()
                .map(|(i, r)| {
                    format!(
                        "{}. [{:.4}] {} ({})\n   {}",
                        i + 1,
                        r.score,
                        r.id,
                        r.collection,
                        first_line(&r.body)
                    )
                })
                .collect();
            Ok(lines.join("\n") + "\n")
        }
    }
}

async fn plan(
    services: &Arc<Services>,
    date: Option<String>,
    llm_focus: bool,
    format: OutputFormat,
) -> Result<String> {
    let request = crate::plan::PlanRequest {
        target_date: date,
        work_hours: None,
        use_llm_for_focus: llm_focus,
        feedback: None,
    };
    let output = services
        .planner
        .plan(&request, Utc::now().date_naive())
        .await?;

    match format {
        OutputFormat::Json => Ok(json!({
            "target_date": output.target_date,
            "yesterday_markdown": output.yesterday_markdown,
            "tomorrow_markdown": output.tomorrow_markdown,
        })
        .to_string()),
        OutputFormat::Text => Ok(format!(
            "{}\n{}",
            output.yesterday_markdown, output.tomorrow_markdown
        )),
    }
}

async fn brainstorm(services: &Arc<Services>, request: &str) -> Result<String> {
    let result = services
        .brainstorm
        .process(request, &CancellationToken::new())
        .await?;
    Ok(format!(
        "# {} (version {}, {})\n\n{}",
        result.task_id,
        result.version,
        result.source.as_str(),
        result.content
    ))
}

/// Interactive session: one query per stdin line, fragments to stdout.
#[allow(clippy::print_stdout)]
async fn session(services: Arc<Services>) -> Result<String> {
    let router = Arc::new(AgentRouter::new(services));
    let mut handle = router.open_session(Utc::now().date_naive());

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    println!("ensemble-rs session (empty line to exit)");
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        let fragments = handle.ask(line).await?;
        for fragment in fragments {
            match fragment {
                Fragment::Text { text } => print!("{text}"),
                Fragment::Tool { marker, text } => {
                    println!("[{marker}]");
                    println!("{text}");
                }
                Fragment::Error {
                    kind,
                    message,
                    correlation_id,
                } => println!("error[{kind}] {message} ({correlation_id})"),
                Fragment::Done => println!(),
            }
        }
    }
    Ok(String::new())
}

async fn health(services: &Arc<Services>, format: OutputFormat) -> Result<String> {
    let graph = services.graph_store.health_check().await?;
    let cache = services.cache.stats();
    let mut counts = Vec::new();
    for collection in Collection::all_recognized() {
        counts.push((
            collection.name.clone(),
            services.vector_store.count(&collection.name).await?,
        ));
    }

    match format {
        OutputFormat::Json => Ok(json!({
            "collections": counts
                .iter()
                .map(|(name, count)| json!({"name": name, "rows": count}))
                .collect::<Vec<_>>(),
            "graph": {
                "entity_count": graph.entity_count,
                "relationship_count": graph.relationship_count,
                "embedding_coverage": graph.embedding_coverage,
                "vector_indices": {"present": graph.vector_indices_present},
            },
            "cache": {
                "size": cache.size,
                "hits": cache.hits,
                "misses": cache.misses,
                "evictions": cache.evictions,
                "hit_rate": cache.hit_rate(),
            },
        })
        .to_string()),
        OutputFormat::Text => {
            let mut lines = Vec::new();
            for (name, count) in counts {
                lines.push(format!("{name}: {count} rows"));
            }
            lines.push(format!(
                "graph: {} entities, {} relationships, {:.0}% embedded, indices {}",
                graph.entity_count,
                graph.relationship_count,
                graph.embedding_coverage * 100.0,
                if graph.vector_indices_present {
                    "present"
                } else {
                    "absent"
                }
            ));
            lines.push(format!(
                "cache: {} entries, hit rate {:.2}",
                cache.size,
                cache.hit_rate()
            ));
            Ok(lines.join("\n") + "\n")
        }
    }
}

/// First line of a body, for compact listings.
fn first_line(body: &str) -> &str {
    body.lines().next().unwrap_or_default()
}
