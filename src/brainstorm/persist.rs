//! Brainstorm rendering, parsing, and atomic persistence.
//!
//! Reports render to markdown with a fixed header and section order and
//! parse back to [`Brainstorm`] records. Persistence writes two
//! artifacts, the per-task file and the collective log, by staging
//! both to temp files and renaming, so a reader never observes a
//! half-written pair.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::core::{Brainstorm, BrainstormKind, Task};
use crate::error::BrainstormError;

/// Fixed section order of every report.
pub const SECTION_ORDER: [&str; 7] = [
    "Overview",
    "Key Considerations",
    "Potential Approaches",
    "Risks",
    "Recommendations",
    "RAG Context Used",
    "Sources",
];

/// Name of the collective log file.
pub const COLLECTIVE_FILE: &str = "task_brainstorms.md";

/// Per-task file name for a task id.
#[must_use]
pub fn task_file_name(task_id: &str) -> String {
    format!("{task_id}_brainstorm.md")
}

/// Renders a report to markdown.
///
/// Header line: `## Brainstorm: <title> (<task_id>)`, then a metadata
/// line, then the sections in [`SECTION_ORDER`].
#[must_use]
pub fn render(task: &Task, brainstorm: &Brainstorm) -> String {
    let mut out = format!("## Brainstorm: {} ({})\n\n", task.title, brainstorm.task_id);
    out.push_str(&format!(
        "*Type: {} · Version: {} · Generated: {}*\n\n",
        brainstorm.kind.as_str(),
        brainstorm.version,
        brainstorm.generated_at.to_rfc3339(),
    ));

    for (name, body) in &brainstorm.sections {
        out.push_str(&format!("### {name}\n\n"));
        let trimmed = body.trim();
        if trimmed.is_empty() {
            out.push_str("_None._\n\n");
        } else {
            out.push_str(trimmed);
            out.push_str("\n\n");
        }
    }
    out
}

/// Parses a per-task markdown file back into a record.
///
/// Returns `None` when the header or metadata line is missing or
/// malformed.
#[must_use]
pub fn parse(markdown: &str) -> Option<Brainstorm> {
    let mut lines = markdown.lines();

    let header = lines.find(|l| l.starts_with("## Brainstorm: "))?;
    let open = header.rfind('(')?;
    let close = header.rfind(')')?;
    let task_id = header.get(open + 1..close)?.to_string();

    let meta_line = lines.find(|l| l.starts_with("*Type: "))?;
    let kind = if meta_line.contains("Type: improved") {
        BrainstormKind::Improved
    } else if meta_line.contains("Type: updated") {
        BrainstormKind::Updated
    } else {
        BrainstormKind::Initial
    };
    let version: u32 = meta_line
        .split("Version: ")
        .nth(1)?
        .split(|c: char| !c.is_ascii_digit())
        .next()?
        .parse()
        .ok()?;
    let generated_at: DateTime<Utc> = meta_line
        .split("Generated: ")
        .nth(1)?
        .trim_end_matches('*')
        .trim()
        .parse()
        .ok()?;

    // Sections: "### <name>" headers with bodies up to the next header
    let mut sections: Vec<(String, String)> = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;
    for line in markdown.lines() {
        if let Some(name) = line.strip_prefix("### ") {
            if let Some((done_name, body)) = current.take() {
                sections.push((done_name, body.join("\n").trim().to_string()));
            }
            current = Some((name.trim().to_string(), Vec::new()));
        } else if let Some((_, body)) = current.as_mut() {
            body.push(line);
        }
    }
    if let Some((done_name, body)) = current.take() {
        sections.push((done_name, body.join("\n").trim().to_string()));
    }

    let rag_context = section_items(&sections, "RAG Context Used");
    let sources = section_items(&sections, "Sources");

    Some(Brainstorm {
        task_id,
        kind,
        generated_at,
        sections,
        rag_context,
        sources,
        version,
    })
}

/// Bullet items of a named section.
fn section_items(sections: &[(String, String)], name: &str) -> Vec<String> {
    sections
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, body)| {
            body.lines()
                .filter_map(|l| l.trim().strip_prefix("- "))
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Atomically publishes both artifacts: the per-task file (replaced)
/// and the collective log (appended).
///
/// Both new contents are staged to temp files in the target directory
/// first; only then are they renamed into place. A failure before the
/// renames leaves neither file changed.
///
/// # Errors
///
/// Returns [`BrainstormError::Persist`] on any I/O failure.
pub fn write_atomic(
    dir: &Path,
    task_id: &str,
    per_task_content: &str,
) -> std::result::Result<(), BrainstormError> {
    fs::create_dir_all(dir).map_err(|e| BrainstormError::Persist {
        reason: format!("create {}: {e}", dir.display()),
    })?;

    let task_path = dir.join(task_file_name(task_id));
    let collective_path = dir.join(COLLECTIVE_FILE);

    // Collective log grows by appending the new report
    let mut collective = match fs::read_to_string(&collective_path) {
        Ok(existing) => existing,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(BrainstormError::Persist {
                reason: format!("read {}: {e}", collective_path.display()),
            });
        }
    };
    if !collective.is_empty() && !collective.ends_with('\n') {
        collective.push('\n');
    }
    collective.push_str(per_task_content);
    collective.push('\n');

    // Stage both, then rename both; rename is the commit point
    let task_tmp = stage(dir, &task_path, per_task_content)?;
    let collective_tmp = stage(dir, &collective_path, &collective)?;

    fs::rename(&task_tmp, &task_path).map_err(|e| BrainstormError::Persist {
        reason: format!("rename {}: {e}", task_path.display()),
    })?;
    if let Err(e) = fs::rename(&collective_tmp, &collective_path) {
        // The per-task rename already landed; report the divergence
        return Err(BrainstormError::Persist {
            reason: format!("rename {}: {e}", collective_path.display()),
        });
    }
    Ok(())
}

/// Writes content to a temp file next to `target`.
fn stage(
    dir: &Path,
    target: &Path,
    content: &str,
) -> std::result::Result<PathBuf, BrainstormError> {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "artifact".to_string());
    let tmp = dir.join(format!(".{file_name}.tmp"));
    fs::write(&tmp, content).map_err(|e| BrainstormError::Persist {
        reason: format!("stage {}: {e}", tmp.display()),
    })?;
    Ok(tmp)
}

/// Loads and parses the per-task file, if present.
#[must_use]
pub fn load_existing(dir: &Path, task_id: &str) -> Option<(String, Brainstorm)> {
    let path = dir.join(task_file_name(task_id));
    let content = fs::read_to_string(path).ok()?;
    let record = parse(&content)?;
    Some((content, record))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(task: &Task, version: u32) -> Brainstorm {
        Brainstorm {
            task_id: task.id.clone(),
            kind: BrainstormKind::Initial,
            generated_at: "2025-06-10T12:00:00Z".parse().unwrap(),
            sections: SECTION_ORDER
                .iter()
                .map(|name| ((*name).to_string(), format!("Body of {name}.")))
                .collect(),
            rag_context: vec![],
            sources: vec![],
            version,
        }
    }

    #[test]
    fn test_render_header_and_order() {
        let task = Task::new("T1", "Write spec");
        let markdown = render(&task, &sample(&task, 1));

        assert!(markdown.starts_with("## Brainstorm: Write spec (T1)\n"));
        let mut last_index = 0;
        for name in SECTION_ORDER {
            let index = markdown.find(&format!("### {name}")).unwrap();
            assert!(index > last_index, "section {name} out of order");
            last_index = index;
        }
    }

    #[test]
    fn test_roundtrip() {
        let task = Task::new("T1", "Write spec");
        let original = sample(&task, 3);
        let markdown = render(&task, &original);
        let parsed = parse(&markdown).unwrap();

        assert_eq!(parsed.task_id, "T1");
        assert_eq!(parsed.version, 3);
        assert_eq!(parsed.kind, BrainstormKind::Initial);
        assert_eq!(parsed.sections.len(), SECTION_ORDER.len());
        assert_eq!(parsed.sections[0].1, "Body of Overview.");
        assert_eq!(parsed.generated_at, original.generated_at);
    }

    #[test]
    fn test_parse_context_and_sources_bullets() {
        let task = Task::new("T1", "Write spec");
        let mut record = sample(&task, 1);
        record.sections[5].1 = "- first snippet\n- second snippet".to_string();
        record.sections[6].1 = "- knowledge::abc::chunk_0".to_string();

        let parsed = parse(&render(&task, &record)).unwrap();
        assert_eq!(parsed.rag_context.len(), 2);
        assert_eq!(parsed.sources, vec!["knowledge::abc::chunk_0"]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse("just some notes").is_none());
        assert!(parse("## Brainstorm: missing meta (T1)").is_none());
    }

    #[test]
    fn test_write_atomic_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let task = Task::new("T1", "Write spec");
        let content = render(&task, &sample(&task, 1));

        write_atomic(dir.path(), "T1", &content).unwrap();

        let (loaded, record) = load_existing(dir.path(), "T1").unwrap();
        assert_eq!(loaded, content);
        assert_eq!(record.version, 1);

        // Collective file carries the same report
        let collective = fs::read_to_string(dir.path().join(COLLECTIVE_FILE)).unwrap();
        assert!(collective.contains("## Brainstorm: Write spec (T1)"));

        // No temp files left behind
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_collective_appends_across_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let task1 = Task::new("T1", "First");
        let task2 = Task::new("T2", "Second");

        write_atomic(dir.path(), "T1", &render(&task1, &sample(&task1, 1))).unwrap();
        let mut second = sample(&task2, 1);
        second.task_id = "T2".to_string();
        write_atomic(dir.path(), "T2", &render(&task2, &second)).unwrap();

        let collective = fs::read_to_string(dir.path().join(COLLECTIVE_FILE)).unwrap();
        assert!(collective.contains("(T1)"));
        assert!(collective.contains("(T2)"));
        let first_pos = collective.find("(T1)").unwrap();
        let second_pos = collective.find("(T2)").unwrap();
        assert!(first_pos < second_pos);
    }

    #[test]
    fn test_load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_existing(dir.path(), "nope").is_none());
    }
}
