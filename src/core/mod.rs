//! Core domain types for ensemble-rs.
//!
//! Value types shared across the retrieval, planning, and agent layers:
//! documents and collections, chunks with tagged metadata, tasks and
//! schedule records, and the natural-language date resolver.

mod chunk;
mod dates;
mod document;
mod task;

pub use chunk::{Chunk, ChunkMeta, chunk_id, document_hash};
pub use dates::{extract_date, parse_time_of_day, resolve_date};
pub use document::{Collection, Document, DocumentInfo, EMBEDDING_DIM, SourceKind};
pub use task::{
    Brainstorm, BrainstormKind, Meeting, MeetingNote, Task, TaskDetail, TaskPriority, TaskStatus,
    WorkLog,
};
