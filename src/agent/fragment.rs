//! Response fragments streamed back over a session.
//!
//! Token text flows through `Text` fragments in generation order; tool
//! outputs are fenced with typed markers so downstream consumers can
//! distinguish them; failures become one structured `Error` fragment
//! carrying a correlation id, and the session stays open.

use serde::Serialize;
use serde_json::{Value, json};

/// One fragment of a streamed response.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Fragment {
    /// Assistant text, streamed in order.
    Text {
        /// The text piece.
        text: String,
    },
    /// Output of a tool invocation, fenced with its marker.
    Tool {
        /// Typed marker naming the producing tool.
        marker: String,
        /// Rendered tool output.
        text: String,
    },
    /// A failure of the current query; the session survives.
    Error {
        /// Error kind label (see `Error::kind`).
        kind: String,
        /// Human-readable message.
        message: String,
        /// Correlation id for log lookup.
        correlation_id: String,
    },
    /// End of the response for one query.
    Done,
}

impl Fragment {
    /// Builds an error fragment with a fresh correlation id.
    #[must_use]
    pub fn error(error: &crate::Error) -> Self {
        Self::Error {
            kind: error.kind().to_string(),
            message: error.to_string(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Wire envelope: `{type, text?, markers?}` per the session
    /// contract.
    #[must_use]
    pub fn to_envelope(&self) -> Value {
        match self {
            Self::Text { text } => json!({"type": "assistant", "text": text}),
            Self::Tool { marker, text } => {
                json!({"type": "tool", "text": text, "markers": [marker]})
            }
            Self::Error {
                kind,
                message,
                correlation_id,
            } => json!({
                "type": "error",
                "text": message,
                "markers": [kind, correlation_id],
            }),
            Self::Done => json!({"type": "assistant", "text": Value::Null}),
        }
    }

    /// Whether this fragment ends a query's response.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}
