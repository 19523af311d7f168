use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("SQLite error while {operation}: {source}")]
    Sqlite {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("session '{session_id}' not found")]
    SessionNotFound { session_id: String },

    #[error("session id '{session_id}' is already taken")]
    DuplicateSessionId { session_id: String },

    #[error("no free session id derived from '{base_id}' after {attempts} attempts")]
    SessionIdExhausted { base_id: String, attempts: usize },

    #[error("session '{session_id}' is still current; end it before starting another")]
    SessionAlreadyActive { session_id: String },

    #[error("invalid timestamp in field '{field}': {value}")]
    InvalidTimestamp { field: &'static str, value: String },

    #[error("invalid message role '{value}'; expected user, assistant, or tool")]
    InvalidRole { value: String },

    #[error("failed to serialize {what}: {source}")]
    JsonSerialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("message {message_id} has malformed JSON in field '{field}': {source}")]
    JsonColumn {
        message_id: i64,
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("message {message_id} with role 'tool' is missing its tool_results payload")]
    MissingToolResult { message_id: i64 },

    #[error("failed to format timestamp: {0}")]
    ClockFormat(#[source] time::error::Format),
}

impl SessionStoreError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn sqlite(operation: &'static str, source: rusqlite::Error) -> Self {
        Self::Sqlite { operation, source }
    }

    #[must_use]
    pub fn not_found(session_id: impl Into<String>) -> Self {
        Self::SessionNotFound {
            session_id: session_id.into(),
        }
    }

    #[must_use]
    pub fn json_serialize(what: &'static str, source: serde_json::Error) -> Self {
        Self::JsonSerialize { what, source }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SessionNotFound { .. })
    }
}
