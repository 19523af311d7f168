use std::fmt;
use std::str::FromStr;

use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::error::SessionStoreError;

pub(crate) const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    project_path TEXT NOT NULL,
    model_used TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES sessions(id),
    timestamp TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    tool_calls TEXT,
    tool_results TEXT
);

CREATE INDEX IF NOT EXISTS idx_sessions_project_path ON sessions(project_path);
CREATE INDEX IF NOT EXISTS idx_messages_session_id ON messages(session_id);
CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp);
";

/// A durable conversation context scoped to a project path and model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub started_at: OffsetDateTime,
    pub ended_at: Option<OffsetDateTime>,
    pub project_path: String,
    pub model_used: String,
}

impl Session {
    /// A session is active until it has an end time.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Elapsed time from start to end, or to `now` while still active.
    #[must_use]
    pub fn duration(&self, now: OffsetDateTime) -> Duration {
        self.ended_at.unwrap_or(now) - self.started_at
    }
}

/// Listing row for a session with live message statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session: Session,
    pub message_count: usize,
    /// Content of the newest message, empty when the session has none.
    pub last_message: String,
}

impl SessionSummary {
    /// Last message shortened to `max_chars` characters, with `...` appended
    /// when truncated.
    #[must_use]
    pub fn last_message_preview(&self, max_chars: usize) -> String {
        let mut chars = self.last_message.chars();
        let preview: String = chars.by_ref().take(max_chars).collect();
        if chars.next().is_some() {
            format!("{preview}...")
        } else {
            preview
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = SessionStoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool" => Ok(Self::Tool),
            other => Err(SessionStoreError::InvalidRole {
                value: other.to_string(),
            }),
        }
    }
}

/// A message as appended by callers; the store assigns id and session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    /// JSON array of tool call requests emitted by an assistant message.
    pub tool_calls: Option<String>,
    /// JSON object describing one tool outcome.
    pub tool_results: Option<String>,
}

impl NewMessage {
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
            tool_results: None,
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// A persisted message row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: i64,
    pub session_id: String,
    pub timestamp: OffsetDateTime,
    pub role: MessageRole,
    pub content: String,
    pub tool_calls: Option<String>,
    pub tool_results: Option<String>,
}

/// Formats a timestamp as fixed-width UTC text so lexical order matches time order.
pub fn format_timestamp(timestamp: OffsetDateTime) -> Result<String, SessionStoreError> {
    timestamp
        .to_offset(UtcOffset::UTC)
        .format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
        ))
        .map_err(SessionStoreError::ClockFormat)
}

pub(crate) fn parse_timestamp(
    field: &'static str,
    value: &str,
) -> Result<OffsetDateTime, SessionStoreError> {
    PrimitiveDateTime::parse(
        value,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"),
    )
    .map(PrimitiveDateTime::assume_utc)
    .map_err(|_| SessionStoreError::InvalidTimestamp {
        field,
        value: value.to_string(),
    })
}

/// Session id derived from the creation second, e.g. `session_20260214_093005`.
pub fn session_id_for(started_at: OffsetDateTime) -> Result<String, SessionStoreError> {
    started_at
        .to_offset(UtcOffset::UTC)
        .format(format_description!(
            "session_[year][month][day]_[hour][minute][second]"
        ))
        .map_err(SessionStoreError::ClockFormat)
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn timestamps_round_trip_with_fixed_width() {
        let ts = datetime!(2026-02-14 09:30:05.5 UTC);
        let text = format_timestamp(ts).expect("format");
        assert_eq!(text, "2026-02-14T09:30:05.500000Z");
        assert_eq!(parse_timestamp("timestamp", &text).expect("parse"), ts);
    }

    #[test]
    fn timestamps_are_normalized_to_utc() {
        let ts = datetime!(2026-02-14 10:30:05 +01:00);
        assert_eq!(
            format_timestamp(ts).expect("format"),
            "2026-02-14T09:30:05.000000Z"
        );
    }

    #[test]
    fn parse_rejects_foreign_formats() {
        let error = parse_timestamp("started_at", "2026-02-14 09:30:05").expect_err("must fail");
        assert!(matches!(
            error,
            SessionStoreError::InvalidTimestamp {
                field: "started_at",
                ..
            }
        ));
    }

    #[test]
    fn session_id_uses_second_granularity() {
        let id = session_id_for(datetime!(2026-02-14 09:30:05.999 UTC)).expect("id");
        assert_eq!(id, "session_20260214_093005");
    }

    #[test]
    fn role_parses_known_values_only() {
        for role in [MessageRole::User, MessageRole::Assistant, MessageRole::Tool] {
            assert_eq!(role.as_str().parse::<MessageRole>().expect("role"), role);
        }
        assert!(matches!(
            "system".parse::<MessageRole>(),
            Err(SessionStoreError::InvalidRole { .. })
        ));
    }

    #[test]
    fn preview_truncates_on_char_boundaries() {
        let summary = SessionSummary {
            session: Session {
                id: "s".to_string(),
                started_at: datetime!(2026-02-14 09:30:05 UTC),
                ended_at: None,
                project_path: "/p".to_string(),
                model_used: "m".to_string(),
            },
            message_count: 1,
            last_message: "héllo wörld".to_string(),
        };

        assert_eq!(summary.last_message_preview(5), "héllo...");
        assert_eq!(summary.last_message_preview(50), "héllo wörld");
    }

    #[test]
    fn duration_runs_to_now_while_active() {
        let mut session = Session {
            id: "s".to_string(),
            started_at: datetime!(2026-02-14 09:00:00 UTC),
            ended_at: None,
            project_path: "/p".to_string(),
            model_used: "m".to_string(),
        };
        let now = datetime!(2026-02-14 09:10:00 UTC);
        assert!(session.is_active());
        assert_eq!(session.duration(now), Duration::minutes(10));

        session.ended_at = Some(datetime!(2026-02-14 09:05:00 UTC));
        assert!(!session.is_active());
        assert_eq!(session.duration(now), Duration::minutes(5));
    }
}
