use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use time::OffsetDateTime;
use tracing::debug;

use crate::error::SessionStoreError;
use crate::paths::ensure_parent_dir;
use crate::schema::{
    format_timestamp, parse_timestamp, MessageRecord, MessageRole, NewMessage, Session,
    SessionSummary, SCHEMA_SQL,
};

const SUMMARY_COLUMNS: &str = "
    s.id, s.started_at, s.ended_at, s.project_path, s.model_used,
    (SELECT COUNT(*) FROM messages m WHERE m.session_id = s.id) AS message_count,
    COALESCE(
        (SELECT m.content FROM messages m WHERE m.session_id = s.id
         ORDER BY m.timestamp DESC, m.id DESC LIMIT 1),
        ''
    ) AS last_message";

/// SQLite-backed storage for sessions and their append-only messages.
pub struct SessionStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SessionStore {
    /// Opens (or creates) the database file, creating parent directories and
    /// the schema as needed.
    pub fn open(path: &Path) -> Result<Self, SessionStoreError> {
        ensure_parent_dir(path)?;
        let conn = Connection::open(path)
            .map_err(|source| SessionStoreError::sqlite("opening database", source))?;
        Self::initialize(conn, Some(path.to_path_buf()))
    }

    pub fn open_in_memory() -> Result<Self, SessionStoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|source| SessionStoreError::sqlite("opening in-memory database", source))?;
        Self::initialize(conn, None)
    }

    fn initialize(conn: Connection, path: Option<PathBuf>) -> Result<Self, SessionStoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|source| SessionStoreError::sqlite("enabling foreign keys", source))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|source| SessionStoreError::sqlite("creating schema", source))?;
        debug!(path = ?path, "session store ready");
        Ok(Self { conn, path })
    }

    /// Database file path; `None` for in-memory stores.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn create_session(&self, session: &Session) -> Result<(), SessionStoreError> {
        let started_at = format_timestamp(session.started_at)?;
        let ended_at = session.ended_at.map(format_timestamp).transpose()?;

        self.conn
            .execute(
                "INSERT INTO sessions (id, started_at, ended_at, project_path, model_used)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    session.id,
                    started_at,
                    ended_at,
                    session.project_path,
                    session.model_used
                ],
            )
            .map_err(|source| {
                if is_constraint_violation(&source) {
                    SessionStoreError::DuplicateSessionId {
                        session_id: session.id.clone(),
                    }
                } else {
                    SessionStoreError::sqlite("creating session", source)
                }
            })?;

        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> Result<Session, SessionStoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, started_at, ended_at, project_path, model_used
                 FROM sessions WHERE id = ?1",
                params![session_id],
                SessionRow::from_row,
            )
            .optional()
            .map_err(|source| SessionStoreError::sqlite("loading session", source))?;

        row.ok_or_else(|| SessionStoreError::not_found(session_id))?
            .into_session()
    }

    /// Marks a session ended at `ended_at`.
    pub fn end_session(
        &self,
        session_id: &str,
        ended_at: OffsetDateTime,
    ) -> Result<(), SessionStoreError> {
        let ended_at = format_timestamp(ended_at)?;
        let updated = self
            .conn
            .execute(
                "UPDATE sessions SET ended_at = ?1 WHERE id = ?2",
                params![ended_at, session_id],
            )
            .map_err(|source| SessionStoreError::sqlite("ending session", source))?;

        if updated == 0 {
            return Err(SessionStoreError::not_found(session_id));
        }

        Ok(())
    }

    /// Sessions started in `project_path`, newest first, at most `limit`.
    pub fn sessions_for_project(
        &self,
        project_path: &str,
        limit: usize,
    ) -> Result<Vec<SessionSummary>, SessionStoreError> {
        let sql = format!(
            "SELECT {SUMMARY_COLUMNS} FROM sessions s
             WHERE s.project_path = ?1
             ORDER BY s.started_at DESC, s.id DESC
             LIMIT ?2"
        );
        self.query_summaries(&sql, params![project_path, sql_limit(limit)])
    }

    /// Most recently started sessions across all projects, at most `limit`.
    pub fn recent_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>, SessionStoreError> {
        let sql = format!(
            "SELECT {SUMMARY_COLUMNS} FROM sessions s
             ORDER BY s.started_at DESC, s.id DESC
             LIMIT ?1"
        );
        self.query_summaries(&sql, params![sql_limit(limit)])
    }

    fn query_summaries(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<SessionSummary>, SessionStoreError> {
        let mut statement = self
            .conn
            .prepare(sql)
            .map_err(|source| SessionStoreError::sqlite("preparing session listing", source))?;
        let rows = statement
            .query_map(params, |row| {
                Ok((
                    SessionRow::from_row(row)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .map_err(|source| SessionStoreError::sqlite("listing sessions", source))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| SessionStoreError::sqlite("reading session listing", source))?;

        rows.into_iter()
            .map(|(session, message_count, last_message)| {
                Ok(SessionSummary {
                    session: session.into_session()?,
                    message_count: usize::try_from(message_count).unwrap_or_default(),
                    last_message,
                })
            })
            .collect()
    }

    /// Appends one message and returns the stored row with its assigned id.
    pub fn append_message(
        &self,
        session_id: &str,
        timestamp: OffsetDateTime,
        message: &NewMessage,
    ) -> Result<MessageRecord, SessionStoreError> {
        let encoded_timestamp = format_timestamp(timestamp)?;
        self.conn
            .execute(
                "INSERT INTO messages (session_id, timestamp, role, content, tool_calls, tool_results)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    session_id,
                    encoded_timestamp,
                    message.role.as_str(),
                    message.content,
                    message.tool_calls,
                    message.tool_results
                ],
            )
            .map_err(|source| {
                if is_constraint_violation(&source) {
                    SessionStoreError::not_found(session_id)
                } else {
                    SessionStoreError::sqlite("appending message", source)
                }
            })?;

        Ok(MessageRecord {
            id: self.conn.last_insert_rowid(),
            session_id: session_id.to_string(),
            timestamp: parse_timestamp("timestamp", &encoded_timestamp)?,
            role: message.role,
            content: message.content.clone(),
            tool_calls: message.tool_calls.clone(),
            tool_results: message.tool_results.clone(),
        })
    }

    /// All messages of a session ordered by `(timestamp, id)`.
    pub fn session_messages(&self, session_id: &str) -> Result<Vec<MessageRecord>, SessionStoreError> {
        let mut statement = self
            .conn
            .prepare(
                "SELECT id, session_id, timestamp, role, content, tool_calls, tool_results
                 FROM messages
                 WHERE session_id = ?1
                 ORDER BY timestamp ASC, id ASC",
            )
            .map_err(|source| SessionStoreError::sqlite("preparing message query", source))?;
        let rows = statement
            .query_map(params![session_id], MessageRow::from_row)
            .map_err(|source| SessionStoreError::sqlite("loading messages", source))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| SessionStoreError::sqlite("reading messages", source))?;

        rows.into_iter().map(MessageRow::into_record).collect()
    }

    /// Deletes a session and all of its messages in one transaction.
    ///
    /// Messages go first, then the session row; any failure rolls both back.
    pub fn delete_session(&mut self, session_id: &str) -> Result<(), SessionStoreError> {
        let tx = self
            .conn
            .transaction()
            .map_err(|source| SessionStoreError::sqlite("beginning delete transaction", source))?;

        let removed_messages = tx
            .execute(
                "DELETE FROM messages WHERE session_id = ?1",
                params![session_id],
            )
            .map_err(|source| SessionStoreError::sqlite("deleting messages", source))?;
        let removed_sessions = tx
            .execute("DELETE FROM sessions WHERE id = ?1", params![session_id])
            .map_err(|source| SessionStoreError::sqlite("deleting session", source))?;

        if removed_sessions == 0 {
            return Err(SessionStoreError::not_found(session_id));
        }

        tx.commit()
            .map_err(|source| SessionStoreError::sqlite("committing delete transaction", source))?;
        debug!(session_id, removed_messages, "session deleted");
        Ok(())
    }

    /// Releases the connection, reporting any failure to close it cleanly.
    pub fn close(self) -> Result<(), SessionStoreError> {
        self.conn
            .close()
            .map_err(|(_conn, source)| SessionStoreError::sqlite("closing database", source))
    }
}

struct SessionRow {
    id: String,
    started_at: String,
    ended_at: Option<String>,
    project_path: String,
    model_used: String,
}

impl SessionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            started_at: row.get(1)?,
            ended_at: row.get(2)?,
            project_path: row.get(3)?,
            model_used: row.get(4)?,
        })
    }

    fn into_session(self) -> Result<Session, SessionStoreError> {
        Ok(Session {
            started_at: parse_timestamp("started_at", &self.started_at)?,
            ended_at: self
                .ended_at
                .as_deref()
                .map(|value| parse_timestamp("ended_at", value))
                .transpose()?,
            id: self.id,
            project_path: self.project_path,
            model_used: self.model_used,
        })
    }
}

struct MessageRow {
    id: i64,
    session_id: String,
    timestamp: String,
    role: String,
    content: String,
    tool_calls: Option<String>,
    tool_results: Option<String>,
}

impl MessageRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            timestamp: row.get(2)?,
            role: row.get(3)?,
            content: row.get(4)?,
            tool_calls: row.get(5)?,
            tool_results: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<MessageRecord, SessionStoreError> {
        Ok(MessageRecord {
            id: self.id,
            timestamp: parse_timestamp("timestamp", &self.timestamp)?,
            role: self.role.parse::<MessageRole>()?,
            session_id: self.session_id,
            content: self.content,
            tool_calls: self.tool_calls,
            tool_results: self.tool_results,
        })
    }
}

fn is_constraint_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(failure, _) if failure.code == ErrorCode::ConstraintViolation
    )
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;
    use time::Duration;

    use super::*;

    fn session(id: &str, project: &str, started_at: OffsetDateTime) -> Session {
        Session {
            id: id.to_string(),
            started_at,
            ended_at: None,
            project_path: project.to_string(),
            model_used: "gpt-4.1-nano".to_string(),
        }
    }

    #[test]
    fn duplicate_session_id_is_reported_distinctly() {
        let store = SessionStore::open_in_memory().expect("store");
        let started = datetime!(2026-02-14 09:00:00 UTC);
        store
            .create_session(&session("session_a", "/p", started))
            .expect("first insert");

        let error = store
            .create_session(&session("session_a", "/p", started))
            .expect_err("second insert must fail");
        assert!(matches!(
            error,
            SessionStoreError::DuplicateSessionId { ref session_id } if session_id == "session_a"
        ));
    }

    #[test]
    fn append_to_unknown_session_is_not_found() {
        let store = SessionStore::open_in_memory().expect("store");
        let error = store
            .append_message(
                "missing",
                datetime!(2026-02-14 09:00:00 UTC),
                &NewMessage::user("hi"),
            )
            .expect_err("foreign key must reject");
        assert!(error.is_not_found());
    }

    #[test]
    fn ties_on_timestamp_are_broken_by_insertion_order() {
        let store = SessionStore::open_in_memory().expect("store");
        let ts = datetime!(2026-02-14 09:00:00 UTC);
        store.create_session(&session("s", "/p", ts)).expect("session");

        let later = store
            .append_message("s", ts + Duration::seconds(1), &NewMessage::assistant("later"))
            .expect("append");
        let first = store
            .append_message("s", ts, &NewMessage::user("first"))
            .expect("append");
        let second = store
            .append_message("s", ts, &NewMessage::user("second"))
            .expect("append");

        let contents: Vec<String> = store
            .session_messages("s")
            .expect("messages")
            .into_iter()
            .map(|message| message.content)
            .collect();
        assert_eq!(contents, vec!["first", "second", "later"]);
        assert!(first.id < second.id && second.id > later.id);
    }

    #[test]
    fn end_session_on_unknown_id_is_not_found() {
        let store = SessionStore::open_in_memory().expect("store");
        let error = store
            .end_session("nope", datetime!(2026-02-14 09:00:00 UTC))
            .expect_err("must fail");
        assert!(error.is_not_found());
    }

    #[test]
    fn in_memory_store_has_no_path() {
        let store = SessionStore::open_in_memory().expect("store");
        assert!(store.path().is_none());
        store.close().expect("close");
    }
}
