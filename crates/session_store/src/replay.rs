//! Conversion between provider-facing history and persisted message rows.

use agent_provider::{RunMessage, ToolCallRequest, ToolResult};
use serde_json::Value;

use crate::error::SessionStoreError;
use crate::schema::{MessageRecord, MessageRole, NewMessage};
use crate::store::SessionStore;

/// Encodes one history item as a row to append.
///
/// Assistant tool requests go to `tool_calls` as a JSON array; tool outcomes
/// go to `tool_results` as the full result object while `content` keeps a
/// readable rendering.
pub fn encode_run_message(message: &RunMessage) -> Result<NewMessage, SessionStoreError> {
    match message {
        RunMessage::UserText { text } => Ok(NewMessage::user(text.clone())),
        RunMessage::AssistantText { text, tool_calls } => {
            let mut encoded = NewMessage::assistant(text.clone());
            if !tool_calls.is_empty() {
                let calls = serde_json::to_string(tool_calls)
                    .map_err(|source| SessionStoreError::json_serialize("tool calls", source))?;
                encoded.tool_calls = Some(calls);
            }
            Ok(encoded)
        }
        RunMessage::ToolResult(result) => {
            let payload = serde_json::to_string(result)
                .map_err(|source| SessionStoreError::json_serialize("tool result", source))?;
            let mut encoded = NewMessage::new(MessageRole::Tool, tool_content_text(&result.content));
            encoded.tool_results = Some(payload);
            Ok(encoded)
        }
    }
}

/// Rebuilds a history item from a stored row.
pub fn decode_run_message(record: &MessageRecord) -> Result<RunMessage, SessionStoreError> {
    match record.role {
        MessageRole::User => Ok(RunMessage::user(record.content.clone())),
        MessageRole::Assistant => {
            let tool_calls = match record.tool_calls.as_deref() {
                Some(raw) => serde_json::from_str::<Vec<ToolCallRequest>>(raw).map_err(|source| {
                    SessionStoreError::JsonColumn {
                        message_id: record.id,
                        field: "tool_calls",
                        source,
                    }
                })?,
                None => Vec::new(),
            };
            Ok(RunMessage::AssistantText {
                text: record.content.clone(),
                tool_calls,
            })
        }
        MessageRole::Tool => {
            let raw = record
                .tool_results
                .as_deref()
                .ok_or(SessionStoreError::MissingToolResult {
                    message_id: record.id,
                })?;
            let result = serde_json::from_str::<ToolResult>(raw).map_err(|source| {
                SessionStoreError::JsonColumn {
                    message_id: record.id,
                    field: "tool_results",
                    source,
                }
            })?;
            Ok(RunMessage::ToolResult(result))
        }
    }
}

/// Human-readable text for a tool payload: strings verbatim, anything else as JSON.
#[must_use]
pub fn tool_content_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

impl SessionStore {
    /// Loads a session's messages as provider history, oldest first.
    pub fn replay_session(&self, session_id: &str) -> Result<Vec<RunMessage>, SessionStoreError> {
        self.get_session(session_id)?;
        self.session_messages(session_id)?
            .iter()
            .map(decode_run_message)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;

    fn record(role: MessageRole, content: &str) -> MessageRecord {
        MessageRecord {
            id: 7,
            session_id: "s".to_string(),
            timestamp: datetime!(2026-02-14 09:00:00 UTC),
            role,
            content: content.to_string(),
            tool_calls: None,
            tool_results: None,
        }
    }

    #[test]
    fn assistant_tool_calls_are_stored_as_json_array() {
        let message = RunMessage::AssistantText {
            text: String::new(),
            tool_calls: vec![ToolCallRequest::new("c1", "list", json!({"path": "."}))],
        };
        let encoded = encode_run_message(&message).expect("encode");
        let stored: Value =
            serde_json::from_str(encoded.tool_calls.as_deref().expect("tool calls")).expect("json");
        assert_eq!(stored[0]["tool_name"], "list");
        assert_eq!(encoded.role, MessageRole::Assistant);
    }

    #[test]
    fn plain_assistant_text_has_no_tool_calls_column() {
        let encoded = encode_run_message(&RunMessage::assistant("hi")).expect("encode");
        assert_eq!(encoded.tool_calls, None);
        assert_eq!(encoded.tool_results, None);
    }

    #[test]
    fn tool_result_content_is_readable_text() {
        let text = ToolResult::success("c1", "readFile", "file body");
        let structured = ToolResult::success("c2", "list", json!({"entries": ["a"]}));

        assert_eq!(
            encode_run_message(&RunMessage::ToolResult(text))
                .expect("encode")
                .content,
            "file body"
        );
        assert_eq!(
            encode_run_message(&RunMessage::ToolResult(structured))
                .expect("encode")
                .content,
            r#"{"entries":["a"]}"#
        );
    }

    #[test]
    fn tool_row_without_payload_is_rejected() {
        let error = decode_run_message(&record(MessageRole::Tool, "x")).expect_err("must fail");
        assert!(matches!(
            error,
            SessionStoreError::MissingToolResult { message_id: 7 }
        ));
    }

    #[test]
    fn malformed_tool_calls_name_the_column() {
        let mut row = record(MessageRole::Assistant, "");
        row.tool_calls = Some("{not json".to_string());
        let error = decode_run_message(&row).expect_err("must fail");
        assert!(matches!(
            error,
            SessionStoreError::JsonColumn {
                field: "tool_calls",
                ..
            }
        ));
    }
}
