//! Minimal provider-agnostic contract for one model completion round.
//!
//! This crate intentionally defines only the request/response envelope and the
//! host-mediated tool-calling types. It excludes provider transport details,
//! authentication, and multi-round orchestration concerns.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Shared cancellation flag for a turn.
pub type CancelSignal = Arc<AtomicBool>;

/// Creates a fresh, un-cancelled signal.
#[must_use]
pub fn cancel_signal() -> CancelSignal {
    Arc::new(AtomicBool::new(false))
}

/// Returns true once the signal has been raised.
#[must_use]
pub fn is_cancelled(signal: &CancelSignal) -> bool {
    signal.load(Ordering::SeqCst)
}

/// Error returned by a provider while serving one request.
///
/// Transport, authentication, and rate-limit failures all surface through this
/// type; callers do not interpret provider-specific codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    message: String,
}

impl ProviderError {
    /// Creates a new provider error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the underlying error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ProviderError {}

impl From<String> for ProviderError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ProviderError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Provider request envelope for one host tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

impl ToolCallRequest {
    #[must_use]
    pub fn new(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: impl Into<Value>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments: arguments.into(),
        }
    }
}

/// Host tool call result returned back to providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub is_error: bool,
    pub content: Value,
}

impl ToolResult {
    /// Constructs a successful tool result.
    #[must_use]
    pub fn success(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<Value>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            is_error: false,
            content: content.into(),
        }
    }

    /// Constructs a tool error result.
    #[must_use]
    pub fn error(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<Value>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            is_error: true,
            content: content.into(),
        }
    }
}

/// Provider-neutral model-facing message history item.
#[derive(Debug, Clone, PartialEq)]
pub enum RunMessage {
    UserText {
        text: String,
    },
    /// Assistant output; `tool_calls` is empty for a terminal answer.
    AssistantText {
        text: String,
        tool_calls: Vec<ToolCallRequest>,
    },
    ToolResult(ToolResult),
}

impl RunMessage {
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::UserText { text: text.into() }
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::AssistantText {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }
}

/// Generic host-mediated tool definition exposed to a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

/// Input for one completion round.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub model_id: String,
    pub messages: Vec<RunMessage>,
    pub tools: Vec<ToolDefinition>,
}

/// One candidate message returned by a provider.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunChoice {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl RunChoice {
    /// Plain-text terminal choice.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    /// Choice requesting host tool calls, in provider order.
    #[must_use]
    pub fn tool_calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            text: String::new(),
            tool_calls,
        }
    }

    #[must_use]
    pub fn requests_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Ordered candidate messages for one request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunResponse {
    pub choices: Vec<RunChoice>,
}

impl RunResponse {
    #[must_use]
    pub fn single(choice: RunChoice) -> Self {
        Self {
            choices: vec![choice],
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Immutable metadata describing a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub provider_id: String,
}

/// Provider interface for serving one completion round.
pub trait RunProvider: Send + Sync + 'static {
    /// Returns provider identity metadata.
    fn profile(&self) -> ProviderProfile;

    /// Serves one request. Blocks until the provider answers or fails.
    ///
    /// Implementations should return promptly with an error once `cancel` is
    /// raised; the caller also checks it before every call.
    fn complete(&self, req: RunRequest, cancel: CancelSignal)
        -> Result<RunResponse, ProviderError>;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use super::{
        cancel_signal, is_cancelled, CancelSignal, ProviderError, ProviderProfile, RunChoice,
        RunMessage, RunProvider, RunRequest, RunResponse, ToolCallRequest, ToolDefinition,
        ToolResult,
    };

    struct MinimalProvider;

    impl RunProvider for MinimalProvider {
        fn profile(&self) -> ProviderProfile {
            ProviderProfile {
                provider_id: "minimal".to_string(),
            }
        }

        fn complete(
            &self,
            req: RunRequest,
            _cancel: CancelSignal,
        ) -> Result<RunResponse, ProviderError> {
            Ok(RunResponse::single(RunChoice::text(format!(
                "{} messages",
                req.messages.len()
            ))))
        }
    }

    #[test]
    fn provider_error_preserves_message() {
        let error = ProviderError::new("rate limited");
        assert_eq!(error.message(), "rate limited");
        assert_eq!(error.to_string(), "rate limited");
        assert_eq!(ProviderError::from("x"), ProviderError::new("x"));
    }

    #[test]
    fn cancel_signal_starts_clear_and_latches() {
        let signal = cancel_signal();
        assert!(!is_cancelled(&signal));
        signal.store(true, Ordering::SeqCst);
        assert!(is_cancelled(&signal));
    }

    #[test]
    fn minimal_provider_answers_with_single_choice() {
        let provider = MinimalProvider;
        let response = provider
            .complete(
                RunRequest {
                    model_id: "m".to_string(),
                    messages: vec![RunMessage::user("hi")],
                    tools: Vec::new(),
                },
                cancel_signal(),
            )
            .expect("minimal provider should answer");

        assert_eq!(response.choices, vec![RunChoice::text("1 messages")]);
        assert!(!response.choices[0].requests_tools());
    }

    #[test]
    fn tool_result_constructors_set_error_flag_and_content() {
        let success = ToolResult::success("call-1", "list", json!({"files": ["a"]}));
        assert!(!success.is_error);
        assert_eq!(success.content["files"][0], "a");

        let error = ToolResult::error("call-2", "readFile", "missing file");
        assert_eq!(
            error,
            ToolResult {
                call_id: "call-2".to_string(),
                tool_name: "readFile".to_string(),
                is_error: true,
                content: json!("missing file"),
            }
        );
    }

    #[test]
    fn tool_call_request_serializes_as_json_envelope() {
        let call = ToolCallRequest::new("call-42", "readFile", json!({ "path": "README.md" }));
        let encoded = serde_json::to_value(&call).expect("call should serialize");
        assert_eq!(
            encoded,
            json!({
                "call_id": "call-42",
                "tool_name": "readFile",
                "arguments": { "path": "README.md" }
            })
        );

        let definition = ToolDefinition {
            name: "readFile".to_string(),
            description: Some("Reads UTF-8 text from a path".to_string()),
            input_schema: json!({"type": "object"}),
        };
        assert_eq!(definition.name, call.tool_name);
    }

    #[test]
    fn tool_call_choice_requests_tools() {
        let choice = RunChoice::tool_calls(vec![ToolCallRequest::new("c", "list", json!({}))]);
        assert!(choice.requests_tools());
        assert!(RunResponse::empty().choices.is_empty());
    }
}
