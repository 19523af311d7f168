//! Turn loop between the user, the model provider, and host capabilities.
//!
//! One turn runs `AwaitingInput -> ModelCall -> (ToolDispatch -> ModelCall)* ->
//! TerminalResponse -> AwaitingInput`. Every message appended to the in-memory
//! transcript is also recorded through the session manager; recording failures
//! are reported as warnings and never abort the turn.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use agent_provider::{
    is_cancelled, CancelSignal, ProviderError, RunMessage, RunProvider, RunRequest,
    ToolCallRequest, ToolResult,
};
use serde_json::json;
use session_store::{
    decode_run_message, encode_run_message, MessageRecord, SessionHandle, SessionManager,
    SessionStoreError,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::policy::{evaluate, refusal_payload, AccessMode, PolicyDecision};
use crate::tools::{Confirmer, ExecutionError, InvocationContext, ToolRegistry};

pub const DEFAULT_MAX_ROUNDS: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    AwaitingInput,
    ModelCall,
    ToolDispatch,
    TerminalResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    UserInput,
    ToolCallsReceived,
    ToolsDispatched,
    FinalAnswer,
    ResponseDelivered,
    /// Provider failure, empty response, cancellation, or round limit.
    TurnAborted,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("invalid engine transition: {event} while in {from}")]
    InvalidTransition { from: EngineState, event: EngineEvent },
}

/// Next state for `event` in `state`.
pub fn transition(state: EngineState, event: EngineEvent) -> Result<EngineState, EngineError> {
    use EngineEvent as E;
    use EngineState as S;

    match (state, event) {
        (S::AwaitingInput, E::UserInput) => Ok(S::ModelCall),
        (S::ModelCall, E::ToolCallsReceived) => Ok(S::ToolDispatch),
        (S::ToolDispatch, E::ToolsDispatched) => Ok(S::ModelCall),
        (S::ModelCall, E::FinalAnswer) => Ok(S::TerminalResponse),
        (S::TerminalResponse, E::ResponseDelivered) => Ok(S::AwaitingInput),
        (S::ModelCall | S::ToolDispatch, E::TurnAborted) => Ok(S::AwaitingInput),
        (from, event) => Err(EngineError::InvalidTransition { from, event }),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The model produced a final answer.
    Completed { reply: String },
    ProviderFailed { error: ProviderError },
    /// The provider answered with zero choices.
    EmptyResponse,
    Cancelled,
    RoundLimitReached { rounds: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    pub outcome: TurnOutcome,
    /// Persistence problems that did not stop the turn.
    pub warnings: Vec<String>,
    pub rounds: usize,
    pub tool_calls: usize,
}

impl TurnReport {
    #[must_use]
    pub fn reply(&self) -> Option<&str> {
        match &self.outcome {
            TurnOutcome::Completed { reply } => Some(reply),
            _ => None,
        }
    }
}

/// Where a turn's messages are recorded.
#[derive(Clone, Copy)]
pub struct TurnSink<'a> {
    pub sessions: &'a SessionManager,
    pub handle: Option<&'a SessionHandle>,
}

pub struct ConversationEngine {
    provider: Arc<dyn RunProvider>,
    registry: ToolRegistry,
    confirmer: Box<dyn Confirmer>,
    model_id: String,
    max_rounds: usize,
    transcript: Vec<RunMessage>,
    state: EngineState,
}

impl ConversationEngine {
    #[must_use]
    pub fn new(
        provider: Arc<dyn RunProvider>,
        registry: ToolRegistry,
        confirmer: Box<dyn Confirmer>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            registry,
            confirmer,
            model_id: model_id.into(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            transcript: Vec::new(),
            state: EngineState::AwaitingInput,
        }
    }

    /// Caps provider calls per turn; at least one call is always allowed.
    #[must_use]
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    #[must_use]
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn set_model(&mut self, model_id: impl Into<String>) {
        self.model_id = model_id.into();
    }

    #[must_use]
    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        self.state
    }

    #[must_use]
    pub fn transcript(&self) -> &[RunMessage] {
        &self.transcript
    }

    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn clear_transcript(&mut self) {
        self.transcript.clear();
    }

    /// Replaces the transcript with the history stored in `records`.
    pub fn restore_transcript(
        &mut self,
        records: &[MessageRecord],
    ) -> Result<usize, SessionStoreError> {
        let messages = records
            .iter()
            .map(decode_run_message)
            .collect::<Result<Vec<_>, _>>()?;
        self.transcript = messages;
        info!(messages = self.transcript.len(), "transcript restored");
        Ok(self.transcript.len())
    }

    /// Runs one user turn to completion.
    pub fn submit(
        &mut self,
        sink: TurnSink<'_>,
        mode: AccessMode,
        input: &str,
        cancel: CancelSignal,
    ) -> Result<TurnReport, EngineError> {
        let result = self.run_turn(sink, mode, input, &cancel);
        if result.is_err() {
            self.state = EngineState::AwaitingInput;
        }
        result
    }

    fn run_turn(
        &mut self,
        sink: TurnSink<'_>,
        mode: AccessMode,
        input: &str,
        cancel: &CancelSignal,
    ) -> Result<TurnReport, EngineError> {
        self.advance(EngineEvent::UserInput)?;
        info!(mode = %mode, model = %self.model_id, "turn started");

        let mut report = TurnReport {
            outcome: TurnOutcome::EmptyResponse,
            warnings: Vec::new(),
            rounds: 0,
            tool_calls: 0,
        };
        self.append(sink, RunMessage::user(input), &mut report.warnings);

        loop {
            if is_cancelled(cancel) {
                return self.abort(report, TurnOutcome::Cancelled);
            }
            if report.rounds >= self.max_rounds {
                let rounds = report.rounds;
                return self.abort(report, TurnOutcome::RoundLimitReached { rounds });
            }
            report.rounds += 1;

            let request = RunRequest {
                model_id: self.model_id.clone(),
                messages: self.transcript.clone(),
                tools: self.registry.definitions(),
            };
            debug!(
                round = report.rounds,
                messages = request.messages.len(),
                "calling provider"
            );

            let response = match self.provider.complete(request, Arc::clone(cancel)) {
                Ok(response) => response,
                Err(_) if is_cancelled(cancel) => {
                    return self.abort(report, TurnOutcome::Cancelled);
                }
                Err(error) => {
                    warn!(%error, round = report.rounds, "provider call failed");
                    return self.abort(report, TurnOutcome::ProviderFailed { error });
                }
            };

            let Some(choice) = response.choices.into_iter().next() else {
                warn!(round = report.rounds, "provider returned no choices");
                return self.abort(report, TurnOutcome::EmptyResponse);
            };

            if !choice.requests_tools() {
                self.advance(EngineEvent::FinalAnswer)?;
                let reply = choice.text;
                self.append(sink, RunMessage::assistant(reply.clone()), &mut report.warnings);
                self.advance(EngineEvent::ResponseDelivered)?;
                info!(rounds = report.rounds, "turn completed");
                report.outcome = TurnOutcome::Completed { reply };
                return Ok(report);
            }

            self.advance(EngineEvent::ToolCallsReceived)?;
            let calls = choice.tool_calls.clone();
            self.append(
                sink,
                RunMessage::AssistantText {
                    text: choice.text,
                    tool_calls: choice.tool_calls,
                },
                &mut report.warnings,
            );

            for call in &calls {
                let result = self.dispatch(call, mode, cancel);
                report.tool_calls += 1;
                self.append(sink, RunMessage::ToolResult(result), &mut report.warnings);
            }
            self.advance(EngineEvent::ToolsDispatched)?;
        }
    }

    fn dispatch(&self, call: &ToolCallRequest, mode: AccessMode, cancel: &CancelSignal) -> ToolResult {
        let Some(capability) = self.registry.get(&call.tool_name) else {
            warn!(tool = %call.tool_name, call_id = %call.call_id, "unknown tool requested");
            return ToolResult::error(
                call.call_id.clone(),
                call.tool_name.clone(),
                json!({ "error": format!("Unknown tool: {}", call.tool_name) }),
            );
        };

        if is_cancelled(cancel) {
            return ToolResult::error(
                call.call_id.clone(),
                call.tool_name.clone(),
                ExecutionError::cancelled("turn was cancelled").payload(),
            );
        }

        let schema = capability.schema();
        if let PolicyDecision::Deny { reason } = evaluate(&schema, mode) {
            info!(tool = %call.tool_name, mode = %mode, "tool denied by mode policy");
            return ToolResult::error(
                call.call_id.clone(),
                call.tool_name.clone(),
                refusal_payload(&call.tool_name, mode, &reason),
            );
        }

        let ctx = InvocationContext {
            cancel: Arc::clone(cancel),
            confirmer: self.confirmer.as_ref(),
        };
        debug!(tool = %call.tool_name, call_id = %call.call_id, "dispatching tool");

        match catch_unwind(AssertUnwindSafe(|| capability.invoke(&call.arguments, &ctx))) {
            Ok(Ok(output)) => ToolResult::success(call.call_id.clone(), call.tool_name.clone(), output),
            Ok(Err(error)) => {
                debug!(tool = %call.tool_name, %error, "tool failed");
                ToolResult::error(call.call_id.clone(), call.tool_name.clone(), error.payload())
            }
            Err(_) => {
                warn!(tool = %call.tool_name, "tool panicked");
                ToolResult::error(
                    call.call_id.clone(),
                    call.tool_name.clone(),
                    json!({ "error": format!("Tool {} panicked", call.tool_name) }),
                )
            }
        }
    }

    fn append(&mut self, sink: TurnSink<'_>, message: RunMessage, warnings: &mut Vec<String>) {
        let recorded = encode_run_message(&message)
            .and_then(|encoded| sink.sessions.record(sink.handle, &encoded));
        if let Err(error) = recorded {
            warn!(%error, "failed to persist message");
            warnings.push(format!("Message was not saved: {error}"));
        }
        self.transcript.push(message);
    }

    fn abort(&mut self, mut report: TurnReport, outcome: TurnOutcome) -> Result<TurnReport, EngineError> {
        self.advance(EngineEvent::TurnAborted)?;
        info!(rounds = report.rounds, outcome = ?outcome, "turn ended early");
        report.outcome = outcome;
        Ok(report)
    }

    fn advance(&mut self, event: EngineEvent) -> Result<(), EngineError> {
        self.state = transition(self.state, event)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_rounds_loop_back_to_model_call() {
        let mut state = EngineState::AwaitingInput;
        for event in [
            EngineEvent::UserInput,
            EngineEvent::ToolCallsReceived,
            EngineEvent::ToolsDispatched,
            EngineEvent::ToolCallsReceived,
            EngineEvent::ToolsDispatched,
            EngineEvent::FinalAnswer,
            EngineEvent::ResponseDelivered,
        ] {
            state = transition(state, event).expect("legal transition");
        }
        assert_eq!(state, EngineState::AwaitingInput);
    }

    #[test]
    fn aborts_return_to_awaiting_input() {
        assert_eq!(
            transition(EngineState::ModelCall, EngineEvent::TurnAborted),
            Ok(EngineState::AwaitingInput)
        );
        assert_eq!(
            transition(EngineState::ToolDispatch, EngineEvent::TurnAborted),
            Ok(EngineState::AwaitingInput)
        );
    }

    #[test]
    fn illegal_transitions_are_errors() {
        assert_eq!(
            transition(EngineState::AwaitingInput, EngineEvent::FinalAnswer),
            Err(EngineError::InvalidTransition {
                from: EngineState::AwaitingInput,
                event: EngineEvent::FinalAnswer,
            })
        );
        assert!(transition(EngineState::ModelCall, EngineEvent::UserInput).is_err());
        assert!(transition(EngineState::TerminalResponse, EngineEvent::TurnAborted).is_err());
    }
}
