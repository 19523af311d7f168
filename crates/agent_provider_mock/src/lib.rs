//! Deterministic mock implementations of the shared `agent_provider` contract.
//!
//! This crate contains no transport/protocol logic and is intended for local
//! development and contract-level integration testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use agent_provider::{
    is_cancelled, CancelSignal, ProviderError, ProviderProfile, RunChoice, RunMessage,
    RunProvider, RunRequest, RunResponse,
};

/// Stable provider identifier used for explicit startup selection.
pub const MOCK_PROVIDER_ID: &str = "mock";

/// Provider identifier reported by [`ScriptedProvider`].
pub const SCRIPTED_PROVIDER_ID: &str = "scripted";

/// Offline provider that answers every request with a plain-text reply.
///
/// Replies rotate through the configured list; each one may reference the
/// latest user prompt with `{prompt}`.
#[derive(Debug)]
pub struct MockProvider {
    replies: Vec<String>,
    next_reply: AtomicUsize,
}

impl MockProvider {
    /// Creates a mock provider with caller-provided reply templates.
    #[must_use]
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies: sanitize_replies(replies),
            next_reply: AtomicUsize::new(0),
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new(vec![
            "(mock) You said: {prompt}".to_string(),
            "(mock) Noted. No model backend is configured, so this is a canned reply to: {prompt}"
                .to_string(),
        ])
    }
}

impl RunProvider for MockProvider {
    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            provider_id: MOCK_PROVIDER_ID.to_string(),
        }
    }

    fn complete(
        &self,
        req: RunRequest,
        cancel: CancelSignal,
    ) -> Result<RunResponse, ProviderError> {
        if is_cancelled(&cancel) {
            return Err(ProviderError::new("request cancelled"));
        }

        let index = self.next_reply.fetch_add(1, Ordering::SeqCst) % self.replies.len();
        let prompt = latest_user_text(&req.messages).unwrap_or_default();
        let text = self.replies[index].replace("{prompt}", prompt);

        Ok(RunResponse::single(RunChoice::text(text)))
    }
}

/// Provider that replays a fixed script of responses and records every request.
///
/// Once the script is exhausted every further call fails with a
/// [`ProviderError`], which makes unexpected extra rounds visible in tests.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<RunResponse, ProviderError>>>,
    requests: Mutex<Vec<RunRequest>>,
}

impl ScriptedProvider {
    #[must_use]
    pub fn new(script: Vec<Result<RunResponse, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Convenience constructor for scripts that never fail.
    #[must_use]
    pub fn with_responses(responses: Vec<RunResponse>) -> Self {
        Self::new(responses.into_iter().map(Ok).collect())
    }

    /// Appends another scripted step.
    pub fn push(&self, step: Result<RunResponse, ProviderError>) {
        lock_unpoisoned(&self.script).push_back(step);
    }

    /// Returns every request received so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<RunRequest> {
        lock_unpoisoned(&self.requests).clone()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        lock_unpoisoned(&self.requests).len()
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        lock_unpoisoned(&self.script).len()
    }
}

impl RunProvider for ScriptedProvider {
    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            provider_id: SCRIPTED_PROVIDER_ID.to_string(),
        }
    }

    fn complete(
        &self,
        req: RunRequest,
        cancel: CancelSignal,
    ) -> Result<RunResponse, ProviderError> {
        lock_unpoisoned(&self.requests).push(req);

        if is_cancelled(&cancel) {
            return Err(ProviderError::new("request cancelled"));
        }

        lock_unpoisoned(&self.script)
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::new("scripted provider has no more responses")))
    }
}

fn latest_user_text(messages: &[RunMessage]) -> Option<&str> {
    messages.iter().rev().find_map(|message| match message {
        RunMessage::UserText { text } => Some(text.as_str()),
        _ => None,
    })
}

fn sanitize_replies(replies: Vec<String>) -> Vec<String> {
    let mut sanitized: Vec<String> = replies
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect();

    if sanitized.is_empty() {
        sanitized.push("(mock) {prompt}".to_string());
    }

    sanitized
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
