use std::io::{self, BufRead, Write};
use std::sync::{Mutex, MutexGuard};

use agent_provider::is_cancelled;
use tracing::warn;

use super::{ExecutionError, InvocationContext};

/// Asks the user to approve a side effect.
pub trait Confirmer: Send + Sync {
    /// Returns `Ok(true)` only for an explicit yes.
    fn confirm(&self, prompt: &str) -> io::Result<bool>;
}

/// Prompts on stdout and reads one line from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinConfirmer;

impl Confirmer for StdinConfirmer {
    fn confirm(&self, prompt: &str) -> io::Result<bool> {
        let mut stdout = io::stdout().lock();
        write!(stdout, "\n{prompt} (y/N): ")?;
        stdout.flush()?;

        let mut answer = String::new();
        let read = io::stdin().lock().read_line(&mut answer)?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stdin closed before an answer was given",
            ));
        }

        Ok(is_affirmative(&answer))
    }
}

/// Fixed answer for tests; records every prompt it was shown.
#[derive(Debug, Default)]
pub struct StaticConfirmer {
    answer: Option<bool>,
    prompts: Mutex<Vec<String>>,
}

impl StaticConfirmer {
    #[must_use]
    pub fn approve() -> Self {
        Self::answering(Some(true))
    }

    #[must_use]
    pub fn deny() -> Self {
        Self::answering(Some(false))
    }

    /// Confirmer whose answer can never be read.
    #[must_use]
    pub fn unreadable() -> Self {
        Self::answering(None)
    }

    fn answering(answer: Option<bool>) -> Self {
        Self {
            answer,
            prompts: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        lock_unpoisoned(&self.prompts).clone()
    }
}

impl Confirmer for StaticConfirmer {
    fn confirm(&self, prompt: &str) -> io::Result<bool> {
        lock_unpoisoned(&self.prompts).push(prompt.to_string());
        self.answer.ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "no answer available")
        })
    }
}

#[must_use]
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Gate for side effects: passes only on an explicit yes for a live turn.
pub(crate) fn require_confirmation(
    ctx: &InvocationContext<'_>,
    prompt: &str,
) -> Result<(), ExecutionError> {
    if is_cancelled(&ctx.cancel) {
        return Err(ExecutionError::cancelled("turn was cancelled"));
    }

    match ctx.confirmer.confirm(prompt) {
        Ok(true) if !is_cancelled(&ctx.cancel) => Ok(()),
        Ok(true) => Err(ExecutionError::cancelled("turn was cancelled")),
        Ok(false) => Err(ExecutionError::cancelled("declined by user")),
        Err(error) => {
            warn!(%error, "confirmation could not be read");
            Err(ExecutionError::cancelled(format!(
                "confirmation could not be read: {error}"
            )))
        }
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
