//! Ctrl-C handling for the REPL.
//!
//! The first press since the last input line cancels the running turn. A
//! second press runs the exit hook, which is expected to end the session and
//! terminate the process.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use agent_provider::{cancel_signal, CancelSignal};
use signal_hook::consts::SIGINT;
use signal_hook::iterator::{Handle, Signals};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptAction {
    CancelTurn,
    Exit,
}

/// Press counter shared between the signal thread and the input loop.
#[derive(Debug, Clone)]
pub struct InterruptState {
    presses: Arc<AtomicUsize>,
    cancel: CancelSignal,
}

impl InterruptState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            presses: Arc::new(AtomicUsize::new(0)),
            cancel: cancel_signal(),
        }
    }

    /// Signal handed to each turn.
    #[must_use]
    pub fn cancel_signal(&self) -> CancelSignal {
        Arc::clone(&self.cancel)
    }

    /// Clears the counter and the cancel flag before a new input line runs.
    pub fn reset(&self) {
        self.presses.store(0, Ordering::SeqCst);
        self.cancel.store(false, Ordering::SeqCst);
    }

    pub fn record_press(&self) -> InterruptAction {
        self.cancel.store(true, Ordering::SeqCst);
        if self.presses.fetch_add(1, Ordering::SeqCst) == 0 {
            InterruptAction::CancelTurn
        } else {
            InterruptAction::Exit
        }
    }
}

impl Default for InterruptState {
    fn default() -> Self {
        Self::new()
    }
}

/// Stops the signal thread when dropped.
pub struct InterruptGuard {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Routes SIGINT to `state`, calling `on_exit` on the second press.
pub fn install<F>(state: InterruptState, on_exit: F) -> io::Result<InterruptGuard>
where
    F: Fn() + Send + 'static,
{
    let mut signals = Signals::new([SIGINT])?;
    let handle = signals.handle();

    let thread = thread::spawn(move || {
        for _ in signals.forever() {
            match state.record_press() {
                InterruptAction::CancelTurn => {
                    debug!("interrupt: cancelling turn");
                    eprintln!("\n(interrupted; press Ctrl-C again to exit)");
                }
                InterruptAction::Exit => on_exit(),
            }
        }
    });

    Ok(InterruptGuard {
        handle,
        thread: Some(thread),
    })
}
