use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use agent_provider::CancelSignal;
use session_store::{SessionHandle, SessionManager, SessionStoreError, SessionSummary};
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

use crate::commands::{parse_slash_command, SlashCommand};
use crate::config::{Config, SUPPORTED_MODELS};
use crate::engine::{ConversationEngine, TurnOutcome, TurnReport, TurnSink};
use crate::policy::AccessMode;

pub const HELP_TEXT: &str = "Commands:
  /help                     Show this help
  /model [name]             Show or switch the model
  /mode [full|restricted]   Show or switch the access mode
  /plan                     Restricted mode: inspect only, no file changes
  /agent                    Full mode: file changes allowed after confirmation
  /sessions                 List recent sessions for this project
  /new                      End this session and start a fresh one
  /quit, /exit              End the session and exit
Anything else is sent to the model.";

const PREVIEW_CHARS: usize = 50;

/// Interactive front end: routes input lines to commands or model turns.
pub struct App {
    engine: ConversationEngine,
    sessions: SessionManager,
    config: Config,
    config_path: PathBuf,
    project_path: String,
    mode: AccessMode,
    pub should_exit: bool,
}

impl App {
    pub fn new(
        engine: ConversationEngine,
        sessions: SessionManager,
        config: Config,
        config_path: PathBuf,
        project_path: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            sessions,
            config,
            config_path,
            project_path: project_path.into(),
            mode: AccessMode::default(),
            should_exit: false,
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: AccessMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn engine(&self) -> &ConversationEngine {
        &self.engine
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[must_use]
    pub fn current_session(&self) -> Option<SessionHandle> {
        self.sessions.current_handle()
    }

    pub fn start_session(&mut self) -> Result<SessionHandle, SessionStoreError> {
        let handle = self.sessions.start(&self.project_path, &self.config.model)?;
        self.engine.clear_transcript();
        Ok(handle)
    }

    /// Makes `session_id` current and replays its messages into the transcript.
    pub fn resume_session(&mut self, session_id: &str) -> Result<usize, SessionStoreError> {
        let records = self.sessions.session_messages(session_id)?;
        self.sessions.restore(session_id)?;
        self.engine.restore_transcript(&records)
    }

    pub fn project_sessions(&self) -> Result<Vec<SessionSummary>, SessionStoreError> {
        self.sessions
            .sessions_for_project(&self.project_path, self.config.max_sessions)
    }

    /// Lists this project's recent sessions and resumes the one the user picks.
    ///
    /// Returns `true` when a session was resumed.
    pub fn offer_restore(
        &mut self,
        input: &mut dyn BufRead,
        out: &mut dyn Write,
    ) -> io::Result<bool> {
        let summaries = match self.project_sessions() {
            Ok(summaries) => summaries,
            Err(error) => {
                warn!(%error, "could not list previous sessions");
                writeln!(out, "Could not list previous sessions: {error}")?;
                return Ok(false);
            }
        };
        if summaries.is_empty() {
            return Ok(false);
        }

        writeln!(out, "Previous sessions for this project:")?;
        let now = OffsetDateTime::now_utc();
        for (index, summary) in summaries.iter().enumerate() {
            writeln!(out, "  {}. {}", index + 1, describe_session(summary, now))?;
        }
        write!(
            out,
            "Resume a session [1-{}] or press Enter to start a new one: ",
            summaries.len()
        )?;
        out.flush()?;

        let mut answer = String::new();
        if input.read_line(&mut answer)? == 0 {
            return Ok(false);
        }
        let Some(summary) = answer
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|choice| choice.checked_sub(1))
            .and_then(|index| summaries.get(index))
        else {
            return Ok(false);
        };

        let session_id = summary.session.id.clone();
        match self.resume_session(&session_id) {
            Ok(count) => {
                writeln!(out, "Resumed {session_id} ({count} messages).")?;
                Ok(true)
            }
            Err(error) => {
                writeln!(out, "Could not resume {session_id}: {error}")?;
                Ok(false)
            }
        }
    }

    /// Handles one line of user input.
    pub fn handle_line(
        &mut self,
        line: &str,
        cancel: CancelSignal,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        let prompt = line.trim();
        if prompt.is_empty() {
            return Ok(());
        }

        match parse_slash_command(prompt) {
            Some(command) => self.run_command(command, out),
            None => self.run_turn(prompt, cancel, out),
        }
    }

    fn run_command(&mut self, command: SlashCommand, out: &mut dyn Write) -> io::Result<()> {
        match command {
            SlashCommand::Help => writeln!(out, "{HELP_TEXT}"),
            SlashCommand::Quit => {
                self.should_exit = true;
                Ok(())
            }
            SlashCommand::Model(None) => writeln!(
                out,
                "Current model: {} (available: {})",
                self.config.model,
                SUPPORTED_MODELS.join(", ")
            ),
            SlashCommand::Model(Some(model)) => {
                match self.config.set_model(&model, &self.config_path) {
                    Ok(()) => {
                        self.engine.set_model(self.config.model.clone());
                        info!(model = %self.config.model, "model switched");
                        writeln!(out, "Model switched to {}", self.config.model)
                    }
                    Err(error) => writeln!(out, "{error}"),
                }
            }
            SlashCommand::Mode(None) => writeln!(out, "Current mode: {}", self.mode),
            SlashCommand::Mode(Some(value)) => match value.parse::<AccessMode>() {
                Ok(mode) => self.switch_mode(mode, out),
                Err(error) => writeln!(out, "{error}"),
            },
            SlashCommand::Plan => self.switch_mode(AccessMode::Restricted, out),
            SlashCommand::Agent => self.switch_mode(AccessMode::Full, out),
            SlashCommand::Sessions => self.list_sessions(out),
            SlashCommand::New => self.restart_session(out),
            SlashCommand::Unknown(command) => writeln!(out, "Unknown command: {command}"),
        }
    }

    fn switch_mode(&mut self, mode: AccessMode, out: &mut dyn Write) -> io::Result<()> {
        self.mode = mode;
        info!(mode = %mode, "mode switched");
        match mode {
            AccessMode::Full => writeln!(out, "Mode: full (file changes need confirmation)"),
            AccessMode::Restricted => writeln!(out, "Mode: restricted (inspect only)"),
        }
    }

    fn list_sessions(&self, out: &mut dyn Write) -> io::Result<()> {
        let summaries = match self.project_sessions() {
            Ok(summaries) => summaries,
            Err(error) => return writeln!(out, "Could not list sessions: {error}"),
        };
        if summaries.is_empty() {
            return writeln!(out, "No sessions for this project yet.");
        }

        let now = OffsetDateTime::now_utc();
        let current = self.sessions.current().map(|session| session.id.as_str());
        for summary in &summaries {
            let marker = if current == Some(summary.session.id.as_str()) {
                "*"
            } else {
                " "
            };
            writeln!(out, "{marker} {}", describe_session(summary, now))?;
        }
        Ok(())
    }

    fn restart_session(&mut self, out: &mut dyn Write) -> io::Result<()> {
        if let Err(error) = self.sessions.end() {
            return writeln!(out, "Could not end the current session: {error}");
        }
        match self.start_session() {
            Ok(handle) => writeln!(out, "Started new session {}", handle.id()),
            Err(error) => writeln!(out, "Could not start a new session: {error}"),
        }
    }

    fn run_turn(&mut self, prompt: &str, cancel: CancelSignal, out: &mut dyn Write) -> io::Result<()> {
        let handle = self.sessions.current_handle();
        let sink = TurnSink {
            sessions: &self.sessions,
            handle: handle.as_ref(),
        };

        match self.engine.submit(sink, self.mode, prompt, cancel) {
            Ok(report) => write_report(&report, out),
            Err(error) => writeln!(out, "Internal error: {error}"),
        }
    }

    /// Ends the current session but keeps the database open.
    pub fn end_session(&mut self) -> Result<(), SessionStoreError> {
        self.sessions.end().map(|_| ())
    }

    /// Ends the current session and releases the database.
    pub fn shutdown(self) -> Result<(), SessionStoreError> {
        self.sessions.close()
    }
}

fn write_report(report: &TurnReport, out: &mut dyn Write) -> io::Result<()> {
    match &report.outcome {
        TurnOutcome::Completed { reply } => writeln!(out, "{reply}")?,
        TurnOutcome::ProviderFailed { error } => writeln!(out, "Provider error: {error}")?,
        TurnOutcome::EmptyResponse => writeln!(out, "The model returned no response.")?,
        TurnOutcome::Cancelled => writeln!(out, "Turn cancelled.")?,
        TurnOutcome::RoundLimitReached { rounds } => writeln!(
            out,
            "Stopped after {rounds} model calls without a final answer."
        )?,
    }
    for warning in &report.warnings {
        writeln!(out, "warning: {warning}")?;
    }
    Ok(())
}

/// One-line listing entry: id, start time, message count, duration, and preview.
#[must_use]
pub fn describe_session(summary: &SessionSummary, now: OffsetDateTime) -> String {
    let session = &summary.session;
    let started = session.started_at;
    let status = if session.is_active() { ", active" } else { "" };
    let mut line = format!(
        "{} | {:04}-{:02}-{:02} {:02}:{:02} UTC | {} messages | {}{status}",
        session.id,
        started.year(),
        u8::from(started.month()),
        started.day(),
        started.hour(),
        started.minute(),
        summary.message_count,
        format_duration(session.duration(now)),
    );
    if summary.message_count > 0 {
        line.push_str(" | ");
        line.push_str(&summary.last_message_preview(PREVIEW_CHARS).replace('\n', " "));
    }
    line
}

fn format_duration(duration: Duration) -> String {
    let seconds = duration.whole_seconds().max(0);
    if seconds < 60 {
        format!("{seconds}s")
    } else if seconds < 3600 {
        format!("{}m", seconds / 60)
    } else {
        format!("{}h{:02}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
