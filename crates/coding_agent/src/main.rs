use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;
use coding_agent::app::{describe_session, App};
use coding_agent::config::{self, Config};
use coding_agent::engine::ConversationEngine;
use coding_agent::interrupt::{self, InterruptState};
use coding_agent::policy::AccessMode;
use coding_agent::providers;
use coding_agent::tools::{StdinConfirmer, ToolRegistry, Workspace};
use session_store::{SessionManager, SessionStore};
use time::OffsetDateTime;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "nebula=info,coding_agent=info,session_store=info";
const INTERRUPT_EXIT_CODE: i32 = 130;
const EXIT_LOCK_ATTEMPTS: usize = 40;
const EXIT_LOCK_RETRY: Duration = Duration::from_millis(50);

#[derive(Debug, Parser)]
#[command(name = "nebula", version, about = "Terminal coding assistant with persistent sessions")]
struct Args {
    /// Config file to use instead of ~/.nebula/config.json
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Resume a previous session by id
    #[arg(long, value_name = "SESSION_ID", conflicts_with = "new")]
    resume: Option<String>,

    /// Start a new session without offering to resume one
    #[arg(long)]
    new: bool,

    /// Start in restricted mode (no file changes)
    #[arg(long)]
    restricted: bool,

    /// Print recent sessions and exit
    #[arg(long, conflicts_with_all = ["resume", "new", "delete"])]
    list: bool,

    /// Delete a session and its messages, then exit
    #[arg(long, value_name = "SESSION_ID", conflicts_with_all = ["resume", "new"])]
    delete: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let home = config::home_dir()?;
    let config_path = config::config_path(args.config.as_deref(), &home);
    let config = Config::load_or_create(&config_path, &home)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let store = SessionStore::open(&config.database_path).with_context(|| {
        format!(
            "opening session database {}",
            config.database_path.display()
        )
    })?;
    let mut sessions = SessionManager::new(store);

    if args.list {
        let now = OffsetDateTime::now_utc();
        let summaries = sessions
            .recent_sessions(config.max_sessions)
            .context("listing sessions")?;
        if summaries.is_empty() {
            println!("No sessions yet.");
        }
        for summary in &summaries {
            println!(
                "{} | {}",
                describe_session(summary, now),
                summary.session.project_path
            );
        }
        sessions.close().context("closing session database")?;
        return Ok(());
    }

    if let Some(session_id) = args.delete.as_deref() {
        sessions
            .delete_session(session_id)
            .with_context(|| format!("deleting session {session_id}"))?;
        println!("Deleted {session_id}");
        sessions.close().context("closing session database")?;
        return Ok(());
    }

    let cwd = std::env::current_dir().context("resolving current directory")?;
    let workspace = Workspace::new(&cwd).context("resolving workspace root")?;
    let provider = providers::provider_from_env()?;
    let engine = ConversationEngine::new(
        provider,
        ToolRegistry::with_builtins(&workspace),
        Box::new(StdinConfirmer),
        config.model.clone(),
    )
    .with_max_rounds(config.max_rounds);

    let mode = if args.restricted {
        AccessMode::Restricted
    } else {
        AccessMode::Full
    };
    let model = config.model.clone();
    let mut app = App::new(
        engine,
        sessions,
        config,
        config_path,
        workspace.root().display().to_string(),
    )
    .with_mode(mode);

    let mut stdout = io::stdout();
    let resumed = if let Some(session_id) = args.resume.as_deref() {
        let count = app
            .resume_session(session_id)
            .with_context(|| format!("resuming session {session_id}"))?;
        println!("Resumed {session_id} ({count} messages).");
        true
    } else if args.new {
        false
    } else {
        app.offer_restore(&mut io::stdin().lock(), &mut stdout)?
    };
    if !resumed {
        let handle = app.start_session().context("starting session")?;
        println!("Started session {}", handle.id());
    }
    println!("nebula ({model}, {mode} mode). Type /help for commands.");

    let app = Arc::new(Mutex::new(app));
    let interrupts = InterruptState::new();
    let exit_app = Arc::clone(&app);
    let guard = interrupt::install(interrupts.clone(), move || end_session_and_exit(&exit_app))
        .context("installing interrupt handler")?;

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }

        interrupts.reset();
        let mut app = lock_unpoisoned(&app);
        app.handle_line(&line, interrupts.cancel_signal(), &mut stdout)?;
        if app.should_exit {
            break;
        }
    }

    drop(guard);
    let app = Arc::try_unwrap(app)
        .map_err(|_| anyhow!("interrupt handler still holds the app"))?
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner);
    info!("shutting down");
    app.shutdown().context("closing session database")?;
    Ok(())
}

/// Ends the current session and exits, waiting briefly for a running turn to
/// observe its cancel flag.
fn end_session_and_exit(app: &Mutex<App>) -> ! {
    for _ in 0..EXIT_LOCK_ATTEMPTS {
        let mut app = match app.try_lock() {
            Ok(app) => app,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                thread::sleep(EXIT_LOCK_RETRY);
                continue;
            }
        };
        if let Err(error) = app.end_session() {
            warn!(%error, "failed to end session on interrupt");
        }
        eprintln!();
        process::exit(INTERRUPT_EXIT_CODE);
    }

    warn!("turn did not stop in time; exiting with the session still open");
    process::exit(INTERRUPT_EXIT_CODE)
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
