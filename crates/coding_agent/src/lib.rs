//! Terminal coding assistant: a conversation engine that drives a model
//! provider, dispatches host file capabilities under an access mode, and
//! records every message in a resumable SQLite session log.
//!
//! ## Provider bootstrap
//!
//! The provider is chosen with `NEBULA_PROVIDER` (default `mock`). Only the
//! offline `mock` provider ships with this crate; unknown ids fail at startup.
//!
//! ## Configuration
//!
//! Settings live in `~/.nebula/config.json` unless `--config` or
//! `NEBULA_CONFIG_PATH` points elsewhere. A missing file is created with
//! defaults:
//!
//! ```json
//! {
//!   "model": "gpt-4.1-nano",
//!   "database_path": "/home/you/.nebula/memory.db",
//!   "max_sessions": 5,
//!   "max_rounds": 25
//! }
//! ```
//!
//! Unknown JSON fields are rejected.
//!
//! ## Logging
//!
//! Diagnostics go to stderr through `tracing`; set `RUST_LOG` to adjust.
//!
//! ## Interrupts
//!
//! Ctrl-C cancels the running turn. A second press before the next input line
//! ends the current session and exits.

pub mod app;
pub mod commands;
pub mod config;
pub mod engine;
pub mod interrupt;
pub mod policy;
pub mod providers;
pub mod tools;
