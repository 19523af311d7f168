//! Durable SQLite storage for conversation sessions and their messages.

mod error;
mod manager;
mod paths;
mod replay;
mod schema;
mod store;

pub use error::SessionStoreError;
pub use manager::{Clock, SessionHandle, SessionManager, SystemClock, MAX_SESSION_ID_ATTEMPTS};
pub use paths::{default_database_path, state_root, DATABASE_FILE, STATE_DIR};
pub use replay::{decode_run_message, encode_run_message, tool_content_text};
pub use schema::{
    format_timestamp, session_id_for, MessageRecord, MessageRole, NewMessage, Session,
    SessionSummary,
};
pub use store::SessionStore;
