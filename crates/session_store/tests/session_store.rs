use std::path::{Path, PathBuf};

use agent_provider::{RunMessage, ToolCallRequest, ToolResult};
use rusqlite::Connection;
use serde_json::json;
use session_store::{
    encode_run_message, MessageRole, NewMessage, Session, SessionManager, SessionStore,
    SessionStoreError,
};
use tempfile::TempDir;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

fn temp_db() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let path = dir.path().join("nested").join("memory.db");
    (dir, path)
}

fn session(id: &str, project: &str, started_at: OffsetDateTime) -> Session {
    Session {
        id: id.to_string(),
        started_at,
        ended_at: None,
        project_path: project.to_string(),
        model_used: "gpt-4.1-nano".to_string(),
    }
}

fn side_connection(path: &Path) -> Connection {
    Connection::open(path).expect("second connection should open")
}

#[test]
fn open_creates_parent_directories_and_schema() {
    let (_dir, path) = temp_db();
    let store = SessionStore::open(&path).expect("store should open");

    assert!(path.exists());
    assert_eq!(store.path(), Some(path.as_path()));
    assert!(store.recent_sessions(10).expect("listing").is_empty());
    store.close().expect("close");
}

#[test]
fn sessions_and_messages_survive_reopen() {
    let (_dir, path) = temp_db();
    let started = datetime!(2026-02-14 09:00:00 UTC);

    {
        let store = SessionStore::open(&path).expect("store");
        store
            .create_session(&session("session_1", "/work", started))
            .expect("create");
        store
            .append_message("session_1", started, &NewMessage::user("hello"))
            .expect("append");
        store
            .append_message(
                "session_1",
                started + Duration::seconds(1),
                &NewMessage::assistant("hi there"),
            )
            .expect("append");
        store
            .end_session("session_1", started + Duration::minutes(2))
            .expect("end");
        store.close().expect("close");
    }

    let store = SessionStore::open(&path).expect("reopen");
    let loaded = store.get_session("session_1").expect("session");
    assert_eq!(loaded.started_at, started);
    assert_eq!(loaded.ended_at, Some(started + Duration::minutes(2)));
    assert!(!loaded.is_active());

    let messages = store.session_messages("session_1").expect("messages");
    let roles: Vec<MessageRole> = messages.iter().map(|message| message.role).collect();
    assert_eq!(roles, vec![MessageRole::User, MessageRole::Assistant]);
    assert_eq!(messages[1].content, "hi there");
}

#[test]
fn project_listing_is_newest_first_with_live_counts() {
    let store = SessionStore::open_in_memory().expect("store");
    let base = datetime!(2026-02-14 09:00:00 UTC);

    store
        .create_session(&session("older", "/work", base))
        .expect("create");
    store
        .create_session(&session("newer", "/work", base + Duration::hours(1)))
        .expect("create");
    store
        .create_session(&session("elsewhere", "/other", base + Duration::hours(2)))
        .expect("create");

    store
        .append_message("older", base, &NewMessage::user("first"))
        .expect("append");
    store
        .append_message(
            "older",
            base + Duration::seconds(5),
            &NewMessage::assistant("latest reply"),
        )
        .expect("append");

    let listed = store.sessions_for_project("/work", 10).expect("listing");
    let ids: Vec<&str> = listed.iter().map(|summary| summary.session.id.as_str()).collect();
    assert_eq!(ids, vec!["newer", "older"]);

    assert_eq!(listed[0].message_count, 0);
    assert_eq!(listed[0].last_message, "");
    assert_eq!(listed[1].message_count, 2);
    assert_eq!(listed[1].last_message, "latest reply");

    let limited = store.sessions_for_project("/work", 1).expect("listing");
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].session.id, "newer");

    let recent = store.recent_sessions(2).expect("recent");
    let recent_ids: Vec<&str> = recent.iter().map(|summary| summary.session.id.as_str()).collect();
    assert_eq!(recent_ids, vec!["elsewhere", "newer"]);
}

#[test]
fn delete_removes_session_and_messages() {
    let mut store = SessionStore::open_in_memory().expect("store");
    let started = datetime!(2026-02-14 09:00:00 UTC);
    store
        .create_session(&session("doomed", "/work", started))
        .expect("create");
    store
        .create_session(&session("kept", "/work", started))
        .expect("create");
    store
        .append_message("doomed", started, &NewMessage::user("bye"))
        .expect("append");
    store
        .append_message("kept", started, &NewMessage::user("stay"))
        .expect("append");

    store.delete_session("doomed").expect("delete");

    assert!(store.session_messages("doomed").expect("messages").is_empty());
    assert!(store
        .get_session("doomed")
        .expect_err("deleted session must be gone")
        .is_not_found());
    assert_eq!(store.session_messages("kept").expect("messages").len(), 1);
}

#[test]
fn delete_of_unknown_session_is_not_found_and_changes_nothing() {
    let mut store = SessionStore::open_in_memory().expect("store");
    let started = datetime!(2026-02-14 09:00:00 UTC);
    store
        .create_session(&session("kept", "/work", started))
        .expect("create");
    store
        .append_message("kept", started, &NewMessage::user("stay"))
        .expect("append");

    let error = store.delete_session("missing").expect_err("must fail");
    assert!(matches!(
        error,
        SessionStoreError::SessionNotFound { ref session_id } if session_id == "missing"
    ));
    assert_eq!(store.session_messages("kept").expect("messages").len(), 1);
}

#[test]
fn failed_session_row_delete_rolls_back_message_delete() {
    let (_dir, path) = temp_db();
    let mut store = SessionStore::open(&path).expect("store");
    let started = datetime!(2026-02-14 09:00:00 UTC);
    store
        .create_session(&session("guarded", "/work", started))
        .expect("create");
    store
        .append_message("guarded", started, &NewMessage::user("one"))
        .expect("append");
    store
        .append_message("guarded", started, &NewMessage::assistant("two"))
        .expect("append");

    side_connection(&path)
        .execute_batch(
            "CREATE TRIGGER block_session_delete BEFORE DELETE ON sessions
             BEGIN
                 SELECT RAISE(ABORT, 'injected fault');
             END;",
        )
        .expect("trigger should install");

    let error = store
        .delete_session("guarded")
        .expect_err("trigger must abort the delete");
    assert!(matches!(error, SessionStoreError::Sqlite { .. }));

    assert!(store.get_session("guarded").is_ok());
    assert_eq!(store.session_messages("guarded").expect("messages").len(), 2);
}

#[test]
fn second_start_is_rejected_while_a_session_is_current() {
    let mut manager = SessionManager::new(SessionStore::open_in_memory().expect("store"));
    let first = manager.start("/work", "gpt-4.1-nano").expect("start");

    let error = manager
        .start("/work", "gpt-4.1-nano")
        .expect_err("second start must fail");
    assert!(matches!(
        error,
        SessionStoreError::SessionAlreadyActive { ref session_id } if session_id == first.id()
    ));
    assert_eq!(manager.current_handle(), Some(first));
}

#[test]
fn save_message_without_current_session_is_a_no_op() {
    let manager = SessionManager::new(SessionStore::open_in_memory().expect("store"));
    let saved = manager
        .save_message(&NewMessage::user("lost"))
        .expect("no-op should succeed");
    assert!(saved.is_none());
    assert!(manager.record(None, &NewMessage::user("lost")).expect("no-op").is_none());
}

#[test]
fn restore_switches_sessions_and_replays_history() {
    let mut manager = SessionManager::new(SessionStore::open_in_memory().expect("store"));
    let first = manager.start("/work", "gpt-4.1-nano").expect("start");

    let history = vec![
        RunMessage::user("list files"),
        RunMessage::AssistantText {
            text: String::new(),
            tool_calls: vec![ToolCallRequest::new("call-1", "list", json!({"path": "."}))],
        },
        RunMessage::ToolResult(ToolResult::success(
            "call-1",
            "list",
            json!({"entries": ["a.txt"]}),
        )),
        RunMessage::assistant("There is one file."),
    ];
    for message in &history {
        manager
            .save_message(&encode_run_message(message).expect("encode"))
            .expect("save")
            .expect("current session records");
    }
    manager.end().expect("end");

    let second = manager.start("/work", "gpt-4.1-mini").expect("start again");
    assert_ne!(first, second);

    let restored = manager.restore(first.id()).expect("restore");
    assert_eq!(restored, first);
    assert!(manager
        .store()
        .get_session(second.id())
        .expect("second session")
        .ended_at
        .is_some());

    assert_eq!(manager.replay_session(first.id()).expect("replay"), history);
}

#[test]
fn deleting_current_session_clears_the_slot() {
    let mut manager = SessionManager::new(SessionStore::open_in_memory().expect("store"));
    let handle = manager.start("/work", "gpt-4.1-nano").expect("start");
    manager
        .save_message(&NewMessage::user("hello"))
        .expect("save");

    manager.delete_session(handle.id()).expect("delete");

    assert!(manager.current().is_none());
    assert!(manager
        .session_messages(handle.id())
        .expect("messages")
        .is_empty());
}

#[test]
fn close_reports_end_failure_after_releasing_store() {
    let (_dir, path) = temp_db();
    let mut manager = SessionManager::new(SessionStore::open(&path).expect("store"));
    let handle = manager.start("/work", "gpt-4.1-nano").expect("start");

    side_connection(&path)
        .execute("DELETE FROM sessions WHERE id = ?1", [handle.id()])
        .expect("side delete");

    let error = manager.close().expect_err("ending a vanished session fails");
    assert!(error.is_not_found());

    let reopened = SessionStore::open(&path).expect("database is not left locked");
    assert!(reopened.recent_sessions(5).expect("listing").is_empty());
}
