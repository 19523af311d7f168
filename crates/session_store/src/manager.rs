use time::OffsetDateTime;
use tracing::{debug, info, warn};

use agent_provider::RunMessage;

use crate::error::SessionStoreError;
use crate::schema::{session_id_for, MessageRecord, NewMessage, Session, SessionSummary};
use crate::store::SessionStore;

/// Upper bound on `_N` suffixes tried when the per-second id is already taken.
pub const MAX_SESSION_ID_ATTEMPTS: usize = 10;

/// Source of wall-clock time for ids and timestamps.
pub trait Clock: Send {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Explicit reference to a session that messages should be recorded under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    session_id: String,
}

impl SessionHandle {
    fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.session_id
    }
}

/// Session lifecycle on top of a [`SessionStore`], with at most one current
/// session at a time.
pub struct SessionManager {
    store: SessionStore,
    current: Option<Session>,
    clock: Box<dyn Clock>,
}

impl SessionManager {
    #[must_use]
    pub fn new(store: SessionStore) -> Self {
        Self::with_clock(store, Box::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(store: SessionStore, clock: Box<dyn Clock>) -> Self {
        Self {
            store,
            current: None,
            clock,
        }
    }

    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    #[must_use]
    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    #[must_use]
    pub fn current_handle(&self) -> Option<SessionHandle> {
        self.current
            .as_ref()
            .map(|session| SessionHandle::new(session.id.clone()))
    }

    /// Creates a new session for `project_path` and makes it current.
    ///
    /// Fails with [`SessionStoreError::SessionAlreadyActive`] while another
    /// session is current.
    pub fn start(
        &mut self,
        project_path: &str,
        model: &str,
    ) -> Result<SessionHandle, SessionStoreError> {
        if let Some(current) = &self.current {
            return Err(SessionStoreError::SessionAlreadyActive {
                session_id: current.id.clone(),
            });
        }

        let started_at = self.clock.now();
        let base_id = session_id_for(started_at)?;

        for attempt in 1..=MAX_SESSION_ID_ATTEMPTS {
            let id = if attempt == 1 {
                base_id.clone()
            } else {
                format!("{base_id}_{attempt}")
            };
            let session = Session {
                id,
                started_at,
                ended_at: None,
                project_path: project_path.to_string(),
                model_used: model.to_string(),
            };

            match self.store.create_session(&session) {
                Ok(()) => {
                    info!(session_id = %session.id, project_path, model, "session started");
                    let handle = SessionHandle::new(session.id.clone());
                    self.current = Some(session);
                    return Ok(handle);
                }
                Err(SessionStoreError::DuplicateSessionId { session_id }) => {
                    debug!(session_id, attempt, "session id taken, trying next suffix");
                }
                Err(error) => return Err(error),
            }
        }

        Err(SessionStoreError::SessionIdExhausted {
            base_id,
            attempts: MAX_SESSION_ID_ATTEMPTS,
        })
    }

    /// Makes an existing session current, ending any other current session first.
    pub fn restore(&mut self, session_id: &str) -> Result<SessionHandle, SessionStoreError> {
        if let Some(current) = &self.current {
            if current.id == session_id {
                return Ok(SessionHandle::new(session_id));
            }
        }

        let session = self.store.get_session(session_id)?;
        self.end()?;

        info!(session_id, "session restored");
        self.current = Some(session);
        Ok(SessionHandle::new(session_id))
    }

    /// Marks the current session ended and clears the slot.
    ///
    /// Returns the ended session, or `None` when nothing was current. A
    /// restored session that had already ended keeps its original end time.
    /// On a store failure the session stays current.
    pub fn end(&mut self) -> Result<Option<Session>, SessionStoreError> {
        let Some(current) = self.current.as_ref() else {
            return Ok(None);
        };
        let session_id = current.id.clone();
        if !current.is_active() {
            debug!(session_id = %session_id, "released already ended session");
            return Ok(self.current.take());
        }

        let ended_at = self.clock.now();
        self.store.end_session(&session_id, ended_at)?;

        let Some(mut session) = self.current.take() else {
            return Ok(None);
        };
        session.ended_at = Some(ended_at);
        info!(session_id = %session.id, "session ended");
        Ok(Some(session))
    }

    /// Appends a message under the current session; no-op without one.
    pub fn save_message(
        &self,
        message: &NewMessage,
    ) -> Result<Option<MessageRecord>, SessionStoreError> {
        let handle = self.current_handle();
        self.record(handle.as_ref(), message)
    }

    /// Appends a message under `handle`; no-op for `None`.
    pub fn record(
        &self,
        handle: Option<&SessionHandle>,
        message: &NewMessage,
    ) -> Result<Option<MessageRecord>, SessionStoreError> {
        let Some(handle) = handle else {
            return Ok(None);
        };

        let record = self
            .store
            .append_message(handle.id(), self.clock.now(), message)?;
        debug!(
            session_id = handle.id(),
            message_id = record.id,
            role = %record.role,
            "message recorded"
        );
        Ok(Some(record))
    }

    pub fn session_messages(&self, session_id: &str) -> Result<Vec<MessageRecord>, SessionStoreError> {
        self.store.session_messages(session_id)
    }

    pub fn replay_session(&self, session_id: &str) -> Result<Vec<RunMessage>, SessionStoreError> {
        self.store.replay_session(session_id)
    }

    pub fn sessions_for_project(
        &self,
        project_path: &str,
        limit: usize,
    ) -> Result<Vec<SessionSummary>, SessionStoreError> {
        self.store.sessions_for_project(project_path, limit)
    }

    pub fn recent_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>, SessionStoreError> {
        self.store.recent_sessions(limit)
    }

    /// Deletes a session with its messages; clears the slot if it was current.
    pub fn delete_session(&mut self, session_id: &str) -> Result<(), SessionStoreError> {
        self.store.delete_session(session_id)?;
        if self
            .current
            .as_ref()
            .is_some_and(|session| session.id == session_id)
        {
            self.current = None;
        }
        info!(session_id, "session deleted");
        Ok(())
    }

    /// Ends the current session and releases the store.
    ///
    /// The store is released even when ending fails; that failure is still
    /// returned.
    pub fn close(mut self) -> Result<(), SessionStoreError> {
        let ended = self.end();
        let closed = self.store.close();

        if let Err(error) = &ended {
            warn!(%error, "failed to end session while closing");
        }
        ended?;
        closed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use time::macros::datetime;
    use time::Duration;

    use super::*;

    #[derive(Clone)]
    struct FixedClock(Arc<Mutex<OffsetDateTime>>);

    impl FixedClock {
        fn at(now: OffsetDateTime) -> Self {
            Self(Arc::new(Mutex::new(now)))
        }

        fn advance(&self, by: Duration) {
            let mut now = self.0.lock().expect("clock lock");
            *now += by;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> OffsetDateTime {
            *self.0.lock().expect("clock lock")
        }
    }

    fn manager_at(now: OffsetDateTime) -> (SessionManager, FixedClock) {
        let clock = FixedClock::at(now);
        let store = SessionStore::open_in_memory().expect("store");
        (
            SessionManager::with_clock(store, Box::new(clock.clone())),
            clock,
        )
    }

    #[test]
    fn start_derives_id_from_current_second() {
        let (mut manager, _clock) = manager_at(datetime!(2026-02-14 09:30:05.25 UTC));
        let handle = manager.start("/work", "gpt-4.1-nano").expect("start");

        assert_eq!(handle.id(), "session_20260214_093005");
        assert_eq!(manager.current_handle(), Some(handle));
        assert!(manager.current().expect("current").is_active());
    }

    #[test]
    fn colliding_ids_get_numeric_suffixes() {
        let (mut manager, _clock) = manager_at(datetime!(2026-02-14 09:30:05 UTC));
        let first = manager.start("/work", "m").expect("start");
        manager.end().expect("end");
        let second = manager.start("/work", "m").expect("start");
        manager.end().expect("end");
        let third = manager.start("/work", "m").expect("start");

        assert_eq!(first.id(), "session_20260214_093005");
        assert_eq!(second.id(), "session_20260214_093005_2");
        assert_eq!(third.id(), "session_20260214_093005_3");
    }

    #[test]
    fn end_stamps_the_session_and_clears_the_slot() {
        let (mut manager, clock) = manager_at(datetime!(2026-02-14 09:00:00 UTC));
        let handle = manager.start("/work", "m").expect("start");
        clock.advance(Duration::minutes(3));

        let ended = manager.end().expect("end").expect("had a session");
        assert_eq!(ended.ended_at, Some(datetime!(2026-02-14 09:03:00 UTC)));
        assert!(manager.current().is_none());
        assert_eq!(manager.end().expect("second end"), None);

        let stored = manager.store().get_session(handle.id()).expect("stored");
        assert_eq!(stored.ended_at, ended.ended_at);
    }

    #[test]
    fn restore_of_current_session_keeps_it_open() {
        let (mut manager, _clock) = manager_at(datetime!(2026-02-14 09:00:00 UTC));
        let handle = manager.start("/work", "m").expect("start");

        let restored = manager.restore(handle.id()).expect("restore");
        assert_eq!(restored, handle);
        assert!(manager.current().expect("current").is_active());
    }

    #[test]
    fn ending_a_restored_ended_session_keeps_its_end_time() {
        let (mut manager, clock) = manager_at(datetime!(2026-02-14 09:00:00 UTC));
        let handle = manager.start("/work", "m").expect("start");
        clock.advance(Duration::minutes(5));
        let original = manager.end().expect("end").expect("had a session").ended_at;

        clock.advance(Duration::hours(2));
        manager.restore(handle.id()).expect("restore");
        let released = manager.end().expect("end").expect("had a session");

        assert_eq!(released.ended_at, original);
        assert!(manager.current().is_none());
        let stored = manager.store().get_session(handle.id()).expect("stored");
        assert_eq!(stored.ended_at, Some(datetime!(2026-02-14 09:05:00 UTC)));
    }

    #[test]
    fn restore_unknown_session_leaves_current_untouched() {
        let (mut manager, _clock) = manager_at(datetime!(2026-02-14 09:00:00 UTC));
        let handle = manager.start("/work", "m").expect("start");

        let error = manager.restore("session_missing").expect_err("must fail");
        assert!(error.is_not_found());
        assert_eq!(manager.current_handle(), Some(handle));
    }
}
