//! Session Registry
//!
//! Lock-free concurrent session tracking using DashMap. Owned by the accept
//! loop: inserted on accept, removed on teardown.

use dashmap::DashMap;
use log::{debug, info};
use std::sync::Arc;

use super::state::{Session, SessionInfo, SessionStage, SessionState};

/// Live sessions (session_id -> SessionState)
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, SessionState>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly accepted session
    pub fn insert(&self, session: Session) -> Result<(), SessionError> {
        match self.sessions.entry(session.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(SessionError::SessionExists(session.id)),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                info!("[{}] Session registered from {}", session.id, session.remote_addr);
                vacant.insert(SessionState::new(session));
                Ok(())
            }
        }
    }

    /// Move a session to `stage`
    pub fn set_stage(&self, session_id: &str, stage: SessionStage) -> Result<(), SessionError> {
        let mut state = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;
        debug!("[{}] {} -> {}", session_id, state.stage, stage);
        state.set_stage(stage);
        Ok(())
    }

    /// Attach or detach the resolution tool pid
    pub fn set_pid(&self, session_id: &str, pid: Option<u32>) {
        if let Some(mut state) = self.sessions.get_mut(session_id) {
            state.pid = pid;
        }
    }

    pub fn set_failed(&self, session_id: &str, error: impl Into<String>) {
        if let Some(mut state) = self.sessions.get_mut(session_id) {
            state.set_failed(error);
        }
    }

    pub fn stage(&self, session_id: &str) -> Option<SessionStage> {
        self.sessions.get(session_id).map(|s| s.stage)
    }

    pub fn get(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.get(session_id).map(|s| SessionInfo::from(s.value()))
    }

    /// Drop a session; returns its final state
    pub fn remove(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.remove(session_id).map(|(_, state)| state)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        self.sessions
            .iter()
            .map(|s| SessionInfo::from(s.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Session registry errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session already exists: {0}")]
    SessionExists(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn session(id: &str) -> Session {
        Session::new(id, "127.0.0.1:4000".parse().unwrap(), Path::new("/tmp"))
    }

    #[test]
    fn test_insert_and_remove() {
        let registry = SessionRegistry::new();
        registry.insert(session("s-1")).unwrap();
        assert!(registry.contains("s-1"));
        assert_eq!(registry.stage("s-1"), Some(SessionStage::AwaitingRequest));

        let state = registry.remove("s-1").unwrap();
        assert_eq!(state.session.id, "s-1");
        assert!(registry.is_empty());
        assert!(registry.remove("s-1").is_none());
    }

    #[test]
    fn test_duplicate_session() {
        let registry = SessionRegistry::new();
        registry.insert(session("s-1")).unwrap();
        let result = registry.insert(session("s-1"));
        assert!(matches!(result, Err(SessionError::SessionExists(_))));
    }

    #[test]
    fn test_stage_and_pid_updates() {
        let registry = SessionRegistry::new();
        registry.insert(session("s-1")).unwrap();

        registry.set_stage("s-1", SessionStage::Resolving).unwrap();
        registry.set_pid("s-1", Some(99));
        assert_eq!(registry.get("s-1").unwrap().pid, Some(99));

        registry.set_stage("s-1", SessionStage::Uploading).unwrap();
        assert_eq!(registry.get("s-1").unwrap().pid, None);

        assert!(matches!(
            registry.set_stage("missing", SessionStage::Validating),
            Err(SessionError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_list_sessions() {
        let registry = SessionRegistry::new();
        registry.insert(session("s-1")).unwrap();
        registry.insert(session("s-2")).unwrap();
        registry.set_failed("s-2", "boom");

        let all = registry.list();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|s| s.error_message.as_deref() == Some("boom")));
    }
}
