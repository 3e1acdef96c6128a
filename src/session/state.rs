//! Session State
//!
//! Tracks the stage of each live session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Pipeline stage of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    /// Connected, waiting for the job message
    AwaitingRequest,
    /// Checking fields and manifest
    Validating,
    /// Logging in to the transfer endpoint
    Authenticating,
    /// Confirming the upload directory exists
    DirectoryCheck,
    /// Running the resolution tool
    Resolving,
    /// Uploading the scratch directory
    Uploading,
    /// Finished, successfully or not
    Terminated,
}

impl Default for SessionStage {
    fn default() -> Self {
        Self::AwaitingRequest
    }
}

impl std::fmt::Display for SessionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AwaitingRequest => write!(f, "awaiting_request"),
            Self::Validating => write!(f, "validating"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::DirectoryCheck => write!(f, "directory_check"),
            Self::Resolving => write!(f, "resolving"),
            Self::Uploading => write!(f, "uploading"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Identity of one accepted connection
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub remote_addr: SocketAddr,
    /// `<temp_root>/<id>`
    pub scratch_dir: PathBuf,
}

impl Session {
    pub fn new(id: impl Into<String>, remote_addr: SocketAddr, temp_root: &Path) -> Self {
        let id = id.into();
        let scratch_dir = temp_root.join(&id);
        Self {
            id,
            remote_addr,
            scratch_dir,
        }
    }
}

/// Registry entry for a live session
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session: Session,
    pub stage: SessionStage,
    /// Resolution tool pid, only while Resolving
    pub pid: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl SessionState {
    pub fn new(session: Session) -> Self {
        let now = Utc::now();
        Self {
            session,
            stage: SessionStage::AwaitingRequest,
            pid: None,
            created_at: now,
            last_activity: now,
            error_message: None,
        }
    }

    pub fn set_stage(&mut self, stage: SessionStage) {
        self.stage = stage;
        self.last_activity = Utc::now();
        if stage != SessionStage::Resolving {
            self.pid = None;
        }
    }

    pub fn set_failed(&mut self, error: impl Into<String>) {
        self.error_message = Some(error.into());
        self.last_activity = Utc::now();
    }

    pub fn is_terminal(&self) -> bool {
        self.stage == SessionStage::Terminated
    }

    pub fn duration_secs(&self) -> i64 {
        (self.last_activity - self.created_at).num_seconds()
    }
}

/// Serializable session info for the `/sessions` endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub remote_addr: String,
    pub stage: SessionStage,
    pub pid: Option<u32>,
    pub created_at: String,
    pub last_activity: String,
    pub error_message: Option<String>,
    pub duration_secs: i64,
}

impl From<&SessionState> for SessionInfo {
    fn from(state: &SessionState) -> Self {
        Self {
            id: state.session.id.clone(),
            remote_addr: state.session.remote_addr.to_string(),
            stage: state.stage,
            pid: state.pid,
            created_at: state.created_at.to_rfc3339(),
            last_activity: state.last_activity.to_rfc3339(),
            error_message: state.error_message.clone(),
            duration_secs: state.duration_secs(),
        }
    }
}
