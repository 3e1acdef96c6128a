//! Session Events
//!
//! Everything the pipeline says to its client goes through one unbounded
//! channel, so messages keep the order they were produced in and producers
//! (the output relays, the progress callback) never wait on the socket.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// WebSocket close codes used by the relay
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const POLICY: u16 = 1008;
    pub const ERROR: u16 = 1011;
}

/// Close code plus human-readable reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn normal(reason: impl Into<String>) -> Self {
        Self {
            code: close_code::NORMAL,
            reason: reason.into(),
        }
    }

    pub fn policy(reason: impl Into<String>) -> Self {
        Self {
            code: close_code::POLICY,
            reason: reason.into(),
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            code: close_code::ERROR,
            reason: reason.into(),
        }
    }
}

/// Message for the connection writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Free-text status line
    Status(String),
    /// Close the connection; nothing is sent after this
    Close(CloseReason),
}

/// Sending half handed to the pipeline and its collaborators
#[derive(Debug, Clone)]
pub struct StatusSender {
    session_id: String,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl StatusSender {
    pub fn new(session_id: impl Into<String>, tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            session_id: session_id.into(),
            tx,
        }
    }

    /// Create a sender together with its receiving end
    pub fn channel(session_id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(session_id, tx), rx)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Queue a status line. Returns false once the connection is gone.
    pub fn status(&self, line: impl Into<String>) -> bool {
        self.tx.send(Outbound::Status(line.into())).is_ok()
    }

    pub fn close(&self, reason: CloseReason) -> bool {
        self.tx.send(Outbound::Close(reason)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
