//! Session Management Module
//!
//! One session per accepted connection:
//! - `Session`: identity, remote address and scratch directory of a connection
//! - `SessionRegistry`: concurrent id -> state map owned by the accept loop
//! - `Outbound`/`StatusSender`: ordered status stream back to the client

pub mod events;
pub mod registry;
pub mod state;

pub use events::{CloseReason, Outbound, StatusSender};
pub use registry::{SessionError, SessionRegistry};
pub use state::{Session, SessionInfo, SessionStage, SessionState};
