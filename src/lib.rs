//! deploy-relay
//!
//! WebSocket service that takes a Composer manifest plus FTP credentials,
//! resolves the dependencies in a per-session scratch directory and uploads
//! the result, streaming progress back over the socket.

pub mod captcha;
pub mod config;
pub mod dirsize;
pub mod error;
pub mod ident;
pub mod pipeline;
pub mod queue;
pub mod ratelimit;
pub mod resolver;
pub mod server;
pub mod session;
pub mod transfer;

pub use config::Config;
pub use error::{PipelineError, ValidationError};
pub use pipeline::{PipelineContext, SessionPipeline};
pub use server::{router, serve, AppState};
