//! Session Pipeline
//!
//! Drives one connection's job through
//! Validating -> Authenticating -> DirectoryCheck -> Resolving -> Uploading,
//! reporting each step to the client and stopping at the first failure.

pub mod context;
pub mod request;
pub mod runner;

pub use context::PipelineContext;
pub use request::JobRequest;
pub use runner::{format_progress, progress_reporter, teardown, SessionPipeline, SessionReport};
