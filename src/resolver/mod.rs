//! Dependency Resolution Runner
//!
//! Launches the package-installation tool against a session's scratch
//! directory and relays its output line by line.

pub mod process;
pub mod runner;

pub use process::ManagedProcess;
pub use runner::{ResolverError, ResolverRunner};
