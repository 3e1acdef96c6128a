//! Transfer Abstraction
//!
//! The pipeline only sees these traits; the protocol behind them is
//! pluggable (FTP in production, an in-memory fake in tests).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::{TransferError, TransferResult};

/// Parsed `user@host[:port]` descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub username: String,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Parse a descriptor. The split is on the last `@`, so usernames that
    /// are themselves e-mail addresses work.
    pub fn parse(descriptor: &str, default_port: u16) -> TransferResult<Self> {
        let (username, host_port) = descriptor
            .trim()
            .rsplit_once('@')
            .ok_or_else(|| TransferError::InvalidEndpoint("expected user@host".to_string()))?;

        if username.is_empty() {
            return Err(TransferError::InvalidEndpoint("empty username".to_string()));
        }

        let (host, port) = split_host_port(host_port, default_port)?;
        let probe = if host.contains(':') {
            format!("[{}]", host)
        } else {
            host.to_string()
        };
        url::Host::parse(&probe)
            .map_err(|e| TransferError::InvalidEndpoint(format!("{}: {}", host, e)))?;

        Ok(Self {
            username: username.to_string(),
            host: host.to_string(),
            port,
        })
    }

    /// `host:port` suitable for `TcpStream::connect`
    pub fn socket_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

fn split_host_port(host_port: &str, default_port: u16) -> TransferResult<(&str, u16)> {
    if host_port.is_empty() {
        return Err(TransferError::InvalidEndpoint("empty host".to_string()));
    }

    // [v6]:port or [v6]
    if let Some(rest) = host_port.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| TransferError::InvalidEndpoint("unterminated [".to_string()))?;
        let port = match tail.strip_prefix(':') {
            Some(p) => parse_port(p)?,
            None if tail.is_empty() => default_port,
            None => return Err(TransferError::InvalidEndpoint(host_port.to_string())),
        };
        return Ok((host, port));
    }

    match host_port.rsplit_once(':') {
        // A bare IPv6 address has several colons and no port
        Some((host, port)) if !host.contains(':') => Ok((host, parse_port(port)?)),
        _ => Ok((host_port, default_port)),
    }
}

fn parse_port(port: &str) -> TransferResult<u16> {
    port.parse()
        .map_err(|_| TransferError::InvalidEndpoint(format!("bad port: {}", port)))
}

/// Progress tick reported after every uploaded chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    /// Remote name of the file being uploaded
    pub name: String,
    /// Bytes sent so far for this file
    pub bytes: u64,
    /// Bytes sent so far since tracking started
    pub bytes_overall: u64,
}

/// Callback type for progress ticks
pub type ProgressCallback = Box<dyn Fn(TransferProgress) + Send + Sync>;

/// Opens authenticated clients
#[async_trait]
pub trait TransferConnector: Send + Sync {
    /// Connect and log in
    async fn connect(&self, endpoint: &Endpoint, password: &str) -> TransferResult<Box<dyn TransferClient>>;
}

/// An authenticated connection to a transfer endpoint
#[async_trait]
pub trait TransferClient: Send {
    /// List a remote directory (None = current directory)
    async fn list(&mut self, path: Option<&str>) -> TransferResult<Vec<String>>;

    /// Change the remote working directory
    async fn cd(&mut self, path: &str) -> TransferResult<()>;

    /// Install or clear the progress callback. `bytes_overall` restarts at zero.
    fn track_progress(&mut self, callback: Option<ProgressCallback>);

    /// Upload the contents of `local_dir` into the current remote directory
    async fn upload_from_dir(&mut self, local_dir: &Path) -> TransferResult<()>;

    /// Log out and close
    async fn quit(&mut self) -> TransferResult<()>;

    /// Protocol name for logging
    fn transport_type(&self) -> &'static str;
}
