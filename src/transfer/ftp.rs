//! FTP Transport
//!
//! Plain FTP (RFC 959) over tokio TCP. Passive mode only. The host part of a
//! PASV reply is ignored; data connections go to the control connection's
//! peer address.

use async_trait::async_trait;
use bytes::BytesMut;
use log::{debug, info, warn};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use walkdir::WalkDir;

use super::client::{Endpoint, ProgressCallback, TransferClient, TransferConnector, TransferProgress};
use super::error::{TransferError, TransferResult};
use crate::config::TransferConfig;

/// Upload chunk size; one progress tick per chunk
const CHUNK_SIZE: usize = 64 * 1024;

/// Connector producing logged-in FTP clients
pub struct FtpConnector {
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl FtpConnector {
    pub fn new(config: &TransferConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            io_timeout: config.io_timeout(),
        }
    }
}

#[async_trait]
impl TransferConnector for FtpConnector {
    async fn connect(&self, endpoint: &Endpoint, password: &str) -> TransferResult<Box<dyn TransferClient>> {
        let mut client = FtpClient::connect(endpoint, self.connect_timeout, self.io_timeout).await?;
        client.login(&endpoint.username, password).await?;
        info!("Logged in to {} as {}", endpoint.socket_addr(), endpoint.username);
        Ok(Box::new(client))
    }
}

/// Server reply
#[derive(Debug, Clone, PartialEq, Eq)]
struct Reply {
    code: u16,
    message: String,
}

/// One local path scheduled for upload
#[derive(Debug)]
struct UploadEntry {
    local: PathBuf,
    remote: String,
    is_dir: bool,
}

/// Logged-in FTP control connection
pub struct FtpClient {
    control: BufReader<TcpStream>,
    peer: IpAddr,
    io_timeout: Duration,
    progress: Option<ProgressCallback>,
    bytes_overall: u64,
}

impl FtpClient {
    /// Open the control connection and read the greeting
    pub async fn connect(endpoint: &Endpoint, connect_timeout: Duration, io_timeout: Duration) -> TransferResult<Self> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(endpoint.socket_addr()))
            .await
            .map_err(|_| TransferError::ConnectionTimeout(connect_timeout.as_secs()))?
            .map_err(|e| TransferError::ConnectionFailed(format!("{}: {}", endpoint.socket_addr(), e)))?;
        let peer = stream.peer_addr()?.ip();

        let mut client = Self {
            control: BufReader::new(stream),
            peer,
            io_timeout,
            progress: None,
            bytes_overall: 0,
        };
        let greeting = client.read_reply().await?;
        expect(greeting, &[220])?;
        Ok(client)
    }

    /// USER/PASS, then switch to binary mode
    pub async fn login(&mut self, username: &str, password: &str) -> TransferResult<()> {
        let reply = self.command(&format!("USER {}", username)).await?;
        match reply.code {
            230 => {}
            331 | 332 => {
                let reply = self.command(&format!("PASS {}", password)).await?;
                match reply.code {
                    230 | 202 => {}
                    530 => return Err(TransferError::LoginRejected(reply.message)),
                    _ => return Err(unexpected(reply)),
                }
            }
            530 => return Err(TransferError::LoginRejected(reply.message)),
            _ => return Err(unexpected(reply)),
        }

        expect(self.command("TYPE I").await?, &[200])?;
        Ok(())
    }

    async fn command(&mut self, cmd: &str) -> TransferResult<Reply> {
        if cmd.starts_with("PASS ") {
            debug!("--> PASS ****");
        } else {
            debug!("--> {}", cmd);
        }
        let stream = self.control.get_mut();
        bounded(self.io_timeout, "command write", async {
            stream.write_all(cmd.as_bytes()).await?;
            stream.write_all(b"\r\n").await?;
            stream.flush().await
        })
        .await?;
        self.read_reply().await
    }

    async fn read_line(&mut self) -> TransferResult<String> {
        let mut line = String::new();
        if bounded(self.io_timeout, "server reply", self.control.read_line(&mut line)).await? == 0 {
            return Err(TransferError::ConnectionClosed);
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    async fn read_reply(&mut self) -> TransferResult<Reply> {
        let first = self.read_line().await?;
        let (code, multiline) = parse_reply_head(&first)?;
        let mut message = reply_text(&first).to_string();

        if multiline {
            loop {
                let line = self.read_line().await?;
                message.push('\n');
                if is_reply_end(&line, code) {
                    message.push_str(reply_text(&line));
                    break;
                }
                message.push_str(&line);
            }
        }

        debug!("<-- {} {}", code, message);
        Ok(Reply { code, message })
    }

    /// Enter passive mode and connect the data channel
    async fn open_data(&mut self) -> TransferResult<TcpStream> {
        let reply = expect(self.command("PASV").await?, &[227])?;
        let port = parse_pasv_port(&reply.message)?;
        let addr = SocketAddr::new(self.peer, port);
        tokio::time::timeout(self.io_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransferError::TimedOut("data connection"))?
            .map_err(|e| TransferError::ConnectionFailed(format!("data connection {}: {}", addr, e)))
    }

    async fn make_dir(&mut self, remote: &str) -> TransferResult<()> {
        let reply = self.command(&format!("MKD {}", remote)).await?;
        match reply.code {
            257 => Ok(()),
            // Most servers answer 550 when the directory already exists
            521 | 550 => {
                debug!("MKD {} refused ({}), assuming it exists", remote, reply.message);
                Ok(())
            }
            _ => Err(unexpected(reply)),
        }
    }

    async fn upload_file(&mut self, local: &Path, remote: &str) -> TransferResult<()> {
        let mut file = tokio::fs::File::open(local).await?;
        let mut data = self.open_data().await?;
        expect(self.command(&format!("STOR {}", remote)).await?, &[125, 150])?;

        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
        let mut bytes = 0u64;
        loop {
            buf.clear();
            let n = file.read_buf(&mut buf).await?;
            if n == 0 {
                break;
            }
            bounded(self.io_timeout, "data write", data.write_all(&buf)).await?;
            bytes += n as u64;
            self.bytes_overall += n as u64;
            if let Some(callback) = &self.progress {
                callback(TransferProgress {
                    name: remote.to_string(),
                    bytes,
                    bytes_overall: self.bytes_overall,
                });
            }
        }
        bounded(self.io_timeout, "data write", data.shutdown()).await?;
        drop(data);

        expect(self.read_reply().await?, &[226, 250])?;
        debug!("Stored {} ({} bytes)", remote, bytes);
        Ok(())
    }
}

#[async_trait]
impl TransferClient for FtpClient {
    async fn list(&mut self, path: Option<&str>) -> TransferResult<Vec<String>> {
        let mut data = self.open_data().await?;
        let cmd = match path {
            Some(p) => format!("LIST {}", p),
            None => "LIST".to_string(),
        };
        expect(self.command(&cmd).await?, &[125, 150])?;

        let mut raw = Vec::new();
        bounded(self.io_timeout, "directory listing", data.read_to_end(&mut raw)).await?;
        drop(data);
        expect(self.read_reply().await?, &[226, 250])?;

        Ok(String::from_utf8_lossy(&raw)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn cd(&mut self, path: &str) -> TransferResult<()> {
        expect(self.command(&format!("CWD {}", path)).await?, &[200, 250])?;
        Ok(())
    }

    fn track_progress(&mut self, callback: Option<ProgressCallback>) {
        self.progress = callback;
        self.bytes_overall = 0;
    }

    async fn upload_from_dir(&mut self, local_dir: &Path) -> TransferResult<()> {
        let entries = collect_entries(local_dir).await?;
        for entry in entries {
            if entry.is_dir {
                self.make_dir(&entry.remote).await?;
            } else {
                self.upload_file(&entry.local, &entry.remote).await?;
            }
        }
        Ok(())
    }

    async fn quit(&mut self) -> TransferResult<()> {
        let reply = self.command("QUIT").await?;
        if reply.code != 221 {
            warn!("QUIT answered with {} {}", reply.code, reply.message);
        }
        Ok(())
    }

    fn transport_type(&self) -> &'static str {
        "ftp"
    }
}

/// Walk `root` (sorted, directories before their contents) on the blocking pool
async fn collect_entries(root: &Path) -> TransferResult<Vec<UploadEntry>> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || -> TransferResult<Vec<UploadEntry>> {
        let mut entries = Vec::new();
        for entry in WalkDir::new(&root).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            let relative = entry
                .path()
                .strip_prefix(&root)
                .map_err(|e| TransferError::Protocol(e.to_string()))?;
            let remote = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            entries.push(UploadEntry {
                local: entry.path().to_path_buf(),
                remote,
                is_dir: entry.file_type().is_dir(),
            });
        }
        Ok(entries)
    })
    .await
    .map_err(|e| TransferError::Protocol(format!("directory walk failed: {}", e)))?
}

/// Run one socket operation under `limit`
async fn bounded<T, F>(limit: Duration, what: &'static str, op: F) -> TransferResult<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match tokio::time::timeout(limit, op).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(TransferError::TimedOut(what)),
    }
}

fn unexpected(reply: Reply) -> TransferError {
    TransferError::UnexpectedReply {
        code: reply.code,
        message: reply.message,
    }
}

fn expect(reply: Reply, codes: &[u16]) -> TransferResult<Reply> {
    if codes.contains(&reply.code) {
        Ok(reply)
    } else {
        Err(unexpected(reply))
    }
}

fn parse_reply_head(line: &str) -> TransferResult<(u16, bool)> {
    let code = line
        .get(..3)
        .filter(|c| c.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|c| c.parse().ok())
        .ok_or_else(|| TransferError::Protocol(format!("malformed reply: {:?}", line)))?;
    Ok((code, line.as_bytes().get(3) == Some(&b'-')))
}

fn is_reply_end(line: &str, code: u16) -> bool {
    let prefix = code.to_string();
    line.starts_with(&prefix) && matches!(line.as_bytes().get(3), None | Some(b' '))
}

fn reply_text(line: &str) -> &str {
    line.get(4..).unwrap_or("")
}

/// Port from a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply
fn parse_pasv_port(message: &str) -> TransferResult<u16> {
    let malformed = || TransferError::Protocol(format!("malformed PASV reply: {}", message));

    let token = message
        .split(|c: char| !(c.is_ascii_digit() || c == ','))
        .find(|t| t.matches(',').count() == 5)
        .ok_or_else(malformed)?;
    let numbers = token
        .split(',')
        .map(|n| n.parse::<u8>())
        .collect::<Result<Vec<u8>, _>>()
        .map_err(|_| malformed())?;

    Ok((u16::from(numbers[4]) << 8) | u16::from(numbers[5]))
}
