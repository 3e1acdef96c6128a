//! Resolution tool invocation
//!
//! The tool's contract is small: it gets the scratch directory and a memory
//! ceiling as arguments, writes text to stdout/stderr, and exits 0 on success.

use log::{debug, info, warn};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::SplitStream;
use tokio_stream::StreamExt;

use super::process::ManagedProcess;
use crate::config::ResolverConfig;
use crate::session::StatusSender;

/// Placeholder substituted with the scratch directory
pub const WORKING_DIR_PLACEHOLDER: &str = "{working_dir}";
/// Placeholder substituted with the memory ceiling
pub const MEMORY_LIMIT_PLACEHOLDER: &str = "{memory_limit}";

/// Runs the configured resolution tool
#[derive(Debug, Clone)]
pub struct ResolverRunner {
    config: ResolverConfig,
}

impl ResolverRunner {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    /// Where the manifest lives inside a scratch directory
    pub fn manifest_path(&self, scratch_dir: &Path) -> PathBuf {
        scratch_dir.join(&self.config.manifest_name)
    }

    /// Create the scratch directory and write the manifest into it
    pub async fn write_manifest(&self, scratch_dir: &Path, content: &str) -> io::Result<PathBuf> {
        tokio::fs::create_dir_all(scratch_dir).await?;
        let path = self.manifest_path(scratch_dir);
        tokio::fs::write(&path, content).await?;
        Ok(path)
    }

    /// Argument list with placeholders filled in
    pub fn build_args(&self, working_dir: &Path) -> Vec<String> {
        let working_dir = working_dir.to_string_lossy();
        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace(WORKING_DIR_PLACEHOLDER, &working_dir)
                    .replace(MEMORY_LIMIT_PLACEHOLDER, &self.config.memory_limit)
            })
            .collect()
    }

    fn command(&self, working_dir: &Path) -> Command {
        let mut std_cmd = std::process::Command::new(&self.config.executable);
        std_cmd
            .args(self.build_args(working_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group, so teardown can take out anything the tool forks
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_cmd.process_group(0);
        }

        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(true);
        cmd
    }

    /// Start the tool with both output streams relayed to `out`
    pub fn spawn(&self, working_dir: &Path, out: &StatusSender) -> Result<ManagedProcess, ResolverError> {
        let mut child = self.command(working_dir).spawn().map_err(|source| ResolverError::Spawn {
            program: self.config.executable.clone(),
            source,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut process = ManagedProcess::new(out.session_id(), child);

        if let Some(stdout) = stdout {
            process = process.with_stdout_handle(relay_lines(stdout, out.clone(), "stdout"));
        }
        if let Some(stderr) = stderr {
            process = process.with_stderr_handle(relay_lines(stderr, out.clone(), "stderr"));
        }

        info!(
            "[{}] Started {} (pid {}) in {:?}",
            out.session_id(),
            self.config.executable,
            process.pid,
            working_dir
        );
        Ok(process)
    }

    /// Run the tool to completion.
    ///
    /// `on_spawn` gets the pid once the process is up. Returns only after
    /// every output line has been handed to `out`.
    pub async fn run(
        &self,
        working_dir: &Path,
        out: &StatusSender,
        on_spawn: impl FnOnce(u32),
    ) -> Result<(), ResolverError> {
        let mut process = self.spawn(working_dir, out)?;
        on_spawn(process.pid);

        let status = match self.config.timeout() {
            Some(limit) => match tokio::time::timeout(limit, process.child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!("[{}] Resolution timed out after {}s", out.session_id(), limit.as_secs());
                    process.kill().await?;
                    process.drain_output().await;
                    return Err(ResolverError::TimedOut(limit.as_secs()));
                }
            },
            None => process.child.wait().await?,
        };

        // Anything the tool left behind in its group still holds the pipes
        process.kill_stragglers();
        process.drain_output().await;
        debug!("[{}] Resolution tool exited: {}", out.session_id(), status);

        if status.success() {
            Ok(())
        } else {
            Err(ResolverError::Failed(status.code().unwrap_or(-1)))
        }
    }
}

/// Forward every line of `reader` as a status message
fn relay_lines<R>(reader: R, out: StatusSender, stream: &'static str) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = SplitStream::new(BufReader::new(reader).split(b'\n'));
        while let Some(segment) = lines.next().await {
            match segment {
                Ok(bytes) => {
                    let line = String::from_utf8_lossy(&bytes);
                    let line = line.trim_end_matches('\r');
                    debug!("[{}] {}: {}", out.session_id(), stream, line);
                    out.status(line);
                }
                Err(e) => {
                    warn!("[{}] Failed reading {}: {}", out.session_id(), stream, e);
                    break;
                }
            }
        }
    })
}

/// Resolution runner errors
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Resolution tool exited with code {0}")]
    Failed(i32),

    #[error("Resolution tool timed out after {0}s")]
    TimedOut(u64),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::session::Outbound;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn sh(script: &str, timeout_secs: u64) -> ResolverRunner {
        ResolverRunner::new(ResolverConfig {
            executable: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), WORKING_DIR_PLACEHOLDER.to_string()],
            timeout_secs,
            ..Default::default()
        })
    }

    fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let Outbound::Status(line) = msg {
                lines.push(line);
            }
        }
        lines
    }

    #[test]
    fn test_build_args_substitutes_placeholders() {
        let runner = ResolverRunner::new(ResolverConfig::default());
        let args = runner.build_args(Path::new("/tmp/relay/abc"));
        assert!(args.contains(&"memory_limit=64M".to_string()));
        assert!(args.contains(&"--working-dir=/tmp/relay/abc".to_string()));
    }

    #[tokio::test]
    async fn test_write_manifest_creates_scratch_dir() {
        let root = tempfile::tempdir().unwrap();
        let scratch = root.path().join("session");
        let runner = ResolverRunner::new(ResolverConfig::default());

        let path = runner.write_manifest(&scratch, "{\"require\":{}}").await.unwrap();
        assert_eq!(path, scratch.join("composer.json"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "{\"require\":{}}");
    }

    #[tokio::test]
    async fn test_success_relays_both_streams() {
        let dir = tempfile::tempdir().unwrap();
        let runner = sh("echo installing; echo warning >&2; echo; echo done", 10);
        let (out, mut rx) = StatusSender::channel("test");

        let mut seen_pid = 0;
        runner.run(dir.path(), &out, |pid| seen_pid = pid).await.unwrap();
        assert!(seen_pid > 0);

        let lines = drain(&mut rx);
        assert_eq!(lines.len(), 4);
        let stdout: Vec<&String> = lines.iter().filter(|l| *l != "warning").collect();
        assert_eq!(stdout, vec!["installing", "", "done"]);
        assert!(lines.contains(&"warning".to_string()));
    }

    #[tokio::test]
    async fn test_failure_relays_stderr_before_returning() {
        let dir = tempfile::tempdir().unwrap();
        let runner = sh("echo 'Problem 1' >&2; echo 'Problem 2' >&2; exit 2", 10);
        let (out, mut rx) = StatusSender::channel("test");

        let err = runner.run(dir.path(), &out, |_| {}).await.unwrap_err();
        assert!(matches!(err, ResolverError::Failed(2)));
        assert_eq!(drain(&mut rx), vec!["Problem 1", "Problem 2"]);
    }

    #[tokio::test]
    async fn test_working_dir_argument() {
        let dir = tempfile::tempdir().unwrap();
        let runner = sh("touch \"$0/vendor.lock\"", 10);
        let (out, _rx) = StatusSender::channel("test");

        runner.run(dir.path(), &out, |_| {}).await.unwrap();
        assert!(dir.path().join("vendor.lock").exists());
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let runner = sh("echo started; sleep 30", 1);
        let (out, mut rx) = StatusSender::channel("test");

        let err = runner.run(dir.path(), &out, |_| {}).await.unwrap_err();
        assert!(matches!(err, ResolverError::TimedOut(1)));
        assert_eq!(drain(&mut rx), vec!["started"]);
    }

    #[tokio::test]
    async fn test_background_child_does_not_outlive_tool() {
        let dir = tempfile::tempdir().unwrap();
        let runner = sh("sleep 30 & echo hi; exit 1", 5);
        let (out, mut rx) = StatusSender::channel("test");

        let started = std::time::Instant::now();
        let err = runner.run(dir.path(), &out, |_| {}).await.unwrap_err();
        assert!(matches!(err, ResolverError::Failed(1)));
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        assert_eq!(drain(&mut rx), vec!["hi"]);
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ResolverRunner::new(ResolverConfig {
            executable: "/nonexistent/resolver-binary".to_string(),
            ..Default::default()
        });
        let (out, _rx) = StatusSender::channel("test");

        let err = runner.run(dir.path(), &out, |_| {}).await.unwrap_err();
        assert!(matches!(err, ResolverError::Spawn { .. }));
    }
}
