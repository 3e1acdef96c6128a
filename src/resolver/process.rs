//! Managed resolution process
//!
//! Owns the child and its two relay tasks. Dropping a `ManagedProcess`
//! kills the whole process group, so a session that goes away mid-resolve
//! never leaves the tool running.

use log::{debug, warn};
use tokio::process::Child;
use tokio::task::JoinHandle;

/// Child process plus the tasks relaying its stdout/stderr
pub struct ManagedProcess {
    /// Session ID this process belongs to
    pub session_id: String,
    /// The child process handle
    pub child: Child,
    /// Process ID (0 if it had already exited when spawned)
    pub pid: u32,
    /// stdout relay task handle
    pub stdout_handle: Option<JoinHandle<()>>,
    /// stderr relay task handle
    pub stderr_handle: Option<JoinHandle<()>>,
}

impl ManagedProcess {
    pub fn new(session_id: impl Into<String>, child: Child) -> Self {
        let pid = child.id().unwrap_or(0);
        Self {
            session_id: session_id.into(),
            child,
            pid,
            stdout_handle: None,
            stderr_handle: None,
        }
    }

    pub fn with_stdout_handle(mut self, handle: JoinHandle<()>) -> Self {
        self.stdout_handle = Some(handle);
        self
    }

    pub fn with_stderr_handle(mut self, handle: JoinHandle<()>) -> Self {
        self.stderr_handle = Some(handle);
        self
    }

    /// Wait until both relays have forwarded everything the process wrote
    pub async fn drain_output(&mut self) {
        let stdout = self.stdout_handle.take();
        let stderr = self.stderr_handle.take();
        let (out, err) = futures::future::join(
            async move {
                match stdout {
                    Some(h) => h.await,
                    None => Ok(()),
                }
            },
            async move {
                match stderr {
                    Some(h) => h.await,
                    None => Ok(()),
                }
            },
        )
        .await;
        if let Err(e) = out.and(err) {
            warn!("[{}] Output relay task failed: {}", self.session_id, e);
        }
    }

    /// Force kill immediately. The relays keep running until the pipes close.
    pub async fn kill(&mut self) -> Result<(), std::io::Error> {
        kill_group(self.pid);
        self.child.kill().await
    }

    /// Kill whatever is left in the group once the leader has exited
    pub fn kill_stragglers(&self) {
        kill_group(self.pid);
    }

    fn abort_relays(&mut self) {
        if let Some(handle) = self.stdout_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.stderr_handle.take() {
            handle.abort();
        }
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        // try_wait: Ok(Some(_)) means already reaped, nothing to kill
        if !matches!(self.child.try_wait(), Ok(Some(_))) {
            debug!("[{}] Killing resolution process {}", self.session_id, self.pid);
            kill_group(self.pid);
            let _ = self.child.start_kill();
        }
        self.abort_relays();
    }
}

/// Signal every process in the group led by `pid`
#[cfg(unix)]
fn kill_group(pid: u32) {
    if pid == 0 {
        return;
    }
    // The child was spawned as its own group leader, so pgid == pid.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        debug!("killpg({}) failed: {}", pid, std::io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}
