//! Per-session pipeline execution

use log::{debug, info, warn};
use std::io;
use std::sync::Arc;

use super::context::PipelineContext;
use super::request::JobRequest;
use crate::dirsize;
use crate::error::{PipelineError, ValidationError};
use crate::queue::AdmissionPermit;
use crate::session::{CloseReason, Session, SessionStage, StatusSender};
use crate::transfer::{Endpoint, ProgressCallback, TransferClient, TransferProgress};

/// Outcome of one pipeline run
#[derive(Debug)]
pub struct SessionReport {
    /// Every stage entered, in order
    pub stages: Vec<SessionStage>,
    pub result: Result<(), PipelineError>,
}

/// One session's job, from the first message to Terminated.
///
/// Dropping a running pipeline kills the resolution tool and closes the
/// transfer connection. Call [`teardown`] afterwards in either case.
pub struct SessionPipeline {
    ctx: Arc<PipelineContext>,
    session: Session,
    out: StatusSender,
    history: Vec<SessionStage>,
    permit: Option<AdmissionPermit>,
}

impl SessionPipeline {
    pub fn new(ctx: Arc<PipelineContext>, session: Session, out: StatusSender) -> Self {
        Self {
            ctx,
            session,
            out,
            history: Vec::new(),
            permit: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Process the job message
    pub async fn run(mut self, raw: &str) -> SessionReport {
        let result = self.execute(raw).await;
        self.finish(result).await
    }

    /// End the session without running it
    pub async fn reject(self, error: PipelineError) -> SessionReport {
        self.finish(Err(error)).await
    }

    async fn finish(mut self, result: Result<(), PipelineError>) -> SessionReport {
        match &result {
            Ok(()) => {
                info!("[{}] Upload complete", self.session.id);
                self.out.status("Success: Upload complete");
                self.out.close(CloseReason::normal("Upload complete"));
            }
            Err(e) => {
                warn!("[{}] Session failed ({}): {}", self.session.id, e.kind(), e);
                self.ctx.registry.set_failed(&self.session.id, e.to_string());
                for line in e.status_lines() {
                    self.out.status(line);
                }
                self.out.close(e.close_reason());
            }
        }

        remove_scratch(&self.session).await;
        self.permit = None;
        self.enter(SessionStage::Terminated);

        SessionReport {
            stages: self.history,
            result,
        }
    }

    fn enter(&mut self, stage: SessionStage) {
        self.history.push(stage);
        if let Err(e) = self.ctx.registry.set_stage(&self.session.id, stage) {
            debug!("[{}] Stage {} not recorded: {}", self.session.id, stage, e);
        }
    }

    async fn execute(&mut self, raw: &str) -> Result<(), PipelineError> {
        self.enter(SessionStage::Validating);
        self.out.status("[1/3] Validating required fields ⚙️");
        let request = JobRequest::parse(raw)?;
        self.out.status("Success: Received all required fields");
        request.validate_manifest()?;
        self.verify_captcha(&request).await?;

        let out = self.out.clone();
        let permit = self
            .ctx
            .queue
            .admit(|position| {
                out.status(format!("Waiting for a free slot (position {})", position));
            })
            .await;
        self.permit = Some(permit);

        self.enter(SessionStage::Authenticating);
        self.out.status("Validating FTP Credentials");
        let endpoint = Endpoint::parse(&request.ftpinfo, self.ctx.config.transfer.default_port)
            .map_err(PipelineError::Auth)?;
        let mut client = self
            .ctx
            .connector
            .connect(&endpoint, &request.password)
            .await
            .map_err(PipelineError::Auth)?;
        info!(
            "[{}] Logged in to {} as {} over {}",
            self.session.id,
            endpoint.socket_addr(),
            endpoint.username,
            client.transport_type()
        );

        self.enter(SessionStage::DirectoryCheck);
        self.out.status("Validating upload directory");
        client.list(None).await.map_err(PipelineError::Transfer)?;
        client
            .cd(&request.upload_directory)
            .await
            .map_err(|source| PipelineError::Path {
                path: request.upload_directory.clone(),
                source,
            })?;
        self.out.status("Success: Upload directory exists");

        self.enter(SessionStage::Resolving);
        self.out.status("[2/3] Download Composer Package 📦");
        self.resolve(&request).await?;

        self.enter(SessionStage::Uploading);
        self.out.status("[3/3] Uploading to FTP 📡");
        self.upload(client.as_mut()).await?;

        if let Err(e) = client.quit().await {
            warn!("[{}] QUIT failed after upload: {}", self.session.id, e);
        }
        Ok(())
    }

    async fn verify_captcha(&self, request: &JobRequest) -> Result<(), ValidationError> {
        let Some(verifier) = &self.ctx.captcha else {
            return Ok(());
        };
        let token = request.captcha.as_deref().unwrap_or_default();
        if token.is_empty() || !verifier.verify(token, self.session.remote_addr.ip()).await {
            return Err(ValidationError::CaptchaRejected);
        }
        Ok(())
    }

    async fn resolve(&self, request: &JobRequest) -> Result<(), PipelineError> {
        let scratch = &self.session.scratch_dir;
        self.ctx
            .resolver
            .write_manifest(scratch, &request.manifest)
            .await
            .map_err(|e| PipelineError::Internal(format!("Failed to write manifest: {}", e)))?;

        let registry = &self.ctx.registry;
        let id = self.session.id.as_str();
        let result = self
            .ctx
            .resolver
            .run(scratch, &self.out, |pid| registry.set_pid(id, Some(pid)))
            .await;
        registry.set_pid(id, None);
        Ok(result?)
    }

    async fn upload(&self, client: &mut dyn TransferClient) -> Result<(), PipelineError> {
        let scratch = &self.session.scratch_dir;
        let total = dirsize::size_async(scratch)
            .await
            .map_err(|e| PipelineError::Internal(format!("Failed to size {:?}: {}", scratch, e)))?;
        debug!("[{}] Uploading {} bytes from {:?}", self.session.id, total, scratch);

        client.track_progress(Some(progress_reporter(self.out.clone(), total)));
        let result = client.upload_from_dir(scratch).await;
        client.track_progress(None);
        result.map_err(PipelineError::Transfer)
    }
}

/// Progress line for one tick against a directory of `total` bytes
pub fn format_progress(progress: &TransferProgress, total: u64) -> String {
    let percent = if total == 0 {
        100.0
    } else {
        progress.bytes_overall as f64 / total as f64 * 100.0
    };
    format!(
        "Uploaded {} bytes so far - {} Uploaded {:.0}%",
        progress.bytes, progress.name, percent
    )
}

/// Callback relaying upload progress to the client. Zero-byte ticks are dropped.
pub fn progress_reporter(out: StatusSender, total: u64) -> ProgressCallback {
    Box::new(move |progress: TransferProgress| {
        if progress.bytes == 0 {
            return;
        }
        out.status(format_progress(&progress, total));
    })
}

async fn remove_scratch(session: &Session) {
    match tokio::fs::remove_dir_all(&session.scratch_dir).await {
        Ok(()) => debug!("[{}] Removed {:?}", session.id, session.scratch_dir),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            "[{}] Failed to remove {:?}: {}",
            session.id, session.scratch_dir, e
        ),
    }
}

/// Release everything a session holds. Safe to call more than once.
pub async fn teardown(ctx: &PipelineContext, session: &Session) {
    remove_scratch(session).await;
    if let Some(state) = ctx.registry.remove(&session.id) {
        info!(
            "[{}] Session closed after {}s ({})",
            session.id,
            state.duration_secs(),
            state.stage
        );
    }
}
