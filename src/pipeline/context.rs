//! Shared collaborators of every session pipeline

use std::sync::Arc;

use crate::captcha::{CaptchaVerifier, RecaptchaVerifier};
use crate::config::Config;
use crate::queue::AdmissionQueue;
use crate::resolver::ResolverRunner;
use crate::session::SessionRegistry;
use crate::transfer::{FtpConnector, TransferConnector};

/// Everything a pipeline needs besides its own session
pub struct PipelineContext {
    pub config: Arc<Config>,
    pub registry: SessionRegistry,
    pub connector: Arc<dyn TransferConnector>,
    pub resolver: ResolverRunner,
    pub queue: AdmissionQueue,
    pub captcha: Option<Arc<dyn CaptchaVerifier>>,
}

impl PipelineContext {
    /// Production wiring: FTP transfers, reCAPTCHA when enabled
    pub fn new(config: Config) -> Self {
        let connector: Arc<dyn TransferConnector> = Arc::new(FtpConnector::new(&config.transfer));
        let captcha: Option<Arc<dyn CaptchaVerifier>> = if config.captcha.enabled {
            Some(Arc::new(RecaptchaVerifier::new(&config.captcha)))
        } else {
            None
        };
        Self::with_connector(config, connector).with_captcha(captcha)
    }

    /// Wire a custom transfer connector
    pub fn with_connector(config: Config, connector: Arc<dyn TransferConnector>) -> Self {
        Self {
            registry: SessionRegistry::new(),
            resolver: ResolverRunner::new(config.resolver.clone()),
            queue: AdmissionQueue::new(&config.queue),
            connector,
            captcha: None,
            config: Arc::new(config),
        }
    }

    pub fn with_captcha(mut self, captcha: Option<Arc<dyn CaptchaVerifier>>) -> Self {
        self.captcha = captcha;
        self
    }
}
