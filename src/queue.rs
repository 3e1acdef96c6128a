//! Admission queue
//!
//! Bounded concurrency for sessions. When enabled, a session waits for a
//! permit before doing any remote work and holds it until it ends.

use log::debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::QueueConfig;

/// Slot held by a running session; released on drop
pub struct AdmissionPermit {
    _permit: Option<OwnedSemaphorePermit>,
}

/// Semaphore-backed admission control
pub struct AdmissionQueue {
    semaphore: Arc<Semaphore>,
    waiting: AtomicUsize,
    enabled: bool,
    max_concurrent: usize,
}

impl AdmissionQueue {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            waiting: AtomicUsize::new(0),
            enabled: config.queue_when_resources,
            max_concurrent: config.max_concurrent,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Sessions currently holding a slot
    pub fn running(&self) -> usize {
        self.max_concurrent - self.semaphore.available_permits()
    }

    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Take a slot without waiting, if one is free
    pub fn try_admit(&self) -> Option<AdmissionPermit> {
        if !self.enabled {
            return Some(AdmissionPermit { _permit: None });
        }
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|p| AdmissionPermit { _permit: Some(p) })
    }

    /// Wait for a slot. `on_wait` is called once with the queue position
    /// when the session has to wait.
    pub async fn admit(&self, on_wait: impl FnOnce(usize)) -> AdmissionPermit {
        if let Some(permit) = self.try_admit() {
            return permit;
        }

        let position = self.waiting.fetch_add(1, Ordering::SeqCst) + 1;
        let _waiting = WaitingGuard(&self.waiting);
        debug!("Session queued at position {}", position);
        on_wait(position);

        let permit = self.semaphore.clone().acquire_owned().await;
        // The semaphore is never closed
        AdmissionPermit { _permit: permit.ok() }
    }
}

/// Leaves the waiting count when admitted or when the wait is abandoned
struct WaitingGuard<'a>(&'a AtomicUsize);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
