//! Per-service concurrency ceilings.

use nimbus_core::config::ExecutionConfig;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Bounds in-flight calls per target service, across every session.
///
/// Semaphores are created on first use with the configured ceiling.
#[derive(Debug)]
pub struct ServiceLimiter {
    config: ExecutionConfig,
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl ServiceLimiter {
    pub fn new(config: ExecutionConfig) -> Self {
        Self {
            config,
            semaphores: Mutex::new(HashMap::new()),
        }
    }

    fn semaphore(&self, service: &str) -> Arc<Semaphore> {
        let mut semaphores = self.semaphores.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(semaphores.entry(service.to_string()).or_insert_with(|| {
            Arc::new(Semaphore::new(self.config.concurrency_for(service).max(1)))
        }))
    }

    /// Wait for a slot for `service`.
    pub async fn acquire(&self, service: &str) -> Result<OwnedSemaphorePermit, AcquireError> {
        self.semaphore(service).acquire_owned().await
    }

    /// Free slots for `service` right now.
    pub fn available(&self, service: &str) -> usize {
        self.semaphore(service).available_permits()
    }
}
