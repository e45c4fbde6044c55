use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Admits one expensive job at a time. A caller that finds the gate taken
/// is turned away rather than queued.
#[derive(Debug, Clone)]
pub struct JobGate {
    permits: Arc<Semaphore>,
}

/// Held for the duration of a job; dropping it reopens the gate.
#[derive(Debug)]
pub struct JobTicket {
    _permit: OwnedSemaphorePermit,
}

impl JobGate {
    pub fn new() -> Self {
        Self { permits: Arc::new(Semaphore::new(1)) }
    }

    pub fn try_enter(&self) -> Option<JobTicket> {
        self.permits
        .clone()
        .try_acquire_owned()
        .ok()
        .map(|permit| JobTicket { _permit: permit })
    }

    pub fn is_busy(&self) -> bool {
        self.permits.available_permits() == 0
    }
}

impl Default for JobGate {
    fn default() -> Self {
        Self::new()
    }
}
