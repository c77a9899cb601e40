use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Process-wide limit on in-flight backend queries.
///
/// One instance is built at startup and shared by every probe, so the total
/// load on the query API stays bounded no matter how many scrapers are active.
/// Each probe additionally gets its own [`RequestScope`] limiting its own
/// fan-out (the `parallel` query parameter).
#[derive(Debug, Clone)]
pub struct ConcurrencyController {
    global: Arc<Semaphore>,
    limit: usize,
    default_parallel: usize,
}

impl ConcurrencyController {
    pub fn new(limit: usize, default_parallel: usize) -> Self {
        let limit = limit.max(1);
        Self {
            global: Arc::new(Semaphore::new(limit)),
            limit,
            default_parallel: default_parallel.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn available_permits(&self) -> usize {
        self.global.available_permits()
    }

    pub fn request_scope(&self, parallel: Option<usize>) -> RequestScope {
        let size = parallel.unwrap_or(self.default_parallel).max(1);
        RequestScope {
            global: self.global.clone(),
            local: Arc::new(Semaphore::new(size)),
        }
    }
}

/// Per-probe limiter layered on top of the global one.
#[derive(Debug, Clone)]
pub struct RequestScope {
    global: Arc<Semaphore>,
    local: Arc<Semaphore>,
}

/// Held for the duration of one backend query; both slots are released on drop,
/// including when the holding task unwinds.
#[derive(Debug)]
pub struct QueryPermit {
    _local: OwnedSemaphorePermit,
    _global: OwnedSemaphorePermit,
}

impl RequestScope {
    /// Waits for a request slot first so that a probe queued behind its own
    /// limit does not sit on a global slot.
    pub async fn acquire(&self) -> Result<QueryPermit, AcquireError> {
        let local = self.local.clone().acquire_owned().await?;
        let global = self.global.clone().acquire_owned().await?;
        Ok(QueryPermit {
            _local: local,
            _global: global,
        })
    }
}
