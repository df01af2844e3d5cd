use serde::{Deserialize, Serialize};

/// Point-in-time scheduler counts.
///
/// Each count is read separately, so under concurrent activity the numbers
/// are individually accurate but not a transactional snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerMetrics {
    pub active_tasks: usize,
    pub queued_tasks: usize,
    pub completed_tasks: usize,
    /// Configured pool size.
    pub max_concurrent: usize,
    /// Workers currently spawned (0 while stopped).
    pub worker_count: usize,
    pub running: bool,
    pub plugins_registered: usize,
}

/// Per-handler execution counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerStatsSnapshot {
    pub name: String,
    pub tasks_executed: u64,
    pub errors_count: u64,
    pub avg_execution_ms: f64,
}

/// What `stop` had to do to bring the pool down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopReport {
    /// In-flight tasks marked CANCELLED.
    pub cancelled_tasks: usize,
    /// Workers that did not finish within the shutdown timeout.
    pub aborted_workers: usize,
}
