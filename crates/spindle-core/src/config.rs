use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Scheduler configuration. Every field has a default, so a partial
/// document (or `{}`) deserializes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of workers. 0 = available parallelism.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// How long an idle worker waits on the queue before re-checking for shutdown.
    #[serde(default = "default_dequeue_timeout_ms")]
    pub dequeue_timeout_ms: u64,
    /// How long `stop` waits for busy workers before aborting them.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    /// Per-task execution limit. None = unbounded.
    #[serde(default)]
    pub task_timeout_ms: Option<u64>,
}

fn default_max_concurrent() -> usize {
    10
}

fn default_dequeue_timeout_ms() -> u64 {
    1000
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            dequeue_timeout_ms: default_dequeue_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            task_timeout_ms: None,
        }
    }
}

impl SchedulerConfig {
    /// Resolve worker count (0 means use available parallelism).
    pub fn resolved_workers(&self) -> usize {
        if self.max_concurrent == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.max_concurrent
        }
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms.map(Duration::from_millis)
    }
}
