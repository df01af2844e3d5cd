//! Scheduler: owns the queue, the stores, the registry and the worker pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::builder::SchedulerBuilder;
use crate::config::SchedulerConfig;
use crate::domain::{Params, Priority, Task, TaskId, TaskType};
use crate::error::SpindleError;
use crate::observability::{HandlerStatsSnapshot, SchedulerMetrics, StopReport};
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};
use crate::queue::PriorityQueue;
use crate::registry::{HandlerRegistry, TaskHandler, TaskRoutes};
use crate::store::TaskStore;
use crate::worker::{SharedRegistry, WorkerContext, WorkerGroup, current_registry};


/// In-process task scheduler.
///
/// Share it behind an `Arc`: every method takes `&self`, and `submit`,
/// `get_status` and `get_metrics` may be called from any number of callers
/// while workers run.
///
/// Dropping the scheduler without `stop` lets workers finish their current
/// task and exit; tasks still in flight are not marked CANCELLED.
pub struct Scheduler {
    config: SchedulerConfig,
    queue: Arc<PriorityQueue>,
    store: Arc<TaskStore>,
    registry: SharedRegistry,
    /// Serializes registrations (each one awaits the handler's initialize).
    registration: Mutex<()>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    /// Serializes start/stop.
    workers: Mutex<Option<WorkerGroup>>,
    running: AtomicBool,
}

impl Scheduler {
    /// Scheduler with the wall clock and ULID ids.
    pub fn new(config: SchedulerConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self::with_ports(config, clock, ids)
    }

    pub fn with_ports(
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self::from_parts(config, clock, ids, HandlerRegistry::new())
    }

    pub(crate) fn from_parts(
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        registry: HandlerRegistry,
    ) -> Self {
        Self {
            config,
            queue: Arc::new(PriorityQueue::new()),
            store: Arc::new(TaskStore::new()),
            registry: Arc::new(RwLock::new(Arc::new(registry))),
            registration: Mutex::new(()),
            clock,
            ids,
            workers: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Initialize `handler` and route `routes` to it.
    ///
    /// Allowed while running: workers pick up the new registry on their next
    /// dispatch.
    pub async fn register_handler(
        &self,
        name: impl Into<String>,
        routes: TaskRoutes,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), SpindleError> {
        let _guard = self.registration.lock().await;
        let mut next = (*current_registry(&self.registry)).clone();
        next.register(name, routes, handler).await?;
        *self.registry.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(next);
        Ok(())
    }

    /// Queue a task. Never waits on execution.
    pub fn submit(
        &self,
        task_type: impl Into<String>,
        params: Params,
        priority: Priority,
    ) -> Result<TaskId, SpindleError> {
        let task_type = TaskType::parse(task_type)?;
        let id = self.ids.generate_task_id();
        let task = Task::create(id, task_type, params, priority, self.clock.now());
        debug!(task_id = %id, task_type = %task.task_type(), %priority, "task submitted");
        self.queue.enqueue(task);
        Ok(id)
    }

    /// Snapshot of a task, wherever it currently is.
    ///
    /// Looks in pipeline order (queue, active, completed) so a task moving
    /// forward concurrently is still found.
    pub fn get_status(&self, task_id: TaskId) -> Option<Task> {
        self.queue
            .get(task_id)
            .or_else(|| self.store.get(task_id))
    }

    pub fn get_metrics(&self) -> SchedulerMetrics {
        let registry = current_registry(&self.registry);
        SchedulerMetrics {
            active_tasks: self.store.active_count(),
            queued_tasks: self.queue.len(),
            completed_tasks: self.store.completed_count(),
            max_concurrent: self.config.resolved_workers(),
            worker_count: self.worker_count(),
            running: self.is_running(),
            plugins_registered: registry.len(),
        }
    }

    /// Would a task of this type find a handler right now?
    pub fn resolves(&self, task_type: &TaskType) -> bool {
        current_registry(&self.registry).resolve(task_type).is_ok()
    }

    pub fn handler_stats(&self) -> Vec<HandlerStatsSnapshot> {
        current_registry(&self.registry).stats()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn worker_count(&self) -> usize {
        if self.is_running() {
            self.config.resolved_workers()
        } else {
            0
        }
    }

    /// Spawn the worker pool. Errors if it is already running.
    pub async fn start(&self) -> Result<(), SpindleError> {
        let mut workers = self.workers.lock().await;
        if workers.is_some() {
            return Err(SpindleError::AlreadyRunning);
        }

        let n = self.config.resolved_workers();
        let ctx = Arc::new(WorkerContext {
            queue: Arc::clone(&self.queue),
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            clock: Arc::clone(&self.clock),
            dequeue_timeout: self.config.dequeue_timeout(),
            task_timeout: self.config.task_timeout(),
        });
        *workers = Some(WorkerGroup::spawn(n, ctx));
        self.running.store(true, Ordering::Release);

        info!(workers = n, queued = self.queue.len(), "scheduler started");
        Ok(())
    }

    /// Stop the worker pool.
    ///
    /// Idle workers exit after their current dequeue attempt; busy ones get
    /// `shutdown_timeout` to finish and are then aborted. Tasks still active
    /// afterwards are marked CANCELLED. Queued tasks stay queued for the next
    /// `start`. Calling `stop` on a stopped scheduler does nothing.
    pub async fn stop(&self) -> StopReport {
        let mut workers = self.workers.lock().await;
        let Some(group) = workers.take() else {
            return StopReport::default();
        };
        self.running.store(false, Ordering::Release);

        let aborted_workers = group
            .shutdown_and_join(self.config.shutdown_timeout())
            .await;
        let cancelled = self.store.cancel_active(self.clock.now());
        for task_id in &cancelled {
            info!(%task_id, "cancelled in-flight task");
        }

        let report = StopReport {
            cancelled_tasks: cancelled.len(),
            aborted_workers,
        };
        info!(
            cancelled = report.cancelled_tasks,
            aborted = report.aborted_workers,
            queued = self.queue.len(),
            "scheduler stopped"
        );
        report
    }
}
