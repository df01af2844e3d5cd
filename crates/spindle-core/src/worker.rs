use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{Instrument, debug, info_span, warn};

use crate::domain::Task;
use crate::error::TaskError;
use crate::ports::Clock;
use crate::queue::PriorityQueue;
use crate::registry::HandlerRegistry;
use crate::store::TaskStore;

/// The registry as seen by workers. Registration swaps in a new `Arc`;
/// workers read whichever one is current when they dispatch.
pub(crate) type SharedRegistry = Arc<RwLock<Arc<HandlerRegistry>>>;

pub(crate) fn current_registry(registry: &SharedRegistry) -> Arc<HandlerRegistry> {
    Arc::clone(&registry.read().unwrap_or_else(|e| e.into_inner()))
}

/// Everything a worker needs, shared by the whole group.
pub(crate) struct WorkerContext {
    pub(crate) queue: Arc<PriorityQueue>,
    pub(crate) store: Arc<TaskStore>,
    pub(crate) registry: SharedRegistry,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) dequeue_timeout: Duration,
    pub(crate) task_timeout: Option<Duration>,
}

/// Worker group handle.
/// - `request_shutdown()` stops every worker after its current dequeue attempt
/// - `shutdown_and_join()` waits (bounded) for all workers to exit
pub(crate) struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers.
    pub(crate) fn spawn(n: usize, ctx: Arc<WorkerContext>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let joins = (0..n)
            .map(|worker_id| {
                let ctx = Arc::clone(&ctx);
                let rx = shutdown_rx.clone();
                tokio::spawn(worker_loop(worker_id, ctx, rx))
            })
            .collect();

        Self { shutdown_tx, joins }
    }

    /// Request shutdown for all workers.
    /// In-flight handler calls are not interrupted here.
    pub(crate) fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers, aborting any still busy after
    /// `timeout`. Returns the number of aborted workers.
    pub(crate) async fn shutdown_and_join(self, timeout: Duration) -> usize {
        self.request_shutdown();
        let deadline = Instant::now() + timeout;

        let mut aborted = 0;
        for mut join in self.joins {
            if tokio::time::timeout_at(deadline, &mut join).await.is_err() {
                join.abort();
                let _ = join.await;
                aborted += 1;
            }
        }
        if aborted > 0 {
            warn!(aborted, "workers did not stop within {timeout:?}; aborted");
        }
        aborted
    }
}

async fn worker_loop(
    worker_id: usize,
    ctx: Arc<WorkerContext>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(worker_id, "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // dequeue may wait, so race it against shutdown
        let task = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    // sender dropped: the group is gone
                    break;
                }
                continue;
            }
            task = ctx.queue.dequeue_with(ctx.dequeue_timeout, |task| {
                // runs under the queue lock: Pending -> Running + active insert
                ctx.store.begin(task, ctx.clock.now())
            }) => task,
        };

        // timeout: nothing pending, go round and re-check shutdown
        let Some(task) = task else {
            continue;
        };

        execute(worker_id, &ctx, task).await;
    }
    debug!(worker_id, "worker stopped");
}

/// Run one task to a terminal state. Never panics on handler misbehaviour.
async fn execute(worker_id: usize, ctx: &WorkerContext, task: Task) {
    let span = info_span!(
        "task",
        task_id = %task.id(),
        task_type = %task.task_type(),
        priority = %task.priority(),
        worker = worker_id,
    );

    async {
        debug!("task started");
        let outcome = dispatch(ctx, &task).await;
        if let Err(err) = &outcome {
            warn!(error = %err, "task failed");
        }

        // active -> completed, whatever happened above
        match ctx.store.finish(task.id(), outcome, ctx.clock.now()) {
            Some(done) => debug!(status = ?done.status(), "task finished"),
            None => debug!("task was cancelled before it finished"),
        }
    }
    .instrument(span)
    .await
}

async fn dispatch(ctx: &WorkerContext, task: &Task) -> Result<serde_json::Value, TaskError> {
    let handler = current_registry(&ctx.registry).resolve(task.task_type())?;

    // A panicking handler only takes down its own tokio task.
    let started = std::time::Instant::now();
    let call = {
        let handler = Arc::clone(&handler);
        let task_type = task.task_type().clone();
        let params = task.params().clone();
        let timeout = ctx.task_timeout;
        AbortOnDrop(tokio::spawn(async move {
            handler.run(&task_type, &params, timeout).await
        }))
    };

    let joined = call.join().await;
    if joined.is_err() {
        // run() never got to record this call
        handler.record_failure(started.elapsed());
    }
    call_outcome(handler.name(), joined)
}

/// Map the joined handler call to the task outcome.
fn call_outcome(
    handler: &str,
    joined: Result<Result<serde_json::Value, TaskError>, JoinError>,
) -> Result<serde_json::Value, TaskError> {
    match joined {
        Ok(outcome) => outcome,
        Err(err) if err.is_panic() => Err(TaskError::Panicked {
            handler: handler.to_string(),
        }),
        Err(_) => Err(TaskError::Aborted {
            handler: handler.to_string(),
        }),
    }
}

/// Aborts the handler call if the worker itself is aborted mid-task.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> AbortOnDrop<T> {
    async fn join(mut self) -> Result<T, JoinError> {
        (&mut self.0).await
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;
    use ulid::Ulid;

    use super::*;
    use crate::domain::{Params, Priority, TaskId, TaskStatus, TaskType};
    use crate::error::HandlerError;
    use crate::ports::SystemClock;
    use crate::registry::{TaskHandler, TaskRoutes};

    struct Counting(AtomicUsize);

    #[async_trait]
    impl TaskHandler for Counting {
        async fn execute(
            &self,
            _task_type: &TaskType,
            _params: &Params,
        ) -> Result<serde_json::Value, HandlerError> {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "n": n }))
        }
    }

    struct Panicking;

    #[async_trait]
    impl TaskHandler for Panicking {
        async fn execute(
            &self,
            _task_type: &TaskType,
            _params: &Params,
        ) -> Result<serde_json::Value, HandlerError> {
            panic!("handler bug");
        }
    }

    async fn context() -> Arc<WorkerContext> {
        let mut registry = HandlerRegistry::new();
        registry
            .register(
                "count",
                TaskRoutes::exact(["count"]),
                Arc::new(Counting(AtomicUsize::new(0))),
            )
            .await
            .unwrap();
        registry
            .register("panic", TaskRoutes::exact(["panic"]), Arc::new(Panicking))
            .await
            .unwrap();

        Arc::new(WorkerContext {
            queue: Arc::new(PriorityQueue::new()),
            store: Arc::new(TaskStore::new()),
            registry: Arc::new(RwLock::new(Arc::new(registry))),
            clock: Arc::new(SystemClock),
            dequeue_timeout: Duration::from_millis(20),
            task_timeout: None,
        })
    }

    fn submit(ctx: &WorkerContext, task_type: &str) -> TaskId {
        let task = Task::create(
            TaskId::from_ulid(Ulid::new()),
            TaskType::new(task_type),
            Params::new(),
            Priority::Medium,
            ctx.clock.now(),
        );
        let id = task.id();
        ctx.queue.enqueue(task);
        id
    }

    async fn wait_terminal(ctx: &WorkerContext, id: TaskId) -> Task {
        for _ in 0..200 {
            if let Some(task) = ctx.store.get(id).filter(|t| t.is_terminal()) {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {id} did not finish");
    }

    #[tokio::test]
    async fn workers_drain_the_queue_and_stop_cleanly() {
        let ctx = context().await;
        let ids: Vec<_> = (0..5).map(|_| submit(&ctx, "count")).collect();

        let group = WorkerGroup::spawn(2, Arc::clone(&ctx));
        for id in &ids {
            assert_eq!(wait_terminal(&ctx, *id).await.status(), TaskStatus::Completed);
        }

        let aborted = group.shutdown_and_join(Duration::from_secs(1)).await;
        assert_eq!(aborted, 0);
        assert_eq!(ctx.store.completed_count(), 5);
        assert_eq!(ctx.store.active_count(), 0);
    }

    #[tokio::test]
    async fn panicking_handler_fails_the_task_but_not_the_worker() {
        let ctx = context().await;
        let bad = submit(&ctx, "panic");
        let good = submit(&ctx, "count");

        let group = WorkerGroup::spawn(1, Arc::clone(&ctx));

        let bad = wait_terminal(&ctx, bad).await;
        assert_eq!(bad.status(), TaskStatus::Failed);
        assert_eq!(bad.error(), Some(&TaskError::Panicked { handler: "panic".into() }));

        let good = wait_terminal(&ctx, good).await;
        assert_eq!(good.status(), TaskStatus::Completed);

        group.shutdown_and_join(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn panicked_call_is_counted_in_handler_stats() {
        let ctx = context().await;
        let id = submit(&ctx, "panic");

        let group = WorkerGroup::spawn(1, Arc::clone(&ctx));
        assert_eq!(wait_terminal(&ctx, id).await.status(), TaskStatus::Failed);
        group.shutdown_and_join(Duration::from_secs(1)).await;

        let stats = current_registry(&ctx.registry)
            .resolve(&TaskType::new("panic"))
            .unwrap()
            .stats();
        assert_eq!(stats.tasks_executed, 1);
        assert_eq!(stats.errors_count, 1);
    }

    #[tokio::test]
    async fn aborted_call_fails_with_aborted_not_cancelled() {
        let call = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, TaskError>(serde_json::Value::Null)
        });
        call.abort();
        let joined = call.await;

        assert_eq!(
            call_outcome("slow", joined),
            Err(TaskError::Aborted { handler: "slow".into() })
        );
    }

    #[tokio::test]
    async fn unresolved_type_fails_without_stopping_the_worker() {
        let ctx = context().await;
        let unknown = submit(&ctx, "unknown");
        let known = submit(&ctx, "count");

        let group = WorkerGroup::spawn(1, Arc::clone(&ctx));

        let unknown = wait_terminal(&ctx, unknown).await;
        assert_eq!(unknown.status(), TaskStatus::Failed);
        assert!(unknown.error().unwrap().to_string().contains("unknown"));
        assert_eq!(wait_terminal(&ctx, known).await.status(), TaskStatus::Completed);

        group.shutdown_and_join(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn idle_workers_exit_on_shutdown() {
        let ctx = context().await;
        let group = WorkerGroup::spawn(3, Arc::clone(&ctx));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let aborted = group.shutdown_and_join(Duration::from_millis(500)).await;
        assert_eq!(aborted, 0);
    }
}
