use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::info;

use crate::domain::{Params, TaskType};
use crate::error::{DispatchError, HandlerError, RegistrationError, TaskError};
use crate::observability::HandlerStatsSnapshot;

/// A component that performs the actual work for one or more task types.
///
/// Handlers are shared by all workers and may be invoked concurrently; any
/// internal state (caches, connections) must carry its own synchronization.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Called once at registration. An error rejects the registration.
    async fn initialize(&self) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Task types this handler claims when registered with
    /// [`TaskRoutes::Capabilities`].
    fn capabilities(&self) -> Vec<TaskType> {
        Vec::new()
    }

    async fn execute(
        &self,
        task_type: &TaskType,
        params: &Params,
    ) -> Result<serde_json::Value, HandlerError>;
}

/// Which task types a handler serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRoutes {
    /// An explicit list of task types.
    Exact(Vec<TaskType>),
    /// Every task type starting with this prefix. An empty prefix is a catch-all.
    Prefix(String),
    /// Whatever the handler reports from `capabilities()`.
    Capabilities,
}

impl TaskRoutes {
    pub fn exact<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TaskRoutes::Exact(types.into_iter().map(TaskType::new).collect())
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        TaskRoutes::Prefix(prefix.into())
    }
}

/// Routes after `Capabilities` has been expanded.
#[derive(Debug, Clone)]
enum ResolvedRoutes {
    Exact(Vec<TaskType>),
    Prefix(String),
}

#[derive(Debug, Default)]
struct HandlerStats {
    executed: AtomicU64,
    failed: AtomicU64,
    total_micros: AtomicU64,
}

impl HandlerStats {
    fn record(&self, elapsed: Duration, ok: bool) {
        self.executed.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }
}

/// A handler accepted by the registry, with its name and counters.
pub struct RegisteredHandler {
    name: String,
    handler: Arc<dyn TaskHandler>,
    stats: HandlerStats,
}

impl fmt::Debug for RegisteredHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredHandler")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl RegisteredHandler {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the handler, optionally bounded by `timeout`.
    ///
    /// A timed-out call is dropped at its next suspension point.
    pub(crate) async fn run(
        &self,
        task_type: &TaskType,
        params: &Params,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value, TaskError> {
        let started = Instant::now();
        let call = self.handler.execute(task_type, params);
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result.map_err(|error| self.handler_error(error)),
                Err(_) => Err(TaskError::timed_out(&self.name, limit)),
            },
            None => call.await.map_err(|error| self.handler_error(error)),
        };
        self.stats.record(started.elapsed(), outcome.is_ok());
        outcome
    }

    /// Count a call that never returned (it panicked or was aborted).
    pub(crate) fn record_failure(&self, elapsed: Duration) {
        self.stats.record(elapsed, false);
    }

    fn handler_error(&self, error: HandlerError) -> TaskError {
        TaskError::Handler {
            handler: self.name.clone(),
            error,
        }
    }

    pub fn stats(&self) -> HandlerStatsSnapshot {
        let executed = self.stats.executed.load(Ordering::Relaxed);
        let total_micros = self.stats.total_micros.load(Ordering::Relaxed);
        let avg_execution_ms = if executed == 0 {
            0.0
        } else {
            total_micros as f64 / executed as f64 / 1000.0
        };
        HandlerStatsSnapshot {
            name: self.name.clone(),
            tasks_executed: executed,
            errors_count: self.stats.failed.load(Ordering::Relaxed),
            avg_execution_ms,
        }
    }
}

/// Registry of handlers (task_type -> handler).
///
/// Design:
/// - Exact routes win over prefixes; among prefixes the longest match wins.
/// - Cloning is cheap (handlers are shared), which lets the scheduler swap
///   in a new registry without pausing workers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<RegisteredHandler>>,
    exact: HashMap<TaskType, usize>,
    prefixes: Vec<(String, usize)>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize `handler` and register it under `name`.
    ///
    /// Routes are checked before initialization so a conflicting handler is
    /// never initialized. On any error the registry is unchanged.
    pub async fn register(
        &mut self,
        name: impl Into<String>,
        routes: TaskRoutes,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), RegistrationError> {
        let name = name.into();
        let routes = self.check(&name, routes, handler.as_ref())?;
        initialize(&name, handler.as_ref()).await?;
        self.insert(name, routes, handler);
        Ok(())
    }

    /// Validate a registration without touching the registry.
    fn check(
        &self,
        name: &str,
        routes: TaskRoutes,
        handler: &dyn TaskHandler,
    ) -> Result<ResolvedRoutes, RegistrationError> {
        if self.handlers.iter().any(|h| h.name == name) {
            return Err(RegistrationError::DuplicateName(name.to_string()));
        }

        let routes = match routes {
            TaskRoutes::Exact(types) => ResolvedRoutes::Exact(types),
            TaskRoutes::Capabilities => ResolvedRoutes::Exact(handler.capabilities()),
            TaskRoutes::Prefix(prefix) => ResolvedRoutes::Prefix(prefix),
        };

        match &routes {
            ResolvedRoutes::Exact(types) => {
                if types.is_empty() {
                    return Err(RegistrationError::NoRoutes {
                        name: name.to_string(),
                    });
                }
                if let Some((task_type, idx)) = types
                    .iter()
                    .find_map(|t| self.exact.get(t).map(|idx| (t, *idx)))
                {
                    return Err(RegistrationError::RouteConflict {
                        task_type: task_type.to_string(),
                        owner: self.handlers[idx].name.clone(),
                    });
                }
            }
            ResolvedRoutes::Prefix(prefix) => {
                if let Some((_, idx)) = self.prefixes.iter().find(|(p, _)| p == prefix) {
                    return Err(RegistrationError::RouteConflict {
                        task_type: format!("{prefix}*"),
                        owner: self.handlers[*idx].name.clone(),
                    });
                }
            }
        }

        Ok(routes)
    }

    fn insert(
        &mut self,
        name: String,
        routes: ResolvedRoutes,
        handler: Arc<dyn TaskHandler>,
    ) {
        let idx = self.handlers.len();
        match &routes {
            ResolvedRoutes::Exact(types) => {
                for t in types {
                    self.exact.insert(t.clone(), idx);
                }
            }
            ResolvedRoutes::Prefix(prefix) => {
                self.prefixes.push((prefix.clone(), idx));
                // longest prefix first
                self.prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
            }
        }
        info!(handler = %name, routes = ?routes, "registered handler");
        self.handlers.push(Arc::new(RegisteredHandler {
            name,
            handler,
            stats: HandlerStats::default(),
        }));
    }

    /// Find the handler responsible for `task_type`.
    pub fn resolve(&self, task_type: &TaskType) -> Result<Arc<RegisteredHandler>, DispatchError> {
        let idx = self.exact.get(task_type).copied().or_else(|| {
            self.prefixes
                .iter()
                .find(|(prefix, _)| task_type.as_str().starts_with(prefix.as_str()))
                .map(|(_, idx)| *idx)
        });

        idx.map(|idx| Arc::clone(&self.handlers[idx]))
            .ok_or_else(|| DispatchError(task_type.clone()))
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers.iter().map(|h| h.name.clone()).collect()
    }

    pub fn stats(&self) -> Vec<HandlerStatsSnapshot> {
        self.handlers.iter().map(|h| h.stats()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

async fn initialize(name: &str, handler: &dyn TaskHandler) -> Result<(), RegistrationError> {
    handler
        .initialize()
        .await
        .map_err(|source| RegistrationError::InitializationFailed {
            name: name.to_string(),
            source,
        })
}
