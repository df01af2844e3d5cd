//! SchedulerBuilder: wiring plus fail-fast validation at startup.

use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::domain::TaskType;
use crate::error::RegistrationError;
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};
use crate::registry::{HandlerRegistry, TaskHandler, TaskRoutes};
use crate::scheduler::Scheduler;

/// Builds a [`Scheduler`] with its handlers already registered.
///
/// ```ignore
/// let scheduler = Scheduler::builder()
///     .config(config)
///     .handler("defi", TaskRoutes::prefix("defi."), Arc::new(DefiHandler::new()))
///     .expect_task_types(&["defi.metrics", "defi.yield"])
///     .build()
///     .await?;
/// ```
///
/// `build` fails if any handler fails to register, or if a task type passed
/// to `expect_task_types` would not resolve to a handler.
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    handlers: Vec<(String, TaskRoutes, Arc<dyn TaskHandler>)>,
    expected_task_types: Option<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error("Missing task types: {0:?}. These tasks were expected but no handler resolves them.")]
    MissingTaskTypes(Vec<String>),
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
            clock: None,
            ids: None,
            handlers: Vec::new(),
            expected_task_types: None,
        }
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Queue a handler for registration at `build` time, in call order.
    pub fn handler(
        mut self,
        name: impl Into<String>,
        routes: TaskRoutes,
        handler: Arc<dyn TaskHandler>,
    ) -> Self {
        self.handlers.push((name.into(), routes, handler));
        self
    }

    pub fn expect_task_types(mut self, task_types: &[&str]) -> Self {
        self.expected_task_types = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub async fn build(self) -> Result<Scheduler, BuildError> {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));

        let mut registry = HandlerRegistry::new();
        for (name, routes, handler) in self.handlers {
            registry.register(name, routes, handler).await?;
        }

        if let Some(expected) = &self.expected_task_types {
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| registry.resolve(&TaskType::new(t.as_str())).is_err())
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing));
            }
        }

        Ok(Scheduler::from_parts(self.config, clock, ids, registry))
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::domain::{Params, Priority};
    use crate::error::HandlerError;
    use crate::ports::FixedClock;

    struct Noop;

    #[async_trait]
    impl TaskHandler for Noop {
        async fn execute(
            &self,
            _task_type: &TaskType,
            _params: &Params,
        ) -> Result<serde_json::Value, HandlerError> {
            Ok(serde_json::Value::Null)
        }
    }

    #[tokio::test]
    async fn test_build_success() {
        let scheduler = SchedulerBuilder::new()
            .handler("defi", TaskRoutes::prefix("defi."), Arc::new(Noop))
            .expect_task_types(&["defi.metrics", "defi.yield"])
            .build()
            .await
            .unwrap();
        assert_eq!(scheduler.get_metrics().plugins_registered, 1);
    }

    #[tokio::test]
    async fn test_build_missing_task_types() {
        let result = SchedulerBuilder::new()
            .handler("defi", TaskRoutes::exact(["defi.metrics"]), Arc::new(Noop))
            .expect_task_types(&["defi.metrics", "health_check"])
            .build()
            .await;
        assert!(matches!(
            result,
            Err(BuildError::MissingTaskTypes(missing))
                if missing == vec!["health_check".to_string()]
        ));
    }

    #[tokio::test]
    async fn test_build_surfaces_registration_errors() {
        let result = SchedulerBuilder::new()
            .handler("a", TaskRoutes::exact(["x"]), Arc::new(Noop))
            .handler("b", TaskRoutes::exact(["x"]), Arc::new(Noop))
            .build()
            .await;
        assert!(matches!(
            result,
            Err(BuildError::Registration(RegistrationError::RouteConflict { .. }))
        ));
    }

    #[tokio::test]
    async fn test_build_uses_supplied_clock() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let scheduler = SchedulerBuilder::new()
            .clock(Arc::new(FixedClock::new(t0)))
            .build()
            .await
            .unwrap();

        let id = scheduler.submit("anything", Params::new(), Priority::Low).unwrap();
        let task = scheduler.get_status(id).unwrap();
        assert_eq!(task.created_at(), t0);
        assert_eq!(id.as_ulid().timestamp_ms(), t0.timestamp_millis() as u64);
    }
}
