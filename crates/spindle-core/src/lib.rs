//! spindle-core
//!
//! In-process priority task scheduler.
//!
//! # Modules
//! - **domain**: task record, ids, priority, status lifecycle
//! - **ports**: Clock / IdGenerator seams
//! - **queue**: priority queue with blocking dequeue
//! - **registry**: TaskHandler trait and task-type routing
//! - **store**: active and completed task tables
//! - **scheduler**: the public surface (submit, get_status, metrics, start/stop)
//! - **builder**: SchedulerBuilder with fail-fast route checks

pub mod builder;
pub mod config;
pub mod domain;
pub mod error;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod store;

mod worker;

pub use builder::{BuildError, SchedulerBuilder};
pub use config::SchedulerConfig;
pub use domain::{Params, Priority, Task, TaskId, TaskStatus, TaskType};
pub use error::{
    DispatchError, ErrorKind, HandlerError, LifecycleError, RegistrationError, SpindleError,
    TaskError, ValidationError,
};
pub use observability::{HandlerStatsSnapshot, SchedulerMetrics, StopReport};
pub use registry::{HandlerRegistry, RegisteredHandler, TaskHandler, TaskRoutes};
pub use scheduler::Scheduler;
