//! Domain model: task identity, priority, status and the task record.

pub mod ids;
pub mod priority;
pub mod state;
pub mod task;

pub use ids::TaskId;
pub use priority::Priority;
pub use state::TaskStatus;
pub use task::{Params, Task, TaskType};
