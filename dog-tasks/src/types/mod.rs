pub mod ids;
pub mod priority;
pub mod task;
pub mod worker;
pub mod events;
pub mod stats;

pub use ids::{TaskId, WorkerId};
pub use priority::TaskPriority;
pub use task::{Task, TaskStatus, EnqueueOptions};
pub use worker::{WorkerRegistration, WorkerOptions};
pub use events::QueueEvent;
pub use stats::QueueStats;
