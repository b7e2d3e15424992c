//! # dog-tasks: priority task queue for distributed workers
//!
//! Producers enqueue typed tasks with a priority; workers register the task
//! types they accept and claim work one task at a time.
//!
//! ## Guarantees
//!
//! - **Priority order**: higher priority first, FIFO among equals, per task type
//! - **At-most-once claim**: popping and marking `processing` are one atomic step
//! - **Retry with backoff**: retryable failures are re-indexed after
//!   `min(max_delay, base * 2^retry_count)`
//! - **Dead-lettering**: exhausted tasks are parked in `<prefix>:dlq` for inspection
//! - **Concurrency ceilings**: a [`Dispatcher`] never runs more than
//!   `max_concurrent` handlers at once
//! - **Result TTL**: completed results stay readable for the configured TTL
//!
//! ## Quick Start
//!
//! ```rust
//! use dog_tasks::prelude::*;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> QueueResult<()> {
//! let queue = QueueService::new(QueueConfig::default())?;
//!
//! let id = queue
//!     .enqueue("thumbnail", json!({"image": "cat.png"}), EnqueueOptions::new().with_priority(TaskPriority::High))
//!     .await?;
//!
//! if let Some(task) = queue.dequeue(&["thumbnail"]).await? {
//!     queue.complete(&task.id, json!({"thumb": "cat_small.png"})).await?;
//! }
//!
//! assert_eq!(queue.get_result(&id).await?, Some(json!({"thumb": "cat_small.png"})));
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod observability;
pub mod service;
pub mod sweeper;
pub mod types;

// Core API exports
pub use service::{BoxStream, QueueService};
pub use types::{
    EnqueueOptions, QueueEvent, QueueStats, Task, TaskId, TaskPriority, TaskStatus, WorkerId,
    WorkerOptions, WorkerRegistration,
};
pub use error::{HandlerError, QueueError, QueueResult};
pub use config::{QueueConfig, QueueKeys};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{Dispatcher, DispatcherHandle, DispatcherOptions, TaskHandler};
pub use sweeper::VisibilitySweeper;
pub use backend::{
    IndexEntry, PriorityIndex, QueueBackends, ResultCache, TaskStore, WorkerRegistry,
};

// Observability exports
pub use observability::{MetricsSnapshot, ObservabilityLayer, QueueMetrics};

#[cfg(feature = "tracing-basic")]
pub use observability::{init_json_tracing, init_tracing};

/// Everything needed to produce and consume tasks
pub mod prelude {
    // Queue and workers
    pub use crate::{
        Dispatcher, DispatcherHandle, DispatcherOptions, QueueService, TaskHandler,
        VisibilitySweeper,
    };

    // Essential types
    pub use crate::{
        EnqueueOptions, HandlerError, QueueConfig, QueueError, QueueEvent, QueueResult,
        QueueStats, Task, TaskId, TaskPriority, TaskStatus, WorkerId, WorkerOptions,
    };

    // Essential traits
    pub use async_trait::async_trait;
}
