//! In-process stores. Each one guards its state with a single `parking_lot`
//! lock; cross-store atomicity is the queue service's job.

pub mod task_store;
pub mod priority_index;
pub mod worker_registry;
pub mod result_cache;

pub use task_store::MemoryTaskStore;
pub use priority_index::MemoryPriorityIndex;
pub use worker_registry::MemoryWorkerRegistry;
pub use result_cache::MemoryResultCache;
