pub mod metrics;
pub mod layer;
pub mod tracing;

pub use metrics::{QueueMetrics, MetricsSnapshot, PerformanceMetrics};
pub use layer::ObservabilityLayer;

#[cfg(feature = "tracing-basic")]
pub use self::tracing::{init_tracing, init_json_tracing};
