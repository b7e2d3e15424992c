use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Cumulative counters for queue operations
#[derive(Default)]
pub struct QueueMetrics {
    tasks_enqueued: AtomicU64,
    tasks_dequeued: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_retried: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_dead_lettered: AtomicU64,
    tasks_cancelled: AtomicU64,
    tasks_timed_out: AtomicU64,
    tasks_reclaimed: AtomicU64,

    // Per-task-type execution times
    performance: Arc<RwLock<PerformanceMetrics>>,
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_enqueued(&self) {
        self.tasks_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_dequeued(&self) {
        self.tasks_dequeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_retried(&self) {
        self.tasks_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failed(&self, dead_lettered: bool) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        if dead_lettered {
            self.tasks_dead_lettered.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn increment_cancelled(&self) {
        self.tasks_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_timed_out(&self) {
        self.tasks_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_reclaimed(&self) {
        self.tasks_reclaimed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record execution time for a task type
    pub fn record_execution_time(&self, task_type: &str, duration: Duration) {
        self.performance.write().record_execution_time(task_type, duration);
    }

    pub fn performance_metrics(&self) -> PerformanceMetrics {
        self.performance.read().clone()
    }

    /// Collect current snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            tasks_enqueued: self.tasks_enqueued.load(Ordering::Relaxed),
            tasks_dequeued: self.tasks_dequeued.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_retried: self.tasks_retried.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_dead_lettered: self.tasks_dead_lettered.load(Ordering::Relaxed),
            tasks_cancelled: self.tasks_cancelled.load(Ordering::Relaxed),
            tasks_timed_out: self.tasks_timed_out.load(Ordering::Relaxed),
            tasks_reclaimed: self.tasks_reclaimed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of counters at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub tasks_enqueued: u64,
    pub tasks_dequeued: u64,
    pub tasks_completed: u64,
    pub tasks_retried: u64,
    pub tasks_failed: u64,
    pub tasks_dead_lettered: u64,
    pub tasks_cancelled: u64,
    pub tasks_timed_out: u64,
    pub tasks_reclaimed: u64,
}

impl MetricsSnapshot {
    /// Calculate overall success rate
    pub fn success_rate(&self) -> f64 {
        let total_processed = self.tasks_completed + self.tasks_failed;
        if total_processed == 0 {
            100.0
        } else {
            (self.tasks_completed as f64 / total_processed as f64) * 100.0
        }
    }

    /// Calculate overall retry rate
    pub fn retry_rate(&self) -> f64 {
        if self.tasks_enqueued == 0 {
            0.0
        } else {
            (self.tasks_retried as f64 / self.tasks_enqueued as f64) * 100.0
        }
    }
}

/// Performance metrics for task execution
#[derive(Debug, Clone, Default)]
pub struct PerformanceMetrics {
    execution_times: HashMap<String, Vec<Duration>>,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record execution time for a task type
    pub fn record_execution_time(&mut self, task_type: &str, duration: Duration) {
        let times = self.execution_times.entry(task_type.to_string()).or_default();
        times.push(duration);

        // Keep only last 1000 measurements per task type
        if times.len() > 1000 {
            times.remove(0);
        }
    }

    /// Get average execution time for a task type
    pub fn average_execution_time(&self, task_type: &str) -> Option<Duration> {
        let times = self.execution_times.get(task_type)?;
        if times.is_empty() {
            return None;
        }

        let total: Duration = times.iter().sum();
        Some(total / times.len() as u32)
    }

    /// Get percentile execution time for a task type
    pub fn percentile_execution_time(&self, task_type: &str, percentile: f64) -> Option<Duration> {
        let times = self.execution_times.get(task_type)?;
        if times.is_empty() {
            return None;
        }

        let mut sorted_times = times.clone();
        sorted_times.sort();

        let index = ((percentile / 100.0) * (sorted_times.len() - 1) as f64).round() as usize;
        sorted_times.get(index).cloned()
    }

    /// Get all task types with performance data
    pub fn task_types(&self) -> Vec<String> {
        self.execution_times.keys().cloned().collect()
    }
}
