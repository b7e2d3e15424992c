use std::collections::{BTreeSet, HashMap};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_core::Stream;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    backend::{IndexEntry, QueueBackends},
    clock::{Clock, SystemClock},
    config::{QueueConfig, QueueKeys},
    observability::{MetricsSnapshot, ObservabilityLayer},
    EnqueueOptions, QueueError, QueueEvent, QueueResult, QueueStats, Task, TaskId, TaskPriority,
    TaskStatus, WorkerId, WorkerOptions, WorkerRegistration,
};

/// Type alias for boxed streams (stable Rust compatible)
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Priority task queue: enqueue, claim, acknowledge, retry and dead-letter.
///
/// Every state change is serialized behind one lock, so popping from the
/// priority index and marking the task `processing` happen atomically and
/// two workers can never claim the same task.
pub struct QueueService {
    config: QueueConfig,
    keys: QueueKeys,
    backends: QueueBackends,
    clock: Arc<dyn Clock>,
    observability: ObservabilityLayer,
    write_lock: Mutex<()>,
}

impl QueueService {
    /// Queue backed by in-process stores
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        Self::with_backends(config, QueueBackends::memory())
    }

    /// Queue over caller-supplied stores
    pub fn with_backends(config: QueueConfig, backends: QueueBackends) -> QueueResult<Self> {
        config.validate()?;

        Ok(Self {
            keys: config.keys(),
            observability: ObservabilityLayer::new(config.event_capacity),
            config,
            backends,
            clock: Arc::new(SystemClock),
            write_lock: Mutex::new(()),
        })
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Add a task to the index for its type
    #[instrument(skip(self, payload, options), fields(task_type = %task_type))]
    pub async fn enqueue(
        &self,
        task_type: &str,
        payload: Value,
        options: EnqueueOptions,
    ) -> QueueResult<TaskId> {
        if task_type.trim().is_empty() {
            return Err(QueueError::invalid_argument("task type must not be empty"));
        }

        let options = EnqueueOptions {
            max_retries: Some(options.max_retries.unwrap_or(self.config.max_retries)),
            timeout: Some(options.timeout.unwrap_or(self.config.default_timeout)),
            ..options
        };

        let now = self.now();
        let task = Task::new(task_type, payload, &options, now);
        let task_id = task.id.clone();
        let priority = task.priority;

        {
            let _guard = self.write_lock.lock().await;
            self.backends.tasks.put(task).await?;
            self.backends
                .index
                .insert(
                    &self.keys.task_type(task_type),
                    IndexEntry::new(task_id.clone(), priority),
                )
                .await?;

            self.observability.record(QueueEvent::TaskEnqueued {
                task_id: task_id.clone(),
                task_type: task_type.to_string(),
                priority,
                at: now,
            });
        }

        info!(task_id = %task_id, priority = %priority, "Enqueued task");
        Ok(task_id)
    }

    /// Claim the next ready task without recording a worker
    pub async fn dequeue<S>(&self, task_types: &[S]) -> QueueResult<Option<Task>>
    where
        S: AsRef<str> + Sync,
    {
        self.claim_next(None, task_types).await
    }

    /// Claim the next ready task on behalf of `worker_id`.
    ///
    /// Types are scanned in the given order; the first type with a ready
    /// entry wins. Never blocks waiting for work.
    pub async fn dequeue_for<S>(
        &self,
        worker_id: &WorkerId,
        task_types: &[S],
    ) -> QueueResult<Option<Task>>
    where
        S: AsRef<str> + Sync,
    {
        self.claim_next(Some(worker_id), task_types).await
    }

    async fn claim_next<S>(
        &self,
        worker_id: Option<&WorkerId>,
        task_types: &[S],
    ) -> QueueResult<Option<Task>>
    where
        S: AsRef<str> + Sync,
    {
        let claimed = {
            let _guard = self.write_lock.lock().await;
            let now = self.now();
            let mut claimed = None;

            'types: for task_type in task_types {
                let key = self.keys.task_type(task_type.as_ref());

                while let Some(task_id) = self.backends.index.pop_ready(&key, now).await? {
                    match self.backends.tasks.get(&task_id).await? {
                        Some(mut task) if task.status == TaskStatus::Pending => {
                            task.start_processing(worker_id.cloned(), now);
                            self.backends.tasks.put(task.clone()).await?;
                            self.observability.record(QueueEvent::TaskDequeued {
                                task_id: task.id.clone(),
                                worker_id: task.worker_id.clone(),
                                at: now,
                            });
                            claimed = Some(task);
                            break 'types;
                        }
                        // Cancelled or deleted after it was indexed.
                        _ => debug!(task_id = %task_id, "Discarded stale index entry"),
                    }
                }
            }

            claimed
        };

        if let Some(task) = &claimed {
            debug!(task_id = %task.id, task_type = %task.task_type, "Dequeued task");
        }

        Ok(claimed)
    }

    /// Record a successful result.
    ///
    /// Unknown or already-finished tasks are ignored with a warning so that
    /// duplicate or late acknowledgements can't corrupt state.
    #[instrument(skip(self, result), fields(task_id = %task_id))]
    pub async fn complete(&self, task_id: &TaskId, result: Value) -> QueueResult<()> {
        let duration = {
            let _guard = self.write_lock.lock().await;

            let Some(mut task) = self.backends.tasks.get(task_id).await? else {
                warn!("Ignoring completion for unknown task");
                return Ok(());
            };
            if task.status.is_terminal() {
                warn!(status = %task.status, "Ignoring completion for finished task");
                return Ok(());
            }
            if task.status == TaskStatus::Pending {
                self.backends
                    .index
                    .remove(&self.keys.task_type(&task.task_type), task_id)
                    .await?;
            }

            let now = self.now();
            task.complete(result.clone(), now);
            self.backends.tasks.put(task.clone()).await?;
            self.backends
                .results
                .put(task_id, result, add_duration(now, self.config.result_ttl))
                .await?;

            let duration = task.duration();
            if let Some(elapsed) = duration.and_then(|d| d.to_std().ok()) {
                self.observability.record_execution_time(&task.task_type, elapsed);
            }
            self.observability.record(QueueEvent::TaskCompleted {
                task_id: task_id.clone(),
                duration_ms: duration.map(|d| d.num_milliseconds()),
                at: now,
            });
            duration
        };

        info!(duration_ms = ?duration.map(|d| d.num_milliseconds()), "Task completed");
        Ok(())
    }

    /// Record a failure; retries with backoff while budget remains.
    ///
    /// Same tolerance as [`complete`](Self::complete) for unknown or
    /// finished tasks.
    #[instrument(skip(self, error), fields(task_id = %task_id))]
    pub async fn fail(
        &self,
        task_id: &TaskId,
        error: impl Into<String>,
        retryable: bool,
    ) -> QueueResult<()> {
        let error = error.into();

        let _guard = self.write_lock.lock().await;

        let Some(mut task) = self.backends.tasks.get(task_id).await? else {
            warn!("Ignoring failure for unknown task");
            return Ok(());
        };
        if task.status.is_terminal() {
            warn!(status = %task.status, "Ignoring failure for finished task");
            return Ok(());
        }

        let event = self.retry_or_fail(&mut task, error, retryable).await?;
        self.observability.record(event);
        Ok(())
    }

    // Caller must hold `write_lock`.
    async fn retry_or_fail(
        &self,
        task: &mut Task,
        error: String,
        retryable: bool,
    ) -> QueueResult<QueueEvent> {
        let now = self.now();
        let key = self.keys.task_type(&task.task_type);

        // A pending task still has an entry; drop it so it is never indexed twice.
        if task.status == TaskStatus::Pending {
            self.backends.index.remove(&key, &task.id).await?;
        }

        if retryable && task.can_retry() {
            task.schedule_retry(error.clone());
            let delay = self.config.retry_delay(task.retry_count);

            self.backends.tasks.put(task.clone()).await?;
            self.backends
                .index
                .insert(
                    &key,
                    IndexEntry::delayed(task.id.clone(), task.priority, add_duration(now, delay)),
                )
                .await?;

            warn!(
                task_id = %task.id,
                retry_count = task.retry_count,
                delay_ms = delay.as_millis() as u64,
                "Task failed, will retry: {}",
                error
            );

            Ok(QueueEvent::TaskRetrying {
                task_id: task.id.clone(),
                retry_count: task.retry_count,
                delay_ms: delay.as_millis() as u64,
                error,
                at: now,
            })
        } else {
            task.fail(error.clone(), now);
            self.backends.tasks.put(task.clone()).await?;

            let dead_lettered = self.config.dead_letter_enabled;
            if dead_lettered {
                self.backends
                    .index
                    .push_back(
                        &self.keys.dead_letter(),
                        IndexEntry::new(task.id.clone(), TaskPriority::Low),
                    )
                    .await?;
            }

            error!(
                task_id = %task.id,
                retry_count = task.retry_count,
                dead_lettered,
                "Task failed permanently: {}",
                error
            );

            Ok(QueueEvent::TaskFailed {
                task_id: task.id.clone(),
                error,
                dead_lettered,
                at: now,
            })
        }
    }

    /// Cancel a task that has not been picked up yet.
    ///
    /// Returns `false` for any status other than `pending`; in-flight
    /// cancellation is not supported.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn cancel(&self, task_id: &TaskId) -> QueueResult<bool> {
        let _guard = self.write_lock.lock().await;

        let Some(mut task) = self.backends.tasks.get(task_id).await? else {
            return Ok(false);
        };
        if task.status != TaskStatus::Pending {
            return Ok(false);
        }

        let now = self.now();
        task.cancel(now);
        self.backends.tasks.put(task.clone()).await?;
        self.backends
            .index
            .remove(&self.keys.task_type(&task.task_type), task_id)
            .await?;

        self.observability.record(QueueEvent::TaskCancelled {
            task_id: task_id.clone(),
            at: now,
        });
        info!("Cancelled task");
        Ok(true)
    }

    /// Move a `processing` task to the terminal `timeout` state
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn mark_timed_out(&self, task_id: &TaskId) -> QueueResult<bool> {
        let _guard = self.write_lock.lock().await;

        let Some(mut task) = self.backends.tasks.get(task_id).await? else {
            return Ok(false);
        };
        if task.status != TaskStatus::Processing {
            return Ok(false);
        }

        let now = self.now();
        task.time_out(now);
        self.backends.tasks.put(task).await?;

        self.observability.record(QueueEvent::TaskTimedOut {
            task_id: task_id.clone(),
            at: now,
        });
        warn!("Task timed out");
        Ok(true)
    }

    pub async fn get_task(&self, task_id: &TaskId) -> QueueResult<Option<Task>> {
        self.backends.tasks.get(task_id).await
    }

    /// Cached result; `None` once the result TTL has elapsed even though the
    /// task record still says `completed`
    pub async fn get_result(&self, task_id: &TaskId) -> QueueResult<Option<Value>> {
        self.backends.results.get(task_id, self.now()).await
    }

    /// Evict expired results eagerly
    pub async fn purge_expired_results(&self) -> QueueResult<usize> {
        let purged = self.backends.results.purge_expired(self.now()).await?;
        if purged > 0 {
            debug!(purged, "Purged expired results");
        }
        Ok(purged)
    }

    /// Tasks in the dead-letter queue, oldest first
    pub async fn dead_letters(&self) -> QueueResult<Vec<Task>> {
        let entries = self.backends.index.entries(&self.keys.dead_letter()).await?;

        let mut tasks = Vec::with_capacity(entries.len());
        for entry in entries {
            if let Some(task) = self.backends.tasks.get(&entry.task_id).await? {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    /// Manually re-schedule a dead-lettered task with a fresh retry budget
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn retry_dead_letter(&self, task_id: &TaskId) -> QueueResult<bool> {
        let _guard = self.write_lock.lock().await;

        if !self
            .backends
            .index
            .remove(&self.keys.dead_letter(), task_id)
            .await?
        {
            return Ok(false);
        }
        let Some(mut task) = self.backends.tasks.get(task_id).await? else {
            return Ok(false);
        };

        task.requeue();
        self.backends.tasks.put(task.clone()).await?;
        self.backends
            .index
            .insert(
                &self.keys.task_type(&task.task_type),
                IndexEntry::new(task.id.clone(), task.priority),
            )
            .await?;

        self.observability.record(QueueEvent::TaskRequeued {
            task_id: task_id.clone(),
            at: self.now(),
        });
        info!("Requeued dead-lettered task");
        Ok(true)
    }

    /// Remove a task and everything derived from it.
    ///
    /// Refused while the task is `processing`.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn delete_task(&self, task_id: &TaskId) -> QueueResult<bool> {
        let _guard = self.write_lock.lock().await;

        let Some(task) = self.backends.tasks.get(task_id).await? else {
            return Ok(false);
        };
        if task.status == TaskStatus::Processing {
            return Ok(false);
        }

        self.backends
            .index
            .remove(&self.keys.task_type(&task.task_type), task_id)
            .await?;
        self.backends
            .index
            .remove(&self.keys.dead_letter(), task_id)
            .await?;
        self.backends.results.remove(task_id).await?;
        self.backends.tasks.delete(task_id).await?;

        info!("Deleted task");
        Ok(true)
    }

    /// Register a worker for the given task types
    #[instrument(skip(self, task_types, options))]
    pub async fn register_worker<S>(
        &self,
        task_types: &[S],
        options: WorkerOptions,
    ) -> QueueResult<WorkerId>
    where
        S: AsRef<str>,
    {
        if task_types.is_empty() {
            return Err(QueueError::invalid_argument("worker must accept at least one task type"));
        }
        if task_types.iter().any(|t| t.as_ref().trim().is_empty()) {
            return Err(QueueError::invalid_argument("task type must not be empty"));
        }
        if options.max_concurrent == 0 {
            return Err(QueueError::invalid_argument("max_concurrent must be at least 1"));
        }

        let now = self.now();
        let worker_id = options.worker_id.clone().unwrap_or_default();
        let types: BTreeSet<String> = task_types.iter().map(|t| t.as_ref().to_string()).collect();

        self.backends
            .workers
            .register(WorkerRegistration::new(worker_id.clone(), types, &options, now))
            .await?;

        self.observability.record(QueueEvent::WorkerRegistered {
            worker_id: worker_id.clone(),
            at: now,
        });
        info!(worker_id = %worker_id, max_concurrent = options.max_concurrent, "Registered worker");
        Ok(worker_id)
    }

    /// Refresh liveness; `false` if the worker is not registered
    pub async fn heartbeat(&self, worker_id: &WorkerId, in_flight: usize) -> QueueResult<bool> {
        self.backends
            .workers
            .heartbeat(worker_id, in_flight, self.now())
            .await
    }

    #[instrument(skip(self), fields(worker_id = %worker_id))]
    pub async fn unregister_worker(&self, worker_id: &WorkerId) -> QueueResult<bool> {
        let removed = self.backends.workers.unregister(worker_id).await?;

        if removed {
            self.observability.record(QueueEvent::WorkerUnregistered {
                worker_id: worker_id.clone(),
                at: self.now(),
            });
            info!("Unregistered worker");
        }
        Ok(removed)
    }

    pub async fn get_workers(&self) -> QueueResult<Vec<WorkerRegistration>> {
        self.backends.workers.list().await
    }

    pub async fn get_worker(&self, worker_id: &WorkerId) -> QueueResult<Option<WorkerRegistration>> {
        self.backends.workers.get(worker_id).await
    }

    /// Counts by status, dead-letter depth, pending by priority and
    /// workers by accepted type
    pub async fn get_stats(&self) -> QueueResult<QueueStats> {
        let mut stats = QueueStats::default();

        for task in self.backends.tasks.list().await? {
            match task.status {
                TaskStatus::Pending => {
                    stats.pending += 1;
                    *stats.by_priority.entry(task.priority).or_default() += 1;
                }
                TaskStatus::Processing => stats.processing += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Timeout => stats.timed_out += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }

        stats.dead_letter = self.backends.index.len(&self.keys.dead_letter()).await?;

        for worker in self.backends.workers.list().await? {
            for task_type in worker.task_types {
                *stats.by_worker_type.entry(task_type).or_default() += 1;
            }
        }

        Ok(stats)
    }

    /// Hand back tasks held past the visibility timeout by workers that have
    /// stopped heartbeating (or were never registered).
    ///
    /// Reclaimed tasks go through the normal retry path, so the retry budget
    /// and dead-lettering still apply.
    #[instrument(skip(self))]
    pub async fn reclaim_stale(&self) -> QueueResult<Vec<TaskId>> {
        let now = self.now();
        let visibility = chrono::Duration::from_std(self.config.visibility_timeout)
            .map_err(|e| QueueError::InvalidConfig(e.to_string()))?;

        let workers: HashMap<WorkerId, WorkerRegistration> = self
            .backends
            .workers
            .list()
            .await?
            .into_iter()
            .map(|w| (w.worker_id.clone(), w))
            .collect();

        let owner_is_stale = |task: &Task| match task.worker_id.as_ref().and_then(|id| workers.get(id)) {
            Some(worker) => worker.is_stale(now, self.config.worker_stale_after),
            None => true,
        };

        let candidates: Vec<Task> = self
            .backends
            .tasks
            .list()
            .await?
            .into_iter()
            .filter(|task| task.status == TaskStatus::Processing)
            .filter(|task| {
                // Overflow means the deadline is beyond any representable time.
                task.started_at
                    .and_then(|started| started.checked_add_signed(visibility))
                    .is_some_and(|deadline| deadline <= now)
            })
            .filter(|task| owner_is_stale(task))
            .collect();

        let mut reclaimed = Vec::new();
        for candidate in candidates {
            {
                let _guard = self.write_lock.lock().await;

                // Re-check under the lock; the worker may have acked meanwhile.
                let Some(mut task) = self.backends.tasks.get(&candidate.id).await? else {
                    continue;
                };
                if task.status != TaskStatus::Processing || task.started_at != candidate.started_at {
                    continue;
                }

                let event = self
                    .retry_or_fail(&mut task, "visibility timeout expired".to_string(), true)
                    .await?;
                self.observability.record(QueueEvent::TaskReclaimed {
                    task_id: candidate.id.clone(),
                    worker_id: candidate.worker_id.clone(),
                    at: now,
                });
                self.observability.record(event);
            }

            warn!(task_id = %candidate.id, worker_id = ?candidate.worker_id, "Reclaimed task from stale worker");
            reclaimed.push(candidate.id);
        }

        Ok(reclaimed)
    }

    /// Subscribe to lifecycle events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.observability.subscribe()
    }

    /// Lifecycle events as a stream; lagged events are dropped
    pub fn event_stream(&self) -> BoxStream<QueueEvent> {
        use tokio_stream::{wrappers::BroadcastStream, StreamExt};

        let stream = BroadcastStream::new(self.subscribe()).filter_map(|result| result.ok());
        Box::pin(stream)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.observability.metrics().snapshot()
    }

    pub fn observability(&self) -> &ObservabilityLayer {
        &self.observability
    }
}

fn add_duration(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|by| at.checked_add_signed(by))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
