use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    HandlerError, QueueError, QueueResult, QueueService, Task, TaskId, WorkerId, WorkerOptions,
};

/// Application logic run for each claimed task.
///
/// `Ok` completes the task with the returned value. A retryable error goes
/// through the retry policy; a permanent one fails the task immediately.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, task: Task) -> Result<Value, HandlerError>;
}

#[async_trait]
impl<F, Fut> TaskHandler for F
where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn handle(&self, task: Task) -> Result<Value, HandlerError> {
        (self)(task).await
    }
}

/// Configuration for a dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    /// Registration details, including the concurrency ceiling
    pub worker: WorkerOptions,
    /// Wait after an empty poll
    pub poll_interval: Duration,
    /// Wait while at the concurrency ceiling
    pub capacity_backoff: Duration,
    /// How long shutdown waits for in-flight tasks
    pub shutdown_grace: Duration,
    /// Heartbeat period; falls back to the queue config
    pub heartbeat_interval: Option<Duration>,
    /// Abort handlers that outlive the task timeout and mark the task `timeout`
    pub enforce_timeouts: bool,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            worker: WorkerOptions::default(),
            poll_interval: Duration::from_secs(1),
            capacity_backoff: Duration::from_millis(50),
            shutdown_grace: Duration::from_secs(30),
            heartbeat_interval: None,
            enforce_timeouts: false,
        }
    }
}

impl DispatcherOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.worker.max_concurrent = max_concurrent;
        self
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<WorkerId>) -> Self {
        self.worker.worker_id = Some(worker_id.into());
        self
    }

    pub fn with_worker(mut self, worker: WorkerOptions) -> Self {
        self.worker = worker;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_capacity_backoff(mut self, backoff: Duration) -> Self {
        self.capacity_backoff = backoff;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    pub fn with_enforced_timeouts(mut self, enforce: bool) -> Self {
        self.enforce_timeouts = enforce;
        self
    }
}

/// Handle for managing a running dispatcher
pub struct DispatcherHandle {
    worker_id: WorkerId,
    shutdown_tx: watch::Sender<bool>,
    join_handle: JoinHandle<QueueResult<()>>,
    in_flight: Arc<InFlight>,
}

impl DispatcherHandle {
    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Tasks currently being handled
    pub fn in_flight(&self) -> usize {
        self.in_flight.count()
    }

    /// Stop polling, wait out the grace period, then unregister.
    ///
    /// Tasks still running when the grace period ends are aborted and
    /// failed permanently.
    pub async fn shutdown(self) -> QueueResult<()> {
        let _ = self.shutdown_tx.send(true);
        self.join_handle
            .await
            .map_err(|e| QueueError::Internal(format!("Dispatcher join error: {}", e)))?
    }
}

/// Pulls tasks for a fixed set of types and runs them under a concurrency ceiling
pub struct Dispatcher {
    queue: Arc<QueueService>,
}

impl Dispatcher {
    pub fn new(queue: Arc<QueueService>) -> Self {
        Self { queue }
    }

    /// Register a worker and start its polling loop
    #[instrument(skip(self, handler, options))]
    pub async fn start<H: TaskHandler>(
        &self,
        task_types: Vec<String>,
        handler: H,
        options: DispatcherOptions,
    ) -> QueueResult<DispatcherHandle> {
        let worker_id = self
            .queue
            .register_worker(&task_types, options.worker.clone())
            .await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let in_flight = Arc::new(InFlight::new());

        let heartbeat = spawn_heartbeat(
            self.queue.clone(),
            worker_id.clone(),
            in_flight.clone(),
            options
                .heartbeat_interval
                .unwrap_or(self.queue.config().heartbeat_interval),
        );

        let worker = Worker {
            queue: self.queue.clone(),
            worker_id: worker_id.clone(),
            task_types,
            handler: Arc::new(handler),
            options,
            in_flight: in_flight.clone(),
            shutdown_rx,
            heartbeat,
        };

        let join_handle = tokio::spawn(async move { worker.run().await });

        info!("Started dispatcher {}", worker_id);

        Ok(DispatcherHandle {
            worker_id,
            shutdown_tx,
            join_handle,
            in_flight,
        })
    }
}

/// Tasks owned by one dispatcher.
///
/// Whoever removes an entry owns the task's outcome: the task itself when it
/// finishes, or shutdown when the grace period runs out.
struct InFlight {
    tasks: Mutex<HashMap<TaskId, Option<AbortHandle>>>,
    count: watch::Sender<usize>,
}

impl InFlight {
    fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            tasks: Mutex::new(HashMap::new()),
            count,
        }
    }

    fn count(&self) -> usize {
        *self.count.borrow()
    }

    fn begin(&self, task_id: TaskId) {
        self.tasks.lock().insert(task_id, None);
        self.count.send_modify(|n| *n += 1);
    }

    fn attach(&self, task_id: &TaskId, abort: AbortHandle) {
        if let Some(slot) = self.tasks.lock().get_mut(task_id) {
            *slot = Some(abort);
        }
    }

    fn take(&self, task_id: &TaskId) -> bool {
        self.tasks.lock().remove(task_id).is_some()
    }

    fn take_all(&self) -> Vec<(TaskId, Option<AbortHandle>)> {
        self.tasks.lock().drain().collect()
    }

    /// Free a slot once the outcome has been reported
    fn release(&self) {
        self.count.send_modify(|n| *n = n.saturating_sub(1));
    }
}

fn spawn_heartbeat(
    queue: Arc<QueueService>,
    worker_id: WorkerId,
    in_flight: Arc<InFlight>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
        // Registration already stamped the first heartbeat.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match queue.heartbeat(&worker_id, in_flight.count()).await {
                Ok(true) => debug!("Heartbeat sent for {}", worker_id),
                Ok(false) => warn!("Heartbeat for unregistered worker {}", worker_id),
                Err(e) => warn!("Heartbeat failed for {}: {}", worker_id, e),
            }
        }
    })
}

struct Worker<H> {
    queue: Arc<QueueService>,
    worker_id: WorkerId,
    task_types: Vec<String>,
    handler: Arc<H>,
    options: DispatcherOptions,
    in_flight: Arc<InFlight>,
    shutdown_rx: watch::Receiver<bool>,
    heartbeat: JoinHandle<()>,
}

impl<H: TaskHandler> Worker<H> {
    /// Run the polling loop until shutdown, then drain
    async fn run(mut self) -> QueueResult<()> {
        info!("Worker {} started for task types: {:?}", self.worker_id, self.task_types);

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            if self.in_flight.count() >= self.options.worker.max_concurrent {
                if self.pause(self.options.capacity_backoff).await {
                    break;
                }
                continue;
            }

            match self.queue.dequeue_for(&self.worker_id, &self.task_types).await {
                Ok(Some(task)) => self.dispatch(task),
                Ok(None) => {
                    if self.pause(self.options.poll_interval).await {
                        break;
                    }
                }
                Err(e) => {
                    error!("Error dequeuing task: {}", e);
                    if self.pause(self.options.poll_interval).await {
                        break;
                    }
                }
            }
        }

        info!("Worker {} shutdown requested", self.worker_id);
        self.drain().await
    }

    /// Sleep; `true` if shutdown was requested meanwhile
    async fn pause(&mut self, period: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(period) => false,
            // A dropped handle also stops the loop.
            _ = self.shutdown_rx.changed() => true,
        }
    }

    fn dispatch(&self, task: Task) {
        let task_id = task.id.clone();
        let timeout = task.timeout();
        debug!("Dispatching task {} of type {}", task_id, task.task_type);

        self.in_flight.begin(task_id.clone());

        // The handler runs in its own task so a panic surfaces as a JoinError.
        let handler = self.handler.clone();
        let execution = tokio::spawn(async move { handler.handle(task).await });
        self.in_flight.attach(&task_id, execution.abort_handle());

        let run = TaskRun {
            queue: self.queue.clone(),
            in_flight: self.in_flight.clone(),
            timeout: (self.options.enforce_timeouts && !timeout.is_zero()).then_some(timeout),
        };
        tokio::spawn(run.report(task_id, execution));
    }

    async fn drain(self) -> QueueResult<()> {
        let mut count_rx = self.in_flight.count.subscribe();
        let drained = tokio::time::timeout(
            self.options.shutdown_grace,
            count_rx.wait_for(|n| *n == 0),
        )
        .await
        .is_ok();

        if !drained {
            for (task_id, abort) in self.in_flight.take_all() {
                if let Some(abort) = abort {
                    abort.abort();
                }
                warn!("Task {} still running at shutdown, failing it", task_id);
                if let Err(e) = self
                    .queue
                    .fail(&task_id, "worker shut down before task finished", false)
                    .await
                {
                    error!("Failed to fail task {} at shutdown: {}", task_id, e);
                }
                self.in_flight.release();
            }
        }

        self.heartbeat.abort();
        self.queue.unregister_worker(&self.worker_id).await?;

        info!("Worker {} stopped", self.worker_id);
        Ok(())
    }
}

struct TaskRun {
    queue: Arc<QueueService>,
    in_flight: Arc<InFlight>,
    timeout: Option<Duration>,
}

enum Outcome {
    Finished(Result<Value, HandlerError>),
    Panicked(String),
    TimedOut,
}

impl TaskRun {
    /// Wait for the handler and hand its outcome to the queue
    async fn report(
        self,
        task_id: TaskId,
        mut execution: JoinHandle<Result<Value, HandlerError>>,
    ) {
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut execution).await {
                Ok(joined) => Outcome::from(joined),
                Err(_) => {
                    execution.abort();
                    Outcome::TimedOut
                }
            },
            None => Outcome::from(execution.await),
        };

        // Shutdown already failed this task.
        if !self.in_flight.take(&task_id) {
            return;
        }

        let reported = match outcome {
            Outcome::Finished(Ok(value)) => self.queue.complete(&task_id, value).await,
            Outcome::Finished(Err(err)) => {
                self.queue
                    .fail(&task_id, err.message(), err.is_retryable())
                    .await
            }
            Outcome::Panicked(message) => {
                error!("Handler panicked on task {}: {}", task_id, message);
                self.queue
                    .fail(&task_id, format!("handler panicked: {}", message), true)
                    .await
            }
            Outcome::TimedOut => self.queue.mark_timed_out(&task_id).await.map(|_| ()),
        };

        if let Err(e) = reported {
            error!("Failed to report outcome of task {}: {}", task_id, e);
        }

        self.in_flight.release();
    }
}

impl From<Result<Result<Value, HandlerError>, JoinError>> for Outcome {
    fn from(joined: Result<Result<Value, HandlerError>, JoinError>) -> Self {
        match joined {
            Ok(result) => Outcome::Finished(result),
            Err(e) if e.is_panic() => Outcome::Panicked(panic_message(e.into_panic())),
            Err(_) => Outcome::Finished(Err(HandlerError::retryable("handler task was cancelled"))),
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(message) => *message,
        Err(panic) => panic
            .downcast_ref::<&str>()
            .map(|message| message.to_string())
            .unwrap_or_else(|| "unknown panic".to_string()),
    }
}
