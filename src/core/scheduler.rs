//! Bounded-concurrency task scheduler.
//!
//! A [`Scheduler`] owns a [`Semaphore`] sized to `max_concurrency`. Each
//! submission takes its place in the semaphore's line synchronously, so tasks
//! are admitted in submission order (or by priority when enabled), then runs on
//! the configured [`Spawn`] runtime once a permit is granted. The permit is
//! released the moment the task finishes, admitting the next queued task.
//!
//! Failures stay with their task: an error or panic resolves only that task's
//! [`TaskHandle`].

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::core::audit::{build_audit_event, AuditSink};
use crate::core::GateError;
use crate::runtime::TokioSpawner;
use crate::semaphore::Semaphore;
use crate::util::clock::now_ms;
use crate::util::serde::{Priority, TaskId};

/// Abstraction for spawning task execution on a runtime.
pub trait Spawn {
    /// Spawn a detached future.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Snapshot of scheduler activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Concurrency bound.
    pub max_concurrency: usize,
    /// Tasks accepted since creation.
    pub submitted_tasks: u64,
    /// Tasks currently executing.
    pub active_tasks: u64,
    /// Tasks waiting for admission.
    pub queued_tasks: u64,
    /// Tasks that returned `Ok`.
    pub completed_tasks: u64,
    /// Tasks that returned an error or panicked.
    pub failed_tasks: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    active: AtomicU64,
    queued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self, max_concurrency: usize) -> SchedulerStats {
        SchedulerStats {
            max_concurrency,
            submitted_tasks: self.submitted.load(Ordering::Relaxed),
            active_tasks: self.active.load(Ordering::Relaxed),
            queued_tasks: self.queued.load(Ordering::Relaxed),
            completed_tasks: self.completed.load(Ordering::Relaxed),
            failed_tasks: self.failed.load(Ordering::Relaxed),
        }
    }
}

struct Inner {
    name: String,
    config: SchedulerConfig,
    semaphore: Semaphore,
    counters: Counters,
    next_task_id: AtomicU64,
    /// `true` once draining started. Submissions enqueue under this lock.
    admission: Mutex<bool>,
    in_flight: watch::Sender<usize>,
}

type SharedAudit = Arc<Mutex<Box<dyn AuditSink>>>;

/// Decrements the in-flight count however the task future ends.
struct InFlight(Arc<Inner>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.send_modify(|n| *n -= 1);
    }
}

/// Bounded-concurrency scheduler. Cloning shares the same slots and queue.
#[derive(Clone)]
pub struct Scheduler<S = TokioSpawner> {
    inner: Arc<Inner>,
    spawner: S,
    audit: Option<SharedAudit>,
}

/// Eventual outcome of a submitted task.
///
/// Resolves to [`GateError::Cancelled`] if the runtime dropped the task
/// before it produced a result.
#[derive(Debug)]
#[must_use = "the task runs regardless, but its outcome is lost if the handle is dropped"]
pub struct TaskHandle<T> {
    id: TaskId,
    rx: oneshot::Receiver<Result<T, GateError>>,
}

impl<T> TaskHandle<T> {
    /// Identifier assigned at submission.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, GateError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(GateError::Cancelled)))
    }
}

impl Scheduler<TokioSpawner> {
    /// Create a scheduler on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Configuration`] if the configuration is invalid.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn with_tokio(config: SchedulerConfig) -> Result<Self, GateError> {
        Self::new(config, TokioSpawner::current())
    }
}

impl<S> Scheduler<S> {
    /// Create a scheduler named `scheduler`.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Configuration`] if the configuration is invalid,
    /// including `max_concurrency == 0`.
    pub fn new(config: SchedulerConfig, spawner: S) -> Result<Self, GateError> {
        Self::named("scheduler", config, spawner)
    }

    /// Create a scheduler with a name used in logs and audit events.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Configuration`] if the configuration is invalid.
    pub fn named(
        name: impl Into<String>,
        config: SchedulerConfig,
        spawner: S,
    ) -> Result<Self, GateError> {
        config.validate().map_err(GateError::Configuration)?;
        let name = name.into();
        let semaphore = Semaphore::new(config.max_concurrency)?;
        info!(
            scheduler = %name,
            max_concurrency = config.max_concurrency,
            priority_enabled = config.priority_enabled,
            "scheduler created"
        );
        let (in_flight, _) = watch::channel(0);
        Ok(Self {
            inner: Arc::new(Inner {
                name,
                config,
                semaphore,
                counters: Counters::default(),
                next_task_id: AtomicU64::new(1),
                admission: Mutex::new(false),
                in_flight,
            }),
            spawner,
            audit: None,
        })
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Box<dyn AuditSink>) -> Self {
        self.audit = Some(Arc::new(Mutex::new(audit)));
        self
    }

    /// Scheduler name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Scheduler configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Whether [`Scheduler::drain`] has been called.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        *self.inner.admission.lock()
    }

    /// Current activity counters.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.inner.counters.snapshot(self.inner.config.max_concurrency)
    }

    /// Stop admitting new submissions and wait until every accepted task has
    /// finished. Calling it again waits again; it never reopens admission.
    pub async fn drain(&self) {
        {
            let mut draining = self.inner.admission.lock();
            if !*draining {
                *draining = true;
                info!(scheduler = %self.inner.name, "scheduler draining");
            }
        }
        let mut rx = self.inner.in_flight.subscribe();
        // The sender lives in `inner`, which we hold, so this cannot fail.
        let _ = rx.wait_for(|n| *n == 0).await;
        debug!(scheduler = %self.inner.name, "scheduler drained");
    }
}

impl<S> Scheduler<S>
where
    S: Spawn,
{
    /// Submit a task at normal priority.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Draining`] once [`Scheduler::drain`] was called.
    /// Errors produced by the task itself arrive through the handle.
    pub fn submit<F, Fut, T, E>(&self, op: F) -> Result<TaskHandle<T>, GateError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        self.submit_with_priority(Priority::Normal, op)
    }

    /// Submit a task. `priority` only affects admission order when the
    /// scheduler was configured with `priority_enabled`.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Draining`] once [`Scheduler::drain`] was called.
    pub fn submit_with_priority<F, Fut, T, E>(
        &self,
        priority: Priority,
        op: F,
    ) -> Result<TaskHandle<T>, GateError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        let priority = if self.inner.config.priority_enabled {
            priority
        } else {
            Priority::Normal
        };

        let (id, pending, in_flight) = {
            let draining = self.inner.admission.lock();
            if *draining {
                warn!(scheduler = %self.inner.name, "submission rejected: draining");
                return Err(GateError::Draining);
            }
            let id = self.inner.next_task_id.fetch_add(1, Ordering::Relaxed);
            self.inner.in_flight.send_modify(|n| *n += 1);
            let in_flight = InFlight(Arc::clone(&self.inner));
            let pending = self.inner.semaphore.start_acquire_with_priority(priority);
            (id, pending, in_flight)
        };

        let counters = &self.inner.counters;
        counters.submitted.fetch_add(1, Ordering::Relaxed);
        counters.queued.fetch_add(1, Ordering::Relaxed);
        record_audit(self.audit.as_ref(), &self.inner.name, id, "submit", None);
        debug!(
            scheduler = %self.inner.name,
            task_id = id,
            ?priority,
            queued = !pending.is_ready(),
            "task submitted"
        );

        let (tx, rx) = oneshot::channel();
        let audit = self.audit.clone();
        self.spawner.spawn(async move {
            let inner = Arc::clone(&in_flight.0);
            let permit = match pending.wait().await {
                Ok(permit) => permit,
                Err(e) => {
                    inner.counters.queued.fetch_sub(1, Ordering::Relaxed);
                    let _ = tx.send(Err(e));
                    drop(in_flight);
                    return;
                }
            };
            inner.counters.queued.fetch_sub(1, Ordering::Relaxed);
            inner.counters.active.fetch_add(1, Ordering::Relaxed);
            record_audit(audit.as_ref(), &inner.name, id, "admit", None);
            debug!(scheduler = %inner.name, task_id = id, "task admitted");

            let outcome = match AssertUnwindSafe(async move { op().await })
                .catch_unwind()
                .await
            {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(GateError::task(e)),
                Err(panic) => Err(GateError::task(anyhow::anyhow!(
                    "task panicked: {}",
                    panic_message(panic.as_ref())
                ))),
            };

            drop(permit);
            inner.counters.active.fetch_sub(1, Ordering::Relaxed);
            match &outcome {
                Ok(_) => {
                    inner.counters.completed.fetch_add(1, Ordering::Relaxed);
                    record_audit(audit.as_ref(), &inner.name, id, "complete", None);
                    debug!(scheduler = %inner.name, task_id = id, "task completed");
                }
                Err(e) => {
                    inner.counters.failed.fetch_add(1, Ordering::Relaxed);
                    record_audit(audit.as_ref(), &inner.name, id, "fail", Some(e.to_string()));
                    warn!(scheduler = %inner.name, task_id = id, error = %e, "task failed");
                }
            }
            let _ = tx.send(outcome);
            drop(in_flight);
        });

        Ok(TaskHandle { id, rx })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

fn record_audit(
    audit: Option<&SharedAudit>,
    gate: &str,
    task_id: TaskId,
    action: &str,
    detail: Option<String>,
) {
    if let Some(sink) = audit {
        let created = now_ms();
        sink.lock().record(build_audit_event(
            format!("{gate}-{task_id}-{action}-{created}"),
            task_id,
            gate,
            action,
            detail,
        ));
    }
}
