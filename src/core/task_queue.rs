//! Unbounded FIFO run queue drained by exactly one worker.
//!
//! `enqueue` creates the pending run record and appends to the backend; the worker
//! pops one request at a time, executes the pipeline and records the terminal
//! status. A panic or error in one run is contained to that run.

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::catalog::CatalogStore;
use super::context::{OrchestrationContext, StageName, StageObserver};
use super::job::JobId;
use super::ledger::{NotificationEvent, RunLedger};
use super::pipeline::PipelineExecutor;
use super::run::{QueuedRun, Run, RunFinished, RunId, RunRequest, RunStatus};
use super::OrchestratorError;
use crate::runtime::TokioSpawner;
use crate::util::clock::now;

/// Storage for queued runs. FIFO: `pop` returns the oldest pushed entry.
pub trait QueueBackend: Send {
    /// Append a run.
    fn push(&mut self, run: QueuedRun) -> Result<(), OrchestratorError>;
    /// Remove and return the oldest run.
    fn pop(&mut self) -> Result<Option<QueuedRun>, OrchestratorError>;
    /// Snapshot of queued runs, oldest first.
    fn pending(&self) -> Vec<QueuedRun>;
    /// Number of queued runs.
    fn len(&self) -> usize;
    /// True when nothing is queued.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Accepts run requests. Implemented by [`TaskQueue`]; the scheduler only sees this.
pub trait RunSubmitter: Send + Sync {
    /// Queue `request`, returning the id of its pending run.
    fn submit(&self, request: RunRequest) -> Result<RunId, OrchestratorError>;
}

/// Counters exposed for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Runs waiting in the backend.
    pub pending: usize,
    /// Runs accepted since start.
    pub submitted: u64,
    /// Runs completed since start.
    pub completed: u64,
    /// Runs failed since start.
    pub failed: u64,
    /// Run currently executing.
    pub active_run: Option<RunId>,
}

#[derive(Default)]
struct QueueCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

struct QueueInner {
    backend: Mutex<Box<dyn QueueBackend>>,
    wake: Notify,
    counters: QueueCounters,
    active: Mutex<Option<RunId>>,
    shutdown: AtomicBool,
    ledger: Arc<RunLedger>,
    pipeline: Arc<PipelineExecutor>,
    catalog: Arc<dyn CatalogStore>,
    completions: Option<mpsc::UnboundedSender<RunFinished>>,
}

/// Single-consumer run queue.
pub struct TaskQueue {
    inner: Arc<QueueInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Forwards stage transitions to the ledger so progress is visible while running.
struct LedgerObserver {
    ledger: Arc<RunLedger>,
    run_id: RunId,
}

impl StageObserver for LedgerObserver {
    fn on_stage(&self, stage: StageName) {
        self.ledger.record_stage(self.run_id, stage);
    }
}

impl TaskQueue {
    /// Queue over `backend`. Call [`start`](Self::start) to begin draining it.
    pub fn new(
        backend: Box<dyn QueueBackend>,
        ledger: Arc<RunLedger>,
        pipeline: Arc<PipelineExecutor>,
        catalog: Arc<dyn CatalogStore>,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                backend: Mutex::new(backend),
                wake: Notify::new(),
                counters: QueueCounters::default(),
                active: Mutex::new(None),
                shutdown: AtomicBool::new(false),
                ledger,
                pipeline,
                catalog,
                completions: None,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Send a [`RunFinished`] event for every terminal run.
    ///
    /// Must be called before the queue is shared.
    #[must_use]
    pub fn with_completions(mut self, tx: mpsc::UnboundedSender<RunFinished>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.completions = Some(tx);
        }
        self
    }

    /// Recover runs left over from a previous process and spawn the worker.
    ///
    /// Runs still in the backend are re-delivered in FIFO order; every other
    /// non-terminal run is marked failed.
    pub fn start(&self, spawner: &TokioSpawner) -> Result<(), OrchestratorError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        let pending = self.inner.backend.lock().pending();
        for queued in &pending {
            if self.inner.ledger.get_run(queued.run_id).is_none() {
                self.inner.ledger.record_enqueued(&Run::pending(queued))?;
            }
        }
        let requeued: HashSet<RunId> = pending.iter().map(|q| q.run_id).collect();
        self.inner.ledger.fail_interrupted(&requeued)?;

        let inner = self.inner.clone();
        *worker = Some(spawner.spawn(async move { inner.worker_loop().await }));
        info!(requeued = requeued.len(), "run queue worker started");
        Ok(())
    }

    /// Create a pending run for `request` and append it to the queue.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::Shutdown`] after [`shutdown`](Self::shutdown), or a
    /// storage error when the run record cannot be written.
    pub fn enqueue(&self, request: RunRequest) -> Result<RunId, OrchestratorError> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(OrchestratorError::Shutdown);
        }
        let queued = QueuedRun {
            run_id: Uuid::new_v4(),
            request,
            enqueued_at: now(),
        };
        let run_id = queued.run_id;
        self.inner.ledger.record_enqueued(&Run::pending(&queued))?;
        let job_id = queued.request.job_id();
        let pushed = self.inner.backend.lock().push(queued);
        if let Err(err) = pushed {
            error!(run_id = %run_id, error = %err, "failed to queue run");
            self.inner
                .conclude(run_id, job_id, RunStatus::Failed, None, Some(err.to_string()));
            return Err(err);
        }
        self.inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.inner.wake.notify_one();
        debug!(run_id = %run_id, "run enqueued");
        Ok(run_id)
    }

    /// Runs waiting to be picked up, excluding the one executing.
    #[must_use]
    pub fn queue_size(&self) -> usize {
        self.inner.backend.lock().len()
    }

    /// True while the worker is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.inner.shutdown.load(Ordering::Acquire)
            && self.worker.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Run currently executing.
    #[must_use]
    pub fn active_run(&self) -> Option<RunId> {
        *self.inner.active.lock()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let counters = &self.inner.counters;
        QueueStats {
            pending: self.queue_size(),
            submitted: counters.submitted.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            active_run: self.active_run(),
        }
    }

    /// Stop accepting runs, let the executing run finish, then stop the worker.
    ///
    /// Queued runs stay in the backend.
    pub async fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.wake.notify_one();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(error = %err, "run queue worker ended abnormally");
            }
        }
        info!("run queue stopped");
    }
}

impl RunSubmitter for TaskQueue {
    fn submit(&self, request: RunRequest) -> Result<RunId, OrchestratorError> {
        self.enqueue(request)
    }
}

impl QueueInner {
    async fn worker_loop(self: Arc<Self>) {
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            let next = self.backend.lock().pop();
            match next {
                Ok(Some(queued)) => self.process(queued).await,
                Ok(None) => self.wake.notified().await,
                Err(err) => {
                    error!(error = %err, "failed to pop from run queue");
                    self.wake.notified().await;
                }
            }
        }
        debug!("run queue worker exiting");
    }

    async fn process(&self, queued: QueuedRun) {
        let run_id = queued.run_id;
        *self.active.lock() = Some(run_id);

        let outcome = AssertUnwindSafe(self.execute(&queued)).catch_unwind().await;
        let (status, output, error) = match outcome {
            Ok(Ok(output)) => (RunStatus::Completed, Some(output), None),
            Ok(Err(err)) => (RunStatus::Failed, None, Some(err.to_string())),
            Err(panic) => {
                let err = OrchestratorError::Panicked(panic_message(panic.as_ref()));
                (RunStatus::Failed, None, Some(err.to_string()))
            }
        };

        self.conclude(run_id, queued.request.job_id(), status, output, error);
        *self.active.lock() = None;
    }

    /// Record the terminal status, notify, and report the completion to the scheduler.
    fn conclude(
        &self,
        run_id: RunId,
        job_id: Option<JobId>,
        status: RunStatus,
        output: Option<serde_json::Value>,
        error: Option<String>,
    ) {
        let completed_at = match self.ledger.record_terminal(run_id, status, output, error) {
            Ok(run) => {
                self.ledger.notify(NotificationEvent::for_run(&run));
                run.completed_at.unwrap_or_else(now)
            }
            Err(err) => {
                error!(run_id = %run_id, error = %err, "failed to record run outcome");
                now()
            }
        };
        let counter = if status == RunStatus::Completed {
            &self.counters.completed
        } else {
            &self.counters.failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.finished(RunFinished {
            run_id,
            job_id,
            status,
            completed_at,
        });
    }

    fn finished(&self, event: RunFinished) {
        if let Some(tx) = &self.completions {
            let run_id = event.run_id;
            if tx.send(event).is_err() {
                warn!(run_id = %run_id, "no listener for run completion");
            }
        }
    }

    async fn execute(&self, queued: &QueuedRun) -> Result<serde_json::Value, OrchestratorError> {
        self.ledger.record_start(queued.run_id)?;
        let exclusions = self.catalog.known_identities()?;
        let observer = Arc::new(LedgerObserver {
            ledger: self.ledger.clone(),
            run_id: queued.run_id,
        });
        let ctx = OrchestrationContext::new(queued.request.query().clone(), exclusions)
            .with_run(queued.run_id)
            .with_observer(observer);

        let started = Instant::now();
        let ctx = self.pipeline.execute(ctx).await?;
        let output = ctx.summary(started.elapsed().as_secs_f64());
        serde_json::to_value(output).map_err(|e| OrchestratorError::Backend(e.to_string()))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
