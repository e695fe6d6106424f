//! Inbound API surface: job management, runs, queue depth and notifications.
//!
//! Request and response types are serde models so an HTTP layer can expose them
//! directly. Validation errors come back synchronously as
//! [`OrchestratorError::InvalidJob`] or [`OrchestratorError::InvalidRequest`];
//! nothing invalid ever reaches the queue.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::info;

use crate::core::{
    CatalogStore, Job, JobId, JobPatch, JobScheduler, JobSpec, LedgerEntry, Notification,
    NotificationId, OrchestratorError, QueryParams, QueueStats, Run, RunId, RunLedger, RunRequest,
    RunStatus, StageName, TaskQueue,
};
use crate::infra::BroadcastNotifier;

/// Upper bound for a manual run's `limit`.
pub const MAX_MANUAL_LIMIT: i64 = 100;

/// Manual run request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManualRunRequest {
    /// Geographic filter.
    #[serde(default, alias = "country")]
    pub region: Option<String>,
    /// Category filter.
    #[serde(default, alias = "sector")]
    pub category: Option<String>,
    /// Items to discover; the configured default when absent.
    #[serde(default)]
    pub limit: Option<i64>,
    /// Who triggered the run.
    #[serde(default)]
    pub trigger: Option<String>,
}

/// Response to an accepted manual run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunAccepted {
    /// Pending run.
    pub run_id: RunId,
    /// Always `pending`.
    pub status: RunStatus,
    /// Runs waiting in the queue right after acceptance.
    pub queue_size: usize,
}

/// Status of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatusResponse {
    /// Run.
    pub run_id: RunId,
    /// Originating job.
    pub job_id: Option<JobId>,
    /// Status.
    pub status: RunStatus,
    /// Last stage entered.
    pub current_stage: Option<StageName>,
    /// Error message of a failed run, verbatim.
    pub error: Option<String>,
    /// Output snapshot of a completed run.
    pub output: Option<Value>,
    /// Enqueue time.
    pub enqueued_at: DateTime<Utc>,
    /// Start time.
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal time.
    pub completed_at: Option<DateTime<Utc>>,
    /// Duration in seconds.
    pub duration_secs: Option<f64>,
}

impl From<Run> for RunStatusResponse {
    fn from(run: Run) -> Self {
        Self {
            run_id: run.id,
            job_id: run.job_id,
            status: run.status,
            current_stage: run.current_stage,
            error: run.error,
            output: run.output,
            enqueued_at: run.enqueued_at,
            started_at: run.started_at,
            completed_at: run.completed_at,
            duration_secs: run.duration_secs,
        }
    }
}

/// Queue depth and worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    /// Runs waiting.
    pub queue_size: usize,
    /// Worker alive.
    pub is_running: bool,
    /// Counters.
    pub stats: QueueStats,
}

/// Health response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
    /// Registered job timers.
    pub timers: usize,
    /// Runs waiting.
    pub queue_size: usize,
    /// Catalog records.
    pub catalog_size: usize,
}

/// Service facade owning the scheduler, queue and ledger.
pub struct Orchestrator {
    scheduler: JobScheduler,
    queue: Arc<TaskQueue>,
    ledger: Arc<RunLedger>,
    catalog: Arc<dyn CatalogStore>,
    notifier: Arc<BroadcastNotifier>,
    default_limit: usize,
}

impl Orchestrator {
    /// Assemble a facade from started components.
    pub fn new(
        scheduler: JobScheduler,
        queue: Arc<TaskQueue>,
        ledger: Arc<RunLedger>,
        catalog: Arc<dyn CatalogStore>,
        notifier: Arc<BroadcastNotifier>,
        default_limit: usize,
    ) -> Self {
        Self {
            scheduler,
            queue,
            ledger,
            catalog,
            notifier,
            default_limit,
        }
    }

    /// Create a job.
    pub fn create_job(&self, spec: JobSpec) -> Result<Job, OrchestratorError> {
        self.scheduler.create(spec)
    }

    /// Jobs, optionally filtered by activation.
    #[must_use]
    pub fn list_jobs(&self, active: Option<bool>) -> Vec<Job> {
        self.scheduler.list(active)
    }

    /// One job.
    pub fn get_job(&self, id: JobId) -> Result<Job, OrchestratorError> {
        self.scheduler.get(id)
    }

    /// Patch a job.
    pub fn update_job(&self, id: JobId, patch: &JobPatch) -> Result<Job, OrchestratorError> {
        self.scheduler.update(id, patch)
    }

    /// Delete a job, keeping its run history with the job reference cleared.
    pub fn delete_job(&self, id: JobId) -> Result<(), OrchestratorError> {
        self.scheduler.delete(id)
    }

    /// Flip a job's activation.
    pub fn toggle_job(&self, id: JobId) -> Result<Job, OrchestratorError> {
        self.scheduler.toggle(id)
    }

    /// Validate and queue a manual run.
    pub fn enqueue_manual_run(&self, request: ManualRunRequest) -> Result<RunAccepted, OrchestratorError> {
        let limit = match request.limit {
            None => self.default_limit,
            Some(l) if (1..=MAX_MANUAL_LIMIT).contains(&l) => {
                usize::try_from(l).map_err(|e| OrchestratorError::InvalidRequest(e.to_string()))?
            }
            Some(l) => {
                return Err(OrchestratorError::InvalidRequest(format!(
                    "limit must be between 1 and {MAX_MANUAL_LIMIT}, got {l}"
                )))
            }
        };
        let query = QueryParams::new(request.region, request.category, limit);
        let run_id = self.queue.enqueue(RunRequest::Manual {
            query,
            trigger: request.trigger,
        })?;
        info!(run_id = %run_id, "manual run accepted");
        Ok(RunAccepted {
            run_id,
            status: RunStatus::Pending,
            queue_size: self.queue.queue_size(),
        })
    }

    /// Status of a run, including the verbatim error of a failed run.
    pub fn run_status(&self, id: RunId) -> Result<RunStatusResponse, OrchestratorError> {
        self.ledger
            .get_run(id)
            .map(RunStatusResponse::from)
            .ok_or(OrchestratorError::RunNotFound(id))
    }

    /// Queue depth.
    #[must_use]
    pub fn queue_depth(&self) -> QueueDepth {
        QueueDepth {
            queue_size: self.queue.queue_size(),
            is_running: self.queue.is_running(),
            stats: self.queue.stats(),
        }
    }

    /// Recent runs newest first, optionally for one job.
    #[must_use]
    pub fn list_runs(&self, job_id: Option<JobId>, limit: usize) -> Vec<Run> {
        self.ledger.list_runs(job_id, limit)
    }

    /// Ledger transition history.
    #[must_use]
    pub fn ledger_entries(&self) -> Vec<LedgerEntry> {
        self.ledger.entries()
    }

    /// Notifications newest first.
    #[must_use]
    pub fn list_notifications(&self, limit: usize, offset: usize) -> Vec<Notification> {
        self.ledger.list_notifications(limit, offset)
    }

    /// Unread notification count.
    #[must_use]
    pub fn unread_notifications(&self) -> usize {
        self.ledger.unread_count()
    }

    /// Mark a notification read.
    pub fn mark_notification_read(&self, id: NotificationId) -> Result<(), OrchestratorError> {
        self.ledger.mark_read(id)
    }

    /// Mark every notification read.
    pub fn mark_all_notifications_read(&self) -> Result<usize, OrchestratorError> {
        self.ledger.mark_all_read()
    }

    /// Delete a notification.
    pub fn delete_notification(&self, id: NotificationId) -> Result<(), OrchestratorError> {
        self.ledger.delete_notification(id)
    }

    /// Live notification stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    /// Health snapshot.
    #[must_use]
    pub fn health(&self) -> Health {
        Health {
            ok: self.queue.is_running(),
            timers: self.scheduler.timer_count(),
            queue_size: self.queue.queue_size(),
            catalog_size: self.catalog.len(),
        }
    }

    /// The job scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    /// Stop timers, then let the executing run finish and stop the worker.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown();
        self.queue.shutdown().await;
    }
}
