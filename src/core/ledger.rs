//! Run ledger: append-only transition history plus best-effort notifications.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use super::context::StageName;
use super::job::JobId;
use super::run::{Run, RunId, RunStatus};
use super::store::{NotificationStore, RunStore};
use super::OrchestratorError;
use crate::util::clock::{elapsed_secs, now};

/// Notification identifier.
pub type NotificationId = Uuid;

/// Run transition recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// Run created in the queue.
    Enqueued,
    /// Worker picked the run up.
    Started,
    /// Run completed.
    Completed,
    /// Run failed.
    Failed,
}

/// One append-only ledger line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Run.
    pub run_id: RunId,
    /// Job at the time of the transition.
    pub job_id: Option<JobId>,
    /// Transition.
    pub transition: Transition,
    /// When it happened.
    pub at: DateTime<Utc>,
    /// Set on terminal transitions.
    pub duration_secs: Option<f64>,
    /// Set on failure.
    pub error: Option<String>,
}

/// Destination for ledger entries.
pub trait LedgerSink: Send {
    /// Append an entry.
    fn record(&mut self, entry: LedgerEntry);

    /// Entries retained by the sink, oldest first.
    fn entries(&self) -> Vec<LedgerEntry> {
        Vec::new()
    }
}

/// Bounded in-memory sink keeping the most recent entries.
pub struct InMemoryLedgerSink {
    entries: VecDeque<LedgerEntry>,
    max_entries: usize,
}

impl InMemoryLedgerSink {
    /// Create a sink holding at most `max_entries`.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_entries.min(1024)),
            max_entries: max_entries.max(1),
        }
    }
}

impl LedgerSink for InMemoryLedgerSink {
    fn record(&mut self, entry: LedgerEntry) {
        if self.entries.len() >= self.max_entries {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    fn entries(&self) -> Vec<LedgerEntry> {
        self.entries.iter().cloned().collect()
    }
}

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Informational.
    Info,
    /// A run completed.
    Success,
    /// A run failed.
    Error,
}

/// A stored notification. Only `is_read` changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Identifier.
    pub id: NotificationId,
    /// Short title.
    pub title: String,
    /// Body.
    pub message: String,
    /// Severity.
    pub kind: NotificationKind,
    /// Related run.
    pub run_id: Option<RunId>,
    /// Related job; cleared when the job is deleted.
    pub job_id: Option<JobId>,
    /// Read flag.
    pub is_read: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Content of a notification before it is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    /// Short title.
    pub title: String,
    /// Body.
    pub message: String,
    /// Severity.
    pub kind: NotificationKind,
    /// Related run.
    pub run_id: Option<RunId>,
    /// Related job.
    pub job_id: Option<JobId>,
}

impl NotificationEvent {
    /// Event for a run that reached a terminal status.
    #[must_use]
    pub fn for_run(run: &Run) -> Self {
        let (title, kind, message) = match run.status {
            RunStatus::Failed => (
                "Discovery run failed",
                NotificationKind::Error,
                format!(
                    "Run {} failed: {}",
                    run.id,
                    run.error.as_deref().unwrap_or("unknown error")
                ),
            ),
            _ => {
                let count = |key: &str| {
                    run.output
                        .as_ref()
                        .and_then(|o| o.get(key))
                        .and_then(Value::as_u64)
                        .unwrap_or(0)
                };
                (
                    "Discovery run completed",
                    NotificationKind::Success,
                    format!(
                        "Run {} finished: {} discovered, {} validated, {} invalid",
                        run.id,
                        count("discovered"),
                        count("validated"),
                        count("invalid")
                    ),
                )
            }
        };
        Self {
            title: title.to_string(),
            message,
            kind,
            run_id: Some(run.id),
            job_id: run.job_id,
        }
    }
}

/// Delivery channel for notifications. Delivery has no acknowledgment contract.
pub trait Notifier: Send + Sync {
    /// Deliver a notification.
    fn publish(&self, notification: &Notification) -> Result<(), String>;
}

/// Records run transitions and emits notifications.
pub struct RunLedger {
    runs: Arc<dyn RunStore>,
    notifications: Arc<dyn NotificationStore>,
    sink: Mutex<Box<dyn LedgerSink>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl RunLedger {
    /// Ledger over the given stores with an entry sink.
    pub fn new(
        runs: Arc<dyn RunStore>,
        notifications: Arc<dyn NotificationStore>,
        sink: Box<dyn LedgerSink>,
    ) -> Self {
        Self {
            runs,
            notifications,
            sink: Mutex::new(sink),
            notifier: None,
        }
    }

    /// Attach a notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Persist a freshly created pending run.
    pub fn record_enqueued(&self, run: &Run) -> Result<(), OrchestratorError> {
        self.runs.insert_run(run)?;
        self.append(run, Transition::Enqueued, None);
        Ok(())
    }

    /// Move a pending run to running.
    pub fn record_start(&self, run_id: RunId) -> Result<Run, OrchestratorError> {
        let run = self.runs.modify_run(run_id, &mut |run| {
            if run.status != RunStatus::Pending {
                return Err(OrchestratorError::RunTerminal(run_id));
            }
            run.status = RunStatus::Running;
            run.started_at = Some(now());
            Ok(())
        })?;
        self.append(&run, Transition::Started, None);
        info!(run_id = %run_id, job_id = ?run.job_id, "run started");
        Ok(run)
    }

    /// Store the stage a running run has entered. Failures are logged only.
    pub fn record_stage(&self, run_id: RunId, stage: StageName) {
        let stored = self.runs.modify_run(run_id, &mut |run| {
            if run.status.is_terminal() {
                return Err(OrchestratorError::RunTerminal(run_id));
            }
            run.current_stage = Some(stage);
            Ok(())
        });
        match stored {
            Ok(_) | Err(OrchestratorError::RunTerminal(_) | OrchestratorError::RunNotFound(_)) => {}
            Err(err) => warn!(run_id = %run_id, stage = %stage, error = %err, "failed to persist stage"),
        }
    }

    /// Move a run to `completed` or `failed`, computing its duration.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::RunTerminal`] when the run already finished, and
    /// [`OrchestratorError::InvalidRequest`] when `status` is not terminal.
    pub fn record_terminal(
        &self,
        run_id: RunId,
        status: RunStatus,
        output: Option<Value>,
        error: Option<String>,
    ) -> Result<Run, OrchestratorError> {
        if !status.is_terminal() {
            return Err(OrchestratorError::InvalidRequest(format!(
                "{} is not a terminal status",
                status.as_str()
            )));
        }
        let (mut output, mut error) = (output, error);
        let run = self.runs.modify_run(run_id, &mut |run| {
            if run.status.is_terminal() {
                return Err(OrchestratorError::RunTerminal(run_id));
            }
            let completed_at = now();
            let started_at = *run.started_at.get_or_insert(completed_at);
            run.status = status;
            run.output = output.take();
            run.error = error.take();
            run.completed_at = Some(completed_at);
            run.duration_secs = Some(elapsed_secs(started_at, completed_at));
            Ok(())
        })?;

        let transition = if status == RunStatus::Completed {
            Transition::Completed
        } else {
            Transition::Failed
        };
        self.append(&run, transition, run.duration_secs);
        info!(
            run_id = %run_id,
            status = status.as_str(),
            duration_secs = run.duration_secs.unwrap_or_default(),
            "run finished"
        );
        Ok(run)
    }

    /// Store and publish a notification. Never fails; problems are logged.
    pub fn notify(&self, event: NotificationEvent) -> Notification {
        let notification = Notification {
            id: Uuid::new_v4(),
            title: event.title,
            message: event.message,
            kind: event.kind,
            run_id: event.run_id,
            job_id: event.job_id,
            is_read: false,
            created_at: now(),
        };
        if let Err(err) = self.notifications.insert_notification(&notification) {
            warn!(notification_id = %notification.id, error = %err, "failed to store notification");
        }
        if let Some(notifier) = &self.notifier {
            if let Err(err) = notifier.publish(&notification) {
                warn!(notification_id = %notification.id, error = %err, "notification not delivered");
            }
        }
        notification
    }

    /// Fail every non-terminal run that will not be re-delivered by the queue.
    ///
    /// Called once at startup: a run that was running when the process stopped can
    /// never finish.
    pub fn fail_interrupted(&self, requeued: &HashSet<RunId>) -> Result<usize, OrchestratorError> {
        let stale: Vec<Run> = self
            .runs
            .list_runs(None, usize::MAX)
            .into_iter()
            .filter(|r| !r.status.is_terminal() && !requeued.contains(&r.id))
            .collect();
        for run in &stale {
            self.record_terminal(
                run.id,
                RunStatus::Failed,
                None,
                Some("interrupted by shutdown".to_string()),
            )?;
        }
        if !stale.is_empty() {
            warn!(count = stale.len(), "failed runs interrupted by a previous shutdown");
        }
        Ok(stale.len())
    }

    /// Fetch a run.
    #[must_use]
    pub fn get_run(&self, run_id: RunId) -> Option<Run> {
        self.runs.get_run(run_id)
    }

    /// Runs newest first, optionally for one job.
    #[must_use]
    pub fn list_runs(&self, job_id: Option<JobId>, limit: usize) -> Vec<Run> {
        self.runs.list_runs(job_id, limit)
    }

    /// Transition history retained by the sink.
    #[must_use]
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.sink.lock().entries()
    }

    /// Null the job reference on runs and notifications of a deleted job.
    pub fn detach_job(&self, job_id: JobId) -> Result<(), OrchestratorError> {
        let runs = self.runs.detach_job_runs(job_id)?;
        let notifications = self.notifications.detach_job_notifications(job_id)?;
        info!(job_id = %job_id, runs, notifications, "detached history from deleted job");
        Ok(())
    }

    /// Notifications newest first.
    #[must_use]
    pub fn list_notifications(&self, limit: usize, offset: usize) -> Vec<Notification> {
        self.notifications.list_notifications(limit, offset)
    }

    /// Unread notification count.
    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.notifications.unread_count()
    }

    /// Mark one notification read.
    pub fn mark_read(&self, id: NotificationId) -> Result<(), OrchestratorError> {
        if self.notifications.mark_read(id)? {
            Ok(())
        } else {
            Err(OrchestratorError::NotificationNotFound(id))
        }
    }

    /// Mark every notification read.
    pub fn mark_all_read(&self) -> Result<usize, OrchestratorError> {
        self.notifications.mark_all_read()
    }

    /// Delete a notification.
    pub fn delete_notification(&self, id: NotificationId) -> Result<(), OrchestratorError> {
        if self.notifications.delete_notification(id)? {
            Ok(())
        } else {
            Err(OrchestratorError::NotificationNotFound(id))
        }
    }

    fn append(&self, run: &Run, transition: Transition, duration_secs: Option<f64>) {
        let entry = LedgerEntry {
            run_id: run.id,
            job_id: run.job_id,
            transition,
            at: now(),
            duration_secs,
            error: run.error.clone(),
        };
        self.sink.lock().record(entry);
    }
}
