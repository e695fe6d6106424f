//! Run records and the requests that create them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::context::{QueryParams, StageError, StageMetrics, StageName};
use super::item::RankedItem;
use super::job::JobId;

/// Run identifier.
pub type RunId = Uuid;

/// Lifecycle status of a run. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Queued, not yet picked up by the worker.
    Pending,
    /// Executing.
    Running,
    /// Finished without a fatal error.
    Completed,
    /// Finished with a fatal error.
    Failed,
}

impl RunStatus {
    /// Completed or failed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Work accepted by the task queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunRequest {
    /// Fired by a job timer with the job's config snapshot.
    Scheduled {
        /// Originating job.
        job_id: JobId,
        /// Query derived from the job config at firing time.
        query: QueryParams,
    },
    /// Submitted through the API.
    Manual {
        /// Query parameters.
        query: QueryParams,
        /// Free-form label of who triggered the run.
        #[serde(default)]
        trigger: Option<String>,
    },
}

impl RunRequest {
    /// Originating job, for scheduled runs.
    #[must_use]
    pub const fn job_id(&self) -> Option<JobId> {
        match self {
            Self::Scheduled { job_id, .. } => Some(*job_id),
            Self::Manual { .. } => None,
        }
    }

    /// Query parameters.
    #[must_use]
    pub const fn query(&self) -> &QueryParams {
        match self {
            Self::Scheduled { query, .. } | Self::Manual { query, .. } => query,
        }
    }

    /// Trigger label.
    #[must_use]
    pub fn trigger(&self) -> Option<&str> {
        match self {
            Self::Scheduled { .. } => Some("scheduler"),
            Self::Manual { trigger, .. } => trigger.as_deref(),
        }
    }
}

/// A request sitting in the queue backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRun {
    /// Run record created at enqueue time.
    pub run_id: RunId,
    /// What to execute.
    pub request: RunRequest,
    /// Enqueue time.
    pub enqueued_at: DateTime<Utc>,
}

/// Durable record of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Identifier.
    pub id: RunId,
    /// Originating job; cleared when the job is deleted.
    pub job_id: Option<JobId>,
    /// Trigger label.
    pub trigger: Option<String>,
    /// Status.
    pub status: RunStatus,
    /// Serialized request.
    pub input: Value,
    /// Output snapshot, set on completion.
    pub output: Option<Value>,
    /// Fatal error message, set on failure.
    pub error: Option<String>,
    /// Last stage entered.
    pub current_stage: Option<StageName>,
    /// Enqueue time.
    pub enqueued_at: DateTime<Utc>,
    /// Worker pickup time.
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal transition time.
    pub completed_at: Option<DateTime<Utc>>,
    /// `completed_at - started_at` in seconds.
    pub duration_secs: Option<f64>,
}

impl Run {
    /// Pending run for `queued`.
    #[must_use]
    pub fn pending(queued: &QueuedRun) -> Self {
        Self {
            id: queued.run_id,
            job_id: queued.request.job_id(),
            trigger: queued.request.trigger().map(ToString::to_string),
            status: RunStatus::Pending,
            input: serde_json::to_value(&queued.request).unwrap_or(Value::Null),
            output: None,
            error: None,
            current_stage: None,
            enqueued_at: queued.enqueued_at,
            started_at: None,
            completed_at: None,
            duration_secs: None,
        }
    }
}

/// Name and rejection reason of an invalid item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidSummary {
    /// Item name.
    pub name: String,
    /// Reason.
    pub reason: String,
}

/// Output snapshot stored on a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunOutput {
    /// Items discovered.
    pub discovered: usize,
    /// Items validated.
    pub validated: usize,
    /// Items rejected.
    pub invalid: usize,
    /// Payloads dropped as unparseable.
    pub dropped: usize,
    /// Results skipped as already known.
    pub skipped_known: usize,
    /// Catalog records written.
    pub stored: usize,
    /// Provider tokens consumed.
    pub tokens_used: u64,
    /// Provider calls made.
    pub provider_calls: u32,
    /// Wall time of the pipeline.
    pub processing_secs: f64,
    /// Scored items, best first.
    pub ranked: Vec<RankedItem>,
    /// Rejected items.
    pub invalid_items: Vec<InvalidSummary>,
    /// Per-stage timings.
    pub stage_metrics: Vec<StageMetrics>,
    /// Non-fatal errors.
    pub errors: Vec<StageError>,
}

/// Completion event sent from the worker to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunFinished {
    /// Run.
    pub run_id: RunId,
    /// Originating job, if scheduled.
    pub job_id: Option<JobId>,
    /// Terminal status.
    pub status: RunStatus,
    /// Terminal transition time.
    pub completed_at: DateTime<Utc>,
}
