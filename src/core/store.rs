//! Persistence seams for jobs, runs and notifications.

use super::job::{Job, JobId};
use super::ledger::{Notification, NotificationId};
use super::run::{Run, RunId};
use super::OrchestratorError;

/// Job persistence.
pub trait JobStore: Send + Sync {
    /// Insert a new job.
    fn insert_job(&self, job: &Job) -> Result<(), OrchestratorError>;
    /// Replace an existing job.
    fn update_job(&self, job: &Job) -> Result<(), OrchestratorError>;
    /// Remove a job; returns whether it existed.
    fn delete_job(&self, id: JobId) -> Result<bool, OrchestratorError>;
    /// Fetch a job.
    fn get_job(&self, id: JobId) -> Option<Job>;
    /// Every job, oldest first.
    fn list_jobs(&self) -> Vec<Job>;
}

/// Run persistence.
pub trait RunStore: Send + Sync {
    /// Insert a new run.
    fn insert_run(&self, run: &Run) -> Result<(), OrchestratorError>;
    /// Apply `f` to a run under the store's write lock and return the stored row.
    ///
    /// `job_id` is never changed by `f`; it is cleared only by
    /// [`detach_job_runs`](Self::detach_job_runs). Nothing is written when `f`
    /// returns an error.
    fn modify_run(
        &self,
        id: RunId,
        f: &mut dyn FnMut(&mut Run) -> Result<(), OrchestratorError>,
    ) -> Result<Run, OrchestratorError>;
    /// Fetch a run.
    fn get_run(&self, id: RunId) -> Option<Run>;
    /// Runs newest first, optionally for one job.
    fn list_runs(&self, job_id: Option<JobId>, limit: usize) -> Vec<Run>;
    /// Clear `job_id` on every run of a deleted job; returns how many changed.
    fn detach_job_runs(&self, job_id: JobId) -> Result<usize, OrchestratorError>;
}

/// Notification persistence.
pub trait NotificationStore: Send + Sync {
    /// Insert a notification.
    fn insert_notification(&self, notification: &Notification) -> Result<(), OrchestratorError>;
    /// Notifications newest first.
    fn list_notifications(&self, limit: usize, offset: usize) -> Vec<Notification>;
    /// Number of unread notifications.
    fn unread_count(&self) -> usize;
    /// Mark one notification read; returns whether it existed.
    fn mark_read(&self, id: NotificationId) -> Result<bool, OrchestratorError>;
    /// Mark every notification read; returns how many changed.
    fn mark_all_read(&self) -> Result<usize, OrchestratorError>;
    /// Delete a notification; returns whether it existed.
    fn delete_notification(&self, id: NotificationId) -> Result<bool, OrchestratorError>;
    /// Clear `job_id` on notifications of a deleted job.
    fn detach_job_notifications(&self, job_id: JobId) -> Result<usize, OrchestratorError>;
}
