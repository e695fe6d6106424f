//! Job, run and notification tables behind the core store traits.

use std::path::Path;

use parking_lot::RwLock;

use super::table::{Keyed, Table};
use crate::core::{
    Job, JobId, JobStore, Notification, NotificationId, NotificationStore, OrchestratorError, Run,
    RunId, RunStore,
};

impl Keyed for Job {
    type Key = JobId;

    fn key(&self) -> JobId {
        self.id
    }
}

impl Keyed for Run {
    type Key = RunId;

    fn key(&self) -> RunId {
        self.id
    }
}

impl Keyed for Notification {
    type Key = NotificationId;

    fn key(&self) -> NotificationId {
        self.id
    }
}

/// Record store for jobs, runs and notifications.
///
/// [`open`](Self::open) persists each table as a JSON-lines file under one directory:
/// `jobs.jsonl`, `runs.jsonl` and `notifications.jsonl`.
pub struct RecordStore {
    jobs: RwLock<Table<Job>>,
    runs: RwLock<Table<Run>>,
    notifications: RwLock<Table<Notification>>,
}

impl RecordStore {
    /// Volatile store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            jobs: RwLock::new(Table::in_memory()),
            runs: RwLock::new(Table::in_memory()),
            notifications: RwLock::new(Table::in_memory()),
        }
    }

    /// Store persisted under `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, OrchestratorError> {
        let dir = dir.as_ref();
        Ok(Self {
            jobs: RwLock::new(Table::open(dir.join("jobs.jsonl"))?),
            runs: RwLock::new(Table::open(dir.join("runs.jsonl"))?),
            notifications: RwLock::new(Table::open(dir.join("notifications.jsonl"))?),
        })
    }
}

impl JobStore for RecordStore {
    fn insert_job(&self, job: &Job) -> Result<(), OrchestratorError> {
        self.jobs.write().insert(job.clone())
    }

    fn update_job(&self, job: &Job) -> Result<(), OrchestratorError> {
        let changed = self
            .jobs
            .write()
            .update_where(|j| j.id == job.id, |j| *j = job.clone())?;
        if changed == 0 {
            return Err(OrchestratorError::JobNotFound(job.id));
        }
        Ok(())
    }

    fn delete_job(&self, id: JobId) -> Result<bool, OrchestratorError> {
        Ok(self.jobs.write().remove_where(|j| j.id == id)? > 0)
    }

    fn get_job(&self, id: JobId) -> Option<Job> {
        self.jobs.read().find(|j| j.id == id).cloned()
    }

    fn list_jobs(&self) -> Vec<Job> {
        self.jobs.read().rows().to_vec()
    }
}

impl RunStore for RecordStore {
    fn insert_run(&self, run: &Run) -> Result<(), OrchestratorError> {
        self.runs.write().insert(run.clone())
    }

    fn modify_run(
        &self,
        id: RunId,
        f: &mut dyn FnMut(&mut Run) -> Result<(), OrchestratorError>,
    ) -> Result<Run, OrchestratorError> {
        self.runs
            .write()
            .modify(
                |r| r.id == id,
                |r| {
                    let job_id = r.job_id;
                    f(r)?;
                    r.job_id = job_id;
                    Ok(())
                },
            )?
            .ok_or(OrchestratorError::RunNotFound(id))
    }

    fn get_run(&self, id: RunId) -> Option<Run> {
        self.runs.read().find(|r| r.id == id).cloned()
    }

    fn list_runs(&self, job_id: Option<JobId>, limit: usize) -> Vec<Run> {
        let runs = self.runs.read();
        let mut selected: Vec<Run> = runs
            .rows()
            .iter()
            .rev()
            .filter(|r| job_id.is_none() || r.job_id == job_id)
            .cloned()
            .collect();
        selected.sort_by(|a, b| b.enqueued_at.cmp(&a.enqueued_at));
        selected.truncate(limit);
        selected
    }

    fn detach_job_runs(&self, job_id: JobId) -> Result<usize, OrchestratorError> {
        self.runs
            .write()
            .update_where(|r| r.job_id == Some(job_id), |r| r.job_id = None)
    }
}

impl NotificationStore for RecordStore {
    fn insert_notification(&self, notification: &Notification) -> Result<(), OrchestratorError> {
        self.notifications.write().insert(notification.clone())
    }

    fn list_notifications(&self, limit: usize, offset: usize) -> Vec<Notification> {
        self.notifications
            .read()
            .rows()
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    fn unread_count(&self) -> usize {
        self.notifications
            .read()
            .rows()
            .iter()
            .filter(|n| !n.is_read)
            .count()
    }

    fn mark_read(&self, id: NotificationId) -> Result<bool, OrchestratorError> {
        let mut table = self.notifications.write();
        if table.find(|n| n.id == id).is_none() {
            return Ok(false);
        }
        table.update_where(|n| n.id == id && !n.is_read, |n| n.is_read = true)?;
        Ok(true)
    }

    fn mark_all_read(&self) -> Result<usize, OrchestratorError> {
        self.notifications
            .write()
            .update_where(|n| !n.is_read, |n| n.is_read = true)
    }

    fn delete_notification(&self, id: NotificationId) -> Result<bool, OrchestratorError> {
        Ok(self.notifications.write().remove_where(|n| n.id == id)? > 0)
    }

    fn detach_job_notifications(&self, job_id: JobId) -> Result<usize, OrchestratorError> {
        self.notifications
            .write()
            .update_where(|n| n.job_id == Some(job_id), |n| n.job_id = None)
    }
}
