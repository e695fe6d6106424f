//! Recurring job registry with one in-memory timer per active job.
//!
//! A timer fires at the job's `next_run`, reloads the job and submits a scheduled
//! run built from the current config. When that run finishes, `last_run` and
//! `next_run` are computed from its completion time and the timer is registered
//! again.
//!
//! Every schedule mutation persists the job and (re)registers or removes its timer
//! while holding the timer-table lock, so a timer never fires against a stale
//! configuration. Firing submits its run under the same lock, and deletion detaches
//! history before releasing it, so no run can be created for a deleted job. Timers
//! are tagged with a generation; a timer whose generation no longer matches the
//! table entry does nothing.
//!
//! Lock order: the timer table is taken before any store or queue lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::context::QueryParams;
use super::job::{Job, JobId, JobPatch, JobSpec};
use super::ledger::RunLedger;
use super::run::{RunFinished, RunRequest};
use super::store::JobStore;
use super::task_queue::RunSubmitter;
use super::OrchestratorError;
use crate::runtime::TokioSpawner;
use crate::util::clock::{now, until};

struct TimerEntry {
    generation: u64,
    fire_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

struct SchedulerInner {
    jobs: Arc<dyn JobStore>,
    submitter: Arc<dyn RunSubmitter>,
    ledger: Arc<RunLedger>,
    spawner: TokioSpawner,
    timers: Mutex<HashMap<JobId, TimerEntry>>,
    generation: AtomicU64,
    default_limit: usize,
    stopped: AtomicBool,
}

/// Owns job timers and job CRUD.
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl JobScheduler {
    /// Scheduler submitting runs to `submitter`. No timers exist until [`start`](Self::start).
    pub fn new(
        jobs: Arc<dyn JobStore>,
        submitter: Arc<dyn RunSubmitter>,
        ledger: Arc<RunLedger>,
        spawner: TokioSpawner,
        default_limit: usize,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                jobs,
                submitter,
                ledger,
                spawner,
                timers: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                default_limit,
                stopped: AtomicBool::new(false),
            }),
            listener: Mutex::new(None),
        }
    }

    /// Register a timer for every active job and start consuming run completions.
    ///
    /// Each timer fires at the persisted `next_run`, or immediately when it is
    /// missing or already past. Returns the number of registered timers.
    pub fn start(&self, completions: mpsc::UnboundedReceiver<RunFinished>) -> usize {
        let mut timers = self.inner.timers.lock();
        let mut registered = 0;
        for job in self.inner.jobs.list_jobs() {
            if !job.is_active {
                continue;
            }
            let fire_at = job.next_run.unwrap_or_else(now);
            self.inner.register_locked(&mut timers, job.id, fire_at);
            registered += 1;
        }
        drop(timers);

        let weak = Arc::downgrade(&self.inner);
        let handle = self.inner.spawner.spawn(listen(weak, completions));
        if let Some(previous) = self.listener.lock().replace(handle) {
            previous.abort();
        }
        info!(registered, "job scheduler started");
        registered
    }

    /// Validate and persist a new active job, then register its timer.
    pub fn create(&self, spec: JobSpec) -> Result<Job, OrchestratorError> {
        let created = now();
        let job = spec.into_job(created)?;
        let mut timers = self.inner.timers.lock();
        self.inner.jobs.insert_job(&job)?;
        if let Some(next_run) = job.next_run {
            self.inner.register_locked(&mut timers, job.id, next_run);
        }
        info!(job_id = %job.id, name = %job.name, next_run = ?job.next_run, "job created");
        Ok(job)
    }

    /// Apply a validated patch. Interval or activation changes re-register or
    /// remove the timer in the same critical section as the write.
    pub fn update(&self, id: JobId, patch: &JobPatch) -> Result<Job, OrchestratorError> {
        let mut timers = self.inner.timers.lock();
        let mut job = self
            .inner
            .jobs
            .get_job(id)
            .ok_or(OrchestratorError::JobNotFound(id))?;
        let change = patch.apply(&mut job, now())?;
        self.inner.jobs.update_job(&job)?;
        if change.any() {
            self.inner.sync_timer_locked(&mut timers, &job);
        }
        info!(job_id = %id, interval_changed = change.interval, active = job.is_active, "job updated");
        Ok(job)
    }

    /// Flip `is_active`. Deactivation removes the timer and keeps history.
    pub fn toggle(&self, id: JobId) -> Result<Job, OrchestratorError> {
        let active = self
            .inner
            .jobs
            .get_job(id)
            .ok_or(OrchestratorError::JobNotFound(id))?
            .is_active;
        self.update(
            id,
            &JobPatch {
                is_active: Some(!active),
                ..JobPatch::default()
            },
        )
    }

    /// Remove a job and its timer, clearing references to it from run history
    /// and notifications.
    pub fn delete(&self, id: JobId) -> Result<(), OrchestratorError> {
        let mut timers = self.inner.timers.lock();
        if !self.inner.jobs.delete_job(id)? {
            return Err(OrchestratorError::JobNotFound(id));
        }
        if let Some(entry) = timers.remove(&id) {
            entry.handle.abort();
        }
        self.inner.ledger.detach_job(id)?;
        drop(timers);
        info!(job_id = %id, "job deleted");
        Ok(())
    }

    /// Fetch a job.
    pub fn get(&self, id: JobId) -> Result<Job, OrchestratorError> {
        self.inner
            .jobs
            .get_job(id)
            .ok_or(OrchestratorError::JobNotFound(id))
    }

    /// Jobs, optionally filtered by activation.
    #[must_use]
    pub fn list(&self, active: Option<bool>) -> Vec<Job> {
        self.inner
            .jobs
            .list_jobs()
            .into_iter()
            .filter(|j| active.is_none_or(|a| j.is_active == a))
            .collect()
    }

    /// Number of registered timers.
    #[must_use]
    pub fn timer_count(&self) -> usize {
        self.inner.timers.lock().len()
    }

    /// Whether a timer is registered for `id`.
    #[must_use]
    pub fn is_registered(&self, id: JobId) -> bool {
        self.inner.timers.lock().contains_key(&id)
    }

    /// Firing time of the registered timer for `id`.
    #[must_use]
    pub fn fire_at(&self, id: JobId) -> Option<DateTime<Utc>> {
        self.inner.timers.lock().get(&id).map(|t| t.fire_at)
    }

    /// Apply a run completion directly. Normally driven by the listener started in
    /// [`start`](Self::start).
    pub fn on_run_finished(&self, event: &RunFinished) {
        self.inner.on_run_finished(event);
    }

    /// Abort every timer and the completion listener.
    pub fn shutdown(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        let mut timers = self.inner.timers.lock();
        for (_, entry) in timers.drain() {
            entry.handle.abort();
        }
        drop(timers);
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        info!("job scheduler stopped");
    }
}

impl SchedulerInner {
    fn register_locked(
        self: &Arc<Self>,
        timers: &mut HashMap<JobId, TimerEntry>,
        job_id: JobId,
        fire_at: DateTime<Utc>,
    ) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let weak = Arc::downgrade(self);
        let handle = self.spawner.spawn(async move {
            tokio::time::sleep(until(fire_at)).await;
            if let Some(inner) = weak.upgrade() {
                inner.fire(job_id, generation);
            }
        });
        if let Some(previous) = timers.insert(
            job_id,
            TimerEntry {
                generation,
                fire_at,
                handle,
            },
        ) {
            previous.handle.abort();
        }
        debug!(job_id = %job_id, fire_at = %fire_at, "timer registered");
    }

    fn sync_timer_locked(self: &Arc<Self>, timers: &mut HashMap<JobId, TimerEntry>, job: &Job) {
        match (job.is_active, job.next_run) {
            (true, Some(next_run)) => self.register_locked(timers, job.id, next_run),
            (true, None) => self.register_locked(timers, job.id, now()),
            (false, _) => {
                if let Some(entry) = timers.remove(&job.id) {
                    entry.handle.abort();
                    debug!(job_id = %job.id, "timer removed");
                }
            }
        }
    }

    fn fire(self: &Arc<Self>, job_id: JobId, generation: u64) {
        let mut timers = self.timers.lock();
        match timers.get(&job_id) {
            Some(entry) if entry.generation == generation => {
                timers.remove(&job_id);
            }
            _ => {
                debug!(job_id = %job_id, generation, "stale timer ignored");
                return;
            }
        }
        let Some(job) = self.jobs.get_job(job_id).filter(|j| j.is_active) else {
            return;
        };

        let request = RunRequest::Scheduled {
            job_id,
            query: QueryParams::from_config(&job.config, self.default_limit),
        };
        match self.submitter.submit(request) {
            Ok(run_id) => info!(job_id = %job_id, run_id = %run_id, "job fired"),
            Err(err) => {
                error!(job_id = %job_id, error = %err, "failed to submit scheduled run");
                self.advance_locked(&mut timers, job, None, now());
            }
        }
    }

    fn on_run_finished(self: &Arc<Self>, event: &RunFinished) {
        let Some(job_id) = event.job_id else {
            return;
        };
        let mut timers = self.timers.lock();
        let Some(job) = self.jobs.get_job(job_id) else {
            debug!(job_id = %job_id, run_id = %event.run_id, "completion for deleted job");
            return;
        };
        let job = self.advance_locked(&mut timers, job, Some(event.completed_at), event.completed_at);
        info!(
            job_id = %job_id,
            run_id = %event.run_id,
            status = event.status.as_str(),
            next_run = ?job.next_run,
            "job rescheduled"
        );
    }

    /// Persist `next_run` one interval after `from` and re-register the timer of
    /// an active job.
    fn advance_locked(
        self: &Arc<Self>,
        timers: &mut HashMap<JobId, TimerEntry>,
        mut job: Job,
        last_run: Option<DateTime<Utc>>,
        from: DateTime<Utc>,
    ) -> Job {
        if last_run.is_some() {
            job.last_run = last_run;
        }
        job.next_run = Some(job.next_after(from));
        job.updated_at = now();
        if let Err(err) = self.jobs.update_job(&job) {
            warn!(job_id = %job.id, error = %err, "failed to persist next_run");
        }
        if job.is_active {
            if let Some(next_run) = job.next_run {
                self.register_locked(timers, job.id, next_run);
            }
        }
        job
    }
}

async fn listen(weak: Weak<SchedulerInner>, mut completions: mpsc::UnboundedReceiver<RunFinished>) {
    while let Some(event) = completions.recv().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        inner.on_run_finished(&event);
    }
}
