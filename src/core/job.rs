//! Recurring job definitions and their validation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::OrchestratorError;
use crate::util::clock::delta_secs;

/// Job identifier.
pub type JobId = Uuid;

/// Opaque key-value payload handed to discovery.
pub type JobConfig = serde_json::Map<String, serde_json::Value>;

/// Upper bound on `interval_value`, keeping interval arithmetic far from overflow.
pub const MAX_INTERVAL_VALUE: i64 = 100_000;

/// Unit of a job interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    /// 60 seconds.
    Minutes,
    /// 3 600 seconds.
    Hours,
    /// 86 400 seconds.
    Days,
    /// 604 800 seconds.
    Weeks,
    /// Fixed approximation of 30.4 days (2 628 000 seconds), not calendar months.
    Months,
}

impl IntervalUnit {
    /// Every accepted unit, in ascending length.
    pub const ALL: [Self; 5] = [
        Self::Minutes,
        Self::Hours,
        Self::Days,
        Self::Weeks,
        Self::Months,
    ];

    /// Length of one unit in seconds.
    #[must_use]
    pub const fn seconds(self) -> u64 {
        match self {
            Self::Minutes => 60,
            Self::Hours => 3_600,
            Self::Days => 86_400,
            Self::Weeks => 604_800,
            Self::Months => 2_628_000,
        }
    }

    /// Wire name of the unit.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Minutes => "minutes",
            Self::Hours => "hours",
            Self::Days => "days",
            Self::Weeks => "weeks",
            Self::Months => "months",
        }
    }
}

impl fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntervalUnit {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|unit| unit.as_str() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|u| u.as_str()).collect();
                OrchestratorError::InvalidJob(format!(
                    "unsupported interval_unit `{s}`; use one of: {}",
                    names.join(", ")
                ))
            })
    }
}

/// `value * unit_to_seconds(unit)`.
#[must_use]
pub const fn interval_seconds(value: u64, unit: IntervalUnit) -> u64 {
    value.saturating_mul(unit.seconds())
}

/// Kind of work a job triggers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Run the discovery pipeline with the job's config.
    #[default]
    #[serde(alias = "startup_discovery")]
    Discovery,
}

/// A persisted recurring trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Identifier.
    pub id: JobId,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Work triggered on each firing.
    pub task_kind: TaskKind,
    /// Interval multiplier, always greater than zero.
    pub interval_value: u64,
    /// Interval unit.
    pub interval_unit: IntervalUnit,
    /// Payload passed to discovery.
    pub config: JobConfig,
    /// Inactive jobs keep their history but have no timer.
    pub is_active: bool,
    /// Completion time of the last run.
    pub last_run: Option<DateTime<Utc>>,
    /// Next scheduled firing.
    pub next_run: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Interval in seconds.
    #[must_use]
    pub const fn interval_secs(&self) -> u64 {
        interval_seconds(self.interval_value, self.interval_unit)
    }

    /// Interval as a chrono delta.
    #[must_use]
    pub fn interval(&self) -> TimeDelta {
        delta_secs(self.interval_secs())
    }

    /// Next firing measured from `from`.
    #[must_use]
    pub fn next_after(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        from.checked_add_signed(self.interval())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Creation request for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Display name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Work triggered on each firing.
    #[serde(default)]
    pub task_kind: TaskKind,
    /// Raw interval multiplier; validated to be greater than zero.
    pub interval_value: i64,
    /// Raw interval unit; validated against [`IntervalUnit::ALL`].
    pub interval_unit: String,
    /// Payload passed to discovery.
    #[serde(default)]
    pub config: JobConfig,
}

impl JobSpec {
    /// Minimal spec with an empty config.
    pub fn new(name: impl Into<String>, interval_value: i64, interval_unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            task_kind: TaskKind::Discovery,
            interval_value,
            interval_unit: interval_unit.into(),
            config: JobConfig::new(),
        }
    }

    /// Attach a discovery config.
    #[must_use]
    pub fn with_config(mut self, config: JobConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate and build an active job whose first firing is one interval from `now`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidJob`] for an empty name, an unknown unit or a
    /// non-positive value.
    pub fn into_job(self, now: DateTime<Utc>) -> Result<Job, OrchestratorError> {
        let name = validate_name(&self.name)?;
        let interval_unit = self.interval_unit.parse::<IntervalUnit>()?;
        let interval_value = validate_value(self.interval_value)?;
        let mut job = Job {
            id: Uuid::new_v4(),
            name,
            description: self.description,
            task_kind: self.task_kind,
            interval_value,
            interval_unit,
            config: self.config,
            is_active: true,
            last_run: None,
            next_run: None,
            created_at: now,
            updated_at: now,
        };
        job.next_run = Some(job.next_after(now));
        Ok(job)
    }
}

/// Partial update of a job. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobPatch {
    /// New name.
    #[serde(default)]
    pub name: Option<String>,
    /// New description.
    #[serde(default)]
    pub description: Option<String>,
    /// New interval multiplier.
    #[serde(default)]
    pub interval_value: Option<i64>,
    /// New interval unit.
    #[serde(default)]
    pub interval_unit: Option<String>,
    /// Replacement discovery config.
    #[serde(default)]
    pub config: Option<JobConfig>,
    /// Activate or deactivate.
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// What a patch changed about the schedule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleChange {
    /// Interval value or unit changed.
    pub interval: bool,
    /// Activation flag flipped.
    pub activation: bool,
}

impl ScheduleChange {
    /// True when the timer must be re-evaluated.
    #[must_use]
    pub const fn any(self) -> bool {
        self.interval || self.activation
    }
}

impl JobPatch {
    /// Validate every field, then apply them to `job`. Nothing is written on error.
    ///
    /// A changed interval moves `next_run` to one new interval from `now`, as does
    /// re-activating a job.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidJob`] when any field is invalid.
    pub fn apply(&self, job: &mut Job, now: DateTime<Utc>) -> Result<ScheduleChange, OrchestratorError> {
        let name = self.name.as_deref().map(validate_name).transpose()?;
        let unit = self
            .interval_unit
            .as_deref()
            .map(str::parse::<IntervalUnit>)
            .transpose()?;
        let value = self.interval_value.map(validate_value).transpose()?;

        let mut change = ScheduleChange::default();
        if let Some(name) = name {
            job.name = name;
        }
        if let Some(description) = &self.description {
            job.description = Some(description.clone());
        }
        if let Some(config) = &self.config {
            job.config = config.clone();
        }
        if let Some(unit) = unit {
            change.interval |= unit != job.interval_unit;
            job.interval_unit = unit;
        }
        if let Some(value) = value {
            change.interval |= value != job.interval_value;
            job.interval_value = value;
        }
        if let Some(active) = self.is_active {
            change.activation = active != job.is_active;
            job.is_active = active;
        }
        if change.interval || (change.activation && job.is_active) {
            job.next_run = Some(job.next_after(now));
        }
        job.updated_at = now;
        Ok(change)
    }
}

fn validate_name(name: &str) -> Result<String, OrchestratorError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(OrchestratorError::InvalidJob("name must not be empty".into()));
    }
    Ok(trimmed.to_string())
}

fn validate_value(value: i64) -> Result<u64, OrchestratorError> {
    if value <= 0 {
        return Err(OrchestratorError::InvalidJob(
            "interval_value must be greater than zero".into(),
        ));
    }
    if value > MAX_INTERVAL_VALUE {
        return Err(OrchestratorError::InvalidJob(format!(
            "interval_value must not exceed {MAX_INTERVAL_VALUE}"
        )));
    }
    u64::try_from(value).map_err(|e| OrchestratorError::InvalidJob(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_seconds() {
        assert_eq!(interval_seconds(1, IntervalUnit::Minutes), 60);
        assert_eq!(interval_seconds(2, IntervalUnit::Hours), 7_200);
        assert_eq!(interval_seconds(1, IntervalUnit::Weeks), 604_800);
        assert_eq!(interval_seconds(1, IntervalUnit::Months), 2_628_000);
    }

    #[test]
    fn unknown_unit_rejected() {
        let err = "fortnights".parse::<IntervalUnit>().unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidJob(_)));
        assert!(err.to_string().contains("minutes, hours, days, weeks, months"));
    }

    #[test]
    fn spec_validation() {
        let now = Utc::now();
        assert!(JobSpec::new("a", 0, "minutes").into_job(now).is_err());
        assert!(JobSpec::new("a", -3, "minutes").into_job(now).is_err());
        assert!(JobSpec::new("  ", 1, "minutes").into_job(now).is_err());
        assert!(JobSpec::new("a", 1, "years").into_job(now).is_err());

        let job = JobSpec::new(" weekly ", 1, "minutes").into_job(now).unwrap();
        assert_eq!(job.name, "weekly");
        assert!(job.is_active);
        assert_eq!(job.next_run, Some(now + TimeDelta::seconds(60)));
        assert!(job.last_run.is_none());
    }

    #[test]
    fn patch_is_all_or_nothing() {
        let now = Utc::now();
        let mut job = JobSpec::new("a", 1, "hours").into_job(now).unwrap();
        let before = job.clone();
        let patch = JobPatch {
            name: Some("renamed".into()),
            interval_value: Some(0),
            ..JobPatch::default()
        };
        assert!(patch.apply(&mut job, now).is_err());
        assert_eq!(job, before);
    }

    #[test]
    fn patch_interval_moves_next_run() {
        let created = Utc::now();
        let mut job = JobSpec::new("a", 1, "hours").into_job(created).unwrap();
        let later = created + TimeDelta::seconds(10);
        let change = JobPatch {
            interval_unit: Some("days".into()),
            ..JobPatch::default()
        }
        .apply(&mut job, later)
        .unwrap();
        assert!(change.interval);
        assert!(!change.activation);
        assert_eq!(job.next_run, Some(later + TimeDelta::days(1)));
    }

    #[test]
    fn patch_same_values_is_not_a_schedule_change() {
        let now = Utc::now();
        let mut job = JobSpec::new("a", 2, "days").into_job(now).unwrap();
        let change = JobPatch {
            interval_value: Some(2),
            interval_unit: Some("days".into()),
            is_active: Some(true),
            ..JobPatch::default()
        }
        .apply(&mut job, now)
        .unwrap();
        assert!(!change.any());
    }
}
