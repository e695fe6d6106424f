//! Per-run orchestration context threaded through every pipeline stage.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::item::{InvalidItem, Item, RankedItem};
use super::job::JobConfig;
use super::run::{InvalidSummary, RunId, RunOutput};

/// How discovery should search, derived from which query fields are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// Region and category both given.
    Specific,
    /// Category only: search every region.
    Global,
    /// Region only: find emerging categories there.
    MarketDemand,
    /// Neither: emerging categories worldwide.
    GlobalMarketDemand,
}

impl SearchStrategy {
    /// Derive the strategy from the presence of region and category.
    #[must_use]
    pub const fn derive(has_region: bool, has_category: bool) -> Self {
        match (has_region, has_category) {
            (true, true) => Self::Specific,
            (false, true) => Self::Global,
            (true, false) => Self::MarketDemand,
            (false, false) => Self::GlobalMarketDemand,
        }
    }
}

/// Query parameters for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParams {
    /// Geographic filter.
    pub region: Option<String>,
    /// Category or sector filter.
    pub category: Option<String>,
    /// Maximum number of items to discover.
    pub limit: usize,
    /// Search strategy.
    pub strategy: SearchStrategy,
}

impl QueryParams {
    /// Build parameters, treating blank strings as absent and deriving the strategy.
    #[must_use]
    pub fn new(region: Option<String>, category: Option<String>, limit: usize) -> Self {
        let region = non_blank(region);
        let category = non_blank(category);
        let strategy = SearchStrategy::derive(region.is_some(), category.is_some());
        Self {
            region,
            category,
            limit,
            strategy,
        }
    }

    /// Read `region`/`country`, `category`/`sector` and `limit` from a job config.
    #[must_use]
    pub fn from_config(config: &JobConfig, default_limit: usize) -> Self {
        let text = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| config.get(*k).and_then(Value::as_str))
                .map(ToString::to_string)
        };
        let limit = config
            .get("limit")
            .and_then(Value::as_u64)
            .and_then(|l| usize::try_from(l).ok())
            .filter(|l| *l > 0)
            .unwrap_or(default_limit);
        Self::new(text(&["region", "country"]), text(&["category", "sector"]), limit)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Pipeline position of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Context created, no stage entered yet.
    Starting,
    /// Candidate discovery.
    Discovery,
    /// Source reliability check.
    SourceValidation,
    /// Valid/invalid partitioning.
    Validation,
    /// Scoring.
    Metrics,
    /// Catalog writes.
    Finalize,
    /// All stages done.
    Completed,
}

impl StageName {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Discovery => "discovery",
            Self::SourceValidation => "source_validation",
            Self::Validation => "validation",
            Self::Metrics => "metrics",
            Self::Finalize => "finalize",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a non-fatal error recorded during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageErrorKind {
    /// Network or timeout against the provider.
    Transient,
    /// Provider data did not have the expected shape.
    Structural,
    /// A catalog write failed.
    Store,
}

/// A structured non-fatal error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    /// Stage that recorded it.
    pub stage: StageName,
    /// Category.
    pub kind: StageErrorKind,
    /// Affected item identity, if the error is item-scoped.
    pub item: Option<String>,
    /// Description.
    pub message: String,
}

/// Timing and volume of one executed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageMetrics {
    /// Stage.
    pub stage: StageName,
    /// Wall time in milliseconds.
    pub elapsed_ms: u64,
    /// Errors the stage added to the context.
    pub errors: usize,
}

/// Running provider usage for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens consumed.
    pub tokens: u64,
    /// Provider calls made.
    pub calls: u32,
}

impl Usage {
    /// Account for one provider call.
    pub fn add_call(&mut self, tokens: u64) {
        self.tokens = self.tokens.saturating_add(tokens);
        self.calls = self.calls.saturating_add(1);
    }
}

/// Receives stage transitions so progress is visible outside the worker.
pub trait StageObserver: Send + Sync {
    /// Called when a stage is entered.
    fn on_stage(&self, stage: StageName);
}

/// Ephemeral state owned by exactly one in-flight run.
pub struct OrchestrationContext {
    /// Run owning this context, when executed through the queue.
    pub run_id: Option<RunId>,
    /// Query parameters.
    pub query: QueryParams,
    /// Identities already known to the catalog; discovery never re-surfaces them.
    pub exclusions: HashSet<String>,
    /// Items produced by discovery.
    pub discovered: Vec<Item>,
    /// Items accepted by validation.
    pub validated: Vec<Item>,
    /// Items rejected by validation.
    pub invalid: Vec<InvalidItem>,
    /// Validated items ordered by total score, highest first.
    pub ranked: Vec<RankedItem>,
    /// Per-stage timings.
    pub stage_metrics: Vec<StageMetrics>,
    /// Provider usage.
    pub usage: Usage,
    /// Current stage.
    pub current_stage: StageName,
    /// Accumulated non-fatal errors.
    pub errors: Vec<StageError>,
    /// Discovery payloads dropped as unparseable.
    pub dropped: usize,
    /// Discovery results skipped because they were already known or duplicated.
    pub skipped_known: usize,
    /// Catalog records written by finalize.
    pub stored: usize,
    observer: Option<Arc<dyn StageObserver>>,
}

impl fmt::Debug for OrchestrationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestrationContext")
            .field("run_id", &self.run_id)
            .field("query", &self.query)
            .field("current_stage", &self.current_stage)
            .field("discovered", &self.discovered.len())
            .field("validated", &self.validated.len())
            .field("invalid", &self.invalid.len())
            .field("errors", &self.errors.len())
            .finish_non_exhaustive()
    }
}

impl OrchestrationContext {
    /// Fresh context for `query` excluding the given identities.
    #[must_use]
    pub fn new(query: QueryParams, exclusions: HashSet<String>) -> Self {
        Self {
            run_id: None,
            query,
            exclusions,
            discovered: Vec::new(),
            validated: Vec::new(),
            invalid: Vec::new(),
            ranked: Vec::new(),
            stage_metrics: Vec::new(),
            usage: Usage::default(),
            current_stage: StageName::Starting,
            errors: Vec::new(),
            dropped: 0,
            skipped_known: 0,
            stored: 0,
            observer: None,
        }
    }

    /// Tag the context with its run.
    #[must_use]
    pub const fn with_run(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Report stage transitions to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn StageObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Mark `stage` as current and tell the observer. Stages call this before working.
    pub fn enter(&mut self, stage: StageName) {
        self.current_stage = stage;
        debug!(run_id = ?self.run_id, stage = %stage, "entering stage");
        if let Some(observer) = &self.observer {
            observer.on_stage(stage);
        }
    }

    /// Record a non-fatal error.
    pub fn record_error(
        &mut self,
        kind: StageErrorKind,
        item: Option<&str>,
        message: impl Into<String>,
    ) {
        let error = StageError {
            stage: self.current_stage,
            kind,
            item: item.map(ToString::to_string),
            message: message.into(),
        };
        warn!(
            run_id = ?self.run_id,
            stage = %error.stage,
            kind = ?error.kind,
            item = ?error.item,
            "{}",
            error.message
        );
        self.errors.push(error);
    }

    /// Record an unparseable discovery payload: logged, counted and kept in `errors`.
    pub fn record_drop(&mut self, message: impl Into<String>) {
        self.dropped += 1;
        self.record_error(StageErrorKind::Structural, None, message);
    }

    /// Every discovered item is either validated or invalid.
    #[must_use]
    pub fn is_partitioned(&self) -> bool {
        self.discovered.len() == self.validated.len() + self.invalid.len()
    }

    /// Snapshot that survives the run.
    #[must_use]
    pub fn summary(&self, processing_secs: f64) -> RunOutput {
        RunOutput {
            discovered: self.discovered.len(),
            validated: self.validated.len(),
            invalid: self.invalid.len(),
            dropped: self.dropped,
            skipped_known: self.skipped_known,
            stored: self.stored,
            tokens_used: self.usage.tokens,
            provider_calls: self.usage.calls,
            processing_secs,
            ranked: self.ranked.clone(),
            invalid_items: self
                .invalid
                .iter()
                .map(|i| InvalidSummary {
                    name: i.item.name.clone(),
                    reason: i.reason.clone(),
                })
                .collect(),
            stage_metrics: self.stage_metrics.clone(),
            errors: self.errors.clone(),
        }
    }
}
