//! Domain model, pipeline, run queue, scheduler and ledger.

pub mod catalog;
pub mod context;
pub mod error;
pub mod item;
pub mod job;
pub mod ledger;
pub mod pipeline;
pub mod provider;
pub mod run;
pub mod scheduler;
pub mod store;
pub mod task_queue;

pub use catalog::{CatalogRecord, CatalogStore, StoredId};
pub use context::{
    OrchestrationContext, QueryParams, SearchStrategy, StageError, StageErrorKind, StageMetrics,
    StageName, StageObserver, Usage,
};
pub use error::{AppResult, OrchestratorError};
pub use item::{identity_of, InvalidItem, Item, ItemSources, RankedItem, Scores, SourceCheck, ValidationReport};
pub use job::{interval_seconds, IntervalUnit, Job, JobConfig, JobId, JobPatch, JobSpec, TaskKind};
pub use ledger::{
    InMemoryLedgerSink, LedgerEntry, LedgerSink, Notification, NotificationEvent, NotificationId,
    NotificationKind, Notifier, RunLedger, Transition,
};
pub use pipeline::{ItemValidator, PipelineDeps, PipelineExecutor, ReachabilityValidator, Stage};
pub use provider::{
    Cost, Enrichment, EnrichmentProvider, EnrichmentQuery, ProviderError, ReachabilityProbe,
    ScoreReply,
};
pub use run::{InvalidSummary, QueuedRun, Run, RunFinished, RunId, RunOutput, RunRequest, RunStatus};
pub use scheduler::JobScheduler;
pub use store::{JobStore, NotificationStore, RunStore};
pub use task_queue::{QueueBackend, QueueStats, RunSubmitter, TaskQueue};
