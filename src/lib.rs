//! # Prometheus Scout
//!
//! Run orchestration for the Prometheus scouting pipeline.
//!
//! The crate discovers candidate items through an external enrichment provider,
//! validates and scores them, and stores the accepted results in a catalog. The
//! interesting part is the coordination around that work:
//!
//! - **JobScheduler**: persisted recurring jobs with one timer per active job.
//!   The next firing is computed from the *completion* time of the previous run.
//! - **TaskQueue**: an unbounded FIFO drained by exactly one worker, so at most one
//!   run talks to the provider and the catalog at any time.
//! - **PipelineExecutor**: a fixed list of stages (discovery, source validation,
//!   validation, metrics, finalize) threading one mutable context per run. Item
//!   level failures are recorded on the context; only a provider outage fails a run.
//! - **RunLedger**: append-only run history plus best-effort notifications.
//!
//! ```rust,ignore
//! use prometheus_scout::builders::OrchestratorBuilder;
//! use prometheus_scout::config::OrchestratorConfig;
//! use prometheus_scout::core::JobSpec;
//!
//! let orchestrator = OrchestratorBuilder::new(OrchestratorConfig::from_env()?)
//!     .build()?;
//!
//! let job = orchestrator.create_job(JobSpec::new("weekly-br", 1, "weeks"))?;
//! let run_id = orchestrator.enqueue_manual_run(Default::default())?.run_id;
//! let status = orchestrator.run_status(run_id)?;
//! ```
//!
//! For complete scenarios, see the integration tests under `tests/`.

#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Domain model, pipeline, queue, scheduler and ledger.
pub mod core;
/// Configuration models and environment loading.
pub mod config;
/// Builders wiring service objects from configuration.
pub mod builders;
/// Infrastructure adapters: queues, stores, provider, probe, notifier.
pub mod infra;
/// Runtime adapters and the inbound API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
