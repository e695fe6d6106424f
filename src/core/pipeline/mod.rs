//! Fixed-order stage pipeline.
//!
//! Every run takes the same path: discovery, source validation, validation,
//! metrics, finalize. Stages record recoverable problems on the context and keep
//! going; a stage returns `Err` only for conditions that make the rest of the run
//! pointless, such as a provider outage.

mod discovery;
mod finalize;
mod metrics;
mod source_validation;
mod validation;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, error};

use super::catalog::CatalogStore;
use super::context::{OrchestrationContext, StageMetrics, StageName};
use super::provider::EnrichmentProvider;
use super::OrchestratorError;

pub use discovery::DiscoveryStage;
pub use finalize::FinalizeStage;
pub use metrics::{fallback_scores, MetricsStage};
pub use source_validation::{assess_sources, SourceValidationStage};
pub use validation::{candidate_urls, ItemValidator, ReachabilityValidator, ValidationStage};

/// One step of the pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage name, entered on the context before `run`.
    fn name(&self) -> StageName;

    /// Transform the context. `Err` aborts the remaining stages of this run.
    async fn run(&self, ctx: &mut OrchestrationContext) -> Result<(), OrchestratorError>;
}

/// Collaborators of the standard stage list.
#[derive(Clone)]
pub struct PipelineDeps {
    /// Discovery and scoring.
    pub provider: Arc<dyn EnrichmentProvider>,
    /// Item classification.
    pub validator: Arc<dyn ItemValidator>,
    /// Result storage.
    pub catalog: Arc<dyn CatalogStore>,
}

/// Runs an ordered list of stages over one context.
pub struct PipelineExecutor {
    stages: Vec<Arc<dyn Stage>>,
    gate: Mutex<()>,
}

impl PipelineExecutor {
    /// The standard five-stage pipeline.
    #[must_use]
    pub fn standard(deps: PipelineDeps) -> Self {
        Self::with_stages(vec![
            Arc::new(DiscoveryStage::new(deps.provider.clone())),
            Arc::new(SourceValidationStage),
            Arc::new(ValidationStage::new(deps.validator)),
            Arc::new(MetricsStage::new(deps.provider)),
            Arc::new(FinalizeStage::new(deps.catalog)),
        ])
    }

    /// Pipeline over a custom stage list.
    #[must_use]
    pub fn with_stages(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self {
            stages,
            gate: Mutex::new(()),
        }
    }

    /// Stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<StageName> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage in order.
    ///
    /// Executions are serialized: a second caller waits until the first returns.
    ///
    /// # Errors
    ///
    /// The first fatal stage error; remaining stages are skipped.
    pub async fn execute(
        &self,
        mut ctx: OrchestrationContext,
    ) -> Result<OrchestrationContext, OrchestratorError> {
        let _guard = self.gate.lock().await;
        for stage in &self.stages {
            let name = stage.name();
            ctx.enter(name);
            let errors_before = ctx.errors.len();
            let started = Instant::now();
            let result = stage.run(&mut ctx).await;
            ctx.stage_metrics.push(StageMetrics {
                stage: name,
                elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                errors: ctx.errors.len() - errors_before,
            });
            if let Err(err) = result {
                error!(run_id = ?ctx.run_id, stage = %name, error = %err, "stage aborted run");
                return Err(err);
            }
            debug!(run_id = ?ctx.run_id, stage = %name, "stage finished");
        }
        ctx.enter(StageName::Completed);
        Ok(ctx)
    }
}
