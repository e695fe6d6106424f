use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::Stage;
use crate::core::catalog::CatalogStore;
use crate::core::context::{OrchestrationContext, StageErrorKind, StageName};
use crate::core::OrchestratorError;

/// Writes validated items with their scores and rejected items with their reasons.
///
/// A failed write is recorded against the item and the remaining items are still
/// written.
pub struct FinalizeStage {
    catalog: Arc<dyn CatalogStore>,
}

impl FinalizeStage {
    /// Stage writing to `catalog`.
    pub fn new(catalog: Arc<dyn CatalogStore>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Stage for FinalizeStage {
    fn name(&self) -> StageName {
        StageName::Finalize
    }

    async fn run(&self, ctx: &mut OrchestrationContext) -> Result<(), OrchestratorError> {
        let mut failures = Vec::new();
        let mut stored = 0usize;

        for item in &ctx.validated {
            let written = self
                .catalog
                .upsert(&item.identity, &item.attributes)
                .and_then(|id| match &item.scores {
                    Some(scores) => self.catalog.record_metrics(id, scores),
                    None => Ok(()),
                });
            match written {
                Ok(()) => stored += 1,
                Err(err) => failures.push((item.identity.clone(), err.to_string())),
            }
        }
        for invalid in &ctx.invalid {
            let item = &invalid.item;
            match self
                .catalog
                .record_rejection(&item.identity, &item.attributes, &invalid.reason)
            {
                Ok(_) => stored += 1,
                Err(err) => failures.push((item.identity.clone(), err.to_string())),
            }
        }

        for (identity, message) in failures {
            ctx.record_error(StageErrorKind::Store, Some(&identity), message);
        }
        ctx.stored = stored;
        info!(run_id = ?ctx.run_id, stored, catalog_size = self.catalog.len(), "finalize finished");
        Ok(())
    }
}
