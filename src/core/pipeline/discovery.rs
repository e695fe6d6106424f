use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::Stage;
use crate::core::context::{OrchestrationContext, StageErrorKind, StageName};
use crate::core::item::Item;
use crate::core::provider::{EnrichmentProvider, EnrichmentQuery, ProviderError};
use crate::core::OrchestratorError;

/// Asks the provider for candidates, excluding identities already known.
pub struct DiscoveryStage {
    provider: Arc<dyn EnrichmentProvider>,
}

impl DiscoveryStage {
    /// Stage backed by `provider`.
    pub fn new(provider: Arc<dyn EnrichmentProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Stage for DiscoveryStage {
    fn name(&self) -> StageName {
        StageName::Discovery
    }

    async fn run(&self, ctx: &mut OrchestrationContext) -> Result<(), OrchestratorError> {
        let mut exclusions: Vec<String> = ctx.exclusions.iter().cloned().collect();
        exclusions.sort();
        let query = EnrichmentQuery {
            params: ctx.query.clone(),
            exclusions,
        };

        let enrichment = match self.provider.enrich(&query).await {
            Ok(enrichment) => enrichment,
            Err(ProviderError::Transient(msg)) => {
                ctx.usage.add_call(0);
                ctx.record_error(StageErrorKind::Transient, None, msg);
                return Ok(());
            }
            Err(ProviderError::Structural(msg)) => {
                return Err(OrchestratorError::StructuralParse(msg));
            }
            Err(ProviderError::Outage(msg)) => {
                return Err(OrchestratorError::ProviderOutage(msg));
            }
        };
        ctx.usage.add_call(enrichment.cost.tokens);

        let returned = enrichment.items.len();
        let mut seen = HashSet::new();
        for value in enrichment.items {
            let item = match Item::from_value(value) {
                Ok(item) => item,
                Err(reason) => {
                    ctx.record_drop(format!("unparseable discovery item: {reason}"));
                    continue;
                }
            };
            if ctx.exclusions.contains(&item.identity) || !seen.insert(item.identity.clone()) {
                debug!(item = %item.identity, "skipping known item");
                ctx.skipped_known += 1;
                continue;
            }
            if ctx.discovered.len() >= ctx.query.limit {
                continue;
            }
            ctx.discovered.push(item);
        }
        info!(
            run_id = ?ctx.run_id,
            returned,
            discovered = ctx.discovered.len(),
            dropped = ctx.dropped,
            skipped = ctx.skipped_known,
            "discovery finished"
        );
        Ok(())
    }
}
