use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::Stage;
use crate::core::context::{OrchestrationContext, StageErrorKind, StageName};
use crate::core::item::{Item, RankedItem, Scores};
use crate::core::provider::{EnrichmentProvider, ProviderError};
use crate::core::OrchestratorError;

const BASE_SCORE: f64 = 40.0;

fn mentions(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Heuristic scores computed from item attributes when the provider cannot score.
#[must_use]
pub fn fallback_scores(item: &Item) -> Scores {
    let technologies = item.string_list("technologies");
    let tech_text = technologies.join(" ").to_lowercase();
    let profile = format!(
        "{} {}",
        tech_text,
        item.attributes
            .get("description")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_lowercase()
    );

    let mut market = BASE_SCORE;
    if mentions(&profile, &["computer vision", "cv", "vision"]) {
        market += 15.0;
    }
    if mentions(&profile, &["nlp", "natural language", "language model"]) {
        market += 10.0;
    }
    if mentions(&profile, &["deep learning", "neural network"]) {
        market += 10.0;
    }

    let mut technical = BASE_SCORE;
    if technologies.len() >= 2 {
        technical += 10.0;
    }
    if mentions(&tech_text, &["deep learning", "machine learning"]) {
        technical += 15.0;
    }

    let mut partnership = BASE_SCORE;
    let funding = item.number("last_funding_amount").unwrap_or_default();
    if funding >= 10_000_000.0 {
        partnership += 25.0;
    } else if funding >= 1_000_000.0 {
        partnership += 15.0;
    } else if funding > 0.0 {
        partnership += 5.0;
    }
    if item.string_list("investor_names").len() >= 2 {
        partnership += 10.0;
    }

    let mut scores = Scores::weighted(market.min(100.0), technical.min(100.0), partnership.min(100.0));
    scores.fallback = true;
    scores
}

/// Scores validated items and ranks them by total, highest first.
pub struct MetricsStage {
    provider: Arc<dyn EnrichmentProvider>,
}

impl MetricsStage {
    /// Stage scoring through `provider`.
    pub fn new(provider: Arc<dyn EnrichmentProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Stage for MetricsStage {
    fn name(&self) -> StageName {
        StageName::Metrics
    }

    async fn run(&self, ctx: &mut OrchestrationContext) -> Result<(), OrchestratorError> {
        let mut fallbacks = 0usize;
        for idx in 0..ctx.validated.len() {
            let reply = self.provider.score(&ctx.validated[idx]).await;
            let identity = ctx.validated[idx].identity.clone();
            let scores = match reply {
                Ok(reply) => {
                    ctx.usage.add_call(reply.cost.tokens);
                    reply.scores
                }
                Err(ProviderError::Outage(msg)) => {
                    return Err(OrchestratorError::ProviderOutage(msg));
                }
                Err(err) => {
                    ctx.usage.add_call(0);
                    let kind = match err {
                        ProviderError::Transient(_) => StageErrorKind::Transient,
                        _ => StageErrorKind::Structural,
                    };
                    ctx.record_error(kind, Some(&identity), err.to_string());
                    fallbacks += 1;
                    fallback_scores(&ctx.validated[idx])
                }
            };
            debug!(item = %identity, total = scores.total, fallback = scores.fallback, "item scored");
            ctx.validated[idx].scores = Some(scores);
        }

        let mut ranked: Vec<RankedItem> = ctx
            .validated
            .iter()
            .filter_map(|item| {
                item.scores.clone().map(|scores| RankedItem {
                    identity: item.identity.clone(),
                    name: item.name.clone(),
                    scores,
                })
            })
            .collect();
        ranked.sort_by(|a, b| b.scores.total.total_cmp(&a.scores.total));
        ctx.ranked = ranked;
        info!(run_id = ?ctx.run_id, scored = ctx.ranked.len(), fallbacks, "metrics finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fallback_baseline() {
        let item = Item::from_value(json!({"name": "Plain"})).unwrap();
        let scores = fallback_scores(&item);
        assert!(scores.fallback);
        assert!((scores.total - 40.0).abs() < 1e-9);
    }

    #[test]
    fn fallback_rewards_signals() {
        let item = Item::from_value(json!({
            "name": "Acme Vision",
            "technologies": ["computer vision", "deep learning"],
            "last_funding_amount": 12_000_000,
            "investor_names": ["A", "B"]
        }))
        .unwrap();
        let scores = fallback_scores(&item);
        assert!((scores.market_demand - 65.0).abs() < 1e-9);
        assert!((scores.technical_level - 65.0).abs() < 1e-9);
        assert!((scores.partnership_potential - 75.0).abs() < 1e-9);
        assert!((scores.total - 68.0).abs() < 1e-9);
    }
}
