use async_trait::async_trait;
use tracing::debug;

use super::Stage;
use crate::core::context::{OrchestrationContext, StageName};
use crate::core::item::{ItemSources, SourceCheck};
use crate::core::OrchestratorError;

const TRUSTED_SOURCES: &[(&str, u32)] = &[
    ("crunchbase", 25),
    ("pitchbook", 25),
    ("angellist", 20),
    ("techcrunch", 15),
    ("venturebeat", 15),
    ("valor econômico", 15),
    ("valor economico", 15),
    ("exame", 10),
    ("forbes", 12),
    ("bloomberg", 12),
    ("abstartups", 12),
    ("distrito", 10),
    ("startupi", 8),
    ("site oficial", 10),
    ("official site", 10),
    ("press release", 8),
    ("linkedin company", 8),
];

const FUNDING_CAP: u32 = 50;
const INVESTOR_CAP: u32 = 30;
const VALIDATION_CAP: u32 = 20;
const RELIABLE_TOTAL: u32 = 40;
const RELIABLE_FUNDING: u32 = 15;

fn source_weight(source: &str) -> Option<u32> {
    let lowered = source.to_lowercase();
    TRUSTED_SOURCES
        .iter()
        .find(|(name, _)| lowered.contains(name))
        .map(|(_, weight)| *weight)
}

fn category_score(sources: &[String], cap: u32, issues: &mut Vec<String>) -> u32 {
    let mut total = 0u32;
    for source in sources {
        match source_weight(source) {
            Some(weight) => total = total.saturating_add(weight),
            None => issues.push(format!("unrecognized source: {source}")),
        }
    }
    total.min(cap)
}

/// Score the reliability of an item's cited sources.
#[must_use]
pub fn assess_sources(sources: &ItemSources) -> SourceCheck {
    let mut issues = Vec::new();
    let funding_score = category_score(&sources.funding, FUNDING_CAP, &mut issues);
    let investor_score = category_score(&sources.investors, INVESTOR_CAP, &mut issues);
    let validation_score = category_score(&sources.validation, VALIDATION_CAP, &mut issues);
    let reliability_score = funding_score + investor_score + validation_score;
    SourceCheck {
        is_reliable: reliability_score >= RELIABLE_TOTAL
            && !sources.funding.is_empty()
            && funding_score >= RELIABLE_FUNDING,
        reliability_score,
        funding_score,
        investor_score,
        validation_score,
        issues,
    }
}

/// Annotates every discovered item with a [`SourceCheck`]. Never removes items.
pub struct SourceValidationStage;

#[async_trait]
impl Stage for SourceValidationStage {
    fn name(&self) -> StageName {
        StageName::SourceValidation
    }

    async fn run(&self, ctx: &mut OrchestrationContext) -> Result<(), OrchestratorError> {
        for item in &mut ctx.discovered {
            let check = assess_sources(&item.sources);
            debug!(
                item = %item.identity,
                reliable = check.is_reliable,
                score = check.reliability_score,
                "sources assessed"
            );
            item.source_check = Some(check);
        }
        Ok(())
    }
}
