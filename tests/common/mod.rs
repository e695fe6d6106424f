//! Shared fixtures: scripted provider and validator, and an in-memory orchestrator.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use prometheus_scout::builders::OrchestratorBuilder;
use prometheus_scout::config::{OrchestratorConfig, StorageConfig};
use prometheus_scout::core::{
    Cost, Enrichment, EnrichmentProvider, EnrichmentQuery, Item, ItemValidator, ProviderError,
    RunId, RunStatus, ScoreReply, Scores, Stage, ValidationReport,
};
use prometheus_scout::runtime::{Orchestrator, RunStatusResponse};
use serde_json::{json, Value};

/// Raw item payload as a provider would return it.
pub fn item(name: &str, website: &str, funding: &[&str]) -> Value {
    json!({
        "name": name,
        "website": website,
        "sources": { "funding": funding, "investors": [], "validation": [] },
        "technologies": ["machine learning"],
    })
}

/// Provider replaying scripted discovery replies and returning fixed scores.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<Enrichment, ProviderError>>>,
    score: Result<Scores, ProviderError>,
    pub queries: Mutex<Vec<EnrichmentQuery>>,
}

impl ScriptedProvider {
    /// Every discovery call returns an empty list unless replies are queued.
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            score: Ok(Scores::weighted(80.0, 70.0, 60.0)),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful discovery reply.
    pub fn with_items(self, items: Vec<Value>) -> Self {
        self.replies.lock().push_back(Ok(Enrichment {
            items,
            cost: Cost { tokens: 100 },
        }));
        self
    }

    /// Queue a failing discovery reply.
    pub fn with_failure(self, err: ProviderError) -> Self {
        self.replies.lock().push_back(Err(err));
        self
    }

    /// Make every scoring call fail with `err`.
    pub fn with_score_failure(mut self, err: ProviderError) -> Self {
        self.score = Err(err);
        self
    }

    pub fn calls(&self) -> usize {
        self.queries.lock().len()
    }
}

#[async_trait]
impl EnrichmentProvider for ScriptedProvider {
    async fn enrich(&self, query: &EnrichmentQuery) -> Result<Enrichment, ProviderError> {
        self.queries.lock().push(query.clone());
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Enrichment::default()))
    }

    async fn score(&self, _item: &Item) -> Result<ScoreReply, ProviderError> {
        self.score.clone().map(|scores| ScoreReply {
            scores,
            cost: Cost { tokens: 10 },
        })
    }
}

/// Rejects the named identities, accepts everything else.
pub struct ListValidator {
    rejected: HashSet<String>,
}

impl ListValidator {
    pub fn rejecting(names: &[&str]) -> Self {
        Self {
            rejected: names.iter().map(|n| n.to_lowercase()).collect(),
        }
    }
}

#[async_trait]
impl ItemValidator for ListValidator {
    async fn validate(&self, item: &Item) -> ValidationReport {
        if self.rejected.contains(&item.identity) {
            ValidationReport {
                is_valid: false,
                score: 0.0,
                website_reachable: false,
                issues: vec!["Website unreachable or invalid".to_string()],
            }
        } else {
            ValidationReport {
                is_valid: true,
                score: 100.0,
                website_reachable: true,
                issues: Vec::new(),
            }
        }
    }
}

/// In-memory orchestrator running the standard pipeline over `provider`.
pub fn orchestrator(provider: Arc<ScriptedProvider>, validator: ListValidator) -> Orchestrator {
    OrchestratorBuilder::new(OrchestratorConfig::default())
        .with_provider(provider)
        .with_validator(Arc::new(validator))
        .build()
        .expect("orchestrator builds")
}

/// In-memory orchestrator running `stages` instead of the standard pipeline.
pub fn orchestrator_with_stages(stages: Vec<Arc<dyn Stage>>) -> Orchestrator {
    OrchestratorBuilder::new(OrchestratorConfig::default())
        .with_stages(stages)
        .build()
        .expect("orchestrator builds")
}

/// File-backed configuration under `dir`.
pub fn file_config(dir: &std::path::Path) -> OrchestratorConfig {
    OrchestratorConfig {
        storage: StorageConfig::File {
            dir: dir.to_path_buf(),
        },
        ..OrchestratorConfig::default()
    }
}

/// Poll until `cond` holds, panicking after a generous deadline.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..2_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// Wait for `run_id` to reach a terminal status and return it.
pub async fn wait_for_run(orch: &Orchestrator, run_id: RunId) -> RunStatusResponse {
    wait_until(|| {
        orch.run_status(run_id)
            .map(|r| r.status.is_terminal())
            .unwrap_or(false)
    })
    .await;
    orch.run_status(run_id).expect("run exists")
}

/// Output counter of a completed run.
pub fn count(run: &RunStatusResponse, key: &str) -> u64 {
    assert_eq!(run.status, RunStatus::Completed, "run failed: {:?}", run.error);
    run.output
        .as_ref()
        .and_then(|o| o.get(key))
        .and_then(Value::as_u64)
        .unwrap_or_else(|| panic!("missing output field `{key}`"))
}
