//! Seams to the external enrichment provider and the website liveness probe.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::context::QueryParams;
use super::item::{Item, Scores};

/// Failure of a provider call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Network error or timeout; the call may succeed later.
    #[error("transient provider error: {0}")]
    Transient(String),
    /// The reply did not have the expected shape.
    #[error("malformed provider reply: {0}")]
    Structural(String),
    /// The provider is unavailable as a whole (bad credentials, unreachable host).
    #[error("provider unavailable: {0}")]
    Outage(String),
}

/// Provider usage for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cost {
    /// Tokens consumed.
    pub tokens: u64,
}

/// Discovery request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentQuery {
    /// Query parameters.
    pub params: QueryParams,
    /// Names the provider should not return.
    pub exclusions: Vec<String>,
}

/// Raw candidates returned by discovery. Items are parsed individually downstream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enrichment {
    /// Raw item payloads.
    pub items: Vec<Value>,
    /// Usage.
    pub cost: Cost,
}

/// Scores returned for one item.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreReply {
    /// Scores.
    pub scores: Scores,
    /// Usage.
    pub cost: Cost,
}

/// External service that proposes and scores candidate items.
#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    /// Propose candidate items for `query`.
    async fn enrich(&self, query: &EnrichmentQuery) -> Result<Enrichment, ProviderError>;

    /// Score one validated item.
    async fn score(&self, item: &Item) -> Result<ScoreReply, ProviderError>;
}

/// Checks whether a URL answers.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// True when `url` responds with an accepted status.
    async fn is_reachable(&self, url: &str) -> bool;
}
