//! Downstream catalog written by the finalize stage.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::item::Scores;
use super::OrchestratorError;

/// Catalog record identifier.
pub type StoredId = Uuid;

/// Accepted or rejected item as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    /// Identifier, stable across upserts of the same identity.
    pub id: StoredId,
    /// Normalized identity.
    pub identity: String,
    /// Latest attributes.
    pub attributes: Map<String, Value>,
    /// Latest scores.
    pub scores: Option<Scores>,
    /// Set for items rejected by validation.
    pub rejection: Option<String>,
    /// First write.
    pub created_at: DateTime<Utc>,
    /// Last write.
    pub updated_at: DateTime<Utc>,
}

/// Persistent catalog of discovered items.
///
/// Upserts are keyed by identity, so re-running finalize over the same items leaves
/// the catalog unchanged apart from timestamps.
pub trait CatalogStore: Send + Sync {
    /// Insert or update the record for `identity`, returning its id.
    fn upsert(&self, identity: &str, attributes: &Map<String, Value>) -> Result<StoredId, OrchestratorError>;

    /// Attach scores to a stored record.
    fn record_metrics(&self, id: StoredId, scores: &Scores) -> Result<(), OrchestratorError>;

    /// Persist a rejected item with its reason.
    fn record_rejection(
        &self,
        identity: &str,
        attributes: &Map<String, Value>,
        reason: &str,
    ) -> Result<StoredId, OrchestratorError>;

    /// Identities already stored, accepted or rejected.
    fn known_identities(&self) -> Result<HashSet<String>, OrchestratorError>;

    /// Record for `identity`.
    fn get(&self, identity: &str) -> Option<CatalogRecord>;

    /// Number of records.
    fn len(&self) -> usize;

    /// True when empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
