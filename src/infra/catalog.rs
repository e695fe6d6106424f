//! Catalog store keyed by item identity.

use std::collections::HashSet;
use std::path::Path;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::store::{Keyed, Table};
use crate::core::{CatalogRecord, CatalogStore, OrchestratorError, Scores, StoredId};
use crate::util::clock::now;

impl Keyed for CatalogRecord {
    type Key = StoredId;

    fn key(&self) -> StoredId {
        self.id
    }
}

/// Catalog of accepted and rejected items.
pub struct Catalog {
    records: RwLock<Table<CatalogRecord>>,
}

impl Catalog {
    /// Volatile catalog.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            records: RwLock::new(Table::in_memory()),
        }
    }

    /// Catalog persisted at `<dir>/catalog.jsonl`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, OrchestratorError> {
        Ok(Self {
            records: RwLock::new(Table::open(dir.as_ref().join("catalog.jsonl"))?),
        })
    }

    fn write(
        &self,
        identity: &str,
        attributes: &Map<String, Value>,
        rejection: Option<&str>,
    ) -> Result<StoredId, OrchestratorError> {
        let mut table = self.records.write();
        let at = now();
        if let Some(existing) = table.find(|r| r.identity == identity) {
            let id = existing.id;
            table.update_where(
                |r| r.id == id,
                |r| {
                    r.attributes = attributes.clone();
                    r.rejection = rejection.map(ToString::to_string);
                    r.updated_at = at;
                },
            )?;
            return Ok(id);
        }
        let record = CatalogRecord {
            id: Uuid::new_v4(),
            identity: identity.to_string(),
            attributes: attributes.clone(),
            scores: None,
            rejection: rejection.map(ToString::to_string),
            created_at: at,
            updated_at: at,
        };
        let id = record.id;
        table.insert(record)?;
        Ok(id)
    }
}

impl CatalogStore for Catalog {
    fn upsert(&self, identity: &str, attributes: &Map<String, Value>) -> Result<StoredId, OrchestratorError> {
        self.write(identity, attributes, None)
    }

    fn record_metrics(&self, id: StoredId, scores: &Scores) -> Result<(), OrchestratorError> {
        let changed = self
            .records
            .write()
            .update_where(|r| r.id == id, |r| r.scores = Some(scores.clone()))?;
        if changed == 0 {
            return Err(OrchestratorError::Backend(format!("catalog record {id} not found")));
        }
        Ok(())
    }

    fn record_rejection(
        &self,
        identity: &str,
        attributes: &Map<String, Value>,
        reason: &str,
    ) -> Result<StoredId, OrchestratorError> {
        self.write(identity, attributes, Some(reason))
    }

    fn known_identities(&self) -> Result<HashSet<String>, OrchestratorError> {
        Ok(self
            .records
            .read()
            .rows()
            .iter()
            .map(|r| r.identity.clone())
            .collect())
    }

    fn get(&self, identity: &str) -> Option<CatalogRecord> {
        self.records.read().find(|r| r.identity == identity).cloned()
    }

    fn len(&self) -> usize {
        self.records.read().rows().len()
    }
}
