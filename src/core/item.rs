//! Items flowing through the pipeline and the judgments attached to them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Normalized identity used for exclusion and catalog upserts.
#[must_use]
pub fn identity_of(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Source links a provider cited for an item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSources {
    /// Links backing the funding claims.
    #[serde(default)]
    pub funding: Vec<String>,
    /// Links backing the investor list.
    #[serde(default)]
    pub investors: Vec<String>,
    /// Links confirming the item exists.
    #[serde(default)]
    pub validation: Vec<String>,
}

/// Outcome of the source-reliability check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceCheck {
    /// Whether the cited sources are trustworthy enough.
    pub is_reliable: bool,
    /// Sum of the capped category scores, 0-100.
    pub reliability_score: u32,
    /// Funding category score, capped at 50.
    pub funding_score: u32,
    /// Investor category score, capped at 30.
    pub investor_score: u32,
    /// Validation category score, capped at 20.
    pub validation_score: u32,
    /// Unrecognized sources.
    pub issues: Vec<String>,
}

/// Verdict of an [`ItemValidator`](crate::core::pipeline::ItemValidator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Final classification.
    pub is_valid: bool,
    /// Mean of the sub-scores, 0-100.
    pub score: f64,
    /// Whether the website answered the liveness probe.
    pub website_reachable: bool,
    /// Human-readable problems found.
    pub issues: Vec<String>,
}

impl ValidationReport {
    /// Issues joined for display, or `"valid"` when there are none.
    #[must_use]
    pub fn reason(&self) -> String {
        if self.issues.is_empty() {
            "valid".to_string()
        } else {
            self.issues.join("; ")
        }
    }
}

/// Scores assigned by the metrics stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    /// Market demand, 0-100.
    pub market_demand: f64,
    /// Technical level, 0-100.
    pub technical_level: f64,
    /// Partnership potential, 0-100.
    pub partnership_potential: f64,
    /// Weighted total used for ranking.
    pub total: f64,
    /// Free-form justification from the provider.
    #[serde(default)]
    pub reasoning: Option<Value>,
    /// True when computed locally because the provider failed.
    #[serde(default)]
    pub fallback: bool,
}

impl Scores {
    /// Build scores with the standard 0.4 / 0.3 / 0.3 weighting, rounded to two decimals.
    #[must_use]
    pub fn weighted(market_demand: f64, technical_level: f64, partnership_potential: f64) -> Self {
        let total = technical_level.mul_add(0.3, market_demand * 0.4) + partnership_potential * 0.3;
        Self {
            market_demand,
            technical_level,
            partnership_potential,
            total: (total * 100.0).round() / 100.0,
            reasoning: None,
            fallback: false,
        }
    }
}

/// One candidate returned by discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Normalized name, see [`identity_of`].
    pub identity: String,
    /// Name as reported.
    pub name: String,
    /// Website as reported.
    pub website: Option<String>,
    /// Cited sources.
    pub sources: ItemSources,
    /// Raw provider object, stored verbatim in the catalog.
    pub attributes: Map<String, Value>,
    /// Filled by the source-validation stage.
    pub source_check: Option<SourceCheck>,
    /// Filled by the validation stage.
    pub validation: Option<ValidationReport>,
    /// Filled by the metrics stage.
    pub scores: Option<Scores>,
}

impl Item {
    /// Parse a raw provider value.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem when the value is not an object or has
    /// no non-empty `name`.
    pub fn from_value(value: Value) -> Result<Self, String> {
        let Value::Object(attributes) = value else {
            return Err(format!("expected an object, got {}", type_name(&value)));
        };
        let name = attributes
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| "missing `name`".to_string())?
            .to_string();
        let website = attributes
            .get("website")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .map(ToString::to_string);
        let sources = attributes
            .get("sources")
            .map(parse_sources)
            .unwrap_or_default();
        Ok(Self {
            identity: identity_of(&name),
            name,
            website,
            sources,
            attributes,
            source_check: None,
            validation: None,
            scores: None,
        })
    }

    /// String array attribute, ignoring non-string entries.
    #[must_use]
    pub fn string_list(&self, key: &str) -> Vec<String> {
        self.attributes
            .get(key)
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Numeric attribute.
    #[must_use]
    pub fn number(&self, key: &str) -> Option<f64> {
        self.attributes.get(key).and_then(Value::as_f64)
    }
}

/// An item the validation stage rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidItem {
    /// The rejected item, with its validation report attached.
    pub item: Item,
    /// Why it was rejected.
    pub reason: String,
}

/// A scored item in ranking order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedItem {
    /// Item identity.
    pub identity: String,
    /// Display name.
    pub name: String,
    /// Scores.
    pub scores: Scores,
}

fn parse_sources(value: &Value) -> ItemSources {
    let list = |key: &str| -> Vec<String> {
        match value.get(key) {
            Some(Value::Array(values)) => values
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect(),
            Some(Value::String(single)) => vec![single.clone()],
            _ => Vec::new(),
        }
    };
    ItemSources {
        funding: list("funding"),
        investors: list("investors"),
        validation: list("validation"),
    }
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identity_normalizes_case_and_spacing() {
        assert_eq!(identity_of("  Acme   Vision "), "acme vision");
        assert_eq!(identity_of("ACME Vision"), identity_of("acme vision"));
    }

    #[test]
    fn parses_item_with_sources() {
        let item = Item::from_value(json!({
            "name": "Acme Vision",
            "website": "acme.ai",
            "sources": {"funding": ["https://techcrunch.com/a"], "validation": "https://acme.ai"}
        }))
        .unwrap();
        assert_eq!(item.identity, "acme vision");
        assert_eq!(item.website.as_deref(), Some("acme.ai"));
        assert_eq!(item.sources.funding.len(), 1);
        assert_eq!(item.sources.validation, vec!["https://acme.ai".to_string()]);
        assert!(item.sources.investors.is_empty());
    }

    #[test]
    fn rejects_malformed_items() {
        assert!(Item::from_value(json!("Acme")).is_err());
        assert!(Item::from_value(json!({"website": "acme.ai"})).is_err());
        assert!(Item::from_value(json!({"name": "   "})).is_err());
    }

    #[test]
    fn weighted_total() {
        let scores = Scores::weighted(80.0, 70.0, 60.0);
        assert!((scores.total - 71.0).abs() < 1e-9);
    }
}
