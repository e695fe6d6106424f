use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use url::Url;

use super::Stage;
use crate::core::context::{OrchestrationContext, StageName};
use crate::core::item::{InvalidItem, Item, ValidationReport};
use crate::core::provider::ReachabilityProbe;
use crate::core::OrchestratorError;

/// Decides whether one item is valid. Rejection is a classification, not a fault.
#[async_trait]
pub trait ItemValidator: Send + Sync {
    /// Classify `item`.
    async fn validate(&self, item: &Item) -> ValidationReport;
}

/// URLs worth probing for a reported website.
///
/// A bare host is tried over https first, then http. Hosts with non-ASCII characters
/// are converted to their ASCII form by the URL parser.
#[must_use]
pub fn candidate_urls(website: &str) -> Vec<String> {
    let trimmed = website.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Vec::new();
    }
    let bare = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let first_scheme = if trimmed.starts_with("http://") {
        ["http", "https"]
    } else {
        ["https", "http"]
    };
    let mut urls: Vec<String> = Vec::new();
    for scheme in first_scheme {
        let Ok(url) = Url::parse(&format!("{scheme}://{bare}")) else {
            continue;
        };
        if url.host_str().is_some_and(|h| h.contains('.')) {
            let url = url.to_string();
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
    }
    urls
}

/// Valid iff the website answers and the mean of the sub-scores reaches 50.
///
/// Sub-scores are 100 or 0 for website reachability and for the presence of
/// funding sources.
pub struct ReachabilityValidator {
    probe: Arc<dyn ReachabilityProbe>,
}

impl ReachabilityValidator {
    /// Validator probing websites through `probe`.
    pub fn new(probe: Arc<dyn ReachabilityProbe>) -> Self {
        Self { probe }
    }

    async fn website_reachable(&self, website: Option<&str>) -> bool {
        let Some(website) = website else {
            return false;
        };
        for url in candidate_urls(website) {
            if self.probe.is_reachable(&url).await {
                return true;
            }
        }
        false
    }
}

#[async_trait]
impl ItemValidator for ReachabilityValidator {
    async fn validate(&self, item: &Item) -> ValidationReport {
        let website_reachable = self.website_reachable(item.website.as_deref()).await;
        let has_funding = !item.sources.funding.is_empty();

        let mut issues = Vec::new();
        if !website_reachable {
            issues.push("Website unreachable or invalid".to_string());
        }
        if !has_funding {
            issues.push("No reliable funding sources".to_string());
        }
        let sub_scores = [website_reachable, has_funding].map(|ok| if ok { 100.0 } else { 0.0 });
        let score = sub_scores.iter().sum::<f64>() / 2.0;
        ValidationReport {
            is_valid: score >= 50.0 && website_reachable,
            score,
            website_reachable,
            issues,
        }
    }
}

/// Partitions discovered items into validated and invalid.
pub struct ValidationStage {
    validator: Arc<dyn ItemValidator>,
}

impl ValidationStage {
    /// Stage classifying items with `validator`.
    pub fn new(validator: Arc<dyn ItemValidator>) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl Stage for ValidationStage {
    fn name(&self) -> StageName {
        StageName::Validation
    }

    async fn run(&self, ctx: &mut OrchestrationContext) -> Result<(), OrchestratorError> {
        for item in &ctx.discovered {
            let report = self.validator.validate(item).await;
            let mut item = item.clone();
            if report.is_valid {
                debug!(item = %item.identity, score = report.score, "item valid");
                item.validation = Some(report);
                ctx.validated.push(item);
            } else {
                let reason = report.reason();
                debug!(item = %item.identity, reason = %reason, "item invalid");
                item.validation = Some(report);
                ctx.invalid.push(InvalidItem { item, reason });
            }
        }
        info!(
            run_id = ?ctx.run_id,
            validated = ctx.validated.len(),
            invalid = ctx.invalid.len(),
            "validation finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct OnlyHttps;

    #[async_trait]
    impl ReachabilityProbe for OnlyHttps {
        async fn is_reachable(&self, url: &str) -> bool {
            url.starts_with("https://acme.ai")
        }
    }

    fn item(website: &str, funding: bool) -> Item {
        let sources = if funding {
            json!({"funding": ["crunchbase"]})
        } else {
            json!({})
        };
        Item::from_value(json!({"name": "Acme", "website": website, "sources": sources})).unwrap()
    }

    #[test]
    fn candidates_cover_both_schemes() {
        assert_eq!(
            candidate_urls("acme.ai"),
            vec!["https://acme.ai/".to_string(), "http://acme.ai/".to_string()]
        );
        assert_eq!(candidate_urls("http://acme.ai/")[0], "http://acme.ai/");
        assert!(candidate_urls("not a url").is_empty());
        assert!(candidate_urls("").is_empty());
        assert!(candidate_urls("https://café.com")[0].starts_with("https://xn--caf-dma.com"));
    }

    #[tokio::test]
    async fn reachable_site_with_funding_is_valid() {
        let validator = ReachabilityValidator::new(Arc::new(OnlyHttps));
        let report = validator.validate(&item("acme.ai", true)).await;
        assert!(report.is_valid);
        assert!((report.score - 100.0).abs() < f64::EPSILON);
        assert_eq!(report.reason(), "valid");
    }

    #[tokio::test]
    async fn reachable_site_without_funding_is_still_valid() {
        let validator = ReachabilityValidator::new(Arc::new(OnlyHttps));
        let report = validator.validate(&item("acme.ai", false)).await;
        assert!(report.is_valid);
        assert_eq!(report.issues, vec!["No reliable funding sources".to_string()]);
    }

    #[tokio::test]
    async fn unreachable_site_is_invalid() {
        let validator = ReachabilityValidator::new(Arc::new(OnlyHttps));
        let report = validator.validate(&item("gone.example", true)).await;
        assert!(!report.is_valid);
        assert_eq!(report.reason(), "Website unreachable or invalid");
    }
}
