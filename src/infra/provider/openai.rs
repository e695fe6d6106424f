//! Enrichment provider backed by an OpenAI-compatible chat completions API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::ProviderConfig;
use crate::core::{
    Cost, Enrichment, EnrichmentProvider, EnrichmentQuery, Item, ProviderError, ScoreReply,
    Scores, SearchStrategy,
};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u64,
}

const DISCOVERY_SYSTEM: &str = "You research early-stage AI companies. Reply with JSON only.";
const SCORING_SYSTEM: &str = "You evaluate AI companies as potential partners. Reply with JSON only.";

/// Provider calling `POST {base_url}/chat/completions`.
pub struct OpenAiProvider {
    config: ProviderConfig,
    client: Client,
}

impl OpenAiProvider {
    /// Provider with a client using the configured timeout.
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Outage(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<(String, Cost), ProviderError> {
        if self.config.api_key.trim().is_empty() {
            return Err(ProviderError::Outage("no API key configured".into()));
        }
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.config.temperature,
        };
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Structural(format!("unexpected response body: {e}")))?;
        let tokens = parsed.usage.map_or(0, |u| u.total_tokens);
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Structural("response has no message content".into()))?;
        debug!(model = %self.config.model, tokens, "completion received");
        Ok((content, Cost { tokens }))
    }
}

#[async_trait]
impl EnrichmentProvider for OpenAiProvider {
    async fn enrich(&self, query: &EnrichmentQuery) -> Result<Enrichment, ProviderError> {
        let prompt = discovery_prompt(query);
        let (content, cost) = self.complete(DISCOVERY_SYSTEM, &prompt).await?;
        let items = parse_item_list(&content)?;
        Ok(Enrichment { items, cost })
    }

    async fn score(&self, item: &Item) -> Result<ScoreReply, ProviderError> {
        let prompt = scoring_prompt(item);
        let (content, cost) = self.complete(SCORING_SYSTEM, &prompt).await?;
        let scores = parse_scores(&content)?;
        Ok(ScoreReply { scores, cost })
    }
}

fn classify_send_error(err: reqwest::Error) -> ProviderError {
    if err.is_connect() {
        ProviderError::Outage(format!("cannot reach provider: {err}"))
    } else {
        ProviderError::Transient(err.to_string())
    }
}

fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let message = format!("HTTP {status}: {}", body.chars().take(200).collect::<String>());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
            ProviderError::Outage(message)
        }
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => ProviderError::Transient(message),
        s if s.is_server_error() => ProviderError::Transient(message),
        _ => ProviderError::Structural(message),
    }
}

fn discovery_prompt(query: &EnrichmentQuery) -> String {
    let params = &query.params;
    let scope = match params.strategy {
        SearchStrategy::Specific => format!(
            "working on {} in {}",
            params.category.as_deref().unwrap_or_default(),
            params.region.as_deref().unwrap_or_default()
        ),
        SearchStrategy::Global => format!(
            "working on {} anywhere in the world",
            params.category.as_deref().unwrap_or_default()
        ),
        SearchStrategy::MarketDemand => format!(
            "in {} working on the categories with the strongest market demand",
            params.region.as_deref().unwrap_or_default()
        ),
        SearchStrategy::GlobalMarketDemand => {
            "anywhere in the world working on the categories with the strongest market demand".to_string()
        }
    };
    let mut prompt = format!(
        "List up to {} real AI startups {scope}. For each return an object with the keys \
         name, website, description, country, sector, technologies (array), \
         last_funding_amount (number, USD), investor_names (array) and sources \
         (object with arrays funding, investors, validation of source URLs). \
         Reply with {{\"items\": [...]}}.",
        params.limit
    );
    if !query.exclusions.is_empty() {
        prompt.push_str("\nDo not include any of: ");
        prompt.push_str(&query.exclusions.join(", "));
    }
    prompt
}

fn scoring_prompt(item: &Item) -> String {
    format!(
        "Score this company from 0 to 100 on market_demand, technical_level and \
         partnership_potential. Reply with {{\"market_demand\": n, \"technical_level\": n, \
         \"partnership_potential\": n, \"reasoning\": {{...}}}}.\n{}",
        Value::Object(item.attributes.clone())
    )
}

/// Remove a surrounding Markdown code fence, with or without a language tag.
#[must_use]
pub fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn parse_json(content: &str) -> Result<Value, ProviderError> {
    serde_json::from_str(strip_code_fence(content))
        .map_err(|e| ProviderError::Structural(format!("reply is not JSON: {e}")))
}

/// Item payloads from a discovery reply: a bare array, or an object holding one
/// under `items` or `startups`.
pub fn parse_item_list(content: &str) -> Result<Vec<Value>, ProviderError> {
    match parse_json(content)? {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => ["items", "startups"]
            .into_iter()
            .find_map(|key| match map.remove(key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .ok_or_else(|| ProviderError::Structural("reply has no item array".into())),
        other => Err(ProviderError::Structural(format!("unexpected reply: {other}"))),
    }
}

/// Scores from a scoring reply. Each value is clamped to 0-100.
pub fn parse_scores(content: &str) -> Result<Scores, ProviderError> {
    let value = parse_json(content)?;
    let field = |names: &[&str]| -> Result<f64, ProviderError> {
        names
            .iter()
            .find_map(|n| value.get(*n).and_then(Value::as_f64))
            .map(|v| v.clamp(0.0, 100.0))
            .ok_or_else(|| ProviderError::Structural(format!("reply is missing `{}`", names[0])))
    };
    let mut scores = Scores::weighted(
        field(&["market_demand", "market_demand_score"])?,
        field(&["technical_level", "technical_level_score"])?,
        field(&["partnership_potential", "partnership_potential_score"])?,
    );
    scores.reasoning = value.get("reasoning").cloned();
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::QueryParams;

    #[test]
    fn strips_fences() {
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```\n[1]\n```  "), "[1]");
        assert_eq!(strip_code_fence("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn item_list_shapes() {
        assert_eq!(parse_item_list("[{\"name\": \"a\"}]").unwrap().len(), 1);
        assert_eq!(
            parse_item_list("```json\n{\"startups\": [{}, {}]}\n```").unwrap().len(),
            2
        );
        assert!(matches!(
            parse_item_list("{\"other\": []}"),
            Err(ProviderError::Structural(_))
        ));
        assert!(matches!(parse_item_list("sorry, no"), Err(ProviderError::Structural(_))));
    }

    #[test]
    fn scores_are_weighted_and_clamped() {
        let scores = parse_scores(
            r#"{"market_demand_score": 80, "technical_level": 70, "partnership_potential": 160, "reasoning": {"m": "ok"}}"#,
        )
        .unwrap();
        assert!((scores.partnership_potential - 100.0).abs() < f64::EPSILON);
        assert!((scores.total - 83.0).abs() < 1e-9);
        assert!(scores.reasoning.is_some());
        assert!(parse_scores(r#"{"market_demand": 1}"#).is_err());
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            ProviderError::Outage(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, ""),
            ProviderError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, ""),
            ProviderError::Structural(_)
        ));
    }

    #[test]
    fn prompt_mentions_exclusions_and_strategy() {
        let query = EnrichmentQuery {
            params: QueryParams::new(Some("Brazil".into()), None, 3),
            exclusions: vec!["acme".into()],
        };
        let prompt = discovery_prompt(&query);
        assert!(prompt.contains("up to 3"));
        assert!(prompt.contains("in Brazil working on the categories"));
        assert!(prompt.ends_with("Do not include any of: acme"));
    }

    #[tokio::test]
    async fn missing_key_is_an_outage() {
        let provider = OpenAiProvider::new(ProviderConfig::default()).unwrap();
        let query = EnrichmentQuery {
            params: QueryParams::new(None, None, 1),
            exclusions: Vec::new(),
        };
        assert!(matches!(provider.enrich(&query).await, Err(ProviderError::Outage(_))));
    }
}
