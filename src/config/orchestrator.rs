//! Orchestrator configuration structures.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default OpenAI-compatible endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
/// Default model.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
/// Default number of items a run discovers.
pub const DEFAULT_LIMIT: usize = 10;

/// Enrichment provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API key; runs fail with a provider outage when it is empty.
    pub api_key: String,
    /// Model name.
    pub model: String,
    /// Base URL of an OpenAI-compatible API.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Sampling temperature.
    pub temperature: f32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 120,
            temperature: 0.2,
        }
    }
}

impl ProviderConfig {
    /// Validate provider settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("model must not be empty".into());
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(format!("base_url `{}` must be an http(s) URL", self.base_url));
        }
        if self.timeout_secs == 0 {
            return Err("timeout_secs must be greater than 0".into());
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err("temperature must be between 0 and 2".into());
        }
        Ok(())
    }
}

/// Where jobs, runs, notifications and the catalog live.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StorageConfig {
    /// Volatile storage for development and tests.
    #[default]
    InMemory,
    /// JSON-lines files under `dir`.
    File {
        /// Data directory.
        dir: PathBuf,
    },
}

/// Run-queue backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackendConfig {
    /// In-memory queue; queued runs are lost on restart.
    #[default]
    InMemory,
    /// JSON-lines queue in the storage directory; requires file storage.
    File,
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Enrichment provider.
    pub provider: ProviderConfig,
    /// Record and catalog storage.
    pub storage: StorageConfig,
    /// Run-queue backend.
    pub queue: QueueBackendConfig,
    /// Timeout of one website probe in seconds.
    pub probe_timeout_secs: u64,
    /// Discovery limit when a job or request does not set one.
    pub default_limit: usize,
    /// Maximum ledger entries kept in memory.
    pub ledger_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            storage: StorageConfig::default(),
            queue: QueueBackendConfig::default(),
            probe_timeout_secs: 8,
            default_limit: DEFAULT_LIMIT,
            ledger_capacity: 10_000,
        }
    }
}

impl OrchestratorConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.provider
            .validate()
            .map_err(|e| format!("provider invalid: {e}"))?;
        if self.probe_timeout_secs == 0 {
            return Err("probe_timeout_secs must be greater than 0".into());
        }
        if self.default_limit == 0 {
            return Err("default_limit must be greater than 0".into());
        }
        if self.ledger_capacity == 0 {
            return Err("ledger_capacity must be greater than 0".into());
        }
        if self.queue == QueueBackendConfig::File && matches!(self.storage, StorageConfig::InMemory) {
            return Err("file queue requires file storage".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from the environment.
    ///
    /// Reads a `.env` file when present, then the JSON file named by `SCOUT_CONFIG`
    /// (defaults otherwise). `OPENAI_API_KEY`, `OPENAI_MODEL`, `OPENAI_BASE_URL` and
    /// `SCOUT_DATA_DIR` override the corresponding fields; `SCOUT_DATA_DIR` also
    /// selects file storage with a file queue.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        let mut cfg = match std::env::var("SCOUT_CONFIG") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .map_err(|e| format!("cannot read config `{path}`: {e}"))?;
                serde_json::from_str(&raw).map_err(|e| format!("parse error in `{path}`: {e}"))?
            }
            Err(_) => Self::default(),
        };
        cfg.apply_overrides(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var("OPENAI_API_KEY") {
            self.provider.api_key = key;
        }
        if let Some(model) = var("OPENAI_MODEL") {
            self.provider.model = model;
        }
        if let Some(url) = var("OPENAI_BASE_URL") {
            self.provider.base_url = url;
        }
        if let Some(dir) = var("SCOUT_DATA_DIR") {
            self.storage = StorageConfig::File { dir: dir.into() };
            self.queue = QueueBackendConfig::File;
        }
    }
}
