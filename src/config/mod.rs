//! Configuration models for the provider, storage and run queue.

pub mod orchestrator;

pub use orchestrator::{
    OrchestratorConfig, ProviderConfig, QueueBackendConfig, StorageConfig, DEFAULT_BASE_URL,
    DEFAULT_LIMIT, DEFAULT_MODEL,
};
