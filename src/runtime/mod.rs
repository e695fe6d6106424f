//! Runtime adapters and API surface.

pub mod api;
pub mod tokio_spawner;

pub use api::{Health, ManualRunRequest, Orchestrator, QueueDepth, RunAccepted, RunStatusResponse};
pub use tokio_spawner::TokioSpawner;
