//! Builders wiring service objects from configuration.

pub mod orchestrator_builder;

pub use orchestrator_builder::OrchestratorBuilder;
