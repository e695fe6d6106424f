//! Infrastructure adapters: run queues, record stores, catalog, provider, probe,
//! notifier and ledger sink.

pub mod catalog;
pub mod ledger;
pub mod notifier;
pub mod probe;
pub mod provider;
pub mod queue;
pub mod store;

pub use catalog::Catalog;
pub use ledger::JsonlLedgerSink;
pub use notifier::BroadcastNotifier;
pub use probe::HttpProbe;
pub use provider::OpenAiProvider;
pub use queue::{FileQueue, InMemoryQueue};
pub use store::RecordStore;
