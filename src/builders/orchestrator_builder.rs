//! Builder wiring an [`Orchestrator`] from configuration.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;

use crate::config::{OrchestratorConfig, QueueBackendConfig, StorageConfig};
use crate::core::{
    CatalogStore, EnrichmentProvider, InMemoryLedgerSink, ItemValidator, JobScheduler, LedgerSink,
    OrchestratorError, PipelineDeps, PipelineExecutor, QueueBackend, ReachabilityValidator,
    RunLedger, Stage, TaskQueue,
};
use crate::infra::{
    BroadcastNotifier, Catalog, FileQueue, HttpProbe, InMemoryQueue, JsonlLedgerSink,
    OpenAiProvider, RecordStore,
};
use crate::runtime::{Orchestrator, TokioSpawner};

/// Capacity of the live notification channel.
const NOTIFICATION_BUFFER: usize = 256;

type QueueFactory =
    Box<dyn FnOnce(&OrchestratorConfig) -> Result<Box<dyn QueueBackend>, OrchestratorError>>;

/// Assembles stores, provider, pipeline, queue and scheduler, then starts them.
///
/// Every collaborator has a default derived from the configuration; tests and
/// embedders replace individual pieces with the `with_*` methods.
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    provider: Option<Arc<dyn EnrichmentProvider>>,
    validator: Option<Arc<dyn ItemValidator>>,
    stages: Option<Vec<Arc<dyn Stage>>>,
    queue_factory: Option<QueueFactory>,
}

impl OrchestratorBuilder {
    /// Builder over `config`.
    #[must_use]
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            provider: None,
            validator: None,
            stages: None,
            queue_factory: None,
        }
    }

    /// Use `provider` instead of the OpenAI-compatible client.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn EnrichmentProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Use `validator` instead of the HTTP reachability validator.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn ItemValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Replace the standard stage list.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<Arc<dyn Stage>>) -> Self {
        self.stages = Some(stages);
        self
    }

    /// Build the queue backend with `factory` instead of from configuration.
    #[must_use]
    pub fn with_queue_factory<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(&OrchestratorConfig) -> Result<Box<dyn QueueBackend>, OrchestratorError> + 'static,
    {
        self.queue_factory = Some(Box::new(factory));
        self
    }

    /// Wire and start everything. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::Backend`] for invalid configuration, storage that cannot
    /// be opened, or a missing runtime.
    pub fn build(self) -> Result<Orchestrator, OrchestratorError> {
        let cfg = self.config;
        cfg.validate()
            .map_err(|e| OrchestratorError::Backend(format!("config invalid: {e}")))?;
        let spawner = TokioSpawner::current()?;

        let (records, catalog, sink) = open_storage(&cfg)?;

        let notifier = Arc::new(BroadcastNotifier::new(NOTIFICATION_BUFFER));
        let ledger = Arc::new(
            RunLedger::new(records.clone(), records.clone(), sink).with_notifier(notifier.clone()),
        );

        let pipeline = match self.stages {
            Some(stages) => PipelineExecutor::with_stages(stages),
            None => {
                let provider: Arc<dyn EnrichmentProvider> = match self.provider {
                    Some(provider) => provider,
                    None => Arc::new(
                        OpenAiProvider::new(cfg.provider.clone())
                            .map_err(|e| OrchestratorError::Backend(e.to_string()))?,
                    ),
                };
                let validator: Arc<dyn ItemValidator> = match self.validator {
                    Some(validator) => validator,
                    None => Arc::new(ReachabilityValidator::new(Arc::new(HttpProbe::new(
                        Duration::from_secs(cfg.probe_timeout_secs),
                    )?))),
                };
                PipelineExecutor::standard(PipelineDeps {
                    provider,
                    validator,
                    catalog: catalog.clone(),
                })
            }
        };

        let backend = match self.queue_factory {
            Some(factory) => factory(&cfg)?,
            None => default_queue(&cfg)?,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Arc::new(
            TaskQueue::new(backend, ledger.clone(), Arc::new(pipeline), catalog.clone())
                .with_completions(tx),
        );
        queue.start(&spawner)?;

        let scheduler = JobScheduler::new(
            records,
            queue.clone(),
            ledger.clone(),
            spawner,
            cfg.default_limit,
        );
        let timers = scheduler.start(rx);
        info!(timers, storage = ?cfg.storage, queue = ?cfg.queue, "orchestrator started");

        Ok(Orchestrator::new(
            scheduler,
            queue,
            ledger,
            catalog,
            notifier,
            cfg.default_limit,
        ))
    }
}

type Storage = (Arc<RecordStore>, Arc<dyn CatalogStore>, Box<dyn LedgerSink>);

fn open_storage(cfg: &OrchestratorConfig) -> Result<Storage, OrchestratorError> {
    match &cfg.storage {
        StorageConfig::InMemory => {
            let catalog: Arc<dyn CatalogStore> = Arc::new(Catalog::in_memory());
            let sink: Box<dyn LedgerSink> = Box::new(InMemoryLedgerSink::new(cfg.ledger_capacity));
            Ok((Arc::new(RecordStore::in_memory()), catalog, sink))
        }
        StorageConfig::File { dir } => {
            let catalog: Arc<dyn CatalogStore> = Arc::new(Catalog::open(dir)?);
            let sink: Box<dyn LedgerSink> = Box::new(JsonlLedgerSink::open(dir)?);
            Ok((Arc::new(RecordStore::open(dir)?), catalog, sink))
        }
    }
}

fn default_queue(cfg: &OrchestratorConfig) -> Result<Box<dyn QueueBackend>, OrchestratorError> {
    match (&cfg.queue, &cfg.storage) {
        (QueueBackendConfig::File, StorageConfig::File { dir }) => {
            Ok(Box::new(FileQueue::open(dir, "run_queue")?))
        }
        (QueueBackendConfig::File, StorageConfig::InMemory) => Err(OrchestratorError::Backend(
            "file queue requires file storage".into(),
        )),
        (QueueBackendConfig::InMemory, _) => Ok(Box::new(InMemoryQueue::new())),
    }
}
