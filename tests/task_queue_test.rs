//! Run queue behaviour: FIFO order, single worker, fault isolation and recovery.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{file_config, orchestrator_with_stages, wait_for_run, wait_until};
use parking_lot::Mutex;
use prometheus_scout::builders::OrchestratorBuilder;
use prometheus_scout::config::QueueBackendConfig;
use prometheus_scout::core::{
    OrchestrationContext, OrchestratorError, QueryParams, QueueBackend, QueuedRun, Run,
    RunRequest, RunStatus, RunStore, Stage, StageName,
};
use prometheus_scout::infra::{FileQueue, RecordStore};
use prometheus_scout::runtime::ManualRunRequest;
use tokio::sync::Semaphore;
use uuid::Uuid;

fn manual(region: &str) -> ManualRunRequest {
    ManualRunRequest {
        region: Some(region.to_string()),
        ..ManualRunRequest::default()
    }
}

/// Records the region of every run and tracks how many run at once.
#[derive(Default)]
struct RecordingStage {
    seen: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

#[async_trait]
impl Stage for RecordingStage {
    fn name(&self) -> StageName {
        StageName::Discovery
    }

    async fn run(&self, ctx: &mut OrchestrationContext) -> Result<(), OrchestratorError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        self.seen
            .lock()
            .push(ctx.query.region.clone().unwrap_or_default());
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Blocks each run until a permit is released.
struct GateStage {
    permits: Arc<Semaphore>,
}

#[async_trait]
impl Stage for GateStage {
    fn name(&self) -> StageName {
        StageName::Discovery
    }

    async fn run(&self, _ctx: &mut OrchestrationContext) -> Result<(), OrchestratorError> {
        self.permits
            .acquire()
            .await
            .map_err(|e| OrchestratorError::Backend(e.to_string()))?
            .forget();
        Ok(())
    }
}

/// Panics for region `boom`.
struct PanicStage;

#[async_trait]
impl Stage for PanicStage {
    fn name(&self) -> StageName {
        StageName::Validation
    }

    async fn run(&self, ctx: &mut OrchestrationContext) -> Result<(), OrchestratorError> {
        assert!(ctx.query.region.as_deref() != Some("boom"), "stage exploded");
        Ok(())
    }
}

#[tokio::test]
async fn test_runs_execute_in_fifo_order() {
    let stage = Arc::new(RecordingStage::default());
    let orch = orchestrator_with_stages(vec![stage.clone() as Arc<dyn Stage>]);

    let ids: Vec<_> = ["first", "second", "third"]
        .into_iter()
        .map(|r| orch.enqueue_manual_run(manual(r)).unwrap().run_id)
        .collect();
    for id in &ids {
        wait_for_run(&orch, *id).await;
    }

    assert_eq!(*stage.seen.lock(), vec!["first", "second", "third"]);
    let started: Vec<_> = ids
        .iter()
        .map(|id| orch.run_status(*id).unwrap().started_at.unwrap())
        .collect();
    assert!(started.windows(2).all(|w| w[0] <= w[1]));
    orch.shutdown().await;
}

#[tokio::test]
async fn test_at_most_one_run_executes() {
    let stage = Arc::new(RecordingStage::default());
    let orch = orchestrator_with_stages(vec![stage.clone() as Arc<dyn Stage>]);

    let ids: Vec<_> = (0..5)
        .map(|i| orch.enqueue_manual_run(manual(&format!("r{i}"))).unwrap().run_id)
        .collect();
    for id in ids {
        wait_for_run(&orch, id).await;
    }
    assert_eq!(stage.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(orch.queue_depth().stats.completed, 5);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_queue_size_counts_waiting_runs() {
    let permits = Arc::new(Semaphore::new(0));
    let gate: Arc<dyn Stage> = Arc::new(GateStage {
        permits: permits.clone(),
    });
    let orch = orchestrator_with_stages(vec![gate]);

    let first = orch.enqueue_manual_run(manual("a")).unwrap();
    orch.enqueue_manual_run(manual("b")).unwrap();
    let third = orch.enqueue_manual_run(manual("c")).unwrap();
    assert_eq!(third.queue_size, orch.queue_depth().queue_size);

    wait_until(|| orch.queue_depth().stats.active_run == Some(first.run_id)).await;
    assert_eq!(orch.queue_depth().queue_size, 2);
    assert_eq!(
        orch.run_status(third.run_id).unwrap().status,
        RunStatus::Pending
    );

    permits.add_permits(1);
    wait_until(|| orch.queue_depth().stats.completed == 1).await;
    wait_until(|| orch.queue_depth().queue_size == 1).await;

    permits.add_permits(2);
    wait_for_run(&orch, third.run_id).await;
    let depth = orch.queue_depth();
    assert_eq!(depth.queue_size, 0);
    assert!(depth.is_running);
    assert_eq!(depth.stats.submitted, 3);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_panicking_run_fails_alone() {
    let orch = orchestrator_with_stages(vec![Arc::new(PanicStage) as Arc<dyn Stage>]);

    let bad = orch.enqueue_manual_run(manual("boom")).unwrap().run_id;
    let good = orch.enqueue_manual_run(manual("fine")).unwrap().run_id;

    let bad = wait_for_run(&orch, bad).await;
    assert_eq!(bad.status, RunStatus::Failed);
    assert_eq!(bad.error.as_deref(), Some("run panicked: stage exploded"));
    assert_eq!(bad.current_stage, Some(StageName::Validation));

    let good = wait_for_run(&orch, good).await;
    assert_eq!(good.status, RunStatus::Completed);
    assert!(orch.queue_depth().is_running);
    assert_eq!(orch.queue_depth().stats.failed, 1);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_rejects_new_runs() {
    let orch = orchestrator_with_stages(vec![Arc::new(RecordingStage::default()) as Arc<dyn Stage>]);
    orch.shutdown().await;

    let err = orch.enqueue_manual_run(manual("late")).unwrap_err();
    assert!(matches!(err, OrchestratorError::Shutdown));
    assert!(!orch.queue_depth().is_running);
    assert!(!orch.health().ok);
}

#[tokio::test]
async fn test_restart_redelivers_queued_and_fails_interrupted() {
    let dir = tempfile::tempdir().unwrap();

    let leftover = QueuedRun {
        run_id: Uuid::new_v4(),
        request: RunRequest::Manual {
            query: QueryParams::new(Some("left".into()), None, 3),
            trigger: None,
        },
        enqueued_at: chrono::Utc::now(),
    };
    let interrupted = {
        let mut run = Run::pending(&QueuedRun {
            run_id: Uuid::new_v4(),
            ..leftover.clone()
        });
        run.status = RunStatus::Running;
        run
    };
    {
        let records = RecordStore::open(dir.path()).unwrap();
        records.insert_run(&interrupted).unwrap();
        let mut queue = FileQueue::open(dir.path(), "run_queue").unwrap();
        queue.push(leftover.clone()).unwrap();
    }

    let stage = Arc::new(RecordingStage::default());
    let mut config = file_config(dir.path());
    config.queue = QueueBackendConfig::File;
    let orch = OrchestratorBuilder::new(config)
        .with_stages(vec![stage.clone() as Arc<dyn Stage>])
        .build()
        .unwrap();

    let recovered = wait_for_run(&orch, leftover.run_id).await;
    assert_eq!(recovered.status, RunStatus::Completed);
    assert_eq!(*stage.seen.lock(), vec!["left"]);

    let failed = orch.run_status(interrupted.id).unwrap();
    assert_eq!(failed.status, RunStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("interrupted by shutdown"));
    orch.shutdown().await;
}
