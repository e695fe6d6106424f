//! Run ledger transitions and notification handling.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use prometheus_scout::core::{
    InMemoryLedgerSink, Notification, NotificationEvent, NotificationKind, Notifier,
    OrchestratorError, QueryParams, QueuedRun, Run, RunLedger, RunRequest, RunStatus, StageName,
    Transition,
};
use prometheus_scout::infra::RecordStore;
use serde_json::json;
use uuid::Uuid;

struct FailingNotifier {
    attempts: AtomicUsize,
}

impl Notifier for FailingNotifier {
    fn publish(&self, _notification: &Notification) -> Result<(), String> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err("channel closed".to_string())
    }
}

fn ledger() -> (RunLedger, Arc<FailingNotifier>) {
    let records = Arc::new(RecordStore::in_memory());
    let notifier = Arc::new(FailingNotifier {
        attempts: AtomicUsize::new(0),
    });
    let ledger = RunLedger::new(
        records.clone(),
        records,
        Box::new(InMemoryLedgerSink::new(100)),
    )
    .with_notifier(notifier.clone());
    (ledger, notifier)
}

fn pending_run(job_id: Option<Uuid>) -> Run {
    let query = QueryParams::new(Some("BR".into()), None, 5);
    let request = match job_id {
        Some(job_id) => RunRequest::Scheduled { job_id, query },
        None => RunRequest::Manual {
            query,
            trigger: Some("api".into()),
        },
    };
    Run::pending(&QueuedRun {
        run_id: Uuid::new_v4(),
        request,
        enqueued_at: chrono::Utc::now(),
    })
}

#[test]
fn test_lifecycle_is_recorded_in_order() {
    let (ledger, _) = ledger();
    let run = pending_run(None);
    ledger.record_enqueued(&run).unwrap();
    ledger.record_start(run.id).unwrap();
    ledger.record_stage(run.id, StageName::Metrics);
    let done = ledger
        .record_terminal(run.id, RunStatus::Completed, Some(json!({"discovered": 2})), None)
        .unwrap();

    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.current_stage, Some(StageName::Metrics));
    assert!(done.duration_secs.unwrap() >= 0.0);
    assert!(done.completed_at.unwrap() >= done.started_at.unwrap());

    let transitions: Vec<Transition> = ledger.entries().iter().map(|e| e.transition).collect();
    assert_eq!(
        transitions,
        vec![Transition::Enqueued, Transition::Started, Transition::Completed]
    );
}

#[test]
fn test_terminal_runs_are_immutable() {
    let (ledger, _) = ledger();
    let run = pending_run(None);
    ledger.record_enqueued(&run).unwrap();
    ledger.record_start(run.id).unwrap();
    ledger
        .record_terminal(run.id, RunStatus::Failed, None, Some("provider outage: 401".into()))
        .unwrap();

    let again = ledger.record_terminal(run.id, RunStatus::Completed, Some(json!({})), None);
    assert!(matches!(again, Err(OrchestratorError::RunTerminal(_))));
    assert!(matches!(
        ledger.record_start(run.id),
        Err(OrchestratorError::RunTerminal(_))
    ));
    ledger.record_stage(run.id, StageName::Finalize);

    let stored = ledger.get_run(run.id).unwrap();
    assert_eq!(stored.status, RunStatus::Failed);
    assert_eq!(stored.error.as_deref(), Some("provider outage: 401"));
    assert_eq!(stored.current_stage, None);
}

#[test]
fn test_non_terminal_status_is_rejected() {
    let (ledger, _) = ledger();
    let run = pending_run(None);
    ledger.record_enqueued(&run).unwrap();
    let err = ledger
        .record_terminal(run.id, RunStatus::Running, None, None)
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidRequest(_)));
    assert!(matches!(
        ledger.record_terminal(Uuid::new_v4(), RunStatus::Completed, None, None),
        Err(OrchestratorError::RunNotFound(_))
    ));
}

#[test]
fn test_notification_failure_is_swallowed() {
    let (ledger, notifier) = ledger();
    let run = pending_run(None);
    ledger.record_enqueued(&run).unwrap();
    ledger.record_start(run.id).unwrap();
    let done = ledger
        .record_terminal(
            run.id,
            RunStatus::Completed,
            Some(json!({"discovered": 5, "validated": 3, "invalid": 2})),
            None,
        )
        .unwrap();

    let notification = ledger.notify(NotificationEvent::for_run(&done));
    assert_eq!(notifier.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(notification.kind, NotificationKind::Success);
    assert!(notification.message.contains("5 discovered, 3 validated, 2 invalid"));

    assert_eq!(ledger.get_run(run.id).unwrap().status, RunStatus::Completed);
    assert_eq!(ledger.unread_count(), 1);
}

#[test]
fn test_notification_read_and_delete() {
    let (ledger, _) = ledger();
    let first = ledger.notify(NotificationEvent {
        title: "one".into(),
        message: "first".into(),
        kind: NotificationKind::Info,
        run_id: None,
        job_id: None,
    });
    ledger.notify(NotificationEvent {
        title: "two".into(),
        message: "second".into(),
        kind: NotificationKind::Error,
        run_id: None,
        job_id: None,
    });

    let listed = ledger.list_notifications(10, 0);
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].title, "two");
    assert_eq!(ledger.list_notifications(10, 1)[0].title, "one");

    ledger.mark_read(first.id).unwrap();
    assert_eq!(ledger.unread_count(), 1);
    assert_eq!(ledger.mark_all_read().unwrap(), 1);
    assert_eq!(ledger.unread_count(), 0);

    ledger.delete_notification(first.id).unwrap();
    assert!(matches!(
        ledger.delete_notification(first.id),
        Err(OrchestratorError::NotificationNotFound(_))
    ));
    assert!(matches!(
        ledger.mark_read(first.id),
        Err(OrchestratorError::NotificationNotFound(_))
    ));
    assert_eq!(ledger.list_notifications(10, 0).len(), 1);
}

#[test]
fn test_detach_job_clears_references() {
    let (ledger, _) = ledger();
    let job_id = Uuid::new_v4();
    let scheduled = pending_run(Some(job_id));
    let manual = pending_run(None);
    ledger.record_enqueued(&scheduled).unwrap();
    ledger.record_enqueued(&manual).unwrap();
    ledger.record_start(scheduled.id).unwrap();
    let done = ledger
        .record_terminal(scheduled.id, RunStatus::Completed, Some(json!({})), None)
        .unwrap();
    ledger.notify(NotificationEvent::for_run(&done));
    assert_eq!(ledger.list_runs(Some(job_id), 10).len(), 1);

    ledger.detach_job(job_id).unwrap();
    assert!(ledger.list_runs(Some(job_id), 10).is_empty());
    assert_eq!(ledger.get_run(scheduled.id).unwrap().job_id, None);
    assert_eq!(ledger.list_runs(None, 10).len(), 2);
    assert_eq!(ledger.list_notifications(10, 0)[0].job_id, None);
}

#[test]
fn test_fail_interrupted_spares_requeued_runs() {
    let (ledger, _) = ledger();
    let running = pending_run(None);
    let queued = pending_run(None);
    let finished = pending_run(None);
    for run in [&running, &queued, &finished] {
        ledger.record_enqueued(run).unwrap();
    }
    ledger.record_start(running.id).unwrap();
    ledger.record_start(finished.id).unwrap();
    ledger
        .record_terminal(finished.id, RunStatus::Completed, Some(json!({})), None)
        .unwrap();

    let failed = ledger
        .fail_interrupted(&HashSet::from([queued.id]))
        .unwrap();
    assert_eq!(failed, 1);
    assert_eq!(ledger.get_run(running.id).unwrap().status, RunStatus::Failed);
    assert_eq!(ledger.get_run(queued.id).unwrap().status, RunStatus::Pending);
    assert_eq!(ledger.get_run(finished.id).unwrap().status, RunStatus::Completed);
}

#[test]
fn test_detach_during_run_survives_later_transitions() {
    let (ledger, _) = ledger();
    let job_id = Uuid::new_v4();
    let run = pending_run(Some(job_id));
    ledger.record_enqueued(&run).unwrap();
    ledger.record_start(run.id).unwrap();

    ledger.detach_job(job_id).unwrap();
    ledger.record_stage(run.id, StageName::Validation);
    let done = ledger
        .record_terminal(run.id, RunStatus::Completed, Some(json!({"discovered": 1})), None)
        .unwrap();
    ledger.notify(NotificationEvent::for_run(&done));

    assert_eq!(done.job_id, None);
    assert_eq!(done.current_stage, Some(StageName::Validation));
    assert_eq!(ledger.get_run(run.id).unwrap().job_id, None);
    assert!(ledger.list_runs(Some(job_id), 10).is_empty());
    assert_eq!(ledger.list_notifications(10, 0)[0].job_id, None);
}
