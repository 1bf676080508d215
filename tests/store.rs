// ABOUTME: Integration tests for the file-backed state store shared by CLI and daemon.
// ABOUTME: Covers durability across reopen, inbox handoff, and corrupt records.

use cutover::pipeline::{OperatorRequest, PipelineRun};
use cutover::store::{Collection, Inbox, StateLock, Store, StoreError, StoreErrorKind};
use cutover::types::{Revision, RunId};

#[test]
fn runs_survive_reopening_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let run = PipelineRun::new(
        RunId::new("20261014T101500-0001"),
        Some(Revision::parse("3f2a9c1").unwrap()),
    );
    {
        let store = Store::open(dir.path()).unwrap();
        store.put(Collection::Runs, run.id.as_str(), &run).unwrap();
    }

    let reopened = Store::open(dir.path()).unwrap();
    let runs: Vec<PipelineRun> = reopened.list(Collection::Runs).unwrap();
    assert_eq!(runs, vec![run]);
}

#[test]
fn requests_queued_by_one_handle_reach_another() {
    let dir = tempfile::tempdir().unwrap();
    let cli = Inbox::new(Store::open(dir.path()).unwrap());
    let daemon = Inbox::new(Store::open(dir.path()).unwrap());

    cli.submit(&OperatorRequest::Trigger { revision: None })
        .unwrap();
    cli.submit(&OperatorRequest::Approve {
        run: RunId::new("run-1"),
    })
    .unwrap();

    let pending: Vec<(String, OperatorRequest)> = daemon.pending().unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].1, OperatorRequest::Trigger { revision: None });

    for (key, _) in &pending {
        daemon.ack(key).unwrap();
    }
    assert!(cli.pending::<OperatorRequest>().unwrap().is_empty());
}

#[test]
fn corrupt_record_reports_its_key() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    store.put(Collection::Runs, "run-1", &"not a run").unwrap();

    let err = store
        .get::<PipelineRun>(Collection::Runs, "run-1")
        .unwrap_err();
    assert_eq!(err.kind(), StoreErrorKind::Corrupt);
    assert!(err.to_string().contains("runs/run-1"));
}

#[test]
fn lock_lives_beside_the_records() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let lock = StateLock::acquire(dir.path(), false).unwrap();

    assert!(StateLock::read(dir.path()).unwrap().is_some());
    assert!(store.keys(Collection::Runs).unwrap().is_empty());
    assert!(matches!(
        StateLock::acquire(dir.path(), false),
        Err(StoreError::Locked { .. })
    ));
    lock.release().unwrap();
}
