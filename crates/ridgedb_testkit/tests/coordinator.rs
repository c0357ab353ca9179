//! Coordinator behavior against scripted participants.

use ridgedb_core::{
    Config, CoreError, EndFlags, GraphDatabase, ResourceManager, ResourceRegistry, StartFlags,
    TransactionManager, Vote,
};
use ridgedb_core::{txlog::RecoveryLog, PropertyValue};
use ridgedb_storage::InMemoryBackend;
use ridgedb_testkit::crash::MemoryDisk;
use ridgedb_testkit::resource::{Call, RecordingResource, Step};
use std::sync::Arc;
use std::time::Duration;

fn open_with(rm: &Arc<RecordingResource>) -> GraphDatabase {
    MemoryDisk::new()
        .open_with(vec![Arc::clone(rm) as Arc<dyn ResourceManager>])
        .unwrap()
}

fn enlist(db: &GraphDatabase, tx: ridgedb_core::TransactionId, rm: &Arc<RecordingResource>) {
    db.enlist(tx, Arc::clone(rm) as Arc<dyn ResourceManager>)
        .unwrap();
}

#[test]
fn lone_participant_commits_in_one_phase() {
    let ext = RecordingResource::new("ext");
    let db = open_with(&ext);

    let tx = db.begin().unwrap();
    enlist(&db, tx, &ext);
    enlist(&db, tx, &ext);
    db.commit(tx).unwrap();

    let calls = ext.calls();
    let xid = match calls[1] {
        Call::Start(xid, StartFlags::New) => xid,
        ref other => panic!("unexpected call {other:?}"),
    };
    assert_eq!(
        &calls[1..],
        &[
            Call::Start(xid, StartFlags::New),
            Call::Start(xid, StartFlags::Join),
            Call::End(xid, EndFlags::Success),
            Call::Commit(xid, true),
        ]
    );
    assert_eq!(ext.count(Step::Prepare), 0);
    assert!(db.transaction_manager().log().entries().unwrap().is_empty());
}

#[test]
fn several_participants_prepare_before_commit() {
    let ext = RecordingResource::new("ext");
    let db = open_with(&ext);

    let tx = db.begin().unwrap();
    let node = db.create_node(tx).unwrap();
    enlist(&db, tx, &ext);
    db.commit(tx).unwrap();

    assert_eq!(
        ext.steps(),
        vec![
            Step::Recover,
            Step::Start,
            Step::End,
            Step::Prepare,
            Step::Commit
        ]
    );
    assert!(matches!(ext.calls().last(), Some(Call::Commit(_, false))));
    assert!(db.node_exists(node));

    let summary = db.transaction_manager().log().summary(tx).unwrap();
    assert!(summary.all_prepared());
    assert!(summary.is_resolved());
}

#[test]
fn read_only_participant_skips_commit() {
    let ext = RecordingResource::new("ext");
    ext.vote(Vote::ReadOnly);
    let db = open_with(&ext);

    let tx = db.begin().unwrap();
    let node = db.create_node(tx).unwrap();
    enlist(&db, tx, &ext);
    db.commit(tx).unwrap();

    assert_eq!(ext.count(Step::Prepare), 1);
    assert_eq!(ext.count(Step::Commit), 0);
    assert!(db.node_exists(node));
}

#[test]
fn veto_rolls_back_everyone() {
    let ext = RecordingResource::new("ext");
    ext.vote(Vote::RollbackOnly);
    let db = open_with(&ext);

    let tx = db.begin().unwrap();
    let node = db.create_node(tx).unwrap();
    db.set_property(tx, node.into(), "k", PropertyValue::Int(7))
        .unwrap();
    enlist(&db, tx, &ext);

    let err = db.commit(tx).unwrap_err();
    assert!(matches!(err, CoreError::RollbackRequired { .. }), "{err}");
    assert!(!db.node_exists(node));
    assert_eq!(ext.count(Step::Commit), 0);
    assert!(db.in_doubt().is_empty());
}

#[test]
fn failing_prepare_rolls_back_prepared_participants() {
    let ext = RecordingResource::new("ext");
    ext.fail_on(Step::Prepare);
    let db = open_with(&ext);

    let tx = db.begin().unwrap();
    let node = db.create_node(tx).unwrap();
    enlist(&db, tx, &ext);

    let err = db.commit(tx).unwrap_err();
    assert!(matches!(err, CoreError::RollbackRequired { .. }), "{err}");
    assert!(!db.node_exists(node));
    assert!(ext.count(Step::Rollback) >= 1);
    assert!(ext.prepared().is_empty());
}

#[test]
fn rollback_only_transaction_never_prepares() {
    let ext = RecordingResource::new("ext");
    let db = open_with(&ext);

    let tx = db.begin().unwrap();
    db.create_node(tx).unwrap();
    enlist(&db, tx, &ext);
    db.set_rollback_only(tx).unwrap();

    let err = db.commit(tx).unwrap_err();
    assert!(matches!(err, CoreError::RollbackRequired { .. }), "{err}");
    assert_eq!(ext.count(Step::Prepare), 0);
    assert_eq!(ext.rolled_back().len(), 1);
}

#[test]
fn explicit_rollback_reaches_every_participant() {
    let ext = RecordingResource::new("ext");
    let db = open_with(&ext);

    let tx = db.begin().unwrap();
    let node = db.create_node(tx).unwrap();
    let xid = db
        .enlist(tx, Arc::clone(&ext) as Arc<dyn ResourceManager>)
        .unwrap();
    db.rollback(tx).unwrap();

    assert_eq!(ext.rolled_back(), vec![xid]);
    assert!(ext.calls().contains(&Call::End(xid, EndFlags::Fail)));
    assert!(!db.node_exists(node));
    assert_eq!(db.node_count(), 0);
}

#[test]
fn silent_participant_times_out() {
    let ext = RecordingResource::new("ext");
    let disk = MemoryDisk::with_config(
        Config::default().transaction_timeout(Some(Duration::from_millis(50))),
    );
    let db = disk
        .open_with(vec![Arc::clone(&ext) as Arc<dyn ResourceManager>])
        .unwrap();

    let tx = db.begin().unwrap();
    let node = db.create_node(tx).unwrap();
    enlist(&db, tx, &ext);
    ext.hang_on(Step::Prepare, Duration::from_millis(500));

    let err = db.commit(tx).unwrap_err();
    match err {
        CoreError::Timeout {
            txid,
            resource,
            operation,
        } => {
            assert_eq!(txid, tx);
            assert_eq!(resource, "ext");
            assert_eq!(operation, "prepare");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!db.node_exists(node));
}

#[test]
fn begin_waits_for_recovery() {
    let log = Arc::new(RecoveryLog::open(Box::new(InMemoryBackend::new()), false, u64::MAX).unwrap());
    let registry = Arc::new(ResourceRegistry::new());
    let ext = RecordingResource::new("ext");
    registry
        .register(Arc::clone(&ext) as Arc<dyn ResourceManager>)
        .unwrap();
    let tm = TransactionManager::new(log, registry, &Config::default());

    assert!(matches!(tm.begin(), Err(CoreError::RecoveryIncomplete)));
    let report = tm.recover().unwrap();
    assert!(report.is_empty());
    assert!(tm.is_recovered());
    assert!(tm.begin().is_ok());
}

#[test]
fn commit_of_unknown_transaction_is_not_found() {
    let ext = RecordingResource::new("ext");
    let db = open_with(&ext);
    let tx = db.begin().unwrap();
    db.commit(tx).unwrap();
    assert!(matches!(db.commit(tx), Err(CoreError::NotFound { .. })));
}

#[test]
fn failing_end_still_rolls_back() {
    let ext = RecordingResource::new("ext");
    let db = open_with(&ext);

    let tx = db.begin().unwrap();
    let node = db.create_node(tx).unwrap();
    let xid = db
        .enlist(tx, Arc::clone(&ext) as Arc<dyn ResourceManager>)
        .unwrap();
    ext.fail_on(Step::End);

    let err = db.commit(tx).unwrap_err();
    assert!(matches!(err, CoreError::RollbackRequired { .. }), "{err}");
    assert!(ext.calls().contains(&Call::End(xid, EndFlags::Fail)));
    assert_eq!(ext.rolled_back(), vec![xid]);
    assert_eq!(ext.count(Step::Prepare), 0);
    assert!(!db.node_exists(node));
}

#[test]
fn in_doubt_transaction_keeps_its_locks() {
    let ext = RecordingResource::new("ext");
    let db = open_with(&ext);

    let tx = db.begin().unwrap();
    let node = db.create_node(tx).unwrap();
    enlist(&db, tx, &ext);
    ext.fail_on(Step::Commit);
    assert!(matches!(
        db.commit(tx),
        Err(CoreError::HeuristicMixed { .. })
    ));
    assert_eq!(db.in_doubt().len(), 1);

    let blocked = db.begin().unwrap();
    let err = db
        .set_property(blocked, node.into(), "k", PropertyValue::Int(1))
        .unwrap_err();
    assert!(matches!(err, CoreError::LockUnavailable { .. }), "{err}");
    db.rollback(blocked).unwrap();

    ext.heal();
    db.forget(tx).unwrap();
    db.transaction(|db, tx| db.set_property(tx, node.into(), "k", PropertyValue::Int(2)))
        .unwrap();
    assert_eq!(
        db.get_property(node.into(), "k").unwrap(),
        Some(PropertyValue::Int(2))
    );
}
