//! Overflow chains: allocation, reuse and consistency across restarts.

use ridgedb_core::{Config, PropertyValue};
use ridgedb_testkit::crash::{DiskFile, MemoryDisk};
use ridgedb_testkit::fixtures::TestDatabase;

fn long_text(len: usize) -> String {
    "overflowing text ".chars().cycle().take(len).collect()
}

#[test]
fn freed_blocks_are_reused_after_reopen() {
    let db = TestDatabase::file();
    let node = db
        .transaction(|db, tx| {
            let node = db.create_node(tx)?;
            db.set_property(tx, node.into(), "bio", long_text(1000).into())?;
            Ok(node)
        })
        .unwrap();
    let grown = db.string_store_size().unwrap();
    assert!(grown > 0);

    db.transaction(|db, tx| db.set_property(tx, node.into(), "bio", PropertyValue::Int(1)))
        .unwrap();

    let db = db.reopen();
    assert_eq!(db.stores().dynamic.free_count() as u64, db.stores().dynamic.high_id());
    db.transaction(|db, tx| db.set_property(tx, node.into(), "bio", long_text(900).into()))
        .unwrap();
    assert_eq!(db.string_store_size().unwrap(), grown);
    assert_eq!(
        db.get_property(node.into(), "bio").unwrap(),
        Some(PropertyValue::String(long_text(900)))
    );
    assert!(db.verify().unwrap().is_clean());
}

#[test]
fn rolled_back_value_leaves_no_blocks_behind() {
    let db = TestDatabase::memory();
    let node = db.transaction(|db, tx| db.create_node(tx)).unwrap();

    let tx = db.begin().unwrap();
    db.set_property(tx, node.into(), "blob", PropertyValue::Bytes(vec![7; 4096]))
        .unwrap();
    assert_eq!(
        db.get_property_in(tx, node.into(), "blob").unwrap(),
        Some(PropertyValue::Bytes(vec![7; 4096]))
    );
    db.rollback(tx).unwrap();

    assert_eq!(db.get_property(node.into(), "blob").unwrap(), None);
    let report = db.verify().unwrap();
    assert!(report.is_clean(), "{report:?}");
    assert_eq!(report.blocks_in_use, 0);
}

#[test]
fn small_blocks_make_longer_chains() {
    let db = TestDatabase::file_with_config(Config::default().block_size(32));
    let value = long_text(500);
    let node = db
        .transaction(|db, tx| {
            let node = db.create_node(tx)?;
            db.set_property(tx, node.into(), "bio", value.clone().into())?;
            Ok(node)
        })
        .unwrap();
    let report = db.verify().unwrap();
    assert_eq!(report.chains, 1);
    assert!(report.blocks_in_use > 500 / 32);

    let db = db.reopen();
    assert_eq!(
        db.get_property(node.into(), "bio").unwrap(),
        Some(PropertyValue::String(value))
    );
}

#[test]
fn interrupted_chain_commit_is_finished_by_recovery() {
    let disk = MemoryDisk::new();
    let db = disk.open().unwrap();
    let node = db
        .transaction(|db, tx| {
            let node = db.create_node(tx)?;
            db.set_property(tx, node.into(), "bio", long_text(600).into())?;
            Ok(node)
        })
        .unwrap();

    let tx = db.begin().unwrap();
    db.set_property(tx, node.into(), "bio", long_text(2000).into())
        .unwrap();
    // The overflow journal records its prepare and dies before commit.
    disk.switch(DiskFile::StringJournal).crash_after_writes(1);
    assert!(db.commit(tx).is_err());
    drop(db);

    let db = disk.open().unwrap();
    assert_eq!(db.recovery_report().committed.len(), 1);
    assert!(db.in_doubt().is_empty());
    assert_eq!(
        db.get_property(node.into(), "bio").unwrap(),
        Some(PropertyValue::String(long_text(2000)))
    );
    let report = db.verify().unwrap();
    assert!(report.is_clean(), "{report:?}");
    assert_eq!(report.chains, 1);
}
