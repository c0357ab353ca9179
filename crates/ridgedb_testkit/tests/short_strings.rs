//! Inline string packing observed through the size of the overflow file.

use ridgedb_core::{GraphDatabase, NodeId, PropertyValue};
use ridgedb_testkit::fixtures::TestDatabase;

fn store(db: &GraphDatabase, node: NodeId, key: &str, value: &str) -> u64 {
    let before = db.string_store_size().unwrap();
    db.transaction(|db, tx| db.set_property(tx, node.into(), key, value.into()))
        .unwrap();
    assert_eq!(
        db.get_property(node.into(), key).unwrap(),
        Some(PropertyValue::String(value.to_string()))
    );
    db.string_store_size().unwrap() - before
}

fn assert_boundary(fits: &str, overflows: &str) {
    let db = TestDatabase::file();
    let node = db.transaction(|db, tx| db.create_node(tx)).unwrap();
    assert_eq!(store(&db, node, "fits", fits), 0, "{fits:?} should be inline");
    assert!(
        store(&db, node, "overflows", overflows) > 0,
        "{overflows:?} should need the overflow store"
    );
}

#[test]
fn numerical_text_fits_fifteen_characters() {
    assert_boundary("+123456789 1234", "+123456789 01234");
}

#[test]
fn upper_case_text_fits_twelve_characters() {
    assert_boundary("SOME_VALUE:T", "SOMETHING_LON");
}

#[test]
fn alphanumerical_text_fits_ten_characters() {
    assert_boundary("Mattias Yu", "Mattias Yup");
}

#[test]
fn latin1_text_fits_seven_characters() {
    assert_boundary("\u{a1}@$#abc", "\u{a1}@$#abcd");
}

#[test]
fn empty_string_is_inline() {
    let db = TestDatabase::file();
    let node = db.transaction(|db, tx| db.create_node(tx)).unwrap();
    assert_eq!(store(&db, node, "empty", ""), 0);
}

#[test]
fn inline_values_survive_reopen() {
    let db = TestDatabase::file();
    let node = db
        .transaction(|db, tx| {
            let node = db.create_node(tx)?;
            db.set_property(tx, node.into(), "phone", "+46 70 123 45".into())?;
            db.set_property(tx, node.into(), "code", "ABC-DEF".into())?;
            db.set_property(tx, node.into(), "accent", "\u{e9}t\u{e9}".into())?;
            Ok(node)
        })
        .unwrap();
    let db = db.reopen();
    assert_eq!(db.string_store_size().unwrap(), 0);
    assert_eq!(
        db.get_property(node.into(), "phone").unwrap(),
        Some("+46 70 123 45".into())
    );
    assert_eq!(db.get_property(node.into(), "code").unwrap(), Some("ABC-DEF".into()));
    assert_eq!(
        db.get_property(node.into(), "accent").unwrap(),
        Some("\u{e9}t\u{e9}".into())
    );
}
