//! Committed transactions apply completely; rolled back ones leave no trace.

use proptest::prelude::*;
use ridgedb_testkit::crash::MemoryDisk;
use ridgedb_testkit::generators::{proptest_config, run_op, transaction_strategy, GraphModel};

const NODES: usize = 3;

proptest! {
    #![proptest_config(proptest_config(24))]

    #[test]
    fn transactions_are_all_or_nothing(
        transactions in prop::collection::vec(transaction_strategy(NODES), 1..6)
    ) {
        let disk = MemoryDisk::new();
        let db = disk.open().unwrap();
        let nodes = db
            .transaction(|db, tx| (0..NODES).map(|_| db.create_node(tx)).collect::<Result<Vec<_>, _>>())
            .unwrap();

        let mut model = GraphModel::default();
        for (ops, commit) in &transactions {
            let tx = db.begin().unwrap();
            for op in ops {
                run_op(&db, tx, &nodes, op).unwrap();
            }
            if *commit {
                db.commit(tx).unwrap();
                for op in ops {
                    model.apply(op);
                }
            } else {
                db.rollback(tx).unwrap();
            }
            prop_assert_eq!(&GraphModel::read(&db, &nodes).unwrap(), &model);
        }

        let report = db.verify().unwrap();
        prop_assert!(report.is_clean(), "{:?}", report);
        drop(db);

        // The same state comes back after a restart.
        let db = disk.open().unwrap();
        prop_assert_eq!(GraphModel::read(&db, &nodes).unwrap(), model);
        prop_assert!(db.verify().unwrap().is_clean());
    }
}
