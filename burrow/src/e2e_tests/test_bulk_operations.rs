//! Test running batches of operations in one call.

use crate::config::EnvironmentConfig;
use crate::database::{Operation, Outcome};
use crate::diagnostics::Severity;
use crate::e2e_tests::helpers::*;
use crate::error::Error;
use crate::params::{CloseFlags, DbFlags, EnvFlags, FindFlags, InsertFlags, TxnFlags};

fn insert(key: &[u8], record: &[u8]) -> Operation {
    Operation::Insert {
        key: key.to_vec(),
        record: record.to_vec(),
        flags: InsertFlags::empty(),
    }
}

fn find(key: &[u8]) -> Operation {
    Operation::Find {
        key: key.to_vec(),
        flags: FindFlags::empty(),
    }
}

#[test]
fn test_each_step_has_its_own_outcome() {
    let test = TestEnv::new();
    let db = test.create_db(DbFlags::empty());

    let outcomes = db
        .bulk_operations(&[
            insert(b"a", b"1"),
            insert(b"b", b"2"),
            insert(b"a", b"3"),
            find(b"a"),
            Operation::Erase { key: b"b".to_vec() },
            find(b"b"),
            insert(b"c", b"4"),
        ])
        .expect("bulk");

    assert_eq!(outcomes.len(), 7);
    assert_eq!(outcomes[0].as_ref().expect("insert"), &Outcome::Inserted(b"a".to_vec()));
    assert!(matches!(outcomes[2], Err(Error::DuplicateKey)));
    assert_eq!(
        outcomes[3].as_ref().expect("find"),
        &Outcome::Found {
            key: b"a".to_vec(),
            record: b"1".to_vec(),
        }
    );
    assert_eq!(outcomes[4].as_ref().expect("erase"), &Outcome::Erased);
    assert!(matches!(outcomes[5], Err(Error::KeyNotFound)));
    assert!(outcomes[6].is_ok());

    assert_eq!(all_keys(&db), vec![b"a".to_vec(), b"c".to_vec()]);
}

#[test]
fn test_approximate_find_step() {
    let test = TestEnv::new();
    let db = test.create_db(DbFlags::empty());
    insert_range(&db, 0..10);

    let outcomes = db
        .bulk_operations(&[Operation::Find {
            key: b"key-00000004x".to_vec(),
            flags: FindFlags::GREATER_THAN,
        }])
        .expect("bulk");
    assert_eq!(
        outcomes[0].as_ref().expect("find"),
        &Outcome::Found {
            key: key(5),
            record: record(5),
        }
    );
}

#[test]
fn test_empty_keys_append_to_record_number_databases() {
    let test = TestEnv::new();
    let db = test.create_db(DbFlags::RECORD_NUMBER64);

    let outcomes = db
        .bulk_operations(&[insert(b"", b"first"), insert(b"", b"second")])
        .expect("bulk");
    assert_eq!(
        outcomes[1].as_ref().expect("append"),
        &Outcome::Inserted(2_u64.to_le_bytes().to_vec())
    );
    assert_eq!(db.find(&1_u64.to_le_bytes()).expect("find"), b"first");
}

#[test]
fn test_failed_steps_are_reported() {
    let test = TestEnv::new();
    let db = test
        .env()
        .create_database(
            1,
            DbFlags::empty(),
            &[crate::params::Parameter::new(crate::params::ParamName::KeySize, 4)],
        )
        .expect("create");

    let outcomes = db
        .bulk_operations(&[insert(b"toolong", b"x"), insert(b"four", b"y")])
        .expect("bulk");
    assert!(matches!(outcomes[0], Err(Error::InvalidKeySize { .. })));
    assert!(outcomes[1].is_ok());

    let events = test.events();
    assert_eq!(events.len(), 1, "{events:?}");
    assert_eq!(events[0].0, Severity::Error);
    assert!(events[0].1.starts_with("bulk_operations: "));
}

#[test]
fn test_steps_inside_a_transaction() {
    let test = TestEnv::with_config(
        EnvironmentConfig::default().with_flags(EnvFlags::ENABLE_TRANSACTIONS),
    );
    let db = test.create_db(DbFlags::empty());

    let txn = test.env().begin(TxnFlags::empty()).expect("begin");
    assert!(matches!(
        db.bulk_operations(&[insert(b"a", b"1")]),
        Err(Error::TxnConflict)
    ));
    let outcomes = db
        .bulk_operations_in(&txn, &[insert(b"a", b"1"), insert(b"b", b"2")])
        .expect("bulk");
    assert!(outcomes.iter().all(Result::is_ok));
    txn.abort().expect("abort");

    assert_eq!(db.count().expect("count"), 0);
}

#[test]
fn test_closed_handle_fails_the_whole_batch() {
    let test = TestEnv::new();
    let db = test.create_db(DbFlags::empty());
    db.close_with(CloseFlags::empty()).expect("close");

    assert!(matches!(
        db.bulk_operations(&[insert(b"a", b"1")]),
        Err(Error::NotReady(_))
    ));
}
