//! Test user-supplied key comparators.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::comparator::{CompareError, Comparator};
use crate::e2e_tests::helpers::*;
use crate::error::Error;
use crate::params::{DbFlags, InsertFlags, KeyType, ParamName, Parameter};

fn custom_db(test: &TestEnv) -> crate::database::Database {
    test.env()
        .create_database(
            1,
            DbFlags::empty(),
            &[Parameter::new(ParamName::KeyType, KeyType::Custom as u64)],
        )
        .expect("create database")
}

#[test]
fn test_comparator_is_called() {
    let test = TestEnv::new();
    let db = custom_db(&test);

    let counter = Arc::new(AtomicUsize::new(0));
    let calls = Arc::clone(&counter);
    db.set_comparator(Some(Comparator::custom(move |a, b| {
        calls.fetch_add(1, Ordering::SeqCst);
        a.cmp(b)
    })))
    .expect("set comparator");

    db.insert(b"1", b"a", InsertFlags::empty()).expect("insert");
    db.insert(b"2", b"b", InsertFlags::empty()).expect("insert");
    db.insert(b"3", b"c", InsertFlags::empty()).expect("insert");
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[test]
fn test_constant_comparator_is_called_once_per_insert() {
    let test = TestEnv::new();
    let db = custom_db(&test);

    let counter = Arc::new(AtomicUsize::new(0));
    let calls = Arc::clone(&counter);
    db.set_comparator(Some(Comparator::custom(move |_: &[u8], _: &[u8]| {
        calls.fetch_add(1, Ordering::SeqCst);
        std::cmp::Ordering::Greater
    })))
    .expect("set comparator");

    // every new key sorts after the last one, so each insert appends
    db.insert(b"1", b"a", InsertFlags::empty()).expect("insert");
    db.insert(b"2", b"b", InsertFlags::empty()).expect("insert");
    db.insert(b"3", b"c", InsertFlags::empty()).expect("insert");
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(db.key_count().expect("key count"), 3);
}

#[test]
fn test_custom_key_type_needs_a_comparator() {
    let test = TestEnv::new();
    let db = custom_db(&test);
    let err = db
        .insert(b"1", b"a", InsertFlags::empty())
        .expect_err("no comparator");
    assert!(matches!(err, Error::InvalidParameter(_)));
}

#[test]
fn test_comparator_defines_order() {
    let test = TestEnv::new();
    let db = test.create_db(DbFlags::empty());
    db.set_comparator(Some(Comparator::custom(|a: &[u8], b: &[u8]| b.cmp(a))))
        .expect("set comparator");
    insert_range(&db, 0..100);

    let keys = all_keys(&db);
    let mut expected: Vec<Vec<u8>> = (0..100).map(key).collect();
    expected.reverse();
    assert_eq!(keys, expected);
    db.check_integrity().expect("integrity");
}

#[test]
fn test_failing_comparator_leaves_tree_unchanged() {
    let test = TestEnv::small_pages();
    let db = test.create_db(DbFlags::empty());
    insert_range(&db, 0..200);

    let poison = key(150);
    db.set_comparator(Some(Comparator::fallible(move |a: &[u8], b: &[u8]| {
        if a == poison.as_slice() || b == poison.as_slice() {
            Err(CompareError::new("refusing to compare"))
        } else {
            Ok(a.cmp(b))
        }
    })))
    .expect("set comparator");

    let err = db
        .insert(&key(150), b"x", InsertFlags::OVERWRITE)
        .expect_err("comparator fails");
    assert!(matches!(err, Error::Comparator(_)));

    db.set_comparator(None).expect("restore default");
    assert_eq!(db.count().expect("count"), 200);
    assert_eq!(db.find(&key(150)).expect("find"), record(150));
    db.check_integrity().expect("integrity");
}

#[test]
fn test_panicking_comparator_is_contained() {
    let test = TestEnv::new();
    let db = custom_db(&test);
    db.set_comparator(Some(Comparator::custom(|a: &[u8], b: &[u8]| {
        assert!(a.len() < 100 && b.len() < 100, "key too long");
        a.cmp(b)
    })))
    .expect("set comparator");

    db.insert(b"short", b"1", InsertFlags::empty()).expect("insert");
    let err = db
        .insert(&[b'x'; 200], b"2", InsertFlags::empty())
        .expect_err("comparator panics");
    assert!(matches!(err, Error::Comparator(_)));
    assert_eq!(db.count().expect("count"), 1);
}
