//! Test that freed pages are handed out again instead of growing the file.

use crate::e2e_tests::helpers::*;
use crate::params::{DbFlags, InsertFlags};

fn blob(i: u32) -> Vec<u8> {
    vec![u8::try_from(i % 251).expect("fits"); 40_000]
}

#[test]
fn test_erase_and_reinsert_blobs() {
    let test = TestEnv::new();
    let db = test.create_db(DbFlags::empty());

    for i in 0..20 {
        db.insert(&key(i), &blob(i), InsertFlags::empty()).expect("insert");
    }
    let grown = test.file_size();

    for _ in 0..5 {
        for i in 0..20 {
            db.erase(&key(i)).expect("erase");
        }
        for i in 0..20 {
            db.insert(&key(i), &blob(i + 1), InsertFlags::empty())
                .expect("insert");
        }
        assert!(test.file_size() <= grown, "file grew past {grown}");
    }
    assert_eq!(db.find(&key(7)).expect("find"), blob(8));
    db.check_integrity().expect("integrity");
}

#[test]
fn test_overwrite_reuses_overflow_pages() {
    let test = TestEnv::new();
    let db = test.create_db(DbFlags::empty());
    db.insert(b"blob", &blob(0), InsertFlags::empty()).expect("insert");
    db.insert(b"blob", &blob(1), InsertFlags::OVERWRITE)
        .expect("overwrite");
    let grown = test.file_size();

    for i in 2..30 {
        db.insert(b"blob", &blob(i), InsertFlags::OVERWRITE)
            .expect("overwrite");
    }
    assert!(test.file_size() <= grown);
    assert_eq!(db.find(b"blob").expect("find"), blob(29));
}

#[test]
fn test_erased_database_pages_are_reused() {
    let test = TestEnv::new();
    let first = test
        .env()
        .create_database(2, DbFlags::empty(), &[])
        .expect("create");
    for i in 0..10 {
        first.insert(&key(i), &blob(i), InsertFlags::empty()).expect("insert");
    }
    first.close().expect("close");
    let grown = test.file_size();

    test.env().erase_database(2).expect("erase database");
    let second = test
        .env()
        .create_database(3, DbFlags::empty(), &[])
        .expect("create");
    for i in 0..10 {
        second.insert(&key(i), &blob(i), InsertFlags::empty()).expect("insert");
    }
    assert!(test.file_size() <= grown);
}

#[test]
fn test_freed_pages_survive_reopen() {
    let mut test = TestEnv::new();
    let db = test.create_db(DbFlags::empty());
    for i in 0..10 {
        db.insert(&key(i), &blob(i), InsertFlags::empty()).expect("insert");
    }
    let grown = test.file_size();
    for i in 0..10 {
        db.erase(&key(i)).expect("erase");
    }
    drop(db);
    test.reopen();

    let db = test.env().open_database(1).expect("open");
    for i in 0..10 {
        db.insert(&key(i), &blob(i), InsertFlags::empty()).expect("insert");
    }
    assert!(test.file_size() <= grown);
}
