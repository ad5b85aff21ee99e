//! Test renaming and erasing databases.

use crate::e2e_tests::helpers::*;
use crate::error::Error;
use crate::params::DbFlags;

fn three_databases(test: &TestEnv) {
    for name in [1, 2, 3] {
        let db = test
            .env()
            .create_database(name, DbFlags::empty(), &[])
            .expect("create");
        insert_range(&db, 0..u32::from(name));
    }
}

#[test]
fn test_rename() {
    let mut test = TestEnv::new();
    three_databases(&test);

    test.env().rename_database(2, 20).expect("rename");
    assert_eq!(test.env().database_names().expect("names"), vec![1, 3, 20]);
    assert!(matches!(
        test.env().open_database(2),
        Err(Error::DatabaseNotFound(2))
    ));

    test.reopen();
    let db = test.env().open_database(20).expect("open renamed");
    assert_eq!(db.count().expect("count"), 2);
    assert_eq!(db.name(), 20);
}

#[test]
fn test_rename_conflicts() {
    let test = TestEnv::new();
    three_databases(&test);
    let env = test.env();

    assert!(matches!(
        env.rename_database(1, 3),
        Err(Error::DatabaseAlreadyExists(3))
    ));
    assert!(matches!(
        env.rename_database(7, 8),
        Err(Error::DatabaseNotFound(7))
    ));
    assert!(matches!(
        env.rename_database(1, 0),
        Err(Error::InvalidParameter(_))
    ));
    assert!(matches!(
        env.rename_database(1, 0xF000),
        Err(Error::InvalidParameter(_))
    ));
    env.rename_database(1, 1).expect("same name");

    let open = env.open_database(1).expect("open");
    assert!(matches!(
        env.rename_database(1, 9),
        Err(Error::DatabaseAlreadyOpen(1))
    ));
    drop(open);
    env.rename_database(1, 9).expect("rename after close");
}

#[test]
fn test_erase() {
    let mut test = TestEnv::new();
    three_databases(&test);

    test.env().erase_database(2).expect("erase");
    assert_eq!(test.env().database_names().expect("names"), vec![1, 3]);
    assert!(matches!(
        test.env().erase_database(2),
        Err(Error::DatabaseNotFound(2))
    ));

    test.reopen();
    assert_eq!(test.env().database_names().expect("names"), vec![1, 3]);
    let db = test
        .env()
        .create_database(2, DbFlags::empty(), &[])
        .expect("reuse the name");
    assert_eq!(db.count().expect("count"), 0);
}

#[test]
fn test_erase_open_database() {
    let test = TestEnv::new();
    let db = test.create_db(DbFlags::empty());
    assert!(matches!(
        test.env().erase_database(1),
        Err(Error::DatabaseAlreadyOpen(1))
    ));
    db.close().expect("close");
    test.env().erase_database(1).expect("erase");
    assert!(matches!(
        db.insert(b"k", b"v", crate::params::InsertFlags::empty()),
        Err(Error::NotReady(_))
    ));
}

#[test]
fn test_erase_large_database_frees_pages() {
    let test = TestEnv::small_pages();
    let db = test.create_db(DbFlags::empty());
    insert_range(&db, 0..3000);
    drop(db);
    let grown = test.file_size();

    test.env().erase_database(1).expect("erase");
    insert_range(&test.create_db(DbFlags::empty()), 0..3000);
    assert!(test.file_size() <= grown);
}
