//! Test handles shared between threads.

use std::sync::Arc;
use std::thread;

use crate::e2e_tests::helpers::*;
use crate::environment::Environment;
use crate::params::{DbFlags, InsertFlags};

#[test]
fn test_threads_share_one_database() {
    let test = TestEnv::small_pages();
    let db = test.create_db(DbFlags::empty());

    thread::scope(|s| {
        for t in 0..4u32 {
            let db = &db;
            s.spawn(move || {
                for i in 0..250 {
                    let n = t * 1000 + i;
                    db.insert(&key(n), &record(n), InsertFlags::empty())
                        .expect("insert");
                    assert_eq!(db.find(&key(n)).expect("find"), record(n));
                }
            });
        }
    });

    assert_eq!(db.count().expect("count"), 1000);
    db.check_integrity().expect("integrity");
}

#[test]
fn test_readers_and_writers() {
    let test = TestEnv::small_pages();
    let db = test.create_db(DbFlags::empty());
    insert_range(&db, 0..500);

    thread::scope(|s| {
        let db = &db;
        s.spawn(move || {
            for i in 500..1000 {
                db.insert(&key(i), &record(i), InsertFlags::empty())
                    .expect("insert");
            }
        });
        s.spawn(move || {
            for i in (0..500).step_by(2) {
                db.erase(&key(i)).expect("erase");
            }
        });
        for _ in 0..2 {
            s.spawn(move || {
                for i in (1..500).step_by(2) {
                    assert_eq!(db.find(&key(i)).expect("find"), record(i));
                }
            });
        }
    });

    assert_eq!(db.count().expect("count"), 750);
    db.check_integrity().expect("integrity");
}

#[test]
fn test_environment_moves_between_threads() {
    let test = TestEnv::new();
    let path = test.path().to_path_buf();
    let config = test.config.clone();
    drop(test.create_db(DbFlags::empty()));
    let mut test = test;
    test.close();

    let env = Arc::new(Environment::open(Some(&path), config).expect("open"));
    let worker = {
        let env = Arc::clone(&env);
        thread::spawn(move || {
            let db = env.open_database(1).expect("open database");
            insert_range(&db, 0..100);
        })
    };
    worker.join().expect("worker");

    let db = env.open_database(1).expect("open database");
    assert_eq!(db.count().expect("count"), 100);
}
