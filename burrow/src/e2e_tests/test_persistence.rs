//! Test that committed data survives closing and reopening.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

use crate::config::EnvironmentConfig;
use crate::e2e_tests::helpers::*;
use crate::environment::Environment;
use crate::error::Error;
use crate::params::{DbFlags, EnvFlags, InsertFlags};

#[test]
fn test_reopen_after_many_inserts() {
    let mut test = TestEnv::small_pages();
    insert_range(&test.create_db(DbFlags::empty()), 0..2000);
    test.reopen();

    let db = test.env().open_database(1).expect("open");
    assert_eq!(db.count().expect("count"), 2000);
    for i in (0..2000).step_by(37) {
        assert_eq!(db.find(&key(i)).expect("find"), record(i));
    }
    let stats = db.check_integrity().expect("integrity");
    assert!(stats.depth >= 2);
}

#[test]
fn test_random_workload_matches_model() {
    let mut test = TestEnv::small_pages();
    let mut rng = StdRng::seed_from_u64(0x00C0_FFEE);
    let mut model = BTreeMap::new();

    for round in 0..3 {
        let db = if round == 0 {
            test.create_db(DbFlags::empty())
        } else {
            test.env().open_database(1).expect("open")
        };
        for _ in 0..1500 {
            let k = key(rng.random_range(0..600));
            if rng.random_bool(0.65) {
                let v = vec![rng.random::<u8>(); rng.random_range(0..120)];
                db.insert(&k, &v, InsertFlags::OVERWRITE).expect("insert");
                model.insert(k, v);
            } else {
                match db.erase(&k) {
                    Ok(()) => assert!(model.remove(&k).is_some()),
                    Err(Error::KeyNotFound) => assert!(!model.contains_key(&k)),
                    Err(e) => panic!("erase failed: {e}"),
                }
            }
        }
        drop(db);
        test.reopen();
    }

    let db = test.env().open_database(1).expect("open");
    let found: BTreeMap<Vec<u8>, Vec<u8>> = db
        .iter()
        .expect("iter")
        .collect::<crate::error::Result<_>>()
        .expect("items");
    assert_eq!(found, model);
    db.check_integrity().expect("integrity");
}

#[test]
fn test_several_databases_in_one_file() {
    let mut test = TestEnv::new();
    for name in 1..=5u16 {
        let db = test
            .env()
            .create_database(name, DbFlags::empty(), &[])
            .expect("create");
        insert_range(&db, 0..u32::from(name) * 10);
    }
    test.reopen();

    assert_eq!(
        test.env().database_names().expect("names"),
        vec![1, 2, 3, 4, 5]
    );
    for name in 1..=5u16 {
        let db = test.env().open_database(name).expect("open");
        assert_eq!(db.count().expect("count"), u64::from(name) * 10);
    }
}

#[test]
fn test_without_journal() {
    let test = TestEnv::with_config(EnvironmentConfig::default().with_flags(EnvFlags::DISABLE_JOURNAL));
    insert_range(&test.create_db(DbFlags::empty()), 0..100);
    assert!(!test.temp.journal().exists());

    let path = test.path().to_path_buf();
    let mut test = test;
    test.close();
    let env = Environment::open(Some(&path), test.config.clone()).expect("open");
    let db = env.open_database(1).expect("open database");
    assert_eq!(db.count().expect("count"), 100);
}

#[test]
fn test_create_truncates() {
    let mut test = TestEnv::new();
    insert_range(&test.create_db(DbFlags::empty()), 0..10);
    test.close();

    let env = Environment::create(Some(test.path()), test.config.clone()).expect("create again");
    assert!(env.database_names().expect("names").is_empty());
    assert!(matches!(
        env.open_database(1),
        Err(Error::DatabaseNotFound(1))
    ));
}
