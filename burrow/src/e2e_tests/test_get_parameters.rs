//! Test parameter queries on environments and databases.

use crate::e2e_tests::helpers::*;
use crate::error::Error;
use crate::params::{
    DbFlags, EnvFlags, KEY_SIZE_UNLIMITED, KeyType, ParamName, Parameter, RECORD_SIZE_UNLIMITED,
};
use crate::storage::header::max_databases;

#[test]
fn test_database_defaults() {
    let test = TestEnv::new();
    let db = test.create_db(DbFlags::empty());

    let mut params = [
        Parameter::query(ParamName::KeySize),
        Parameter::query(ParamName::DatabaseName),
        Parameter::query(ParamName::Flags),
        Parameter::query(ParamName::MaxKeysPerPage),
        Parameter::query(ParamName::RecordSize),
        Parameter::query(ParamName::RecordCount),
    ];
    db.get_parameters(&mut params).expect("get parameters");

    assert_eq!(params[0].value, 0xFFFF);
    assert_eq!(params[1].value, 1);
    assert_eq!(params[2].value, 0);
    assert_eq!(params[3].value, 441);
    assert_eq!(params[4].value, u64::from(RECORD_SIZE_UNLIMITED));
    assert_eq!(params[5].value, 0);
}

#[test]
fn test_key_size_changes_capacity() {
    let test = TestEnv::new();
    let db = test
        .env()
        .create_database(
            1,
            DbFlags::ENABLE_DUPLICATE_KEYS,
            &[
                Parameter::new(ParamName::KeyType, KeyType::UInt32 as u64),
                Parameter::new(ParamName::RecordSize, 8),
            ],
        )
        .expect("create database");

    let params = db.parameters().expect("parameters");
    assert_eq!(params.key_type, KeyType::UInt32);
    assert_eq!(params.key_size, 4);
    assert_eq!(params.record_size, 8);
    assert_eq!(params.max_keys_per_page, 961);
    assert_eq!(params.flags, DbFlags::ENABLE_DUPLICATE_KEYS);
}

#[test]
fn test_parameters_survive_reopen() {
    let mut test = TestEnv::small_pages();
    drop(
        test.env()
            .create_database(
                9,
                DbFlags::empty(),
                &[Parameter::new(ParamName::KeySize, 16)],
            )
            .expect("create"),
    );
    test.reopen();

    let db = test.env().open_database(9).expect("open");
    let params = db.parameters().expect("parameters");
    assert_eq!(params.name, 9);
    assert_eq!(params.key_size, 16);
    assert_ne!(params.key_size, KEY_SIZE_UNLIMITED);
}

#[test]
fn test_environment_parameters() {
    let test = TestEnv::small_pages();
    let mut params = [
        Parameter::query(ParamName::PageSize),
        Parameter::query(ParamName::CacheSize),
        Parameter::query(ParamName::MaxDatabases),
        Parameter::query(ParamName::Flags),
    ];
    test.env().get_parameters(&mut params).expect("get parameters");
    assert_eq!(params[0].value, 1024);
    assert_eq!(params[1].value, test.config.cache_size as u64);
    assert_eq!(params[2].value, max_databases(1024) as u64);
    assert_eq!(params[3].value, u64::from(EnvFlags::empty().bits()));

    let mut params = [Parameter::query(ParamName::KeySize)];
    assert!(matches!(
        test.env().get_parameters(&mut params),
        Err(Error::InvalidParameter(_))
    ));
}
