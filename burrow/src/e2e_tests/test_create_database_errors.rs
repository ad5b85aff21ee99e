//! Test argument checking when databases are created.

use crate::e2e_tests::helpers::*;
use crate::error::Error;
use crate::params::{DbFlags, KeyType, ParamName, Parameter};
use crate::storage::header::max_databases;

#[test]
fn test_unknown_flags() {
    let test = TestEnv::new();
    let err = test
        .env()
        .create_database(1, DbFlags::from_bits_retain(1234), &[])
        .expect_err("unknown flags");
    assert!(matches!(err, Error::InvalidParameter(_)));
    assert!(test.env().database_names().expect("names").is_empty());
}

#[test]
fn test_reserved_names() {
    let test = TestEnv::new();
    for name in [0, 0xF000, 0xFFFF] {
        let err = test
            .env()
            .create_database(name, DbFlags::empty(), &[])
            .expect_err("reserved name");
        assert!(matches!(err, Error::InvalidParameter(_)));
    }
    test.env()
        .create_database(0xEFFF, DbFlags::empty(), &[])
        .expect("highest user name");
}

#[test]
fn test_sorted_duplicates_require_duplicates() {
    let test = TestEnv::new();
    let err = test
        .env()
        .create_database(1, DbFlags::SORT_DUPLICATES, &[])
        .expect_err("sort without duplicates");
    assert!(matches!(err, Error::InvalidParameter(_)));
}

#[test]
fn test_existing_name() {
    let test = TestEnv::new();
    drop(test.create_db(DbFlags::empty()));
    let err = test
        .env()
        .create_database(1, DbFlags::empty(), &[])
        .expect_err("already exists");
    assert!(matches!(err, Error::InvalidParameter(_)));
}

#[test]
fn test_parameters_checked() {
    let test = TestEnv::new();
    let env = test.env();

    let err = env
        .create_database(1, DbFlags::empty(), &[Parameter::new(ParamName::KeySize, 0)])
        .expect_err("zero key size");
    assert!(matches!(err, Error::InvalidParameter(_)));

    let err = env
        .create_database(
            1,
            DbFlags::empty(),
            &[
                Parameter::new(ParamName::KeyType, KeyType::UInt64 as u64),
                Parameter::new(ParamName::KeySize, 4),
            ],
        )
        .expect_err("size does not match type");
    assert!(matches!(err, Error::InvalidParameter(_)));

    let err = env
        .create_database(1, DbFlags::empty(), &[Parameter::new(ParamName::KeyType, 99)])
        .expect_err("unknown key type");
    assert!(matches!(err, Error::InvalidParameter(_)));

    let err = env
        .create_database(1, DbFlags::empty(), &[Parameter::new(ParamName::PageSize, 1024)])
        .expect_err("not a database parameter");
    assert!(matches!(err, Error::InvalidParameter(_)));

    let err = env
        .create_database(1, DbFlags::empty(), &[Parameter::new(ParamName::KeySize, 9000)])
        .expect_err("key larger than a node allows");
    assert!(matches!(err, Error::InvalidKeySize { .. }));
}

#[test]
fn test_directory_full() {
    let test = TestEnv::small_pages();
    let limit = max_databases(test.config.page_size);
    for name in 1..=limit {
        let name = u16::try_from(name).expect("name fits");
        drop(
            test.env()
                .create_database(name, DbFlags::empty(), &[])
                .expect("create"),
        );
    }
    let err = test
        .env()
        .create_database(1000, DbFlags::empty(), &[])
        .expect_err("directory full");
    assert!(matches!(err, Error::LimitsReached(_)));
    assert_eq!(test.env().database_names().expect("names").len(), limit);
}
