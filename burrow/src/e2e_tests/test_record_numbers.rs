//! Test record number databases, whose keys are assigned on append.

use crate::cursor::CursorMove;
use crate::e2e_tests::helpers::*;
use crate::error::Error;
use crate::params::{DbFlags, InsertFlags, KeyType, ParamName, Parameter};

#[test]
fn test_append_numbers_from_one() {
    let test = TestEnv::small_pages();
    let db = test.create_db(DbFlags::RECORD_NUMBER64);

    for i in 1..=300 {
        assert_eq!(db.append(&record(i)).expect("append"), u64::from(i));
    }
    assert_eq!(db.count().expect("count"), 300);
    assert_eq!(db.find(&7_u64.to_le_bytes()).expect("find"), record(7));

    let mut cursor = db.cursor().expect("cursor");
    let (last, _) = cursor.move_to(CursorMove::Last).expect("last");
    assert_eq!(last, 300_u64.to_le_bytes());
    db.check_integrity().expect("integrity");
}

#[test]
fn test_numbers_continue_after_the_largest_key() {
    let mut test = TestEnv::new();
    let db = test.create_db(DbFlags::RECORD_NUMBER32);
    for _ in 0..3 {
        db.append(b"r").expect("append");
    }
    db.erase(&2_u32.to_le_bytes()).expect("erase");
    assert_eq!(db.append(b"r").expect("append"), 4);
    drop(db);

    test.reopen();
    let db = test.env().open_database(1).expect("open");
    assert_eq!(db.append(b"r").expect("append"), 5);
    assert_eq!(db.parameters().expect("parameters").key_type, KeyType::UInt32);
    assert_eq!(db.parameters().expect("parameters").key_size, 4);
}

#[test]
fn test_insert_only_overwrites() {
    let test = TestEnv::new();
    let db = test.create_db(DbFlags::RECORD_NUMBER64);
    let one = db.append(b"first").expect("append");

    assert!(matches!(
        db.insert(&5_u64.to_le_bytes(), b"x", InsertFlags::empty()),
        Err(Error::InvalidParameter(_))
    ));
    db.insert(&one.to_le_bytes(), b"second", InsertFlags::OVERWRITE)
        .expect("overwrite");
    assert_eq!(db.find(&one.to_le_bytes()).expect("find"), b"second");
    assert!(matches!(
        db.insert(b"abc", b"x", InsertFlags::OVERWRITE),
        Err(Error::InvalidKeySize { .. })
    ));
}

#[test]
fn test_exhausted_numbers() {
    let test = TestEnv::new();
    let db = test.create_db(DbFlags::RECORD_NUMBER32);
    db.insert(&u32::MAX.to_le_bytes(), b"last", InsertFlags::OVERWRITE)
        .expect("insert");

    assert!(matches!(db.append(b"r"), Err(Error::LimitsReached(_))));
    assert_eq!(db.count().expect("count"), 1);
}

#[test]
fn test_record_number_creation_errors() {
    let test = TestEnv::new();
    let env = test.env();

    assert!(matches!(
        env.create_database(1, DbFlags::RECORD_NUMBER32 | DbFlags::RECORD_NUMBER64, &[]),
        Err(Error::InvalidParameter(_))
    ));
    assert!(matches!(
        env.create_database(
            1,
            DbFlags::RECORD_NUMBER64,
            &[Parameter::new(ParamName::KeyType, KeyType::Binary as u64)]
        ),
        Err(Error::InvalidParameter(_))
    ));

    let plain = env
        .create_database(2, DbFlags::empty(), &[])
        .expect("create");
    assert!(matches!(plain.append(b"r"), Err(Error::InvalidParameter(_))));
}

#[test]
fn test_appended_keys_allow_duplicates() {
    let test = TestEnv::new();
    let db = test.create_db(DbFlags::RECORD_NUMBER64 | DbFlags::ENABLE_DUPLICATE_KEYS);
    let number = db.append(b"a").expect("append");
    db.insert(&number.to_le_bytes(), b"b", InsertFlags::DUPLICATE)
        .expect("duplicate");

    assert_eq!(db.count_key(&number.to_le_bytes()).expect("count"), 2);
    assert_eq!(db.append(b"c").expect("append"), 2);
}
