//! Test cursor movement and cursor-based changes.

use crate::cursor::CursorMove;
use crate::e2e_tests::helpers::*;
use crate::error::Error;
use crate::params::{DbFlags, FindFlags, InsertFlags};

#[test]
fn test_full_scan_both_directions() {
    let test = TestEnv::small_pages();
    let db = test.create_db(DbFlags::empty());
    insert_range(&db, 0..500);

    let mut cursor = db.cursor().expect("cursor");
    let mut forward = Vec::new();
    let mut mv = CursorMove::First;
    loop {
        match cursor.move_to(mv) {
            Ok((k, r)) => forward.push((k, r)),
            Err(Error::KeyNotFound) => break,
            Err(e) => panic!("move failed: {e}"),
        }
        mv = CursorMove::Next;
    }
    assert_eq!(forward.len(), 500);
    assert!(forward.iter().enumerate().all(|(i, (k, r))| {
        let i = u32::try_from(i).expect("fits");
        *k == key(i) && *r == record(i)
    }));

    let mut backward = Vec::new();
    let mut mv = CursorMove::Last;
    while let Ok((k, _)) = cursor.move_to(mv) {
        backward.push(k);
        mv = CursorMove::Previous;
    }
    backward.reverse();
    assert_eq!(backward, forward.into_iter().map(|(k, _)| k).collect::<Vec<_>>());
}

#[test]
fn test_past_the_end_keeps_position() {
    let test = TestEnv::new();
    let db = test.create_db(DbFlags::empty());
    insert_range(&db, 0..3);

    let mut cursor = db.cursor().expect("cursor");
    cursor.move_to(CursorMove::First).expect("first");
    assert!(matches!(
        cursor.move_to(CursorMove::Previous),
        Err(Error::KeyNotFound)
    ));
    assert_eq!(cursor.current().expect("current").0, key(0));

    cursor.move_to(CursorMove::Last).expect("last");
    assert!(matches!(
        cursor.move_to(CursorMove::NextKey),
        Err(Error::KeyNotFound)
    ));
    assert_eq!(cursor.current().expect("current").0, key(2));
}

#[test]
fn test_find_then_walk() {
    let test = TestEnv::small_pages();
    let db = test.create_db(DbFlags::empty());
    insert_range(&db, 0..200);

    let mut cursor = db.cursor().expect("cursor");
    assert_eq!(cursor.find(&key(100)).expect("find"), record(100));
    assert_eq!(cursor.move_to(CursorMove::Next).expect("next").0, key(101));
    assert_eq!(
        cursor.move_to(CursorMove::PreviousKey).expect("previous").0,
        key(100)
    );

    // a failed find leaves the cursor alone
    assert!(matches!(cursor.find(b"nope"), Err(Error::KeyNotFound)));
    assert_eq!(cursor.current().expect("current").0, key(100));

    let (k, _) = cursor
        .find_approx(b"key-00000150x", FindFlags::GREATER_THAN)
        .expect("approx");
    assert_eq!(k, key(151));
}

#[test]
fn test_erase_while_scanning() {
    let test = TestEnv::small_pages();
    let db = test.create_db(DbFlags::empty());
    insert_range(&db, 0..300);

    let mut cursor = db.cursor().expect("cursor");
    let mut entry = cursor.move_to(CursorMove::First);
    let mut erased = 0;
    while let Ok((k, _)) = entry {
        if k[k.len() - 1] % 2 == 0 {
            cursor.erase().expect("erase");
            assert!(cursor.is_nil());
            erased += 1;
            entry = cursor.find_approx(&k, FindFlags::GREATER_THAN);
        } else {
            entry = cursor.move_to(CursorMove::Next);
        }
    }
    assert!(matches!(entry, Err(Error::KeyNotFound)));
    assert_eq!(erased, 150);
    assert_eq!(db.count().expect("count"), 150);
    assert!(all_keys(&db).iter().all(|k| k[k.len() - 1] % 2 == 1));
    db.check_integrity().expect("integrity");
}

#[test]
fn test_overwrite_through_cursor() {
    let test = TestEnv::new();
    let db = test.create_db(DbFlags::empty());
    insert_range(&db, 0..10);

    let mut cursor = db.cursor().expect("cursor");
    cursor.find(&key(4)).expect("find");
    cursor.overwrite(&vec![7u8; 5000]).expect("overwrite");
    assert_eq!(db.find(&key(4)).expect("find"), vec![7u8; 5000]);
    assert_eq!(cursor.current().expect("current").1, vec![7u8; 5000]);

    cursor.insert(&key(50), b"new", InsertFlags::empty()).expect("insert");
    assert_eq!(cursor.current().expect("current").0, key(50));
    assert!(matches!(
        cursor.insert(&key(4), b"dup", InsertFlags::empty()),
        Err(Error::DuplicateKey)
    ));
}

#[test]
fn test_cloned_cursor_is_independent() {
    let test = TestEnv::new();
    let db = test.create_db(DbFlags::empty());
    insert_range(&db, 0..5);

    let mut a = db.cursor().expect("cursor");
    a.find(&key(2)).expect("find");
    let mut b = a.try_clone().expect("clone");
    a.move_to(CursorMove::Next).expect("next");
    assert_eq!(a.current().expect("current").0, key(3));
    assert_eq!(b.current().expect("current").0, key(2));
}
