//! Test journal replay when an environment is reopened after a crash.

use std::io::Write;

use crate::diagnostics::Severity;
use crate::e2e_tests::helpers::*;
use crate::environment::Environment;
use crate::error::Error;
use crate::params::{DbFlags, EnvFlags};
use crate::storage::io::FileStorage;
use crate::storage::journal::Journal;
use crate::storage::page::{DEFAULT_PAGE_SIZE, Page};

/// Journal every page of `image` as one complete changeset.
fn journal_image(test: &TestEnv, image: &[u8]) {
    let storage = FileStorage::open_or_create(&test.temp.journal(), false).expect("journal file");
    let mut journal = Journal::new(Box::new(storage)).expect("journal");
    let pages: Vec<Page> = image
        .chunks(DEFAULT_PAGE_SIZE)
        .map(|chunk| Page::from_vec(chunk.to_vec()))
        .collect();
    journal
        .write_changeset(1, pages.iter().enumerate().map(|(i, page)| (i as u64, page)))
        .expect("write changeset");
}

/// Leave the file as it was before the last commit, with that commit
/// sitting complete in the journal.
fn crash_before_write_back(test: &mut TestEnv) {
    insert_range(&test.create_db(DbFlags::empty()), 0..50);
    test.close();
    let before = std::fs::read(test.path()).expect("read file");

    test.reopen();
    let db = test.env().open_database(1).expect("open");
    insert_range(&db, 50..100);
    drop(db);
    test.close();
    let after = std::fs::read(test.path()).expect("read file");

    journal_image(test, &after);
    std::fs::write(test.path(), before).expect("restore file");
}

#[test]
fn test_replay_committed_changeset() {
    let mut test = TestEnv::new();
    crash_before_write_back(&mut test);

    test.reopen();
    let db = test.env().open_database(1).expect("open");
    assert_eq!(db.count().expect("count"), 100);
    assert_eq!(db.find(&key(99)).expect("find"), record(99));
    db.check_integrity().expect("integrity");

    let warnings: Vec<_> = test
        .events()
        .into_iter()
        .filter(|(severity, _)| *severity == Severity::Warning)
        .collect();
    assert_eq!(warnings.len(), 1, "{warnings:?}");
    assert!(warnings[0].1.contains("replayed 1 journal changeset"));

    // the journal was cleared; a second reopen replays nothing
    drop(db);
    test.reopen();
    assert_eq!(std::fs::metadata(test.temp.journal()).expect("journal").len(), 0);
    assert_eq!(test.events().len(), 1);
}

#[test]
fn test_read_only_open_needs_recovery() {
    let mut test = TestEnv::new();
    crash_before_write_back(&mut test);

    let read_only = test.config.clone().with_flags(EnvFlags::READ_ONLY);
    let err = Environment::open(Some(test.path()), read_only).expect_err("needs recovery");
    assert!(matches!(err, Error::NeedRecovery));
    assert!(test
        .events()
        .iter()
        .any(|(severity, _)| *severity == Severity::Fatal));

    // a read-write open repairs the file, after which read-only works
    test.reopen();
    test.close();
    let read_only = test.config.clone().with_flags(EnvFlags::READ_ONLY);
    let env = Environment::open(Some(test.path()), read_only).expect("read-only open");
    let db = env.open_database(1).expect("open database");
    assert_eq!(db.count().expect("count"), 100);
}

#[test]
fn test_torn_journal_tail_is_discarded() {
    let mut test = TestEnv::new();
    insert_range(&test.create_db(DbFlags::empty()), 0..20);
    test.close();

    let mut journal = std::fs::OpenOptions::new()
        .append(true)
        .open(test.temp.journal())
        .expect("journal");
    journal
        .write_all(b"half of a record that never finished")
        .expect("garbage");
    drop(journal);

    test.reopen();
    let db = test.env().open_database(1).expect("open");
    assert_eq!(db.count().expect("count"), 20);
    let events = test.events();
    assert_eq!(events.len(), 1, "{events:?}");
    assert_eq!(events[0].0, Severity::Warning);
    assert!(events[0].1.contains("incomplete journal"));
}

#[test]
fn test_missing_file() {
    let test = TestEnv::new();
    let missing = test.path().with_file_name("missing.db");
    let err = Environment::open(Some(&missing), test.config.clone()).expect_err("missing file");
    assert!(matches!(err, Error::FileNotFound(path) if path == missing));
}

#[test]
fn test_not_an_environment() {
    let test = TestEnv::new();
    let other = test.path().with_file_name("other.db");
    std::fs::write(&other, vec![0x5a; 4096]).expect("write");
    let err = Environment::open(Some(&other), test.config.clone()).expect_err("garbage file");
    assert!(matches!(err, Error::InvalidFileHeader));
}
