//! End-to-end tests at the public handle level.
//!
//! Each test file covers one scenario, driving environments, databases and
//! cursors through their public operations on real temporary files.

#![cfg(test)]


mod test_bulk_operations;
mod test_concurrency;
mod test_create_database_errors;
mod test_crash_recovery;
mod test_cursor;
mod test_custom_comparator;
mod test_get_parameters;
mod test_page_reuse;
mod test_persistence;
mod test_record_numbers;
mod test_rename_erase;
