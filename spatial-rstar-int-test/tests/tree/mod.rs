//! R*-tree integration test module.
//!
//! These tests drive the public tree API end to end, comparing every
//! answer against a linear scan of the same data.

mod bulk_load_test;
mod delete_test;
mod differential_test;
mod persistence_test;
mod reinsert_test;
mod structure_test;
