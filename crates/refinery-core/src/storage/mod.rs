//! Storage layer for Refinery Core.
//!
//! SQLite persistence for jobs, datasets and evaluations behind the
//! `JobStore` trait.

// SQL strings don't need hash-less raw strings
#![allow(clippy::needless_raw_string_hashes)]

pub mod database;
pub mod error;
pub mod sqlite_store;

pub use database::Database;
pub use error::{StorageError, StorageResult};
pub use sqlite_store::SqliteJobStore;
