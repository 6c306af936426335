//! SQLite backend for the Pathway rule store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Rule mutations load the rule, apply a
//! [`pathway_core::lifecycle`] function and write it back inside a single
//! `IMMEDIATE` transaction.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
