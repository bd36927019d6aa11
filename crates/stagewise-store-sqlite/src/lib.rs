//! SQLite backend for the Stagewise model registry.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Stage changes run inside a single
//! transaction, so this backend archives and assigns atomically.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteRegistry;
