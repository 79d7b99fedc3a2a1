//! Store backends
//!
//! `postgres` drives sqlx from the synchronous engine; `memory` keeps
//! everything in-process for dry runs and tests.

pub mod memory;
pub mod postgres;

pub use memory::{MemoryStore, StoreFaults};
pub use postgres::PgStore;
