//! The unit-of-work interface every store backend provides
//!
//! Marker tables are addressed by name; backends create them on first write.

use schemig_core::{ConnectionIdentity, StoreError, StoreResult};

use crate::backends::{MemoryStore, PgStore};

/// Operations the module adapters need from a store
pub trait Store: Send {
    /// Short backend name for logs
    fn backend_name(&self) -> &'static str;

    /// Run `statements` as one unit of work (a single transaction where the
    /// backend supports it)
    fn execute_batch(&mut self, statements: &[String]) -> StoreResult<()>;

    fn table_exists(&mut self, table: &str) -> StoreResult<bool>;

    /// Version stored for `module` in a `(module, version)` table
    fn read_version_row(&mut self, table: &str, module: &str) -> StoreResult<Option<i64>>;

    fn write_version_row(&mut self, table: &str, module: &str, version: i64) -> StoreResult<()>;

    /// Value stored under `key` in a `(key, value)` table
    fn read_key(&mut self, table: &str, key: &str) -> StoreResult<Option<String>>;

    fn write_key(&mut self, table: &str, key: &str, value: &str) -> StoreResult<()>;

    /// Try to take the named advisory lock without blocking
    fn try_lock(&mut self, name: &str) -> StoreResult<bool>;

    fn unlock(&mut self, name: &str) -> StoreResult<()>;
}

/// Open the store a connection identity points at
pub fn connect(identity: &ConnectionIdentity) -> StoreResult<Box<dyn Store>> {
    match identity.scheme() {
        "postgres" | "postgresql" => Ok(Box::new(PgStore::connect(identity)?)),
        "memory" => Ok(Box::new(MemoryStore::new())),
        other => Err(StoreError::Unsupported(format!(
            "no backend for scheme '{}' (expected postgres, postgresql or memory)",
            other
        ))),
    }
}
