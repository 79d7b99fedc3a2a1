//! Store-backed `SchemaManager`

use std::path::{Path, PathBuf};

use schemig_core::{Migration, SchemaManager, StoreError, StoreResult, Version};

use super::{ModuleDescriptor, VersionMarker};
use crate::script::{read_script, split_sql_statements};
use crate::store::Store;

/// Migrates one module's store according to its descriptor
pub struct StoreSchemaManager {
    descriptor: ModuleDescriptor,
    scripts_dir: PathBuf,
    store: Box<dyn Store>,
}

impl StoreSchemaManager {
    pub fn new(descriptor: ModuleDescriptor, scripts_dir: impl Into<PathBuf>, store: Box<dyn Store>) -> Self {
        Self {
            descriptor,
            scripts_dir: scripts_dir.into(),
            store,
        }
    }

    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    fn read_row(&mut self, table: &str) -> StoreResult<Option<Version>> {
        match self.store.read_version_row(table, &self.descriptor.name)? {
            None => Ok(None),
            Some(value) => Version::from_marker(value)
                .map(Some)
                .ok_or_else(|| StoreError::CorruptMarker {
                    location: table.to_string(),
                    value: value.to_string(),
                }),
        }
    }
}

impl SchemaManager for StoreSchemaManager {
    fn module_name(&self) -> &str {
        &self.descriptor.name
    }

    fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    fn match_script(&self, file_name: &str) -> Option<(Version, u32)> {
        self.descriptor.matcher.matches(file_name)
    }

    fn current_version(&mut self) -> StoreResult<Version> {
        match self.descriptor.marker.clone() {
            VersionMarker::Row { table } => Ok(self.read_row(&table)?.unwrap_or_default()),
            VersionMarker::Key { table, key } => match self.store.read_key(&table, &key)? {
                None => Ok(Version::Uninitialized),
                Some(value) => value
                    .trim()
                    .parse::<u32>()
                    .map(Version::At)
                    .map_err(|_| StoreError::CorruptMarker {
                        location: self.descriptor.marker.location(),
                        value,
                    }),
            },
            VersionMarker::Inferred { table, legacy_table } => {
                if let Some(version) = self.read_row(&table)? {
                    return Ok(version);
                }
                if self.store.table_exists(&legacy_table)? {
                    tracing::debug!(
                        "Module '{}' has no version row but table '{}' exists, assuming version 0",
                        self.descriptor.name,
                        legacy_table
                    );
                    return Ok(Version::At(0));
                }
                Ok(Version::Uninitialized)
            }
        }
    }

    fn apply_step(&mut self, step: &Migration) -> StoreResult<()> {
        let sql = read_script(&step.payload)?;
        let statements = split_sql_statements(&sql);
        if statements.is_empty() {
            tracing::debug!("Migration {} has no statements", step.name);
            return Ok(());
        }

        tracing::debug!(
            "Executing {} statement(s) from {} on {}",
            statements.len(),
            step.name,
            self.store.backend_name()
        );
        self.store.execute_batch(&statements)
    }

    fn record_version(&mut self, version: u32) -> StoreResult<()> {
        match &self.descriptor.marker {
            VersionMarker::Row { table } | VersionMarker::Inferred { table, .. } => {
                self.store
                    .write_version_row(table, &self.descriptor.name, i64::from(version))
            }
            VersionMarker::Key { table, key } => {
                self.store.write_key(table, key, &version.to_string())
            }
        }
    }

    fn acquire_lock(&mut self) -> StoreResult<bool> {
        let name = self.descriptor.lock_name();
        self.store.try_lock(&name)
    }

    fn release_lock(&mut self) -> StoreResult<()> {
        let name = self.descriptor.lock_name();
        self.store.unlock(&name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryStore;
    use crate::modules::{config, history, worker};
    use std::fs;
    use tempfile::TempDir;

    fn manager(descriptor: ModuleDescriptor, store: &MemoryStore, dir: &TempDir) -> StoreSchemaManager {
        StoreSchemaManager::new(descriptor, dir.path(), Box::new(store.clone()))
    }

    #[test]
    fn test_row_marker_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let mut manager = manager(worker(), &store, &dir);

        assert_eq!(manager.current_version().unwrap(), Version::Uninitialized);
        manager.record_version(4).unwrap();
        assert_eq!(manager.current_version().unwrap(), Version::At(4));
        assert_eq!(store.version_row("worker_schema_version", "worker"), Some(4));
    }

    #[test]
    fn test_negative_row_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        store.put_version_row("worker_schema_version", "worker", -3);
        let mut manager = manager(worker(), &store, &dir);

        assert!(matches!(
            manager.current_version(),
            Err(StoreError::CorruptMarker { .. })
        ));
    }

    #[test]
    fn test_key_marker() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let mut manager = manager(config(), &store, &dir);

        assert_eq!(manager.current_version().unwrap(), Version::Uninitialized);
        manager.record_version(2).unwrap();
        assert_eq!(store.entry("config_entries", "schema.version").as_deref(), Some("2"));
        assert_eq!(manager.current_version().unwrap(), Version::At(2));

        store.put_entry("config_entries", "schema.version", "two");
        match manager.current_version() {
            Err(StoreError::CorruptMarker { location, value }) => {
                assert_eq!(location, "config_entries[schema.version]");
                assert_eq!(value, "two");
            }
            other => panic!("expected CorruptMarker, got {:?}", other),
        }
    }

    #[test]
    fn test_inferred_marker() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let mut manager = manager(history(), &store, &dir);

        assert_eq!(manager.current_version().unwrap(), Version::Uninitialized);

        store.create_table("execution_history");
        assert_eq!(manager.current_version().unwrap(), Version::At(0));

        manager.record_version(3).unwrap();
        assert_eq!(manager.current_version().unwrap(), Version::At(3));
    }

    #[test]
    fn test_apply_step_runs_script_as_one_batch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("worker_0_to_1.sql");
        fs::write(
            &path,
            "-- Up\nCREATE TABLE worker_leases (id BIGINT PRIMARY KEY);\nCREATE INDEX lease_idx ON worker_leases (id);\n",
        )
        .unwrap();

        let store = MemoryStore::new();
        let mut manager = manager(worker(), &store, &dir);
        let step = Migration::new(Version::At(0), 1, "worker_0_to_1.sql", path);

        manager.apply_step(&step).unwrap();

        let batches = store.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert!(store.has_table("worker_leases"));
    }

    #[test]
    fn test_empty_script_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("worker_1_to_2.sql");
        fs::write(&path, "-- intentionally empty\n").unwrap();

        let store = MemoryStore::new();
        let mut manager = manager(worker(), &store, &dir);
        manager
            .apply_step(&Migration::new(Version::At(1), 2, "worker_1_to_2.sql", path))
            .unwrap();
        assert!(store.batches().is_empty());
    }

    #[test]
    fn test_locks_use_module_name() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let mut first = manager(worker(), &store, &dir);
        let mut second = manager(worker(), &store, &dir);

        assert!(first.acquire_lock().unwrap());
        assert!(store.is_locked("schemig:worker"));
        assert!(!second.acquire_lock().unwrap());
        first.release_lock().unwrap();
        assert!(second.acquire_lock().unwrap());
    }
}
