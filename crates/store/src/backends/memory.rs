//! In-memory store
//!
//! Keeps marker tables, key/value entries and the set of tables created by
//! scripts in process memory. Clones share state, so a test can hand one
//! handle to a manager and inspect another. Faults can be injected to
//! exercise the engine's retry and verification paths.

use parking_lot::Mutex;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};

use schemig_core::{StoreError, StoreResult};

use crate::security::validate_identifier;
use crate::store::Store;

/// Failures the memory store will simulate
#[derive(Debug, Clone, Default)]
pub struct StoreFaults {
    /// Marker writes that fail with a refused connection before succeeding
    pub transient_write_failures: usize,
    /// Marker writes report success but are silently dropped
    pub drop_writes: bool,
    /// Any batch with a statement containing this text fails
    pub fail_statement_containing: Option<String>,
    /// Every operation fails as if the store were still starting
    pub starting_up: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeSet<String>,
    version_rows: BTreeMap<(String, String), i64>,
    entries: BTreeMap<(String, String), String>,
    batches: Vec<Vec<String>>,
    locks: BTreeSet<String>,
    faults: StoreFaults,
}

impl MemoryState {
    fn check_available(&self) -> StoreResult<()> {
        if self.faults.starting_up {
            return Err(StoreError::StartingUp(
                "the database system is starting up".to_string(),
            ));
        }
        Ok(())
    }

    fn check_write(&mut self) -> StoreResult<bool> {
        self.check_available()?;
        if self.faults.transient_write_failures > 0 {
            self.faults.transient_write_failures -= 1;
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(!self.faults.drop_writes)
    }
}

/// Store kept entirely in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the injected faults
    pub fn set_faults(&self, faults: StoreFaults) {
        self.state.lock().faults = faults;
    }

    /// Pretend a table already exists (e.g. a pre-managed legacy schema)
    pub fn create_table(&self, table: &str) {
        self.state.lock().tables.insert(table.to_lowercase());
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.state.lock().tables.contains(&table.to_lowercase())
    }

    /// Batches executed so far, in order
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.state.lock().batches.clone()
    }

    pub fn version_row(&self, table: &str, module: &str) -> Option<i64> {
        self.state
            .lock()
            .version_rows
            .get(&(table.to_string(), module.to_string()))
            .copied()
    }

    pub fn entry(&self, table: &str, key: &str) -> Option<String> {
        self.state
            .lock()
            .entries
            .get(&(table.to_string(), key.to_string()))
            .cloned()
    }

    /// Seed a `(key, value)` entry directly
    pub fn put_entry(&self, table: &str, key: &str, value: &str) {
        let mut state = self.state.lock();
        state.tables.insert(table.to_lowercase());
        state
            .entries
            .insert((table.to_string(), key.to_string()), value.to_string());
    }

    /// Seed a version row directly
    pub fn put_version_row(&self, table: &str, module: &str, version: i64) {
        let mut state = self.state.lock();
        state.tables.insert(table.to_lowercase());
        state
            .version_rows
            .insert((table.to_string(), module.to_string()), version);
    }

    pub fn is_locked(&self, name: &str) -> bool {
        self.state.lock().locks.contains(name)
    }
}

fn create_table_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)^\s*CREATE\s+TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?"?([A-Za-z_][A-Za-z0-9_]*)"?"#)
            .expect("static regex is valid")
    })
}

fn drop_table_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)^\s*DROP\s+TABLE\s+(?:IF\s+EXISTS\s+)?"?([A-Za-z_][A-Za-z0-9_]*)"?"#)
            .expect("static regex is valid")
    })
}

impl Store for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn execute_batch(&mut self, statements: &[String]) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.check_available()?;

        if let Some(needle) = state.faults.fail_statement_containing.as_deref() {
            if let Some(statement) = statements.iter().find(|s| s.contains(needle)) {
                return Err(StoreError::Query(format!("statement failed: {}", statement)));
            }
        }

        // Apply table effects only once the whole batch is accepted
        let mut tables = state.tables.clone();
        for statement in statements {
            if let Some(captures) = create_table_pattern().captures(statement) {
                tables.insert(captures[1].to_lowercase());
            } else if let Some(captures) = drop_table_pattern().captures(statement) {
                tables.remove(&captures[1].to_lowercase());
            }
        }
        state.tables = tables;
        state.batches.push(statements.to_vec());
        Ok(())
    }

    fn table_exists(&mut self, table: &str) -> StoreResult<bool> {
        let state = self.state.lock();
        state.check_available()?;
        Ok(state.tables.contains(&table.to_lowercase()))
    }

    fn read_version_row(&mut self, table: &str, module: &str) -> StoreResult<Option<i64>> {
        validate_identifier(table)?;
        let state = self.state.lock();
        state.check_available()?;
        Ok(state
            .version_rows
            .get(&(table.to_string(), module.to_string()))
            .copied())
    }

    fn write_version_row(&mut self, table: &str, module: &str, version: i64) -> StoreResult<()> {
        validate_identifier(table)?;
        let mut state = self.state.lock();
        if state.check_write()? {
            state.tables.insert(table.to_lowercase());
            state
                .version_rows
                .insert((table.to_string(), module.to_string()), version);
        }
        Ok(())
    }

    fn read_key(&mut self, table: &str, key: &str) -> StoreResult<Option<String>> {
        validate_identifier(table)?;
        let state = self.state.lock();
        state.check_available()?;
        Ok(state
            .entries
            .get(&(table.to_string(), key.to_string()))
            .cloned())
    }

    fn write_key(&mut self, table: &str, key: &str, value: &str) -> StoreResult<()> {
        validate_identifier(table)?;
        let mut state = self.state.lock();
        if state.check_write()? {
            state.tables.insert(table.to_lowercase());
            state
                .entries
                .insert((table.to_string(), key.to_string()), value.to_string());
        }
        Ok(())
    }

    fn try_lock(&mut self, name: &str) -> StoreResult<bool> {
        let mut state = self.state.lock();
        state.check_available()?;
        Ok(state.locks.insert(name.to_string()))
    }

    fn unlock(&mut self, name: &str) -> StoreResult<()> {
        self.state.lock().locks.remove(name);
        Ok(())
    }
}
