//! Module adapters
//!
//! Every module is described by a [`ModuleDescriptor`]: its name, the way its
//! store remembers the schema version, and its script naming convention.
//! [`StoreSchemaManager`] turns a descriptor plus a store into a
//! `SchemaManager` the engine can drive.

mod builtin;
mod manager;

pub use builtin::{admin, builtin_modules, config, history, qcache, worker};
pub use manager::StoreSchemaManager;

use schemig_core::{ScriptMatcher, StoreResult};

use crate::security::validate_identifier;

/// Where a store keeps its current schema version
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionMarker {
    /// A `(module, version)` row in a metadata table
    Row { table: String },
    /// An integer value under a key in a `(key, value)` table
    Key { table: String, key: String },
    /// A version row when one exists; otherwise version 0 if the legacy
    /// table exists, else uninitialized
    Inferred { table: String, legacy_table: String },
}

impl VersionMarker {
    /// Human-readable location, used in error messages
    pub fn location(&self) -> String {
        match self {
            VersionMarker::Row { table } => table.clone(),
            VersionMarker::Key { table, key } => format!("{}[{}]", table, key),
            VersionMarker::Inferred { table, .. } => table.clone(),
        }
    }

    fn validate(&self) -> StoreResult<()> {
        match self {
            VersionMarker::Row { table } | VersionMarker::Key { table, .. } => {
                validate_identifier(table)
            }
            VersionMarker::Inferred { table, legacy_table } => {
                validate_identifier(table)?;
                validate_identifier(legacy_table)
            }
        }
    }
}

/// Static description of one module
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    pub name: String,
    pub marker: VersionMarker,
    pub matcher: ScriptMatcher,
}

impl ModuleDescriptor {
    /// Descriptor whose scripts follow `<name>_<from>_to_<to>.sql`
    pub fn new(name: impl Into<String>, marker: VersionMarker) -> StoreResult<Self> {
        let name = name.into();
        marker.validate()?;
        let matcher = ScriptMatcher::with_prefix(&name);
        Ok(Self { name, marker, matcher })
    }

    /// Replace the script naming convention
    pub fn with_matcher(mut self, matcher: ScriptMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    /// Advisory lock name used to serialise migrations of this module
    pub fn lock_name(&self) -> String {
        format!("schemig:{}", self.name)
    }
}
