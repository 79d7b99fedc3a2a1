//! Error types for the migration engine
//!
//! `StoreError` is what a module's store hands back to the engine and carries
//! the transient/fatal classification the retry policy relies on.
//! `MigrationError` covers discovery, planning and verification failures, and
//! `MigrationFailure` wraps either with the context an operator needs.

use std::path::PathBuf;
use thiserror::Error;

use crate::version::Version;

/// Result type alias for engine operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a module's backing store
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store refused or could not accept the connection
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// An established connection was reset or dropped
    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    /// The store is up but not yet accepting work
    #[error("Store is starting up: {0}")]
    StartingUp(String),

    #[error("Store operation timed out: {0}")]
    Timeout(String),

    /// A statement was rejected by the store
    #[error("Query error: {0}")]
    Query(String),

    #[error("Failed to read migration script {}: {source}", .path.display())]
    Script {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The persisted version marker holds something that is not a version
    #[error("Corrupt version marker in '{location}': {value:?}")]
    CorruptMarker { location: String, value: String },

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Unsupported store: {0}")]
    Unsupported(String),

    #[error("Lock error: {0}")]
    Lock(String),
}

impl StoreError {
    /// Whether the failure is expected to clear up on its own
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_)
                | StoreError::ConnectionReset(_)
                | StoreError::StartingUp(_)
                | StoreError::Timeout(_)
        )
    }
}

/// Errors raised while discovering, planning or verifying migrations
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Scripts directory {} cannot be read: {source}", .path.display())]
    ScriptsDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Scripts '{first}' and '{second}' both migrate {from} -> {to}")]
    AmbiguousScript {
        from: Version,
        to: u32,
        first: String,
        second: String,
    },

    #[error("No migration path from {from} to {target} (stopped at {reached})")]
    NoMigrationPath {
        from: Version,
        target: Version,
        reached: Version,
    },

    #[error("Migration cycle detected: version {version} reached twice")]
    CyclicMigration { version: Version },

    #[error("Invalid target {target}: current version is {current} and downgrades are not supported")]
    InvalidTarget { current: Version, target: Version },

    #[error("Ambiguous migration branch at {from}: candidate targets {targets:?}")]
    AmbiguousBranch { from: Version, targets: Vec<u32> },

    #[error("Migration '{step}' goes down from {from} to {to}")]
    DowngradeStep { step: String, from: Version, to: u32 },

    #[error("Invalid version '{0}'")]
    InvalidVersion(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Version marker did not take effect: expected {expected}, store reports {actual}")]
    VersionMismatch { expected: Version, actual: Version },
}

impl MigrationError {
    /// Whether the error came out of the store as a transient failure
    pub fn is_transient(&self) -> bool {
        matches!(self, MigrationError::Store(err) if err.is_transient())
    }
}

/// A failed `migrate()` call, with the context needed for manual diagnosis
#[derive(Debug, Error)]
#[error("{}", describe_failure(.module, .last_verified, .failed_step, .error))]
pub struct MigrationFailure {
    /// Module whose store was being migrated
    pub module: String,
    /// Last version the store was verified to be at
    pub last_verified: Option<Version>,
    /// Name of the step in flight, if any
    pub failed_step: Option<String>,
    #[source]
    pub error: MigrationError,
}

fn describe_failure(
    module: &str,
    last_verified: &Option<Version>,
    failed_step: &Option<String>,
    error: &MigrationError,
) -> String {
    let mut message = format!("Migration of module '{}' failed", module);
    if let Some(step) = failed_step {
        message.push_str(&format!(" at step '{}'", step));
    }
    match last_verified {
        Some(version) => message.push_str(&format!(" (last verified version: {})", version)),
        None => message.push_str(" (current version unknown)"),
    }
    message.push_str(&format!(": {}", error));
    message
}

impl MigrationFailure {
    /// True when nothing was written to the store before the failure
    pub fn is_before_mutation(&self) -> bool {
        self.failed_step.is_none()
    }
}

/// Configuration problems detected before any store is touched
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown module '{name}' (available: {available})")]
    UnknownModule { name: String, available: String },

    #[error("Invalid connection identity '{value}': {reason}")]
    InvalidConnection { value: String, reason: String },

    #[error("Invalid value for {field}: {value} (expected {expected})")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Failed to open store for module '{module}': {source}")]
    Store {
        module: String,
        #[source]
        source: StoreError,
    },
}
