//! # schemig-core
//!
//! Generic machinery for migrating independently-versioned module stores:
//! version values, script discovery, path planning, bounded retry of
//! transient store failures, and the driver that applies and verifies each
//! step through a module's [`SchemaManager`].
//!
//! ```rust,ignore
//! use schemig_core::{Migrator, RetryPolicy, BranchRule};
//!
//! let migrator = Migrator::new(RetryPolicy::default(), BranchRule::Reject);
//! let version = migrator.migrate(&mut manager, None)?;
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod manager;
pub mod planner;
pub mod registry;
pub mod retry;
pub mod version;

pub use catalog::{Catalog, Migration, ScriptMatcher};
pub use config::{ConnectionIdentity, ModuleConfig, RetryConfig};
pub use error::{ConfigError, MigrationError, MigrationFailure, MigrationResult, StoreError, StoreResult};
pub use manager::{MigrationReport, MigrationStatus, Migrator, SchemaManager};
pub use planner::{BranchRule, MigrationPath, Planner};
pub use registry::{ManagerFactory, MigrationRegistry};
pub use retry::{RecordingSleeper, RetryPolicy, RetryReport, Sleeper, ThreadSleeper};
pub use version::Version;
