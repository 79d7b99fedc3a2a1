//! # schemig-store
//!
//! Store backends and the built-in module adapters for the schemig
//! migration engine.
//!
//! A [`Store`] is the low-level unit-of-work interface (run a batch of
//! statements, read and write version markers, take advisory locks). Module
//! adapters wrap a store in a [`StoreSchemaManager`] so the engine in
//! `schemig-core` can drive it.

pub mod backends;
pub mod modules;
pub mod registry;
pub mod script;
pub mod security;
pub mod store;

pub use backends::{MemoryStore, PgStore, StoreFaults};
pub use modules::{builtin_modules, ModuleDescriptor, StoreSchemaManager, VersionMarker};
pub use registry::{default_registry, register_module};
pub use script::{read_script, split_sql_statements};
pub use store::{connect, Store};
