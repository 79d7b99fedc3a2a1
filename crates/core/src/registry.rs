//! Migration Registry - maps module names to manager factories
//!
//! Built once at program start; lookups never touch a store until the
//! factory is invoked.

use std::collections::BTreeMap;

use crate::config::ModuleConfig;
use crate::error::ConfigError;
use crate::manager::SchemaManager;

/// Builds a manager for one module from its configuration
pub type ManagerFactory =
    Box<dyn Fn(&ModuleConfig) -> Result<Box<dyn SchemaManager>, ConfigError> + Send + Sync>;

/// Registry of module manager factories
#[derive(Default)]
pub struct MigrationRegistry {
    factories: BTreeMap<String, ManagerFactory>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `module`, replacing any previous one
    pub fn register<F>(&mut self, module: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ModuleConfig) -> Result<Box<dyn SchemaManager>, ConfigError> + Send + Sync + 'static,
    {
        let module = module.into();
        if self.factories.insert(module.clone(), Box::new(factory)).is_some() {
            tracing::warn!("Replacing migration factory for module '{}'", module);
        }
        self
    }

    pub fn contains(&self, module: &str) -> bool {
        self.factories.contains_key(module)
    }

    /// Registered module names, sorted
    pub fn modules(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build the manager for `config.module`
    pub fn build(&self, config: &ModuleConfig) -> Result<Box<dyn SchemaManager>, ConfigError> {
        let factory = self
            .factories
            .get(&config.module)
            .ok_or_else(|| ConfigError::UnknownModule {
                name: config.module.clone(),
                available: self.modules().join(", "),
            })?;
        factory(config)
    }
}

impl std::fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRegistry")
            .field("modules", &self.modules())
            .finish()
    }
}
