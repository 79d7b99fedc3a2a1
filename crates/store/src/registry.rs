//! Registry wiring for the built-in modules

use schemig_core::{
    ConfigError, ModuleConfig, MigrationRegistry, SchemaManager, StoreError, ThreadSleeper,
};

use crate::modules::{builtin_modules, ModuleDescriptor, StoreSchemaManager};
use crate::store::{connect, Store};

/// Registry with a factory for every built-in module
pub fn default_registry() -> MigrationRegistry {
    let mut registry = MigrationRegistry::new();
    for descriptor in builtin_modules() {
        register_module(&mut registry, descriptor);
    }
    registry
}

/// Register `descriptor` so that building it opens a store over the
/// configured connection
pub fn register_module(registry: &mut MigrationRegistry, descriptor: ModuleDescriptor) {
    let name = descriptor.name.clone();
    registry.register(name, move |config: &ModuleConfig| {
        let store = open_store(config)?;
        let manager = StoreSchemaManager::new(descriptor.clone(), config.scripts_dir.clone(), store);
        Ok(Box::new(manager) as Box<dyn SchemaManager>)
    });
}

/// Connect with the module's retry policy; a store that is still starting
/// gets the same backoff as any other transient failure
fn open_store(config: &ModuleConfig) -> Result<Box<dyn Store>, ConfigError> {
    config.retry.validate()?;
    let policy = config.retry.to_policy();

    policy
        .run(&ThreadSleeper, || connect(&config.connection), StoreError::is_transient)
        .map_err(|source| ConfigError::Store {
            module: config.module.clone(),
            source,
        })
}
