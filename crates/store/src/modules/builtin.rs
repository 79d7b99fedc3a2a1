//! Built-in modules

use schemig_core::ScriptMatcher;

use super::{ModuleDescriptor, VersionMarker};

fn descriptor(name: &str, marker: VersionMarker) -> ModuleDescriptor {
    ModuleDescriptor {
        name: name.to_string(),
        marker,
        matcher: ScriptMatcher::with_prefix(name),
    }
}

fn row(table: &str) -> VersionMarker {
    VersionMarker::Row {
        table: table.to_string(),
    }
}

/// Administrative metadata store
pub fn admin() -> ModuleDescriptor {
    descriptor("admin", row("schema_version"))
}

/// Query cache store
pub fn qcache() -> ModuleDescriptor {
    descriptor("qcache", row("qcache_schema_version"))
}

/// Background worker store
pub fn worker() -> ModuleDescriptor {
    descriptor("worker", row("worker_schema_version"))
}

/// Configuration store; the version lives under a well-known key
pub fn config() -> ModuleDescriptor {
    descriptor(
        "config",
        VersionMarker::Key {
            table: "config_entries".to_string(),
            key: "schema.version".to_string(),
        },
    )
}

/// Execution history store. Deployments that predate version tracking
/// already have `execution_history`; those are treated as version 0.
pub fn history() -> ModuleDescriptor {
    descriptor(
        "history",
        VersionMarker::Inferred {
            table: "history_schema_version".to_string(),
            legacy_table: "execution_history".to_string(),
        },
    )
}

/// Every built-in module, sorted by name
pub fn builtin_modules() -> Vec<ModuleDescriptor> {
    vec![admin(), config(), history(), qcache(), worker()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemig_core::Version;
    use std::collections::HashSet;

    #[test]
    fn test_builtin_names_are_unique_and_sorted() {
        let names: Vec<String> = builtin_modules().into_iter().map(|d| d.name).collect();
        let unique: HashSet<&String> = names.iter().collect();
        assert_eq!(unique.len(), names.len());

        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_builtin_markers_are_valid() {
        for module in builtin_modules() {
            assert!(module.marker.validate().is_ok(), "{}", module.name);
        }
    }

    #[test]
    fn test_builtin_matchers_use_module_prefix() {
        assert_eq!(admin().matcher.matches("admin_init_to_1.sql"), Some((Version::Uninitialized, 1)));
        assert_eq!(history().matcher.matches("history_0_to_1.sql"), Some((Version::At(0), 1)));
        assert_eq!(history().matcher.matches("admin_0_to_1.sql"), None);
    }
}
