//! `--check` and `--do-migrate`

use schemig_core::{
    MigrationError, MigrationFailure, MigrationReport, MigrationStatus, Migrator, SchemaManager,
    StoreError, Version,
};

/// What a successful run found or did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    UpToDate(Version),
    MigrationNeeded { current: Version, steps: Vec<String> },
    Migrated(MigrationReport),
}

impl Outcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            Outcome::UpToDate(_) | Outcome::Migrated(_) => 0,
            Outcome::MigrationNeeded { .. } => 1,
        }
    }

    /// One-line summary printed on stdout
    pub fn summary(&self, module: &str) -> String {
        match self {
            Outcome::UpToDate(version) => {
                format!("Module '{}' is up to date at version {}", module, version)
            }
            Outcome::MigrationNeeded { current, steps } => format!(
                "Module '{}' at version {} needs {} migration(s): {}",
                module,
                current,
                steps.len(),
                steps.join(", ")
            ),
            Outcome::Migrated(report) if report.applied.is_empty() => format!(
                "Module '{}' is up to date at version {}",
                module, report.final_version
            ),
            Outcome::Migrated(report) => format!(
                "Migrated module '{}' from {} to {} ({} step(s), {} ms)",
                module,
                report.initial_version,
                report.final_version,
                report.applied.len(),
                report.execution_time_ms
            ),
        }
    }
}

/// Report what a migration would do without touching the store
pub fn check(
    migrator: &Migrator,
    manager: &mut dyn SchemaManager,
    target: Option<Version>,
) -> Result<Outcome, MigrationFailure> {
    match migrator.check(&mut *manager, target)? {
        MigrationStatus::UpToDate(version) => Ok(Outcome::UpToDate(version)),
        MigrationStatus::Pending { current, path } => Ok(Outcome::MigrationNeeded {
            current,
            steps: path.steps().iter().map(|step| step.name.clone()).collect(),
        }),
    }
}

/// Migrate, holding the module's advisory lock unless `use_lock` is false
pub fn migrate(
    migrator: &Migrator,
    manager: &mut dyn SchemaManager,
    target: Option<Version>,
    use_lock: bool,
) -> Result<Outcome, MigrationFailure> {
    if !use_lock {
        tracing::warn!("Running without the migration lock for module '{}'", manager.module_name());
        return migrator
            .migrate_with_report(&mut *manager, target)
            .map(Outcome::Migrated);
    }

    let acquired = manager
        .acquire_lock()
        .map_err(|error| lock_failure(&*manager, error))?;
    if !acquired {
        let error = StoreError::Lock(format!(
            "another process is migrating module '{}'",
            manager.module_name()
        ));
        return Err(lock_failure(&*manager, error));
    }

    let result = migrator.migrate_with_report(&mut *manager, target);

    if let Err(e) = manager.release_lock() {
        tracing::warn!("Failed to release migration lock for module '{}': {}", manager.module_name(), e);
    }
    result.map(Outcome::Migrated)
}

fn lock_failure(manager: &dyn SchemaManager, error: StoreError) -> MigrationFailure {
    MigrationFailure {
        module: manager.module_name().to_string(),
        last_verified: None,
        failed_step: None,
        error: MigrationError::Store(error),
    }
}
