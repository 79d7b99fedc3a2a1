//! Migration Manager - the per-module interface and the generic driver
//!
//! Each module implements [`SchemaManager`] for its store. [`Migrator`] owns
//! everything that is the same for all modules: discovering the catalog,
//! planning, applying steps in order and verifying each version write.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::catalog::{Catalog, Migration};
use crate::error::{MigrationError, MigrationFailure, StoreError, StoreResult};
use crate::planner::{BranchRule, MigrationPath, Planner};
use crate::retry::{RetryPolicy, Sleeper, ThreadSleeper};
use crate::version::Version;

/// Module-specific hooks the driver composes
pub trait SchemaManager {
    /// Name of the module whose store this manager migrates
    fn module_name(&self) -> &str;

    /// Directory holding the module's migration scripts
    fn scripts_dir(&self) -> &Path;

    /// The module's script naming convention
    fn match_script(&self, file_name: &str) -> Option<(Version, u32)>;

    /// Read the store's version marker
    fn current_version(&mut self) -> StoreResult<Version>;

    /// Run one step's content against the store.
    ///
    /// Never retried by the driver: a failure may leave partial effects behind.
    fn apply_step(&mut self, step: &Migration) -> StoreResult<()>;

    /// Persist `version` as the store's marker
    fn record_version(&mut self, version: u32) -> StoreResult<()>;

    /// Take the store-wide migration lock for this module.
    ///
    /// Returns `false` when another process holds it. The driver never calls
    /// this; callers that need cross-process exclusion do.
    fn acquire_lock(&mut self) -> StoreResult<bool> {
        Ok(true)
    }

    fn release_lock(&mut self) -> StoreResult<()> {
        Ok(())
    }
}

/// Result of a `check` run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationStatus {
    /// Nothing to apply
    UpToDate(Version),
    /// Steps remain between the store and the requested version
    Pending {
        current: Version,
        path: MigrationPath,
    },
}

impl MigrationStatus {
    pub fn is_up_to_date(&self) -> bool {
        matches!(self, MigrationStatus::UpToDate(_))
    }
}

/// Summary of a successful `migrate` run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub module: String,
    /// Version read at the start of the run
    pub initial_version: Version,
    /// Version verified at the end of the run
    pub final_version: Version,
    /// Names of the applied steps, in order
    pub applied: Vec<String>,
    /// Total backoff slept across all retried operations
    pub retry_wait: Duration,
    pub execution_time_ms: u128,
}

/// Generic migration driver
#[derive(Clone)]
pub struct Migrator {
    planner: Planner,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl Default for Migrator {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), BranchRule::default())
    }
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("planner", &self.planner)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Migrator {
    pub fn new(retry: RetryPolicy, branch_rule: BranchRule) -> Self {
        Self {
            planner: Planner::new(branch_rule),
            retry,
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    /// Replace the sleeper used between retries
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Report whether the store needs migrating, without touching it
    pub fn check<M>(&self, manager: &mut M, target: Option<Version>) -> Result<MigrationStatus, MigrationFailure>
    where
        M: SchemaManager + ?Sized,
    {
        let mut retry_wait = Duration::ZERO;
        let current = self
            .read_version(manager, &mut retry_wait)
            .map_err(|error| failure(manager, None, None, error))?;
        let path = self
            .plan(manager, current, target)
            .map_err(|error| failure(manager, Some(current), None, error))?;

        if path.is_empty() {
            Ok(MigrationStatus::UpToDate(current))
        } else {
            Ok(MigrationStatus::Pending { current, path })
        }
    }

    /// Migrate the store to `target` (or as far as the chain goes) and return
    /// the version it ends at
    pub fn migrate<M>(&self, manager: &mut M, target: Option<Version>) -> Result<Version, MigrationFailure>
    where
        M: SchemaManager + ?Sized,
    {
        self.migrate_with_report(manager, target)
            .map(|report| report.final_version)
    }

    pub fn migrate_with_report<M>(
        &self,
        manager: &mut M,
        target: Option<Version>,
    ) -> Result<MigrationReport, MigrationFailure>
    where
        M: SchemaManager + ?Sized,
    {
        let start_time = Instant::now();
        let mut retry_wait = Duration::ZERO;

        let initial = self
            .read_version(manager, &mut retry_wait)
            .map_err(|error| failure(manager, None, None, error))?;
        let path = self
            .plan(manager, initial, target)
            .map_err(|error| failure(manager, Some(initial), None, error))?;

        if path.is_empty() {
            tracing::info!(
                "Module '{}' is already at version {}, nothing to migrate",
                manager.module_name(),
                initial
            );
            return Ok(MigrationReport {
                module: manager.module_name().to_string(),
                initial_version: initial,
                final_version: initial,
                applied: Vec::new(),
                retry_wait,
                execution_time_ms: start_time.elapsed().as_millis(),
            });
        }

        tracing::info!(
            "Migrating module '{}' from {} to {} in {} step(s)",
            manager.module_name(),
            initial,
            path.final_version().unwrap_or(initial),
            path.len()
        );

        let mut verified = initial;
        let mut applied = Vec::new();

        for step in path {
            tracing::info!("Applying migration: {} ({} -> {})", step.name, step.from, step.to);

            manager
                .apply_step(&step)
                .map_err(|e| failure(manager, Some(verified), Some(&step), e.into()))?;

            self.retry_store(|| manager.record_version(step.to), &mut retry_wait)
                .map_err(|e| failure(manager, Some(verified), Some(&step), e.into()))?;

            let actual = self
                .read_version(manager, &mut retry_wait)
                .map_err(|e| failure(manager, Some(verified), Some(&step), e))?;
            if actual != step.target() {
                let error = MigrationError::VersionMismatch {
                    expected: step.target(),
                    actual,
                };
                return Err(failure(manager, Some(verified), Some(&step), error));
            }

            verified = actual;
            applied.push(step.name);
        }

        tracing::info!(
            "Module '{}' migrated to version {} ({} step(s))",
            manager.module_name(),
            verified,
            applied.len()
        );

        Ok(MigrationReport {
            module: manager.module_name().to_string(),
            initial_version: initial,
            final_version: verified,
            applied,
            retry_wait,
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }

    fn plan<M>(&self, manager: &M, current: Version, target: Option<Version>) -> Result<MigrationPath, MigrationError>
    where
        M: SchemaManager + ?Sized,
    {
        let catalog = Catalog::discover(manager.scripts_dir(), |name| manager.match_script(name))?;
        self.planner.plan(current, target, &catalog)
    }

    fn read_version<M>(&self, manager: &mut M, retry_wait: &mut Duration) -> Result<Version, MigrationError>
    where
        M: SchemaManager + ?Sized,
    {
        Ok(self.retry_store(|| manager.current_version(), retry_wait)?)
    }

    fn retry_store<T, F>(&self, operation: F, retry_wait: &mut Duration) -> StoreResult<T>
    where
        F: FnMut() -> StoreResult<T>,
    {
        let (result, report) =
            self.retry
                .run_with_report(self.sleeper.as_ref(), operation, StoreError::is_transient);
        *retry_wait += report.total_wait;
        result
    }
}

fn failure<M>(
    manager: &M,
    last_verified: Option<Version>,
    step: Option<&Migration>,
    error: MigrationError,
) -> MigrationFailure
where
    M: SchemaManager + ?Sized,
{
    let failure = MigrationFailure {
        module: manager.module_name().to_string(),
        last_verified,
        failed_step: step.map(|s| s.name.clone()),
        error,
    };
    tracing::error!("{}", failure);
    failure
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RecordingSleeper;
    use std::collections::VecDeque;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// In-process manager with scripted failures
    struct FakeManager {
        dir: TempDir,
        version: Version,
        applied: Vec<String>,
        record_failures: VecDeque<StoreError>,
        transient_record_forever: bool,
        ignore_records: bool,
        fail_apply_on: Option<String>,
    }

    impl FakeManager {
        fn new(start: Version, scripts: &[&str]) -> Self {
            let dir = TempDir::new().unwrap();
            for script in scripts {
                fs::write(dir.path().join(script), "-- noop").unwrap();
            }
            Self {
                dir,
                version: start,
                applied: Vec::new(),
                record_failures: VecDeque::new(),
                transient_record_forever: false,
                ignore_records: false,
                fail_apply_on: None,
            }
        }
    }

    impl SchemaManager for FakeManager {
        fn module_name(&self) -> &str {
            "fake"
        }

        fn scripts_dir(&self) -> &Path {
            self.dir.path()
        }

        fn match_script(&self, file_name: &str) -> Option<(Version, u32)> {
            let stem = file_name.strip_suffix(".sql")?;
            let (from, to) = stem.split_once("-")?;
            Some((from.parse().ok()?, to.parse().ok()?))
        }

        fn current_version(&mut self) -> StoreResult<Version> {
            Ok(self.version)
        }

        fn apply_step(&mut self, step: &Migration) -> StoreResult<()> {
            if self.fail_apply_on.as_deref() == Some(step.name.as_str()) {
                return Err(StoreError::Query("relation already exists".into()));
            }
            self.applied.push(step.name.clone());
            Ok(())
        }

        fn record_version(&mut self, version: u32) -> StoreResult<()> {
            if self.transient_record_forever {
                return Err(StoreError::Unavailable("connection refused".into()));
            }
            if let Some(err) = self.record_failures.pop_front() {
                return Err(err);
            }
            if !self.ignore_records {
                self.version = Version::At(version);
            }
            Ok(())
        }
    }

    fn migrator(total_secs: u64) -> (Migrator, RecordingSleeper) {
        let sleeper = RecordingSleeper::new();
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: None,
            max_total_wait: Duration::from_secs(total_secs),
        };
        let migrator = Migrator::new(policy, BranchRule::Reject).with_sleeper(Arc::new(sleeper.clone()));
        (migrator, sleeper)
    }

    #[test]
    fn test_migrates_from_uninitialized_to_latest() {
        let mut manager = FakeManager::new(Version::Uninitialized, &["init-0.sql", "0-1.sql", "1-2.sql"]);
        let (migrator, sleeper) = migrator(10);

        let report = migrator.migrate_with_report(&mut manager, None).unwrap();

        assert_eq!(report.initial_version, Version::Uninitialized);
        assert_eq!(report.final_version, Version::At(2));
        assert_eq!(manager.applied, vec!["init-0.sql", "0-1.sql", "1-2.sql"]);
        assert_eq!(report.applied, manager.applied);
        assert_eq!(report.retry_wait, Duration::ZERO);
        assert!(sleeper.delays().is_empty());
    }

    #[test]
    fn test_already_at_target_is_noop() {
        let mut manager = FakeManager::new(Version::At(2), &["0-1.sql", "1-2.sql", "2-3.sql"]);
        let (migrator, _) = migrator(10);

        let version = migrator.migrate(&mut manager, Some(Version::At(2))).unwrap();

        assert_eq!(version, Version::At(2));
        assert!(manager.applied.is_empty());
    }

    #[test]
    fn test_record_retried_on_transient_errors() {
        let mut manager = FakeManager::new(Version::At(0), &["0-1.sql"]);
        manager.record_failures.push_back(StoreError::Unavailable("connection refused".into()));
        manager.record_failures.push_back(StoreError::ConnectionReset("reset by peer".into()));
        let (migrator, sleeper) = migrator(10);

        let report = migrator.migrate_with_report(&mut manager, None).unwrap();

        assert_eq!(report.final_version, Version::At(1));
        assert_eq!(sleeper.delays(), vec![Duration::from_secs(1), Duration::from_secs(2)]);
        assert_eq!(report.retry_wait, Duration::from_secs(3));
    }

    #[test]
    fn test_record_gives_up_after_budget() {
        let mut manager = FakeManager::new(Version::At(0), &["0-1.sql", "1-2.sql"]);
        manager.transient_record_forever = true;
        let (migrator, sleeper) = migrator(10);

        let err = migrator.migrate(&mut manager, None).unwrap_err();

        assert!(err.error.is_transient());
        assert_eq!(err.last_verified, Some(Version::At(0)));
        assert_eq!(err.failed_step.as_deref(), Some("0-1.sql"));
        assert!(sleeper.total() <= Duration::from_secs(10));
        // Second step never started
        assert_eq!(manager.applied, vec!["0-1.sql"]);
    }

    #[test]
    fn test_fatal_record_error_not_retried() {
        let mut manager = FakeManager::new(Version::At(0), &["0-1.sql"]);
        manager.record_failures.push_back(StoreError::Query("permission denied".into()));
        let (migrator, sleeper) = migrator(10);

        let err = migrator.migrate(&mut manager, None).unwrap_err();

        assert!(matches!(err.error, MigrationError::Store(StoreError::Query(_))));
        assert!(sleeper.delays().is_empty());
    }

    #[test]
    fn test_unverified_record_stops_the_run() {
        let mut manager = FakeManager::new(Version::At(0), &["0-1.sql", "1-2.sql"]);
        manager.ignore_records = true;
        let (migrator, _) = migrator(10);

        let err = migrator.migrate(&mut manager, None).unwrap_err();

        match err.error {
            MigrationError::VersionMismatch { expected, actual } => {
                assert_eq!(expected, Version::At(1));
                assert_eq!(actual, Version::At(0));
            }
            ref other => panic!("expected VersionMismatch, got {:?}", other),
        }
        assert_eq!(manager.applied, vec!["0-1.sql"]);
    }

    #[test]
    fn test_apply_failure_is_fatal_and_keeps_last_verified() {
        let mut manager = FakeManager::new(Version::At(0), &["0-1.sql", "1-2.sql", "2-3.sql"]);
        manager.fail_apply_on = Some("1-2.sql".to_string());
        let (migrator, sleeper) = migrator(10);

        let err = migrator.migrate(&mut manager, None).unwrap_err();

        assert_eq!(err.last_verified, Some(Version::At(1)));
        assert_eq!(err.failed_step.as_deref(), Some("1-2.sql"));
        assert_eq!(manager.version, Version::At(1));
        assert!(sleeper.delays().is_empty());

        // Resuming after the cause is fixed picks up from the verified version
        manager.fail_apply_on = None;
        let version = migrator.migrate(&mut manager, None).unwrap();
        assert_eq!(version, Version::At(3));
        assert_eq!(manager.applied, vec!["0-1.sql", "1-2.sql", "2-3.sql"]);
    }

    #[test]
    fn test_planning_errors_happen_before_mutation() {
        let mut manager = FakeManager::new(Version::At(1), &["0-1.sql"]);
        let (migrator, _) = migrator(10);

        let err = migrator.migrate(&mut manager, Some(Version::At(3))).unwrap_err();
        assert!(matches!(err.error, MigrationError::NoMigrationPath { .. }));
        assert!(err.is_before_mutation());

        let err = migrator.migrate(&mut manager, Some(Version::At(0))).unwrap_err();
        assert!(matches!(err.error, MigrationError::InvalidTarget { .. }));
        assert!(manager.applied.is_empty());
    }

    #[test]
    fn test_check_does_not_mutate() {
        let mut manager = FakeManager::new(Version::At(0), &["0-1.sql", "1-2.sql"]);
        let (migrator, _) = migrator(10);

        match migrator.check(&mut manager, None).unwrap() {
            MigrationStatus::Pending { current, path } => {
                assert_eq!(current, Version::At(0));
                assert_eq!(path.len(), 2);
            }
            other => panic!("expected pending, got {:?}", other),
        }
        assert!(manager.applied.is_empty());
        assert_eq!(manager.version, Version::At(0));

        manager.version = Version::At(2);
        assert!(migrator.check(&mut manager, None).unwrap().is_up_to_date());
    }

    #[test]
    fn test_missing_scripts_dir_reported() {
        let mut manager = FakeManager::new(Version::At(0), &[]);
        let gone: PathBuf = manager.dir.path().to_path_buf();
        fs::remove_dir_all(&gone).unwrap();
        let (migrator, _) = migrator(10);

        let err = migrator.migrate(&mut manager, None).unwrap_err();
        assert!(matches!(err.error, MigrationError::ScriptsDirectory { .. }));
    }
}
