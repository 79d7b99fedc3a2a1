//! Migration Catalog - discovery of migration scripts
//!
//! Lists a module's scripts directory and asks the module's matcher which
//! files are migration steps. The catalog never parses file names itself;
//! ordering steps into a path is the planner's job.

use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{MigrationError, MigrationResult};
use crate::version::Version;

/// A single migration step discovered in a scripts directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Version the step starts from
    pub from: Version,
    /// Version the step leaves the store at
    pub to: u32,
    /// File name of the script
    pub name: String,
    /// Handle forwarded to the module's applier
    pub payload: PathBuf,
}

impl Migration {
    pub fn new(from: Version, to: u32, name: impl Into<String>, payload: impl Into<PathBuf>) -> Self {
        Self {
            from,
            to,
            name: name.into(),
            payload: payload.into(),
        }
    }

    /// Target as a `Version`
    pub fn target(&self) -> Version {
        Version::At(self.to)
    }

    fn is_noop(&self) -> bool {
        self.from == self.target()
    }
}

/// All migration steps available to one module
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    migrations: Vec<Migration>,
}

impl Catalog {
    /// Discover migration steps in `scripts_dir`.
    ///
    /// `match_fn` is asked about every entry, directories included, and maps a
    /// file name to its `(from, to)` pair; entries it does not recognise are
    /// skipped, as are matching directories. Entries are visited in file-name order so
    /// duplicate reports are stable across platforms.
    pub fn discover<F>(scripts_dir: &Path, match_fn: F) -> MigrationResult<Self>
    where
        F: Fn(&str) -> Option<(Version, u32)>,
    {
        let entries = fs::read_dir(scripts_dir).map_err(|source| MigrationError::ScriptsDirectory {
            path: scripts_dir.to_path_buf(),
            source,
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| MigrationError::ScriptsDirectory {
                path: scripts_dir.to_path_buf(),
                source,
            })?;

            let file_name = entry.file_name().to_string_lossy().to_string();
            files.push((file_name, entry.path()));
        }
        files.sort();

        let mut found = Vec::new();
        for (file_name, path) in files {
            match match_fn(&file_name) {
                Some(_) if path.is_dir() => {
                    tracing::warn!("Ignoring directory {} named like a migration script", file_name)
                }
                Some((from, to)) => found.push(Migration::new(from, to, file_name, path)),
                None => tracing::debug!("Ignoring non-migration entry {}", file_name),
            }
        }

        let catalog = Self::from_migrations(found)?;
        tracing::debug!(
            "Discovered {} migration(s) in {}",
            catalog.len(),
            scripts_dir.display()
        );
        Ok(catalog)
    }

    /// Build a catalog from already-known steps, applying the same rules as
    /// directory discovery.
    pub fn from_migrations<I>(migrations: I) -> MigrationResult<Self>
    where
        I: IntoIterator<Item = Migration>,
    {
        let mut seen: BTreeMap<(Version, u32), String> = BTreeMap::new();
        let mut kept = Vec::new();

        for migration in migrations {
            if migration.is_noop() {
                tracing::warn!(
                    "Discarding migration script {}: it migrates {} to itself",
                    migration.name,
                    migration.from
                );
                continue;
            }

            let key = (migration.from, migration.to);
            if let Some(first) = seen.get(&key) {
                return Err(MigrationError::AmbiguousScript {
                    from: migration.from,
                    to: migration.to,
                    first: first.clone(),
                    second: migration.name,
                });
            }
            seen.insert(key, migration.name.clone());
            kept.push(migration);
        }

        Ok(Self { migrations: kept })
    }

    /// Steps leaving `version`, in ascending target order
    pub fn outgoing(&self, version: Version) -> Vec<&Migration> {
        let mut edges: Vec<&Migration> =
            self.migrations.iter().filter(|m| m.from == version).collect();
        edges.sort_by_key(|m| m.to);
        edges
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

/// File name matcher.
///
/// A custom pattern must define the named groups `from` and `to`. A `from`
/// of `init`, `none` or `uninitialized` denotes the bootstrap step.
#[derive(Debug, Clone)]
pub enum ScriptMatcher {
    /// `<prefix>_<from>_to_<to>.sql` with `from` a number or `init`
    Prefix(String),
    Pattern(Regex),
}

impl ScriptMatcher {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let pattern = Regex::new(pattern)?;
        Ok(Self::Pattern(pattern))
    }

    /// Matcher for `<prefix>_<from>_to_<to>.sql`
    pub fn with_prefix(prefix: &str) -> Self {
        Self::Prefix(prefix.to_string())
    }

    pub fn matches(&self, file_name: &str) -> Option<(Version, u32)> {
        match self {
            Self::Prefix(prefix) => {
                let stem = file_name
                    .strip_prefix(prefix.as_str())?
                    .strip_prefix('_')?
                    .strip_suffix(".sql")?;
                let (from, to) = stem.split_once("_to_")?;
                if !(from == "init" || is_digits(from)) || !is_digits(to) {
                    return None;
                }
                Some((from.parse().ok()?, to.parse().ok()?))
            }
            Self::Pattern(pattern) => {
                let captures = pattern.captures(file_name)?;
                let from = captures.name("from")?.as_str().parse::<Version>().ok()?;
                let to = captures.name("to")?.as_str().parse::<u32>().ok()?;
                Some((from, to))
            }
        }
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}
