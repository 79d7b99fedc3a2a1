//! Schema version values
//!
//! A store is either `Uninitialized` (it exists but has never been schema
//! managed) or at a concrete revision number. The derived ordering puts
//! `Uninitialized` below every concrete version.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MigrationError;

/// Schema state of a module's store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Version {
    /// Store exists but has never been schema-managed
    Uninitialized,
    /// Concrete schema revision
    At(u32),
}

impl Version {
    pub fn is_uninitialized(&self) -> bool {
        matches!(self, Version::Uninitialized)
    }

    /// The revision number, if the store has one
    pub fn as_number(&self) -> Option<u32> {
        match self {
            Version::Uninitialized => None,
            Version::At(n) => Some(*n),
        }
    }

    /// Build a version from a persisted marker value.
    ///
    /// Negative values are not valid revisions and yield `None`.
    pub fn from_marker(value: i64) -> Option<Self> {
        u32::try_from(value).ok().map(Version::At)
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::Uninitialized
    }
}

impl From<u32> for Version {
    fn from(value: u32) -> Self {
        Version::At(value)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Uninitialized => write!(f, "uninitialized"),
            Version::At(n) => write!(f, "{}", n),
        }
    }
}

impl FromStr for Version {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_lowercase().as_str() {
            "uninitialized" | "none" | "init" => Ok(Version::Uninitialized),
            other => other
                .parse::<u32>()
                .map(Version::At)
                .map_err(|_| MigrationError::InvalidVersion(trimmed.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn test_uninitialized_sorts_first() {
        assert!(Version::Uninitialized < Version::At(0));
        assert!(Version::At(0) < Version::At(1));
        assert_eq!(Version::At(7).cmp(&Version::At(7)), Ordering::Equal);

        let mut versions = vec![Version::At(3), Version::Uninitialized, Version::At(0)];
        versions.sort();
        assert_eq!(versions, vec![Version::Uninitialized, Version::At(0), Version::At(3)]);
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("uninitialized".parse::<Version>().unwrap(), Version::Uninitialized);
        assert_eq!("Init".parse::<Version>().unwrap(), Version::Uninitialized);
        assert_eq!(" 12 ".parse::<Version>().unwrap(), Version::At(12));
        assert!("-1".parse::<Version>().is_err());
        assert!("v2".parse::<Version>().is_err());

        assert_eq!(Version::At(4).to_string(), "4");
        assert_eq!(Version::Uninitialized.to_string(), "uninitialized");
    }

    #[test]
    fn test_from_marker() {
        assert_eq!(Version::from_marker(3), Some(Version::At(3)));
        assert_eq!(Version::from_marker(-1), None);
        assert!(Version::Uninitialized.is_uninitialized());
        assert_eq!(Version::At(5).as_number(), Some(5));
    }
}
