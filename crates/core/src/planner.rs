//! Migration Planner - computes the ordered path from one version to another
//!
//! The catalog forms a forest of chains once branch points are resolved, so
//! planning is a forward walk from the current version along the single
//! outgoing edge of each node.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::catalog::{Catalog, Migration};
use crate::error::{MigrationError, MigrationResult};
use crate::version::Version;

/// How the planner treats a version with more than one outgoing step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchRule {
    /// Refuse to choose; planning fails with `AmbiguousBranch`
    #[default]
    Reject,
    /// Take the step reaching furthest without passing the target
    HighestTarget,
}

/// Ordered, contiguous sequence of steps
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationPath {
    steps: Vec<Migration>,
}

impl MigrationPath {
    pub fn steps(&self) -> &[Migration] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Version the store ends at after the whole path, if the path is non-empty
    pub fn final_version(&self) -> Option<Version> {
        self.steps.last().map(Migration::target)
    }

    /// `(from, to)` pairs, mostly useful in logs and assertions
    pub fn pairs(&self) -> Vec<(Version, u32)> {
        self.steps.iter().map(|m| (m.from, m.to)).collect()
    }
}

impl IntoIterator for MigrationPath {
    type Item = Migration;
    type IntoIter = std::vec::IntoIter<Migration>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.into_iter()
    }
}

/// Plans migration paths over a catalog
#[derive(Debug, Clone, Copy, Default)]
pub struct Planner {
    branch_rule: BranchRule,
}

impl Planner {
    pub fn new(branch_rule: BranchRule) -> Self {
        Self { branch_rule }
    }

    pub fn branch_rule(&self) -> BranchRule {
        self.branch_rule
    }

    /// Compute the path from `current` to `target`.
    ///
    /// `target == None` means "as far as the chain goes".
    pub fn plan(
        &self,
        current: Version,
        target: Option<Version>,
        catalog: &Catalog,
    ) -> MigrationResult<MigrationPath> {
        if let Some(target) = target {
            if target < current {
                return Err(MigrationError::InvalidTarget { current, target });
            }
            if target == current {
                return Ok(MigrationPath::default());
            }
        }

        let mut steps = Vec::new();
        let mut visited = HashSet::from([current]);
        let mut position = current;

        if current.is_uninitialized() && catalog.outgoing(current).is_empty() {
            if let Some(root) = Self::chain_root(catalog)? {
                tracing::debug!("No bootstrap script; starting from chain root {}", root);
                if let Some(target) = target {
                    if root >= target {
                        return Err(MigrationError::NoMigrationPath {
                            from: current,
                            target,
                            reached: current,
                        });
                    }
                }
                visited.insert(root);
                position = root;
            }
        }

        loop {
            if target == Some(position) {
                return Ok(MigrationPath { steps });
            }

            let next = match self.next_step(position, target, catalog)? {
                Some(step) => step,
                None => {
                    return match target {
                        None => Ok(MigrationPath { steps }),
                        Some(target) => Err(MigrationError::NoMigrationPath {
                            from: current,
                            target,
                            reached: position,
                        }),
                    };
                }
            };

            let reached = next.target();
            if visited.contains(&reached) {
                return Err(MigrationError::CyclicMigration { version: reached });
            }
            if reached < position {
                return Err(MigrationError::DowngradeStep {
                    step: next.name.clone(),
                    from: position,
                    to: next.to,
                });
            }
            if let Some(target) = target {
                if reached > target {
                    return Err(MigrationError::NoMigrationPath {
                        from: current,
                        target,
                        reached: position,
                    });
                }
            }

            visited.insert(reached);
            steps.push(next.clone());
            position = reached;
        }
    }

    /// The lowest version that starts a chain, i.e. a step source no step leads to.
    ///
    /// A fresh store without a bootstrap step starts here. More than one
    /// root means unrelated chains and the planner refuses to pick.
    fn chain_root(catalog: &Catalog) -> MigrationResult<Option<Version>> {
        let targets: HashSet<Version> = catalog.migrations().iter().map(Migration::target).collect();
        let mut roots: Vec<u32> = catalog
            .migrations()
            .iter()
            .filter(|m| !targets.contains(&m.from))
            .filter_map(|m| m.from.as_number())
            .collect();
        roots.sort_unstable();
        roots.dedup();

        match roots.as_slice() {
            [] => Ok(None),
            [root] => Ok(Some(Version::At(*root))),
            _ => Err(MigrationError::AmbiguousBranch {
                from: Version::Uninitialized,
                targets: roots,
            }),
        }
    }

    fn next_step<'a>(
        &self,
        position: Version,
        target: Option<Version>,
        catalog: &'a Catalog,
    ) -> MigrationResult<Option<&'a Migration>> {
        let outgoing = catalog.outgoing(position);
        if outgoing.len() <= 1 {
            return Ok(outgoing.into_iter().next());
        }

        match self.branch_rule {
            BranchRule::Reject => Err(MigrationError::AmbiguousBranch {
                from: position,
                targets: outgoing.iter().map(|m| m.to).collect(),
            }),
            BranchRule::HighestTarget => {
                let within_target = outgoing
                    .iter()
                    .filter(|m| target.map_or(true, |t| m.target() <= t))
                    .max_by_key(|m| m.to)
                    .copied();
                // Nothing within reach: let the overshoot check report it
                Ok(within_target.or_else(|| outgoing.first().copied()))
            }
        }
    }
}
