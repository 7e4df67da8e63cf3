//! Plan - the ordered steps one command will execute.
//!
//! Computed fresh for every run from the recorded version and the source
//! index; never persisted.

use crate::definitions::{MigrationCommand, MigrationDirection, Target, Version};
use crate::error::{SourceError, SourceResult};
use crate::source::{MigrationIndex, VersionEntry};

/// One step of a plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    pub version: Version,
    pub name: String,
    pub direction: MigrationDirection,
    /// Version recorded once this step commits. For a down step this is the
    /// preceding version, or `None` below the first migration.
    pub resulting_version: Option<Version>,
}

/// Ordered steps for one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub steps: Vec<PlannedStep>,
    /// Step count asked for by a bounded `Up`/`Down`
    pub requested: Option<usize>,
}

impl Plan {
    /// Compute the plan for `command` starting from the recorded `current`
    /// version.
    ///
    /// Every step in the plan is checked for a script in its direction, so a
    /// forward-only migration fails here rather than halfway through a run.
    /// `Force` produces an empty plan.
    pub fn compute(
        index: &MigrationIndex,
        current: Option<Version>,
        command: MigrationCommand,
    ) -> SourceResult<Self> {
        let plan = match command {
            MigrationCommand::Up(target) => Self {
                steps: up_steps(index.after(current), limit(target)),
                requested: requested(target),
            },
            MigrationCommand::Down(target) => {
                ensure_known(index, current)?;
                Self {
                    steps: down_steps(index, index.at_or_below(current), limit(target)),
                    requested: requested(target),
                }
            }
            MigrationCommand::Goto(Some(version)) => {
                if !index.contains(version) {
                    return Err(SourceError::UnknownVersion { version });
                }
                match current {
                    Some(c) if c > version => {
                        ensure_known(index, current)?;
                        let steps = index.at_or_below(current).take_while(|e| e.version > version);
                        Self {
                            steps: down_steps(index, steps, usize::MAX),
                            requested: None,
                        }
                    }
                    _ => {
                        let steps = index.after(current).take_while(|e| e.version <= version);
                        Self {
                            steps: up_steps(steps, usize::MAX),
                            requested: None,
                        }
                    }
                }
            }
            MigrationCommand::Goto(None) => {
                ensure_known(index, current)?;
                Self {
                    steps: down_steps(index, index.at_or_below(current), usize::MAX),
                    requested: None,
                }
            }
            MigrationCommand::Force(_) => Self::default(),
        };

        for step in &plan.steps {
            let has_script = index
                .get(step.version)
                .and_then(|entry| entry.entry(step.direction))
                .is_some();
            if !has_script {
                return Err(SourceError::MissingScript {
                    version: step.version,
                    direction: step.direction,
                });
            }
        }

        Ok(plan)
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// A bounded request found fewer steps than it asked for
    pub fn is_partial(&self) -> bool {
        matches!(self.requested, Some(n) if self.steps.len() < n)
    }

    pub fn versions(&self) -> Vec<Version> {
        self.steps.iter().map(|s| s.version).collect()
    }
}

fn limit(target: Target) -> usize {
    match target {
        Target::All => usize::MAX,
        Target::Steps(n) => n,
    }
}

fn requested(target: Target) -> Option<usize> {
    match target {
        Target::All => None,
        Target::Steps(n) => Some(n),
    }
}

/// Rolling back starts from the recorded version, so it has to be one the
/// source knows about. A version below the first migration (such as a forced
/// 0) has nothing to roll back and plans no steps.
fn ensure_known(index: &MigrationIndex, current: Option<Version>) -> SourceResult<()> {
    match (current, index.first()) {
        (Some(version), Some(first)) if version >= first && !index.contains(version) => {
            Err(SourceError::UnknownVersion { version })
        }
        _ => Ok(()),
    }
}

fn up_steps<'a>(entries: impl Iterator<Item = &'a VersionEntry>, limit: usize) -> Vec<PlannedStep> {
    entries
        .take(limit)
        .map(|entry| PlannedStep {
            version: entry.version,
            name: entry.name.clone(),
            direction: MigrationDirection::Up,
            resulting_version: Some(entry.version),
        })
        .collect()
}

fn down_steps<'a>(
    index: &MigrationIndex,
    entries: impl Iterator<Item = &'a VersionEntry>,
    limit: usize,
) -> Vec<PlannedStep> {
    entries
        .take(limit)
        .map(|entry| PlannedStep {
            version: entry.version,
            name: entry.name.clone(),
            direction: MigrationDirection::Down,
            resulting_version: index.prev(entry.version),
        })
        .collect()
}
