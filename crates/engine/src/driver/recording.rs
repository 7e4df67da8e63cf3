use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use super::ExecutionDriver;
use crate::definitions::{MigrationDirection, MigrationStep, TransactionPolicy, Version};
use crate::error::DriverError;

/// A step the [`RecordingDriver`] was asked to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedStep {
    pub version: Version,
    pub direction: MigrationDirection,
    pub script: String,
    pub committed: bool,
}

/// Driver that executes nothing and journals every call.
///
/// Clones share the journal, so a test can keep a handle while the engine owns
/// the driver. Steps registered with [`RecordingDriver::fail_on`] are journaled
/// as not committed and fail.
#[derive(Debug, Clone, Default)]
pub struct RecordingDriver {
    journal: Arc<Mutex<Vec<ExecutedStep>>>,
    failures: Arc<Mutex<HashSet<(Version, MigrationDirection)>>>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the given step fail
    pub fn fail_on(self, version: Version, direction: MigrationDirection) -> Self {
        self.failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert((version, direction));
        self
    }

    /// Stop failing the given step
    pub fn heal(&self, version: Version, direction: MigrationDirection) {
        self.failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&(version, direction));
    }

    /// Every call so far, in order
    pub fn executed(&self) -> Vec<ExecutedStep> {
        self.journal.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Versions and directions of committed steps, in order
    pub fn committed(&self) -> Vec<(Version, MigrationDirection)> {
        self.executed()
            .into_iter()
            .filter(|s| s.committed)
            .map(|s| (s.version, s.direction))
            .collect()
    }
}

#[async_trait]
impl ExecutionDriver for RecordingDriver {
    async fn execute(
        &mut self,
        step: &MigrationStep,
        _policy: TransactionPolicy,
    ) -> Result<(), DriverError> {
        let fails = self
            .failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(&(step.version, step.direction));

        self.journal
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(ExecutedStep {
                version: step.version,
                direction: step.direction,
                script: step.script.clone(),
                committed: !fails,
            });

        if fails {
            return Err(DriverError::Rejected {
                message: format!(
                    "simulated failure in {} migration {}",
                    step.direction, step.version
                ),
            });
        }
        Ok(())
    }
}
