use std::collections::BTreeMap;

use super::MigrationSource;
use crate::definitions::Version;
use crate::error::{SourceError, SourceResult};

/// Migration scripts held in memory, for embedding and tests
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    entries: BTreeMap<String, String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a raw entry under the given name
    pub fn with_entry(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.entries.insert(name.into(), content.into());
        self
    }

    /// Add an up/down pair named `{version}_{name}.{up|down}.sql`
    pub fn with_migration(
        self,
        version: Version,
        name: &str,
        up_sql: impl Into<String>,
        down_sql: impl Into<String>,
    ) -> Self {
        self.with_entry(format!("{}_{}.up.sql", version, name), up_sql)
            .with_entry(format!("{}_{}.down.sql", version, name), down_sql)
    }
}

impl MigrationSource for MemorySource {
    fn list(&self) -> SourceResult<Vec<String>> {
        Ok(self.entries.keys().cloned().collect())
    }

    fn read(&self, entry: &str) -> SourceResult<String> {
        self.entries.get(entry).cloned().ok_or_else(|| SourceError::Io {
            location: entry.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such entry"),
        })
    }

    fn describe(&self) -> String {
        format!("memory ({} entries)", self.entries.len())
    }
}
