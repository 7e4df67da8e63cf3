//! Source Reader - discovers migration scripts and orders them by version.
//!
//! A [`MigrationSource`] is any readable collection of named entries. Entry
//! names follow `{version}_{name}.{up|down}.{ext}`, e.g.
//! `0003_add_orders.up.sql`. [`SourceReader`] parses and validates the names
//! once, then reads script bodies lazily as steps are requested.

pub mod directory;
pub mod memory;

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::ops::Bound;

use crate::definitions::{MigrationDirection, MigrationStep, Version};
use crate::error::{SourceError, SourceResult};

pub use directory::DirectorySource;
pub use memory::MemorySource;

static MIGRATION_FILENAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([^_]+)_(.+)\.(up|down)\.([A-Za-z0-9]+)$").expect("valid migration filename regex")
});

/// A readable collection of migration scripts
pub trait MigrationSource: Send + Sync {
    /// Names of every entry in the collection, in no particular order
    fn list(&self) -> SourceResult<Vec<String>>;

    /// Body of a single entry
    fn read(&self, entry: &str) -> SourceResult<String>;

    /// Human readable location, for logs
    fn describe(&self) -> String;
}

/// An entry name broken into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFilename {
    pub version: Version,
    pub name: String,
    pub direction: MigrationDirection,
    pub extension: String,
}

/// Parse a migration entry name.
///
/// Returns `Ok(None)` for names that are not shaped like a migration at all
/// (`README.md`, `.gitkeep`), and an error for names that are but carry an
/// invalid version.
pub fn parse_filename(file: &str) -> SourceResult<Option<ParsedFilename>> {
    let Some(captures) = MIGRATION_FILENAME.captures(file) else {
        return Ok(None);
    };

    let raw_version = &captures[1];
    let version = raw_version
        .parse::<Version>()
        .ok()
        .filter(|v| *v > 0 && raw_version.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| SourceError::InvalidVersion {
            file: file.to_string(),
            raw: raw_version.to_string(),
        })?;

    let direction = match &captures[3] {
        "up" => MigrationDirection::Up,
        _ => MigrationDirection::Down,
    };

    Ok(Some(ParsedFilename {
        version,
        name: captures[2].to_string(),
        direction,
        extension: captures[4].to_string(),
    }))
}

/// One version with its up/down entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionEntry {
    pub version: Version,
    pub name: String,
    pub up: Option<String>,
    pub down: Option<String>,
}

impl VersionEntry {
    pub fn entry(&self, direction: MigrationDirection) -> Option<&str> {
        match direction {
            MigrationDirection::Up => self.up.as_deref(),
            MigrationDirection::Down => self.down.as_deref(),
        }
    }

    /// Whether this version can be rolled back
    pub fn is_reversible(&self) -> bool {
        self.down.is_some()
    }
}

/// Validated, version-ordered view of a source's entries
#[derive(Debug, Clone, Default)]
pub struct MigrationIndex {
    entries: BTreeMap<Version, VersionEntry>,
}

impl MigrationIndex {
    /// Build the index from entry names. Gaps between versions are allowed;
    /// two entries for the same version and direction are not.
    pub fn from_entries<I, S>(names: I) -> SourceResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut entries: BTreeMap<Version, VersionEntry> = BTreeMap::new();

        for name in names {
            let name = name.as_ref();
            let Some(parsed) = parse_filename(name)? else {
                tracing::debug!(entry = name, "skipping non-migration entry");
                continue;
            };

            let entry = entries.entry(parsed.version).or_insert_with(|| VersionEntry {
                version: parsed.version,
                name: parsed.name.clone(),
                up: None,
                down: None,
            });

            let slot = match parsed.direction {
                MigrationDirection::Up => &mut entry.up,
                MigrationDirection::Down => &mut entry.down,
            };

            if let Some(existing) = slot.as_ref() {
                let (first, second) = if existing.as_str() <= name {
                    (existing.clone(), name.to_string())
                } else {
                    (name.to_string(), existing.clone())
                };
                return Err(SourceError::DuplicateVersion {
                    version: parsed.version,
                    direction: parsed.direction,
                    first,
                    second,
                });
            }
            *slot = Some(name.to_string());
        }

        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// All versions, ascending
    pub fn list(&self) -> impl DoubleEndedIterator<Item = &VersionEntry> {
        self.entries.values()
    }

    pub fn versions(&self) -> Vec<Version> {
        self.entries.keys().copied().collect()
    }

    pub fn get(&self, version: Version) -> Option<&VersionEntry> {
        self.entries.get(&version)
    }

    pub fn contains(&self, version: Version) -> bool {
        self.entries.contains_key(&version)
    }

    pub fn first(&self) -> Option<Version> {
        self.entries.keys().next().copied()
    }

    pub fn last(&self) -> Option<Version> {
        self.entries.keys().next_back().copied()
    }

    /// The version preceding `version`, `None` when it is the first
    pub fn prev(&self, version: Version) -> Option<Version> {
        self.entries.range(..version).next_back().map(|(v, _)| *v)
    }

    /// Versions strictly after `current`, ascending. `None` means nothing is
    /// applied, so every version qualifies.
    pub fn after(&self, current: Option<Version>) -> impl Iterator<Item = &VersionEntry> {
        let lower = match current {
            Some(v) => Bound::Excluded(v),
            None => Bound::Unbounded,
        };
        self.entries
            .range((lower, Bound::Unbounded))
            .map(|(_, entry)| entry)
    }

    /// Versions at or below `current`, descending
    pub fn at_or_below(&self, current: Option<Version>) -> impl Iterator<Item = &VersionEntry> {
        let upper = match current {
            Some(v) => Bound::Included(v),
            // nothing applied: an empty range
            None => Bound::Excluded(Version::MIN),
        };
        self.entries
            .range((Bound::Unbounded, upper))
            .rev()
            .map(|(_, entry)| entry)
    }
}

/// Reads and validates a [`MigrationSource`], exposing its steps in version
/// order. Script bodies are read on demand.
pub struct SourceReader<S> {
    source: S,
    index: MigrationIndex,
}

impl<S: MigrationSource> SourceReader<S> {
    /// List and validate the source. Fails before anything is executed if an
    /// entry name is malformed or duplicated.
    pub fn open(source: S) -> SourceResult<Self> {
        let index = MigrationIndex::from_entries(source.list()?)?;
        tracing::debug!(
            source = %source.describe(),
            versions = index.len(),
            "loaded migration source"
        );
        Ok(Self { source, index })
    }

    pub fn index(&self) -> &MigrationIndex {
        &self.index
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Load one step's script
    pub fn read_step(
        &self,
        version: Version,
        direction: MigrationDirection,
    ) -> SourceResult<MigrationStep> {
        let entry = self
            .index
            .get(version)
            .ok_or(SourceError::UnknownVersion { version })?;
        let file = entry
            .entry(direction)
            .ok_or(SourceError::MissingScript { version, direction })?;

        Ok(MigrationStep {
            version,
            name: entry.name.clone(),
            direction,
            script: self.source.read(file)?,
        })
    }

    /// Lazy sequence of steps starting from the recorded `current` version:
    /// ascending versions after it for `Up`, descending versions at or below
    /// it for `Down`.
    pub fn steps(
        &self,
        direction: MigrationDirection,
        current: Option<Version>,
    ) -> Box<dyn Iterator<Item = SourceResult<MigrationStep>> + '_> {
        match direction {
            MigrationDirection::Up => Box::new(
                self.index
                    .after(current)
                    .map(move |entry| self.read_step(entry.version, direction)),
            ),
            MigrationDirection::Down => Box::new(
                self.index
                    .at_or_below(current)
                    .map(move |entry| self.read_step(entry.version, direction)),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filename() {
        let parsed = parse_filename("0003_add_orders.up.sql").unwrap().unwrap();
        assert_eq!(parsed.version, 3);
        assert_eq!(parsed.name, "add_orders");
        assert_eq!(parsed.direction, MigrationDirection::Up);
        assert_eq!(parsed.extension, "sql");

        let parsed = parse_filename("20240115093000_users.down.sql").unwrap().unwrap();
        assert_eq!(parsed.version, 20240115093000);
        assert_eq!(parsed.direction, MigrationDirection::Down);
    }

    #[test]
    fn test_parse_filename_skips_unrelated_entries() {
        assert_eq!(parse_filename("README.md").unwrap(), None);
        assert_eq!(parse_filename(".gitkeep").unwrap(), None);
        assert_eq!(parse_filename("1_init.sql").unwrap(), None);
    }

    #[test]
    fn test_parse_filename_rejects_bad_versions() {
        for name in ["abc_init.up.sql", "0_init.up.sql", "-1_init.up.sql", "99999999999999999999_x.up.sql"] {
            assert!(
                matches!(parse_filename(name), Err(SourceError::InvalidVersion { .. })),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_index_orders_numerically_and_allows_gaps() {
        let index = MigrationIndex::from_entries([
            "10_ten.up.sql",
            "2_two.up.sql",
            "2_two.down.sql",
            "10_ten.down.sql",
            "7_seven.up.sql",
            "notes.txt",
        ])
        .unwrap();

        assert_eq!(index.versions(), vec![2, 7, 10]);
        assert_eq!(index.prev(10), Some(7));
        assert_eq!(index.prev(2), None);
        assert!(!index.get(7).unwrap().is_reversible());

        let after: Vec<_> = index.after(Some(2)).map(|e| e.version).collect();
        assert_eq!(after, vec![7, 10]);

        let below: Vec<_> = index.at_or_below(Some(7)).map(|e| e.version).collect();
        assert_eq!(below, vec![7, 2]);
        assert_eq!(index.at_or_below(None).count(), 0);
    }

    #[test]
    fn test_index_rejects_duplicate_version_direction() {
        let err = MigrationIndex::from_entries(["1_a.up.sql", "1_b.up.sql"]).unwrap_err();
        match err {
            SourceError::DuplicateVersion {
                version,
                direction,
                first,
                second,
            } => {
                assert_eq!(version, 1);
                assert_eq!(direction, MigrationDirection::Up);
                assert_eq!(first, "1_a.up.sql");
                assert_eq!(second, "1_b.up.sql");
            }
            other => panic!("unexpected error: {other}"),
        }

        // same version through a different zero padding is still a duplicate
        assert!(MigrationIndex::from_entries(["1_a.down.sql", "001_a.down.sql"]).is_err());
    }

    #[test]
    fn test_reader_steps_are_lazy_and_ordered() {
        let source = MemorySource::new()
            .with_migration(1, "init", "CREATE TABLE a ();", "DROP TABLE a;")
            .with_migration(2, "more", "CREATE TABLE b ();", "DROP TABLE b;")
            .with_migration(3, "last", "CREATE TABLE c ();", "DROP TABLE c;");
        let reader = SourceReader::open(source).unwrap();

        let up: Vec<_> = reader
            .steps(MigrationDirection::Up, Some(1))
            .map(|s| s.unwrap().version)
            .collect();
        assert_eq!(up, vec![2, 3]);

        let mut down = reader.steps(MigrationDirection::Down, Some(3));
        let first = down.next().unwrap().unwrap();
        assert_eq!(first.version, 3);
        assert_eq!(first.script, "DROP TABLE c;");
        assert_eq!(down.count(), 2);
    }

    #[test]
    fn test_read_step_missing_script() {
        let source = MemorySource::new().with_entry("4_forward_only.up.sql", "SELECT 1;");
        let reader = SourceReader::open(source).unwrap();

        assert!(reader.read_step(4, MigrationDirection::Up).is_ok());
        assert!(matches!(
            reader.read_step(4, MigrationDirection::Down),
            Err(SourceError::MissingScript { version: 4, .. })
        ));
        assert!(matches!(
            reader.read_step(5, MigrationDirection::Up),
            Err(SourceError::UnknownVersion { version: 5 })
        ));
    }
}
