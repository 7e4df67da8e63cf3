//! Filesystem-backed migration source.

use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::{MigrationIndex, MigrationSource};
use crate::definitions::{MigrationDirection, Version};
use crate::error::{SourceError, SourceResult};

/// How `create_migration` numbers a new migration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionScheme {
    /// Highest existing version plus one, zero padded to `digits`
    Sequential { digits: usize },
    /// UTC timestamp `YYYYMMDDHHMMSS`
    Timestamp,
}

impl Default for VersionScheme {
    fn default() -> Self {
        VersionScheme::Sequential { digits: 6 }
    }
}

/// Paths written by `create_migration`
#[derive(Debug, Clone)]
pub struct CreatedMigration {
    pub version: Version,
    pub up_path: PathBuf,
    pub down_path: PathBuf,
}

/// Migrations stored as files in one directory
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    /// Open an existing migrations directory. The path is resolved to an
    /// absolute one so log lines stay unambiguous.
    pub fn open(path: impl AsRef<Path>) -> SourceResult<Self> {
        let path = path.as_ref();
        let root = fs::canonicalize(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => SourceError::NotFound {
                path: path.to_path_buf(),
            },
            _ => SourceError::Io {
                location: path.display().to_string(),
                source: e,
            },
        })?;

        if !root.is_dir() {
            return Err(SourceError::Io {
                location: root.display().to_string(),
                source: std::io::Error::new(ErrorKind::Other, "not a directory"),
            });
        }

        Ok(Self { root })
    }

    /// Open a directory, creating it first if needed
    pub fn create_dir_all(path: impl AsRef<Path>) -> SourceResult<Self> {
        let path = path.as_ref();
        fs::create_dir_all(path).map_err(|e| SourceError::Io {
            location: path.display().to_string(),
            source: e,
        })?;
        Self::open(path)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write an empty up/down pair for a new migration.
    ///
    /// Never overwrites: an existing file or an already used version fails.
    pub fn create_migration(
        &self,
        name: &str,
        scheme: VersionScheme,
    ) -> SourceResult<CreatedMigration> {
        let slug = name.trim().replace([' ', '-'], "_").to_lowercase();
        if slug.is_empty() || slug.contains(['/', '\\', '.']) {
            return Err(SourceError::InvalidFilename {
                file: name.to_string(),
                reason: "migration name must be non-empty and must not contain '/', '\\' or '.'"
                    .to_string(),
            });
        }

        let index = MigrationIndex::from_entries(self.list()?)?;
        let (version, prefix) = match scheme {
            VersionScheme::Sequential { digits } => {
                let next = index.last().unwrap_or(0) + 1;
                (next, format!("{:0width$}", next, width = digits))
            }
            VersionScheme::Timestamp => {
                let stamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
                let version = stamp.parse::<Version>().map_err(|_| SourceError::InvalidVersion {
                    file: name.to_string(),
                    raw: stamp.clone(),
                })?;
                (version, stamp)
            }
        };

        if let Some(existing) = index.get(version) {
            let first = existing
                .up
                .clone()
                .or_else(|| existing.down.clone())
                .unwrap_or_default();
            return Err(SourceError::DuplicateVersion {
                version,
                direction: MigrationDirection::Up,
                first,
                second: format!("{}_{}.up.sql", prefix, slug),
            });
        }

        let up_path = self.root.join(format!("{}_{}.up.sql", prefix, slug));
        let down_path = self.root.join(format!("{}_{}.down.sql", prefix, slug));

        self.write_new(&up_path, &template(&slug, version, MigrationDirection::Up))?;
        if let Err(e) = self.write_new(&down_path, &template(&slug, version, MigrationDirection::Down)) {
            let _ = fs::remove_file(&up_path);
            return Err(e);
        }

        tracing::info!(version, path = %up_path.display(), "created migration");

        Ok(CreatedMigration {
            version,
            up_path,
            down_path,
        })
    }

    fn write_new(&self, path: &Path, content: &str) -> SourceResult<()> {
        let io_err = |e| SourceError::Io {
            location: path.display().to_string(),
            source: e,
        };
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(io_err)?;
        file.write_all(content.as_bytes()).map_err(io_err)
    }
}

impl MigrationSource for DirectorySource {
    fn list(&self) -> SourceResult<Vec<String>> {
        let entries = fs::read_dir(&self.root).map_err(|e| SourceError::Io {
            location: self.root.display().to_string(),
            source: e,
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SourceError::Io {
                location: self.root.display().to_string(),
                source: e,
            })?;

            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }

            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => {
                    return Err(SourceError::InvalidFilename {
                        file: raw.to_string_lossy().into_owned(),
                        reason: "file name is not valid UTF-8".to_string(),
                    })
                }
            }
        }

        Ok(names)
    }

    fn read(&self, entry: &str) -> SourceResult<String> {
        let path = self.root.join(entry);
        fs::read_to_string(&path).map_err(|e| SourceError::Io {
            location: path.display().to_string(),
            source: e,
        })
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

fn template(name: &str, version: Version, direction: MigrationDirection) -> String {
    format!(
        "-- Migration: {}\n\
         -- Version: {}\n\
         -- Direction: {}\n\
         -- Created: {}\n\n",
        name,
        version,
        direction,
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceReader;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) {
        fs::write(dir.path().join(name), content).unwrap();
    }

    #[test]
    fn test_open_missing_directory() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");

        assert!(matches!(
            DirectorySource::open(&missing),
            Err(SourceError::NotFound { .. })
        ));
    }

    #[test]
    fn test_lists_files_only() {
        let dir = TempDir::new().unwrap();
        write(&dir, "1_init.up.sql", "CREATE TABLE t (id int);");
        write(&dir, "1_init.down.sql", "DROP TABLE t;");
        fs::create_dir(dir.path().join("2_nested.up.sql")).unwrap();

        let reader = SourceReader::open(DirectorySource::open(dir.path()).unwrap()).unwrap();
        assert_eq!(reader.index().versions(), vec![1]);

        let step = reader.read_step(1, MigrationDirection::Down).unwrap();
        assert_eq!(step.script, "DROP TABLE t;");
        assert_eq!(step.name, "init");
    }

    #[test]
    fn test_create_sequential_migrations() {
        let dir = TempDir::new().unwrap();
        let source = DirectorySource::open(dir.path()).unwrap();

        let first = source.create_migration("Create users", VersionScheme::default()).unwrap();
        assert_eq!(first.version, 1);
        assert!(first.up_path.ends_with("000001_create_users.up.sql"));
        assert!(first.down_path.exists());

        let second = source
            .create_migration("add-orders", VersionScheme::Sequential { digits: 0 })
            .unwrap();
        assert_eq!(second.version, 2);
        assert!(second.up_path.ends_with("2_add_orders.up.sql"));

        let content = fs::read_to_string(&second.down_path).unwrap();
        assert!(content.contains("-- Direction: down"));

        let reader = SourceReader::open(source).unwrap();
        assert_eq!(reader.index().versions(), vec![1, 2]);
    }

    #[test]
    fn test_create_rejects_bad_names() {
        let dir = TempDir::new().unwrap();
        let source = DirectorySource::open(dir.path()).unwrap();

        assert!(source.create_migration("  ", VersionScheme::default()).is_err());
        assert!(source.create_migration("../escape", VersionScheme::default()).is_err());
    }

    #[test]
    fn test_create_timestamp_migration() {
        let dir = TempDir::new().unwrap();
        let source = DirectorySource::open(dir.path()).unwrap();

        let created = source.create_migration("seed", VersionScheme::Timestamp).unwrap();
        assert!(created.version > 20_000_000_000_000);
    }
}
