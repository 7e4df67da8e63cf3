use stepwise_engine::{CreatedMigration, DirectorySource, VersionScheme};

use crate::GlobalArgs;

/// Write a new up/down pair into the migrations directory, creating the
/// directory if needed. No database connection is made.
pub fn run(global: &GlobalArgs, name: &str, scheme: VersionScheme) -> anyhow::Result<()> {
    let created = create_in(global.require_path()?, name, scheme)?;

    println!("Created migration {}:", created.version);
    println!("  {}", created.up_path.display());
    println!("  {}", created.down_path.display());
    Ok(())
}

fn create_in(
    path: &std::path::Path,
    name: &str,
    scheme: VersionScheme,
) -> anyhow::Result<CreatedMigration> {
    let source = DirectorySource::create_dir_all(path)?;
    Ok(source.create_migration(name, scheme)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_numbers_sequentially() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migrations");

        let first = create_in(&path, "create users", VersionScheme::default()).unwrap();
        let second = create_in(&path, "add-email", VersionScheme::default()).unwrap();

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert!(first.up_path.ends_with("000001_create_users.up.sql"));
        assert!(second.down_path.ends_with("000002_add_email.down.sql"));
    }

    #[test]
    fn test_create_rejects_bad_name() {
        let dir = tempfile::tempdir().unwrap();
        assert!(create_in(dir.path(), "../escape", VersionScheme::default()).is_err());
    }
}
