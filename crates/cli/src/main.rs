mod commands;

use anyhow::bail;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use stepwise_core::{init_logging, LogFormat, LoggingConfig};
use stepwise_engine::{MigrationCommand, Target, Version, VersionScheme, DEFAULT_MIGRATIONS_TABLE};

use commands::{create, migrate};

#[derive(Parser, Debug)]
#[command(name = "stepwise", version)]
#[command(about = "Versioned SQL migrations for PostgreSQL schemas")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by every command
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Schema whose version is tracked and migrated
    #[arg(long, global = true)]
    pub schema: Option<String>,

    /// Directory holding the migration files
    #[arg(long, global = true)]
    pub path: Option<PathBuf>,

    /// Name of the version tracking table
    #[arg(long, global = true, default_value = DEFAULT_MIGRATIONS_TABLE)]
    pub table: String,

    /// Run scripts without wrapping each one in a transaction
    #[arg(long, global = true)]
    pub no_transaction: bool,

    /// Log line format (text or json)
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print run reports as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

impl GlobalArgs {
    pub fn require_schema(&self) -> anyhow::Result<&str> {
        match self.schema.as_deref() {
            Some(schema) => Ok(schema),
            None => bail!("Schema name is required: use --schema"),
        }
    }

    pub fn require_path(&self) -> anyhow::Result<&PathBuf> {
        match self.path.as_ref() {
            Some(path) => Ok(path),
            None => bail!("Migrations path is required: use --path"),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply all (or N) pending migrations
    Up {
        /// Number of migrations to apply
        #[arg(long)]
        steps: Option<usize>,
    },

    /// Roll back all (or N) applied migrations
    Down {
        /// Number of migrations to roll back
        #[arg(long)]
        steps: Option<usize>,
    },

    /// Migrate up or down to VERSION (0 rolls everything back)
    Goto { version: Version },

    /// Set the recorded version without running any script (-1 clears it)
    Force {
        #[arg(allow_negative_numbers = true)]
        version: Version,
    },

    /// Print the recorded version
    Version,

    /// List migrations with applied/pending markers
    Status,

    /// Create an empty up/down migration pair
    Create {
        /// Migration name
        name: String,

        /// Number the migration with a UTC timestamp
        #[arg(long)]
        timestamp: bool,

        /// Zero padding of sequential versions
        #[arg(long, default_value_t = 6)]
        digits: usize,
    },
}

fn target(steps: Option<usize>) -> Target {
    steps.map_or(Target::All, Target::Steps)
}

fn goto_version(version: Version) -> anyhow::Result<Option<Version>> {
    match version {
        0 => Ok(None),
        v if v > 0 => Ok(Some(v)),
        v => bail!("Invalid goto version {}: expected a migration version or 0", v),
    }
}

fn force_version(version: Version) -> anyhow::Result<Option<Version>> {
    match version {
        -1 => Ok(None),
        v if v >= 0 => Ok(Some(v)),
        v => bail!("Invalid force version {}: expected a version or -1", v),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let global = cli.global;

    match cli.command {
        Commands::Up { steps } => migrate::run(&global, MigrationCommand::Up(target(steps))).await,
        Commands::Down { steps } => {
            migrate::run(&global, MigrationCommand::Down(target(steps))).await
        }
        Commands::Goto { version } => {
            migrate::run(&global, MigrationCommand::Goto(goto_version(version)?)).await
        }
        Commands::Force { version } => {
            migrate::run(&global, MigrationCommand::Force(force_version(version)?)).await
        }
        Commands::Version => migrate::version(&global).await,
        Commands::Status => migrate::status(&global).await,
        Commands::Create {
            name,
            timestamp,
            digits,
        } => {
            let scheme = if timestamp {
                VersionScheme::Timestamp
            } else {
                VersionScheme::Sequential { digits }
            };
            create::run(&global, &name, scheme)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let dotenv = dotenvy::dotenv();

    let logging = if cli.global.verbose {
        LoggingConfig::verbose()
    } else {
        LoggingConfig::default()
    }
    .with_format(cli.global.log_format);

    if let Err(e) = init_logging(&logging) {
        eprintln!("Warning: failed to initialize logging: {}", e);
    }

    match dotenv {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded environment file"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "failed to load .env"),
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_up_with_global_flags() {
        let cli = Cli::try_parse_from([
            "stepwise", "--schema", "billing", "--path", "./migrations", "up", "--steps", "2",
        ])
        .unwrap();

        assert_eq!(cli.global.schema.as_deref(), Some("billing"));
        assert_eq!(cli.global.table, "schema_migrations");
        assert!(matches!(cli.command, Commands::Up { steps: Some(2) }));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "stepwise", "version", "--schema", "billing", "--path", "m", "--log-format", "json",
        ])
        .unwrap();

        assert_eq!(cli.global.log_format, LogFormat::Json);
        assert!(matches!(cli.command, Commands::Version));
    }

    #[test]
    fn test_force_accepts_minus_one() {
        let cli = Cli::try_parse_from(["stepwise", "force", "-1"]).unwrap();
        match cli.command {
            Commands::Force { version } => assert_eq!(force_version(version).unwrap(), None),
            other => panic!("unexpected command {:?}", other),
        }

        assert_eq!(force_version(3).unwrap(), Some(3));
        assert!(force_version(-2).is_err());
    }

    #[test]
    fn test_goto_zero_means_none() {
        assert_eq!(goto_version(0).unwrap(), None);
        assert_eq!(goto_version(7).unwrap(), Some(7));
        assert!(goto_version(-1).is_err());
    }

    #[test]
    fn test_steps_map_to_target() {
        assert_eq!(target(None), Target::All);
        assert_eq!(target(Some(3)), Target::Steps(3));
    }

    #[test]
    fn test_unknown_log_format_is_rejected() {
        assert!(Cli::try_parse_from(["stepwise", "--log-format", "xml", "version"]).is_err());
    }

    #[test]
    fn test_missing_schema_is_reported() {
        let cli = Cli::try_parse_from(["stepwise", "up"]).unwrap();
        let err = cli.global.require_schema().unwrap_err();
        assert!(err.to_string().contains("--schema"));
    }
}
