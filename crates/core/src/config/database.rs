use crate::config::{ConfigError, ConfigSource, ConfigValidator, PortValidator};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_HOST: &str = "DB_HOST";
pub const ENV_PORT: &str = "DB_PORT";
pub const ENV_USER: &str = "DB_USER";
pub const ENV_PASSWORD: &str = "DB_PASSWORD";
pub const ENV_NAME: &str = "DB_NAME";
pub const ENV_SSLMODE: &str = "DB_SSLMODE";
pub const ENV_STATEMENT_TIMEOUT_MS: &str = "DB_STATEMENT_TIMEOUT_MS";
pub const ENV_CONNECT_TIMEOUT_SECS: &str = "DB_CONNECT_TIMEOUT_SECS";

const DEFAULT_PORT: u16 = 5432;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// TLS negotiation mode, using libpq's names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    #[default]
    Disable,
    Allow,
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Allow => "allow",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }
}

impl FromStr for SslMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "disable" => Ok(SslMode::Disable),
            "allow" => Ok(SslMode::Allow),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            _ => Err(ConfigError::invalid_value(
                ENV_SSLMODE,
                s,
                "disable, allow, prefer, require, verify-ca, or verify-full",
            )),
        }
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection parameters for the target database.
///
/// Built once at the process boundary and handed to the connection factory by
/// reference. Host, user, password and database name are required together:
/// [`DatabaseConfig::from_env`] reports every missing one in a single error.
#[derive(Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    pub sslmode: SslMode,
    /// Applied as the session `statement_timeout`; `None` keeps the server default
    pub statement_timeout: Option<Duration>,
    pub connect_timeout: Duration,
    sources: HashMap<String, ConfigSource>,
}

impl DatabaseConfig {
    /// Create a configuration programmatically with default port and TLS mode
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        dbname: impl Into<String>,
    ) -> Self {
        let sources = [ENV_HOST, ENV_USER, ENV_PASSWORD, ENV_NAME, ENV_PORT, ENV_SSLMODE]
            .iter()
            .map(|key| (key.to_string(), ConfigSource::Programmatic))
            .collect();

        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            user: user.into(),
            password: password.into(),
            dbname: dbname.into(),
            sslmode: SslMode::default(),
            statement_timeout: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            sources,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_sslmode(mut self, sslmode: SslMode) -> Self {
        self.sslmode = sslmode;
        self
    }

    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(read_env)
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<Option<String>, ConfigError>,
    {
        let mut sources = HashMap::new();
        let mut missing = Vec::new();

        let mut required = |key: &'static str| -> Result<String, ConfigError> {
            match lookup(key)?.filter(|v| !v.is_empty()) {
                Some(value) => {
                    sources.insert(key.to_string(), ConfigSource::EnvVar(key.to_string()));
                    Ok(value)
                }
                None => {
                    missing.push(key);
                    Ok(String::new())
                }
            }
        };

        let host = required(ENV_HOST)?;
        let user = required(ENV_USER)?;
        let password = required(ENV_PASSWORD)?;
        let dbname = required(ENV_NAME)?;

        if !missing.is_empty() {
            return Err(ConfigError::missing_required(
                missing.join(", "),
                "Set DB_HOST, DB_USER, DB_PASSWORD and DB_NAME in the environment or a .env file",
            ));
        }

        let port = match lookup(ENV_PORT)?.filter(|v| !v.is_empty()) {
            Some(raw) => {
                sources.insert(ENV_PORT.to_string(), ConfigSource::EnvVar(ENV_PORT.to_string()));
                raw.parse::<u16>().map_err(|_| {
                    ConfigError::invalid_value(ENV_PORT, raw.clone(), "valid port number (1-65535)")
                })?
            }
            None => {
                sources.insert(
                    ENV_PORT.to_string(),
                    ConfigSource::Default(DEFAULT_PORT.to_string()),
                );
                DEFAULT_PORT
            }
        };

        let sslmode = match lookup(ENV_SSLMODE)?.filter(|v| !v.is_empty()) {
            Some(raw) => {
                sources.insert(
                    ENV_SSLMODE.to_string(),
                    ConfigSource::EnvVar(ENV_SSLMODE.to_string()),
                );
                raw.parse()?
            }
            None => {
                sources.insert(
                    ENV_SSLMODE.to_string(),
                    ConfigSource::Default(SslMode::default().to_string()),
                );
                SslMode::default()
            }
        };

        let statement_timeout = match lookup(ENV_STATEMENT_TIMEOUT_MS)?.filter(|v| !v.is_empty()) {
            Some(raw) => {
                sources.insert(
                    ENV_STATEMENT_TIMEOUT_MS.to_string(),
                    ConfigSource::EnvVar(ENV_STATEMENT_TIMEOUT_MS.to_string()),
                );
                let millis = raw.parse::<u64>().map_err(|_| {
                    ConfigError::invalid_value(
                        ENV_STATEMENT_TIMEOUT_MS,
                        raw.clone(),
                        "timeout in milliseconds",
                    )
                })?;
                Some(Duration::from_millis(millis))
            }
            None => None,
        };

        let connect_timeout = match lookup(ENV_CONNECT_TIMEOUT_SECS)?.filter(|v| !v.is_empty()) {
            Some(raw) => {
                sources.insert(
                    ENV_CONNECT_TIMEOUT_SECS.to_string(),
                    ConfigSource::EnvVar(ENV_CONNECT_TIMEOUT_SECS.to_string()),
                );
                let secs = raw.parse::<u64>().map_err(|_| {
                    ConfigError::invalid_value(
                        ENV_CONNECT_TIMEOUT_SECS,
                        raw.clone(),
                        "timeout in whole seconds",
                    )
                })?;
                Duration::from_secs(secs)
            }
            None => DEFAULT_CONNECT_TIMEOUT,
        };

        let config = Self {
            host,
            port,
            user,
            password,
            dbname,
            sslmode,
            statement_timeout,
            connect_timeout,
            sources,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        PortValidator::default().validate(&self.port)?;

        if self.connect_timeout.is_zero() {
            return Err(ConfigError::invalid_value(
                ENV_CONNECT_TIMEOUT_SECS,
                "0",
                "timeout of at least one second",
            ));
        }

        Ok(())
    }

    /// Get configuration source information for debugging
    pub fn config_sources(&self) -> &HashMap<String, ConfigSource> {
        &self.sources
    }

    /// `host:port/dbname`, safe to log
    pub fn display_target(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.dbname)
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("dbname", &self.dbname)
            .field("sslmode", &self.sslmode)
            .field("statement_timeout", &self.statement_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

fn read_env(key: &str) -> Result<Option<String>, ConfigError> {
    match env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::environment_error(format!(
            "{} is not valid unicode",
            key
        ))),
    }
}
