use thiserror::Error;

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {field}. {hint}")]
    MissingRequired { field: String, hint: String },

    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Environment variable error: {message}")]
    EnvironmentError { message: String },
}

impl ConfigError {
    /// Create a missing required field error
    pub fn missing_required(field: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::MissingRequired {
            field: field.into(),
            hint: hint.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }

    /// Create an environment error
    pub fn environment_error(message: impl Into<String>) -> Self {
        Self::EnvironmentError {
            message: message.into(),
        }
    }
}

/// Trait for validating configuration values
pub trait ConfigValidator<T> {
    /// Validate a configuration value
    fn validate(&self, value: &T) -> Result<(), ConfigError>;
}

/// Port number validator
pub struct PortValidator {
    pub min: u16,
    pub max: u16,
}

impl Default for PortValidator {
    fn default() -> Self {
        Self { min: 1, max: 65535 }
    }
}

impl ConfigValidator<u16> for PortValidator {
    fn validate(&self, value: &u16) -> Result<(), ConfigError> {
        if *value < self.min || *value > self.max {
            return Err(ConfigError::invalid_value(
                "port",
                value.to_string(),
                format!("port between {} and {}", self.min, self.max),
            ));
        }
        Ok(())
    }
}

/// Validates a SQL identifier used for a schema or table name.
///
/// Identifiers are always quoted when interpolated, so this only rejects
/// values PostgreSQL cannot store: empty names, NUL bytes and names over
/// the 63 byte `NAMEDATALEN` limit.
pub struct IdentifierValidator {
    pub field: &'static str,
}

impl ConfigValidator<String> for IdentifierValidator {
    fn validate(&self, value: &String) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::invalid_value(
                self.field,
                value.clone(),
                "non-empty identifier",
            ));
        }

        if value.contains('\0') {
            return Err(ConfigError::invalid_value(
                self.field,
                value.escape_default().to_string(),
                "identifier without NUL bytes",
            ));
        }

        if value.len() > 63 {
            return Err(ConfigError::invalid_value(
                self.field,
                value.clone(),
                "identifier of at most 63 bytes",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_validator() {
        let validator = PortValidator::default();

        assert!(validator.validate(&5432).is_ok());
        assert!(validator.validate(&0).is_err());
    }

    #[test]
    fn test_identifier_validator() {
        let validator = IdentifierValidator { field: "schema" };

        assert!(validator.validate(&"billing".to_string()).is_ok());
        assert!(validator.validate(&"Mixed Case".to_string()).is_ok());
        assert!(validator.validate(&"".to_string()).is_err());
        assert!(validator.validate(&"a\0b".to_string()).is_err());
        assert!(validator.validate(&"x".repeat(64)).is_err());
    }

    #[test]
    fn test_missing_required_message() {
        let err = ConfigError::missing_required("DB_HOST, DB_USER", "Set them in the environment");
        assert_eq!(
            err.to_string(),
            "Missing required configuration: DB_HOST, DB_USER. Set them in the environment"
        );
    }
}
