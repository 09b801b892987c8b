//! Settings validation errors and semantic validation.

use thiserror::Error;

use crate::settings::Settings;

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Settings validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Semantic validation failed: {0}")]
    SemanticError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::IoError(_) => 60,
            ValidationError::ParseError(_) => 61,
            ValidationError::SemanticError(_) => 63,
            ValidationError::InvalidValue { .. } => 65,
            ValidationError::VersionMismatch { .. } => 66,
        }
    }
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "warning", "error", "off"];

/// Validate settings semantically.
pub fn validate_settings(settings: &Settings) -> ValidationResult<()> {
    if settings.schema_version != crate::CONFIG_SCHEMA_VERSION {
        return Err(ValidationError::VersionMismatch {
            expected: crate::CONFIG_SCHEMA_VERSION.to_string(),
            actual: settings.schema_version.clone(),
        });
    }

    let global = &settings.global;
    if !LOG_LEVELS.contains(&global.log_level.to_lowercase().as_str()) {
        return Err(ValidationError::InvalidValue {
            field: "global.log_level".to_string(),
            message: format!("Unknown level {:?}", global.log_level),
        });
    }
    if global.output_dir.as_os_str().is_empty() {
        return Err(ValidationError::InvalidValue {
            field: "global.output_dir".to_string(),
            message: "Must not be empty".to_string(),
        });
    }
    if global.log_dir.as_os_str().is_empty() {
        return Err(ValidationError::InvalidValue {
            field: "global.log_dir".to_string(),
            message: "Must not be empty".to_string(),
        });
    }
    if global.worker_timeout_ms == 0 {
        return Err(ValidationError::InvalidValue {
            field: "global.worker_timeout_ms".to_string(),
            message: "Must be > 0".to_string(),
        });
    }
    if global.max_output_bytes == 0 {
        return Err(ValidationError::InvalidValue {
            field: "global.max_output_bytes".to_string(),
            message: "Must be > 0".to_string(),
        });
    }
    if let Some(mirror) = &global.mirror_csv {
        if mirror.as_os_str().is_empty() || mirror.file_name().is_none() {
            return Err(ValidationError::InvalidValue {
                field: "global.mirror_csv".to_string(),
                message: "Must name a file".to_string(),
            });
        }
    }

    for (name, worker) in &settings.workers {
        validate_worker_name(name)?;

        if let Some(cmd) = &worker.command {
            if cmd.as_os_str().is_empty() {
                return Err(ValidationError::InvalidValue {
                    field: format!("workers.{}.command", name),
                    message: "Must not be empty".to_string(),
                });
            }
        }
        if worker.timeout_ms == Some(0) {
            return Err(ValidationError::InvalidValue {
                field: format!("workers.{}.timeout_ms", name),
                message: "Must be > 0".to_string(),
            });
        }
    }

    Ok(())
}

/// Worker names become the `source` column: lowercase `[a-z0-9_-]`, non-empty.
///
/// A leading `_` is allowed; such workers are authoring templates and are
/// never discovered.
pub fn validate_worker_name(name: &str) -> ValidationResult<()> {
    if name.is_empty() {
        return Err(ValidationError::SemanticError(
            "Worker names must not be empty".to_string(),
        ));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if !valid {
        return Err(ValidationError::InvalidValue {
            field: format!("workers.{}", name),
            message: "Worker names must be lowercase [a-z0-9_-]".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        validate_settings(&Settings::default()).unwrap();
    }

    #[test]
    fn test_version_mismatch() {
        let settings = Settings {
            schema_version: "0.9.0".to_string(),
            ..Settings::default()
        };
        let err = validate_settings(&settings).unwrap_err();
        assert!(matches!(err, ValidationError::VersionMismatch { .. }));
        assert_eq!(err.code(), 66);
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let mut settings = Settings::default();
        settings.global.worker_timeout_ms = 0;
        let err = validate_settings(&settings).unwrap_err();
        assert!(
            matches!(err, ValidationError::InvalidValue { ref field, .. } if field == "global.worker_timeout_ms")
        );
    }

    #[test]
    fn test_rejects_unknown_log_level() {
        let mut settings = Settings::default();
        settings.global.log_level = "loud".to_string();
        assert!(validate_settings(&settings).is_err());
        settings.global.log_level = "WARN".to_string();
        assert!(validate_settings(&settings).is_ok());
    }

    #[test]
    fn test_worker_names() {
        assert!(validate_worker_name("smax").is_ok());
        assert!(validate_worker_name("cuic-2").is_ok());
        assert!(validate_worker_name("_example").is_ok());
        assert!(validate_worker_name("SMAX").is_err());
        assert!(validate_worker_name("has space").is_err());
        assert!(matches!(
            validate_worker_name(""),
            Err(ValidationError::SemanticError(_))
        ));
    }

    #[test]
    fn test_rejects_empty_command() {
        let settings = Settings::from_json(r#"{"workers": {"x": {"command": ""}}}"#).unwrap();
        let err = validate_settings(&settings).unwrap_err();
        assert!(
            matches!(err, ValidationError::InvalidValue { ref field, .. } if field == "workers.x.command")
        );
    }
}
