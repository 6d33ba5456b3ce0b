use crate::config::types::{Config, EngineConfig, RateLimitConfig, StorageConfig};
use crate::ConfigError;

/// Upper bound for the direct-call interval (one week)
const MAX_INTERVAL_MINUTES: u32 = 7 * 24 * 60;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_engine_config(&config.engine)?;
    validate_rate_limit_config(&config.rate_limit)?;
    validate_storage_config(&config.storage)?;
    Ok(())
}

/// Validates engine configuration
fn validate_engine_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.interpreter.trim().is_empty() {
        return Err(ConfigError::Validation(
            "interpreter cannot be empty".to_string(),
        ));
    }

    for (name, value) in [
        ("files-dir", &config.files_dir),
        ("logs-dir", &config.logs_dir),
        ("scripts-dir", &config.scripts_dir),
    ] {
        validate_directory(name, value)?;
    }

    if config.stop_grace_seconds < 1 || config.stop_grace_seconds > 300 {
        return Err(ConfigError::Validation(format!(
            "stop-grace-seconds must be between 1 and 300, got {}",
            config.stop_grace_seconds
        )));
    }

    if config.direct_call_timeout_seconds < 1 {
        return Err(ConfigError::Validation(format!(
            "direct-call-timeout-seconds must be >= 1, got {}",
            config.direct_call_timeout_seconds
        )));
    }

    if let Some(worker) = &config.worker_program {
        if worker.trim().is_empty() {
            return Err(ConfigError::Validation(
                "worker-program cannot be empty when set".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validates rate limit configuration
fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<(), ConfigError> {
    if config.interval_minutes > MAX_INTERVAL_MINUTES {
        return Err(ConfigError::Validation(format!(
            "interval-minutes must be <= {}, got {}",
            MAX_INTERVAL_MINUTES, config.interval_minutes
        )));
    }
    Ok(())
}

/// Validates storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Directories are joined with spider and execution ids, so they must be plain paths
fn validate_directory(name: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Validation(format!("{} cannot be empty", name)));
    }

    if value.contains('\0') {
        return Err(ConfigError::Validation(format!(
            "{} contains a NUL byte",
            name
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_engine_config() {
        let mut engine = EngineConfig::default();
        engine.interpreter = "  ".to_string();
        assert!(validate_engine_config(&engine).is_err());

        let mut engine = EngineConfig::default();
        engine.stop_grace_seconds = 0;
        assert!(validate_engine_config(&engine).is_err());

        let mut engine = EngineConfig::default();
        engine.direct_call_timeout_seconds = 0;
        assert!(validate_engine_config(&engine).is_err());

        let mut engine = EngineConfig::default();
        engine.worker_program = Some(String::new());
        assert!(validate_engine_config(&engine).is_err());
    }

    #[test]
    fn test_validate_directory() {
        assert!(validate_directory("files-dir", "spider_files").is_ok());
        assert!(validate_directory("files-dir", "").is_err());
        assert!(validate_directory("files-dir", "bad\0dir").is_err());
    }

    #[test]
    fn test_validate_rate_limit() {
        assert!(validate_rate_limit_config(&RateLimitConfig { interval_minutes: 0 }).is_ok());
        assert!(validate_rate_limit_config(&RateLimitConfig {
            interval_minutes: MAX_INTERVAL_MINUTES + 1
        })
        .is_err());
    }
}
