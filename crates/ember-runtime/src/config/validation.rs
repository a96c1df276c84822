//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{DispatchConfig, EmberConfig, LogOutput, LoggingConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &EmberConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_dispatch_config(&config.dispatch)?;
    Ok(())
}

fn validate_logging_config(config: &LoggingConfig) -> ConfigResult<()> {
    if config.output == LogOutput::File && config.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    if let Some(module) = config.filters.keys().find(|m| m.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "Log filter module name cannot be empty: {module:?}"
        )));
    }

    Ok(())
}

fn validate_dispatch_config(config: &DispatchConfig) -> ConfigResult<()> {
    if config.worker_threads == Some(0) {
        return Err(ConfigError::validation(
            "dispatch.worker_threads must be greater than 0",
        ));
    }

    if config.thread_name.trim().is_empty() {
        return Err(ConfigError::validation(
            "dispatch.thread_name cannot be empty",
        ));
    }

    Ok(())
}
