use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Dispatcher URL is an http(s) URL
/// - Queue admits at least one active report
/// - Timeout, sweep interval and event buffer are non-zero
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let url = config.dispatcher.url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::ValidationError(format!(
            "dispatcher.url must be an http(s) URL, got '{}'",
            config.dispatcher.url
        )));
    }

    if config.queue.max_active == 0 {
        return Err(ConfigError::ValidationError(
            "queue.max_active must be greater than 0".to_string(),
        ));
    }

    if config.queue.timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "queue.timeout_secs cannot be 0".to_string(),
        ));
    }

    if config.queue.sweep_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "queue.sweep_interval_secs cannot be 0".to_string(),
        ));
    }

    if config.events.buffer_size == 0 {
        return Err(ConfigError::ValidationError(
            "events.buffer_size cannot be 0".to_string(),
        ));
    }

    Ok(())
}
