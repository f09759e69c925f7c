use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_stream_config(config)?;
    validate_usage_multiplier(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn require_positive(name: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(validation_err(format!("{name} must be greater than 0")));
    }
    Ok(())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.host.trim().is_empty() {
        return Err(validation_err("server.host cannot be empty"));
    }
    require_positive("server.body_limit_bytes", server.body_limit_bytes as u64)?;
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    Ok(())
}

fn validate_stream_config(config: &AppConfig) -> Result<(), ConfigError> {
    let stream = &config.stream;
    require_positive(
        "stream.aggregation_interval_ms",
        stream.aggregation_interval_ms,
    )?;
    require_positive(
        "stream.backpressure_threshold",
        stream.backpressure_threshold as u64,
    )?;
    require_positive(
        "stream.backpressure_idle_reset_ms",
        stream.backpressure_idle_reset_ms,
    )?;
    require_positive(
        "stream.backpressure_backoff_ms",
        stream.backpressure_backoff_ms,
    )?;
    require_positive(
        "stream.write_retry_backoff_ms",
        stream.write_retry_backoff_ms,
    )?;
    require_positive("stream.channel_capacity", stream.channel_capacity as u64)?;
    require_positive("stream.send_timeout_ms", stream.send_timeout_ms)?;
    require_positive(
        "stream.accumulation_cap_bytes",
        stream.accumulation_cap_bytes as u64,
    )?;
    require_positive("stream.max_input_bytes", stream.max_input_bytes as u64)?;
    if stream.accumulation_cap_bytes > stream.max_input_bytes {
        return Err(validation_err(
            "stream.accumulation_cap_bytes cannot exceed stream.max_input_bytes",
        ));
    }
    Ok(())
}

fn validate_usage_multiplier(config: &AppConfig) -> Result<(), ConfigError> {
    let multiplier = config.features.usage_multiplier;
    if !multiplier.is_finite() || multiplier <= 0.0 {
        return Err(validation_err(
            "features.usage_multiplier must be a finite number greater than 0",
        ));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invalid(config: &AppConfig, needle: &str) {
        match validate_config(config) {
            Err(ConfigError::Validation(msg)) => {
                assert!(msg.contains(needle), "{msg:?} should mention {needle:?}");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_interval() {
        let mut config = AppConfig::default();
        config.stream.aggregation_interval_ms = 0;
        assert_invalid(&config, "aggregation_interval_ms");
    }

    #[test]
    fn test_zero_threshold() {
        let mut config = AppConfig::default();
        config.stream.backpressure_threshold = 0;
        assert_invalid(&config, "backpressure_threshold");
    }

    #[test]
    fn test_zero_retry_max_is_allowed() {
        let mut config = AppConfig::default();
        config.stream.write_retry_max = 0;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_accumulation_cap_above_input_limit() {
        let mut config = AppConfig::default();
        config.stream.accumulation_cap_bytes = config.stream.max_input_bytes + 1;
        assert_invalid(&config, "accumulation_cap_bytes");
    }

    #[test]
    fn test_invalid_usage_multiplier() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let mut config = AppConfig::default();
            config.features.usage_multiplier = bad;
            assert_invalid(&config, "usage_multiplier");
        }
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = AppConfig::default();
        config.features.log_level = "VERBOSE".to_string();
        assert_invalid(&config, "log_level");
    }

    #[test]
    fn test_log_level_is_case_insensitive() {
        let mut config = AppConfig::default();
        config.features.log_level = "warning".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_runtime_worker_threads() {
        let mut config = AppConfig::default();
        config.server.runtime_worker_threads = Some(0);
        assert_invalid(&config, "runtime_worker_threads");
    }
}
