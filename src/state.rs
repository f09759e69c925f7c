use std::time::Duration;

use crate::config::{AppConfig, ConverterSettings};
use crate::stream::WriterSettings;

/// Shared application state accessible to all handlers.
///
/// Everything here is read-only after startup.
pub struct AppState {
    pub config: AppConfig,
    pub converter: ConverterSettings,
    pub writer: WriterSettings,
    pub send_timeout: Duration,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig) -> Self {
        let converter = ConverterSettings::from_config(&config);
        let writer = WriterSettings::from_config(&config.stream);
        let send_timeout = Duration::from_millis(config.stream.send_timeout_ms);
        Self {
            config,
            converter,
            writer,
            send_timeout,
        }
    }
}
