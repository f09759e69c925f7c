pub mod token_counter;

use std::time::Duration;

use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;
use crate::stream::converter::StreamSummary;
use crate::stream::writer::WriterStats;

/// Initialize the tracing subscriber with the configured log level and format.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
pub fn init_tracing(log_level: &str, format: LogFormat) {
    let Some(filter) = env_filter_for(log_level) else {
        return;
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    // A second initialization (tests, embedding) is not an error.
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

fn env_filter_for(log_level: &str) -> Option<EnvFilter> {
    let level = log_level.to_uppercase();
    let tracing_level = match level.as_str() {
        "DISABLED" => return None,
        "WARNING" => "WARN",
        "CRITICAL" => "ERROR",
        other => other,
    };
    Some(EnvFilter::try_new(tracing_level).unwrap_or_else(|_| EnvFilter::new("INFO")))
}

/// Log the per-stream summary at DEBUG level.
pub fn log_stream_complete(summary: &StreamSummary, writer: &WriterStats, duration: Duration) {
    debug!(
        model = %summary.model,
        message_id = %summary.message_id,
        blocks = summary.blocks,
        recovered_calls = summary.recovered_calls,
        native_calls = summary.native_calls,
        input_bytes = summary.input_bytes,
        frames = writer.frames,
        bytes_out = writer.bytes,
        retries = writer.retries,
        backoffs = writer.backoffs,
        stop_reason = summary.stop_reason.as_str(),
        input_tokens = summary.usage.input_tokens,
        output_tokens = summary.usage.output_tokens,
        duration_seconds = duration.as_secs_f64(),
        "stream conversion completed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_level_installs_nothing() {
        assert!(env_filter_for("disabled").is_none());
    }

    #[test]
    fn config_levels_map_to_filters() {
        for level in ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"] {
            assert!(env_filter_for(level).is_some(), "{level}");
        }
        assert!(env_filter_for("warning").is_some());
        // Unknown levels fall back instead of failing startup.
        assert!(env_filter_for("=#bogus").is_some());
    }
}
