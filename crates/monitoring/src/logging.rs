use std::path::Path;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use hlkit_core::config::LoggingSettings;
use hlkit_core::prelude::*;

/// `RUST_LOG` wins over the configured level.
pub fn build_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| HlError::InvalidData(format!("Invalid log level {}: {}", level, e))),
    }
}

/// Installs the global subscriber. The returned guard flushes the file writer on drop and
/// must be held for the life of the process.
pub fn setup_logging(settings: &LoggingSettings) -> Result<Option<WorkerGuard>> {
    let env_filter = build_filter(&settings.level)?;

    let mut layers = Vec::new();

    let console_layer = fmt::layer().with_target(true).with_line_number(true);
    if settings.json {
        layers.push(console_layer.json().boxed());
    } else {
        layers.push(console_layer.boxed());
    }

    let mut guard = None;
    if let Some(log_file) = &settings.file {
        let log_path = Path::new(log_file);
        let directory = match log_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(directory)?;

        let file_name = log_path
            .file_name()
            .ok_or_else(|| HlError::InvalidData(format!("Log file has no name: {}", log_file)))?;

        let (writer, file_guard) = non_blocking(rolling::daily(directory, file_name));
        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true);

        if settings.json {
            layers.push(file_layer.json().boxed());
        } else {
            layers.push(file_layer.boxed());
        }
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
        .map_err(|e| HlError::Internal(format!("Failed to install log subscriber: {}", e)))?;

    info!("Logging initialized with level: {}", settings.level);
    Ok(guard)
}

/// Component-tagged events for the connection and symbol subsystems.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    component: String,
}

impl StructuredLogger {
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn log_connection_state(&self, state: &str, url: &str) {
        info!(
            component = %self.component,
            event = "connection_state",
            state = %state,
            url = %url,
            "Connection state changed"
        );
    }

    pub fn log_reconnect_attempt(&self, attempt: u32, max_attempts: u32) {
        warn!(
            component = %self.component,
            event = "reconnect",
            attempt = attempt,
            max_attempts = max_attempts,
            "Reconnect attempt"
        );
    }

    pub fn log_reconnect_exhausted(&self, attempts: u32) {
        error!(
            component = %self.component,
            event = "max_reconnect_attempts_reached",
            attempts = attempts,
            "Reconnect budget exhausted; call connect() to resume"
        );
    }

    pub fn log_subscription_change(&self, key: &str, subscribed: bool, active: usize) {
        info!(
            component = %self.component,
            event = if subscribed { "subscribed" } else { "unsubscribed" },
            key = %key,
            active = active,
            "Subscription changed"
        );
    }

    pub fn log_metadata_refresh(&self, success: bool, assets: usize, consecutive_failures: u32) {
        if success {
            info!(
                component = %self.component,
                event = "metadata_refresh",
                assets = assets,
                "Symbol metadata refreshed"
            );
        } else {
            warn!(
                component = %self.component,
                event = "metadata_refresh_failed",
                consecutive_failures = consecutive_failures,
                "Symbol metadata refresh failed"
            );
        }
    }

    pub fn log_error(&self, error: &str, context: Option<&str>) {
        error!(
            component = %self.component,
            event = "error",
            error = %error,
            context = ?context,
            "Error occurred"
        );
    }

    pub fn log_system_event(&self, event: &str, details: &serde_json::Value) {
        info!(
            component = %self.component,
            event = %event,
            details = %details,
            "System event"
        );
    }
}
