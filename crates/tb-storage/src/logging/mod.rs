//! Structured logging side-channel for the storage engine.
//!
//! Every failure path in the engine reports through [`internal_log!`] instead
//! of returning an error to its caller. Each event carries:
//! - a severity (debug/info/warn/error)
//! - the audience it is meant for ([`Target`]: user, maintainer, telemetry)
//! - a stable event name from [`event_names`]
//! - path/error fields where applicable
//!
//! Hosts decide where events go by installing a subscriber, either their own
//! or the one built by [`init_logging`] (human console or JSONL on stderr).

/// Emit a storage log event.
///
/// ```ignore
/// internal_log!(WARN, MAINTAINER, event_names::FILE_DELETE_FAILED,
///     path = %file.display(), "Unable to delete file");
/// ```
#[macro_export]
macro_rules! internal_log {
    (DEBUG, $targets:expr, $event:expr, $($arg:tt)+) => {
        tracing::debug!(
            target: "tb_storage",
            event = $event,
            targets = %$crate::logging::TargetList($targets),
            $($arg)+
        )
    };
    (INFO, $targets:expr, $event:expr, $($arg:tt)+) => {
        tracing::info!(
            target: "tb_storage",
            event = $event,
            targets = %$crate::logging::TargetList($targets),
            $($arg)+
        )
    };
    (WARN, $targets:expr, $event:expr, $($arg:tt)+) => {
        tracing::warn!(
            target: "tb_storage",
            event = $event,
            targets = %$crate::logging::TargetList($targets),
            $($arg)+
        )
    };
    (ERROR, $targets:expr, $event:expr, $($arg:tt)+) => {
        tracing::error!(
            target: "tb_storage",
            event = $event,
            targets = %$crate::logging::TargetList($targets),
            $($arg)+
        )
    };
}

pub mod config;
pub mod events;
pub mod layer;

pub use config::{LogConfig, LogFormat, LogLevel};
pub use events::{
    event_names, Target, TargetList, MAINTAINER, MAINTAINER_TELEMETRY, USER,
};
pub use layer::JsonlLayer;

use std::io::IsTerminal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global logging subscriber.
///
/// Respects TB_LOG / RUST_LOG through `EnvFilter`. Returns false when a
/// global subscriber was already installed (the host's one is kept).
pub fn init_logging(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tb_storage={},tb={}", config.level, config.level)));

    match config.format {
        LogFormat::Human => {
            let use_ansi = std::io::stderr().is_terminal();
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(use_ansi);

            if config.timestamps {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer)
                    .try_init()
                    .is_ok()
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer.without_time())
                    .try_init()
                    .is_ok()
            }
        }
        LogFormat::Jsonl => tracing_subscriber::registry()
            .with(filter)
            .with(JsonlLayer::stderr())
            .try_init()
            .is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_keeps_first_subscriber() {
        let config = LogConfig::default().with_level(LogLevel::Off);
        let _ = init_logging(&config);
        assert!(!init_logging(&config));
    }
}
