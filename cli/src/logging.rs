//! Subscriber setup for the engine's tracing events.

use std::fs::{self, OpenOptions};
use std::io;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::settings::LoggingSettings;

/// Map the configured level onto a filter directive.
///
/// Accepts the usual tracing names plus `warning` and `critical`.
pub fn level_directive(level: &str) -> Result<&'static str, String> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" | "critical" => Ok("error"),
        "off" => Ok("off"),
        other => Err(format!("unknown log level '{}'", other)),
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
///
/// Events go to stderr, or are appended to `logging.file` when set.
/// Rotation is left to the host.
pub fn init(settings: &LoggingSettings, verbose: bool) -> io::Result<()> {
    let directive = if verbose {
        "debug"
    } else {
        level_directive(&settings.level).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    let installed = match &settings.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).try_init()
        }
        None => builder.with_writer(io::stderr).try_init(),
    };
    installed.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_directive() {
        assert_eq!(level_directive("INFO"), Ok("info"));
        assert_eq!(level_directive("warning"), Ok("warn"));
        assert_eq!(level_directive("CRITICAL"), Ok("error"));
        assert!(level_directive("loud").is_err());
    }
}
