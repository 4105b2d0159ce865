//! Structured logging setup for gammapipe
//!
//! Logs go to stderr so that stdout stays reserved for command output
//! (dry-run command lines, run handles, status tables). Batch jobs on the
//! cluster usually want JSON lines; interactive use gets the compact console
//! format.
//!
//! # Example
//!
//! ```no_run
//! use gammapipe::util::logging;
//!
//! logging::init_from_env();
//!
//! tracing::info!(section = 2, "launching light-curve section");
//! ```

use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Configuration for logging initialization
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum level for gammapipe's own targets
    pub level: Level,

    /// Emit JSON lines instead of console output
    pub use_json: bool,

    /// Include the module target (e.g. `gammapipe::provision`)
    pub include_target: bool,

    /// Include file and line number information
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: true,
            include_location: false,
        }
    }
}

impl LoggingConfig {
    /// Default configuration at the given level.
    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Same, with JSON output taken from `GAMMAPIPE_LOG_JSON`.
    pub fn with_level_from_env(level: Level) -> Self {
        Self {
            use_json: json_from_env(),
            ..Self::with_level(level)
        }
    }
}

/// Parses a log level name (case-insensitive).
///
/// Unknown names fall back to INFO with a notice on stderr, since logging is
/// not yet available to report it.
///
/// ```
/// use gammapipe::util::logging::parse_level;
/// use tracing::Level;
///
/// assert_eq!(parse_level("debug"), Level::DEBUG);
/// assert_eq!(parse_level("WARN"), Level::WARN);
/// assert_eq!(parse_level("loud"), Level::INFO);
/// ```
pub fn parse_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        }
    }
}

fn build_filter(level: Level) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("gammapipe={}", level).parse() {
        filter = filter.add_directive(directive);
    }

    // Without RUST_LOG, keep the HTTP stack quiet during installer downloads.
    if env::var("RUST_LOG").is_err() {
        for noisy in ["hyper=warn", "hyper_util=warn", "reqwest=warn", "rustls=warn"] {
            if let Ok(directive) = noisy.parse() {
                filter = filter.add_directive(directive);
            }
        }
    }
    filter
}

/// Initializes the global subscriber. Only the first call has any effect.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = build_filter(config.level);

        if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location),
                )
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location),
                )
                .init();
        }
    });
}

/// Initializes logging from `GAMMAPIPE_LOG_LEVEL` and `GAMMAPIPE_LOG_JSON`.
pub fn init_from_env() {
    let level_str = env::var("GAMMAPIPE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    init_logging(LoggingConfig::with_level_from_env(parse_level(&level_str)));
}

fn json_from_env() -> bool {
    env::var("GAMMAPIPE_LOG_JSON")
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("trace"), Level::TRACE);
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("info"), Level::INFO);
        assert_eq!(parse_level("warn"), Level::WARN);
        assert_eq!(parse_level("error"), Level::ERROR);
    }

    #[test]
    fn test_parse_level_case_insensitive() {
        assert_eq!(parse_level("TRACE"), Level::TRACE);
        assert_eq!(parse_level("Debug"), Level::DEBUG);
    }

    #[test]
    fn test_parse_level_invalid() {
        assert_eq!(parse_level("invalid"), Level::INFO);
        assert_eq!(parse_level(""), Level::INFO);
    }

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert!(!config.use_json);
        assert!(config.include_target);
        assert!(!config.include_location);
    }

    #[test]
    fn test_with_level_keeps_defaults() {
        let config = LoggingConfig::with_level(Level::DEBUG);
        assert_eq!(config.level, Level::DEBUG);
        assert!(!config.use_json);
        assert!(config.include_target);
    }

    #[test]
    fn test_build_filter_mentions_crate() {
        let filter = build_filter(Level::DEBUG);
        assert!(filter.to_string().contains("gammapipe=debug"));
    }
}
