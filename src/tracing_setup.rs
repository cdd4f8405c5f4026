//! Tracing subscriber setup.
//!
//! Builds a `tracing-subscriber` registry with an [`EnvFilter`] and one
//! formatting layer. `RUST_LOG` takes precedence over the configured level.
//! Events go to stderr so that tables printed on stdout stay clean.
//!
//! # Example
//! ```no_run
//! use camctl::{config::CamctlConfig, tracing_setup};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CamctlConfig::load()?;
//! tracing_setup::init_from_config(&config)?;
//! tracing::info!("camctl started");
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::CamctlConfig;
use crate::error::{CamError, CamResult};

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Multi-line, colored.
    Pretty,
    /// One line per event.
    Compact,
    /// One JSON object per event.
    Json,
}

impl FromStr for OutputFormat {
    type Err = CamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(OutputFormat::Pretty),
            "compact" => Ok(OutputFormat::Compact),
            "json" => Ok(OutputFormat::Json),
            other => Err(CamError::Configuration(format!(
                "invalid log format '{}'; must be one of: pretty, compact, json",
                other
            ))),
        }
    }
}

/// Subscriber options.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Default level when `RUST_LOG` is unset.
    pub level: Level,
    /// Event layout.
    pub format: OutputFormat,
    /// Emit span open/close events.
    pub with_span_events: bool,
    /// Source location of each event.
    pub with_file_and_line: bool,
    /// Thread ids on each event.
    pub with_thread_ids: bool,
    /// Thread names on each event.
    pub with_thread_names: bool,
    /// Colors (pretty format only).
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            with_span_events: false,
            with_file_and_line: false,
            with_thread_ids: true,
            with_thread_names: true,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// Defaults at `level`.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Level and format from the `application` section.
    pub fn from_config(config: &CamctlConfig) -> CamResult<Self> {
        Ok(Self {
            level: parse_log_level(&config.application.log_level)?,
            format: config.application.log_format.parse()?,
            ..Default::default()
        })
    }

    /// Set the event layout.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Toggle span open/close events.
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Toggle colors.
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialize from the loaded configuration.
pub fn init_from_config(config: &CamctlConfig) -> CamResult<()> {
    init(TracingConfig::from_config(config)?)
}

/// Install the global subscriber.
///
/// Idempotent: a second call (tests, embedding applications) is a no-op.
pub fn init(config: TracingConfig) -> CamResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_to_filter_string(config.level)));

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let base = fmt::layer()
        .with_writer(std::io::stderr)
        .with_span_events(span_events)
        .with_file(config.with_file_and_line)
        .with_line_number(config.with_file_and_line)
        .with_thread_ids(config.with_thread_ids)
        .with_thread_names(config.with_thread_names);

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        OutputFormat::Pretty => base.pretty().with_ansi(config.with_ansi).boxed(),
        OutputFormat::Compact => base.compact().with_ansi(false).boxed(),
        OutputFormat::Json => base.json().with_ansi(false).boxed(),
    };

    match tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()
    {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("already been set") => Ok(()),
        Err(e) => Err(CamError::Configuration(format!(
            "failed to initialize tracing: {}",
            e
        ))),
    }
}

/// Parse `trace`, `debug`, `info`, `warn` or `error`.
pub fn parse_log_level(level: &str) -> CamResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(CamError::Configuration(format!(
            "invalid log level '{}'; must be one of: trace, debug, info, warn, error",
            level
        ))),
    }
}

fn level_to_filter_string(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_levels_case_insensitively() {
        assert_eq!(parse_log_level("DEBUG").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("warn").unwrap(), Level::WARN);
        assert!(matches!(
            parse_log_level("loud"),
            Err(CamError::Configuration(_))
        ));
    }

    #[test]
    fn config_drives_format() {
        let mut config = CamctlConfig::default();
        config.application.log_format = "json".into();
        config.application.log_level = "error".into();
        let tracing = TracingConfig::from_config(&config).unwrap();
        assert_eq!(tracing.format, OutputFormat::Json);
        assert_eq!(tracing.level, Level::ERROR);
        assert!(tracing.with_thread_ids);
    }

    #[test]
    fn init_twice_is_harmless() {
        let config = TracingConfig::new(Level::WARN).with_span_events(false);
        assert!(init(config.clone()).is_ok());
        assert!(init(config).is_ok());
    }
}
