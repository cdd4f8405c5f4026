//! Application configuration.
//!
//! Loaded with figment from a TOML file (`config/camctl.toml` by default)
//! and then from environment variables prefixed `CAMCTL_`, with `__`
//! separating nested keys:
//!
//! ```bash
//! CAMCTL_APPLICATION__LOG_LEVEL=debug
//! CAMCTL_ACQUISITION__FRAME_COUNT=5
//! CAMCTL_TRANSPORT__PACKET_SIZE=9000
//! ```
//!
//! Every field has a default, so a missing file yields a usable configuration.

use std::path::Path;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::acquisition::AcquisitionConfig;
use crate::error::{CamError, CamResult};
use crate::hardware::MockCameraConfig;
use crate::parameter::{ParameterTree, ParameterValue};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/camctl.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "CAMCTL_";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["pretty", "compact", "json"];

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CamctlConfig {
    /// Logging.
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Defaults for `camera ... acquire`.
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Stream transport tuning applied when a device is opened.
    #[serde(default)]
    pub transport: TransportSettings,
    /// Emulated cameras.
    #[serde(default)]
    pub emulation: EmulationConfig,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// trace, debug, info, warn or error (default: info).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// pretty, compact or json (default: compact).
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Network transport tuning, applied to a device right after it is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Stream packet size in bytes (default: 1500).
    #[serde(default = "default_packet_size")]
    pub packet_size: i64,
    /// Delay between stream packets, in device ticks (default: 0).
    #[serde(default)]
    pub inter_packet_delay: i64,
    /// Delay before each frame transmission, in device ticks (default: 0).
    #[serde(default)]
    pub frame_transmission_delay: i64,
    /// Frames buffered between device and session (default: 5).
    #[serde(default = "default_output_queue_size")]
    pub output_queue_size: usize,
}

fn default_packet_size() -> i64 {
    1500
}

fn default_output_queue_size() -> usize {
    5
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            packet_size: default_packet_size(),
            inter_packet_delay: 0,
            frame_transmission_delay: 0,
            output_queue_size: default_output_queue_size(),
        }
    }
}

impl TransportSettings {
    /// Write the settings to every matching feature the device exposes.
    ///
    /// Devices without a given feature (USB cameras have no packet size)
    /// are left alone. Returns the number of features written.
    pub async fn apply(&self, tree: &ParameterTree) -> CamResult<usize> {
        let settings = [
            ("GevSCPSPacketSize", self.packet_size),
            ("GevSCPD", self.inter_packet_delay),
            ("GevSCFTD", self.frame_transmission_delay),
        ];
        let mut written = 0;
        for (feature, value) in settings {
            match tree.set(feature, ParameterValue::Int(value)).await {
                Ok(()) => written += 1,
                Err(CamError::NotFound(_)) => {
                    debug!(feature, device = %tree.device().name(), "transport feature absent")
                }
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }
}

/// Emulated transport settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmulationConfig {
    /// Register the emulated transport (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Number of emulated cameras (default: 1).
    #[serde(default = "default_camera_count")]
    pub camera_count: usize,
    /// Sensor settings shared by every emulated camera.
    #[serde(flatten)]
    pub camera: MockCameraConfig,
}

fn default_true() -> bool {
    true
}

fn default_camera_count() -> usize {
    1
}

impl Default for EmulationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            camera_count: default_camera_count(),
            camera: MockCameraConfig::default(),
        }
    }
}

impl CamctlConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> CamResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from `path` and the environment, then validate.
    ///
    /// A missing file is not an error; the defaults and environment apply.
    pub fn load_from(path: impl AsRef<Path>) -> CamResult<Self> {
        let config: CamctlConfig = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Acquisition defaults with the transport queue size applied.
    pub fn acquisition_config(&self) -> AcquisitionConfig {
        AcquisitionConfig {
            buffer_count: self.transport.output_queue_size,
            ..self.acquisition.clone()
        }
    }

    /// Check semantic constraints serde cannot express.
    pub fn validate(&self) -> CamResult<()> {
        let level = self.application.log_level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(CamError::Configuration(format!(
                "invalid log level '{}'; must be one of: {}",
                self.application.log_level,
                LOG_LEVELS.join(", ")
            )));
        }
        let format = self.application.log_format.to_lowercase();
        if !LOG_FORMATS.contains(&format.as_str()) {
            return Err(CamError::Configuration(format!(
                "invalid log format '{}'; must be one of: {}",
                self.application.log_format,
                LOG_FORMATS.join(", ")
            )));
        }

        if self.transport.packet_size <= 0 {
            return Err(CamError::Configuration("packet_size must be positive".into()));
        }
        if self.transport.inter_packet_delay < 0 || self.transport.frame_transmission_delay < 0 {
            return Err(CamError::Configuration("transport delays must not be negative".into()));
        }
        if self.transport.output_queue_size == 0 {
            return Err(CamError::Configuration("output_queue_size must be positive".into()));
        }

        if self.emulation.camera.width == 0 || self.emulation.camera.height == 0 {
            return Err(CamError::Configuration(
                "emulated sensor size must not be zero".into(),
            ));
        }

        self.acquisition_config().validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use std::time::Duration;

    use crate::acquisition::{FrameCount, TriggerMode};

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn missing_file_yields_defaults() {
        let config = CamctlConfig::load_from("/nonexistent/camctl.toml").unwrap();
        assert_eq!(config, CamctlConfig::default());
        assert_eq!(config.transport.packet_size, 1500);
        assert_eq!(config.acquisition_config().buffer_count, 5);
    }

    #[test]
    #[serial]
    fn reads_all_sections() {
        let file = write_config(
            r#"
            [application]
            log_level = "debug"
            log_format = "json"

            [acquisition]
            trigger_mode = "software"
            frame_count = 3
            exposure = "250ms"
            latency = "10ms"

            [transport]
            packet_size = 9000
            output_queue_size = 8

            [emulation]
            camera_count = 2
            width = 640
            height = 480
            "#,
        );
        let config = CamctlConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.log_format, "json");
        assert_eq!(config.acquisition.trigger_mode, TriggerMode::Software);
        assert_eq!(config.acquisition.frame_count, FrameCount::new(3));
        assert_eq!(config.acquisition.exposure, Duration::from_millis(250));
        assert_eq!(config.transport.packet_size, 9000);
        assert_eq!(config.acquisition_config().buffer_count, 8);
        assert_eq!(config.emulation.camera_count, 2);
        assert_eq!(config.emulation.camera.width, 640);
        assert!(config.emulation.camera.confirm_writes);
    }

    #[test]
    #[serial]
    fn environment_overrides_file() {
        let file = write_config("[acquisition]\nframe_count = 3\n");
        std::env::set_var("CAMCTL_ACQUISITION__FRAME_COUNT", "7");
        std::env::set_var("CAMCTL_APPLICATION__LOG_LEVEL", "warn");
        let result = CamctlConfig::load_from(file.path());
        std::env::remove_var("CAMCTL_ACQUISITION__FRAME_COUNT");
        std::env::remove_var("CAMCTL_APPLICATION__LOG_LEVEL");

        let config = result.unwrap();
        assert_eq!(config.acquisition.frame_count, FrameCount::new(7));
        assert_eq!(config.application.log_level, "warn");
    }

    #[test]
    #[serial]
    fn invalid_values_are_configuration_errors() {
        let file = write_config("[application]\nlog_level = \"verbose\"\n");
        let err = CamctlConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, CamError::Configuration(_)));

        let file = write_config("[transport]\noutput_queue_size = 0\n");
        let err = CamctlConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, CamError::Configuration(_)));
    }

    #[test]
    #[serial]
    fn malformed_file_is_config_error() {
        let file = write_config("[acquisition]\nexposure = \"soon\"\n");
        let err = CamctlConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, CamError::Config(_)));
    }
}
