//! Acquisition parameters.

use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CamError, CamResult};

/// Latency below which the device frame-rate limiter stays disabled.
pub const LATENCY_THRESHOLD: Duration = Duration::from_micros(1);

/// Extra time added to the frame period when waiting for a frame.
pub const FRAME_TIMEOUT_MARGIN: Duration = Duration::from_secs(1);

/// How frames are started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    /// The camera free-runs; one frame per period.
    #[default]
    Internal,
    /// One frame per operator trigger.
    Software,
}

impl FromStr for TriggerMode {
    type Err = CamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "internal" => Ok(TriggerMode::Internal),
            "software" => Ok(TriggerMode::Software),
            other => Err(CamError::Configuration(format!(
                "unknown trigger mode '{}' (expected internal or software)",
                other
            ))),
        }
    }
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerMode::Internal => f.write_str("internal"),
            TriggerMode::Software => f.write_str("software"),
        }
    }
}

/// Number of frame slots to acquire. `0` in configuration means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u64", into = "u64")]
pub enum FrameCount {
    /// Exactly this many slots.
    Bounded(NonZeroU64),
    /// Until cancelled.
    Unbounded,
}

impl FrameCount {
    /// Bounded count; `0` yields [`FrameCount::Unbounded`].
    pub fn new(count: u64) -> Self {
        Self::from(count)
    }

    /// Whether `used` slots exhaust the count.
    pub fn is_exhausted(self, used: u64) -> bool {
        match self {
            FrameCount::Bounded(n) => used >= n.get(),
            FrameCount::Unbounded => false,
        }
    }
}

impl Default for FrameCount {
    fn default() -> Self {
        FrameCount::new(10)
    }
}

impl From<u64> for FrameCount {
    fn from(count: u64) -> Self {
        NonZeroU64::new(count).map_or(FrameCount::Unbounded, FrameCount::Bounded)
    }
}

impl From<FrameCount> for u64 {
    fn from(count: FrameCount) -> Self {
        match count {
            FrameCount::Bounded(n) => n.get(),
            FrameCount::Unbounded => 0,
        }
    }
}

impl fmt::Display for FrameCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameCount::Bounded(n) => write!(f, "{}", n),
            FrameCount::Unbounded => f.write_str("unbounded"),
        }
    }
}

/// What to do when a grab times out or delivers a failed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop the acquisition with an error.
    #[default]
    Abort,
    /// Count the failure and continue.
    Skip,
}

/// How failed frames count against the frame count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FailedFrameAccounting {
    /// A failed frame uses up its slot.
    #[default]
    ConsumesSlot,
    /// The slot is retried up to `max_attempts` failures.
    Retry {
        /// Failures tolerated for one slot.
        max_attempts: u32,
    },
}

/// Region of interest, in unbinned sensor pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    /// Horizontal offset.
    pub x: u32,
    /// Vertical offset.
    pub y: u32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

impl FromStr for Roi {
    type Err = CamError;

    /// Parse `x,y,width,height`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<u32> = s
            .split(',')
            .map(|p| p.trim().parse::<u32>())
            .collect::<Result<_, _>>()
            .map_err(|e| CamError::Configuration(format!("invalid ROI '{}': {}", s, e)))?;
        match parts.as_slice() {
            [x, y, width, height] => Ok(Roi {
                x: *x,
                y: *y,
                width: *width,
                height: *height,
            }),
            _ => Err(CamError::Configuration(format!(
                "invalid ROI '{}': expected x,y,width,height",
                s
            ))),
        }
    }
}

/// Horizontal and vertical binning factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binning {
    /// Horizontal factor.
    pub horizontal: u32,
    /// Vertical factor.
    pub vertical: u32,
}

impl Binning {
    /// No binning.
    pub const NONE: Binning = Binning {
        horizontal: 1,
        vertical: 1,
    };
}

impl Default for Binning {
    fn default() -> Self {
        Self::NONE
    }
}

impl FromStr for Binning {
    type Err = CamError;

    /// Parse `h,v` or a single factor for both axes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |e: std::num::ParseIntError| {
            CamError::Configuration(format!("invalid binning '{}': {}", s, e))
        };
        match s.split_once(',') {
            Some((h, v)) => Ok(Binning {
                horizontal: h.trim().parse().map_err(invalid)?,
                vertical: v.trim().parse().map_err(invalid)?,
            }),
            None => {
                let factor = s.trim().parse().map_err(invalid)?;
                Ok(Binning {
                    horizontal: factor,
                    vertical: factor,
                })
            }
        }
    }
}

fn default_exposure() -> Duration {
    Duration::from_millis(100)
}

fn default_pixel_format() -> String {
    "Mono8".to_string()
}

/// Everything an acquisition session needs to know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Trigger mode (default: internal).
    #[serde(default)]
    pub trigger_mode: TriggerMode,

    /// Frame slots (default: 10; 0 = unbounded).
    #[serde(default)]
    pub frame_count: FrameCount,

    /// Exposure time (default: 100ms).
    #[serde(default = "default_exposure", with = "humantime_serde")]
    pub exposure: Duration,

    /// Idle time added to every frame period (default: 0).
    #[serde(default, with = "humantime_serde")]
    pub latency: Duration,

    /// Region of interest (default: full sensor).
    #[serde(default)]
    pub roi: Option<Roi>,

    /// Binning (default: 1x1).
    #[serde(default)]
    pub binning: Binning,

    /// Pixel format (default: Mono8).
    #[serde(default = "default_pixel_format")]
    pub pixel_format: String,

    /// Grab timeout (default: frame period plus one second).
    #[serde(default, with = "humantime_serde")]
    pub frame_timeout: Option<Duration>,

    /// Failure handling (default: abort).
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Failed frame accounting (default: consumes slot).
    #[serde(default)]
    pub failed_frame_accounting: FailedFrameAccounting,

    /// Stream buffers between device and session. Set from the transport
    /// section's `output_queue_size`, not read from the acquisition section.
    #[serde(skip, default = "default_buffer_count")]
    pub buffer_count: usize,
}

fn default_buffer_count() -> usize {
    crate::hardware::capabilities::DEFAULT_BUFFER_COUNT
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            trigger_mode: TriggerMode::default(),
            frame_count: FrameCount::default(),
            exposure: default_exposure(),
            latency: Duration::ZERO,
            roi: None,
            binning: Binning::NONE,
            pixel_format: default_pixel_format(),
            frame_timeout: None,
            failure_policy: FailurePolicy::default(),
            failed_frame_accounting: FailedFrameAccounting::default(),
            buffer_count: default_buffer_count(),
        }
    }
}

impl AcquisitionConfig {
    /// Exposure plus latency.
    pub fn frame_period(&self) -> Duration {
        self.exposure + self.latency
    }

    /// Timeout for one grab.
    pub fn effective_frame_timeout(&self) -> Duration {
        self.frame_timeout
            .unwrap_or_else(|| self.frame_period() + FRAME_TIMEOUT_MARGIN)
    }

    /// Frame-rate limiter setting: `Some(rate)` when latency is significant.
    pub fn frame_rate_limit(&self) -> Option<f64> {
        if self.latency < LATENCY_THRESHOLD {
            None
        } else {
            Some(1.0 / self.frame_period().as_secs_f64())
        }
    }

    /// Check the values for consistency.
    pub fn validate(&self) -> CamResult<()> {
        if self.exposure.is_zero() {
            return Err(CamError::Configuration("exposure must be positive".into()));
        }
        if self.binning.horizontal == 0 || self.binning.vertical == 0 {
            return Err(CamError::Configuration("binning factors must be at least 1".into()));
        }
        if let Some(roi) = &self.roi {
            if roi.width == 0 || roi.height == 0 {
                return Err(CamError::Configuration("ROI must not be empty".into()));
            }
        }
        if let FailedFrameAccounting::Retry { max_attempts: 0 } = self.failed_frame_accounting {
            return Err(CamError::Configuration(
                "retry accounting needs max_attempts >= 1".into(),
            ));
        }
        if self.buffer_count == 0 {
            return Err(CamError::Configuration("buffer_count must be positive".into()));
        }
        if self.frame_timeout.is_some_and(|t| t.is_zero()) {
            return Err(CamError::Configuration("frame_timeout must be positive".into()));
        }
        Ok(())
    }
}
