//! Driver contract
//!
//! These traits are the seam between the camera-control core and a vendor
//! transport. A transport enumerates and opens devices; an open device
//! exposes its feature map and can start a frame stream.
//!
//! - A transport implements: `TransportLayer`
//! - An open camera implements: `CameraDevice`
//! - A running acquisition implements: `FrameStream`
//!
//! # Design
//!
//! Each trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (`Send + Sync`, `FrameStream` only `Send`)
//! - Reports failures as [`DriverError`] so callers can map them to
//!   [`crate::error::CamError`] with context
//!
//! # Example
//!
//! ```rust,ignore
//! let transport: Arc<dyn TransportLayer> = Arc::new(MockTransport::new(1));
//! let devices = transport.enumerate_devices().await?;
//! let camera = transport.open(&devices[0]).await?;
//!
//! camera.write_feature("ExposureTime", &ParameterValue::Float(1000.0)).await?;
//! let mut stream = camera.start_stream(StreamConfig::default()).await?;
//! match stream.grab_frame(Duration::from_secs(1)).await? {
//!     GrabOutcome::Frame(frame) => println!("{:?}", frame.shape()),
//!     GrabOutcome::Timeout => println!("no frame"),
//!     GrabOutcome::Failed(reason) => println!("failed buffer: {}", reason),
//! }
//! stream.stop().await?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::descriptor::{DeviceDescriptor, InfoValue, TransportDescriptor};
use super::features::FeatureDescriptor;
use super::frame::Frame;
use crate::error::DriverResult;
use crate::parameter::ParameterValue;

/// Default number of frame buffers queued by a stream.
pub const DEFAULT_BUFFER_COUNT: usize = 16;

/// Outcome of a feature write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAck {
    /// The device confirmed the new value.
    Confirmed,
    /// The write was sent; the device offers no confirmation.
    Sent,
}

/// Result of one grab attempt.
#[derive(Debug, Clone)]
pub enum GrabOutcome {
    /// A complete frame.
    Frame(Frame),
    /// No frame arrived within the timeout.
    Timeout,
    /// The device delivered a failed (incomplete or corrupt) buffer.
    Failed(String),
}

/// Stream parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Number of frame buffers between producer and consumer.
    pub buffer_count: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_count: DEFAULT_BUFFER_COUNT,
        }
    }
}

/// Capability: Transport Enumeration
///
/// One transport per device class. Enumeration reflects the devices reachable
/// at call time.
#[async_trait]
pub trait TransportLayer: Send + Sync {
    /// Describe the transport.
    fn descriptor(&self) -> TransportDescriptor;

    /// List reachable devices.
    async fn enumerate_devices(&self) -> DriverResult<Vec<DeviceDescriptor>>;

    /// Open a device previously returned by [`TransportLayer::enumerate_devices`].
    ///
    /// Fails with `DriverErrorKind::NotFound` if the device is gone.
    async fn open(&self, descriptor: &DeviceDescriptor) -> DriverResult<Arc<dyn CameraDevice>>;
}

/// Capability: Camera Control
///
/// # Contract
/// - Feature paths may be canonical tree paths (`AOI/Height`) or bare names;
///   devices resolve them by the last path segment
/// - `write_feature` must leave the device value unchanged when it fails
/// - `start_stream` returns a stream that is already producing
#[async_trait]
pub trait CameraDevice: Send + Sync {
    /// Descriptor the device was opened with.
    fn descriptor(&self) -> &DeviceDescriptor;

    /// Device information block (vendor, model, firmware, ...).
    async fn device_info(&self) -> DriverResult<BTreeMap<String, InfoValue>>;

    /// Full feature map, rooted at a category.
    async fn query_features(&self) -> DriverResult<FeatureDescriptor>;

    /// Current value of a feature.
    async fn read_feature(&self, path: &str) -> DriverResult<ParameterValue>;

    /// Write a feature value.
    async fn write_feature(&self, path: &str, value: &ParameterValue) -> DriverResult<WriteAck>;

    /// Execute a command feature.
    async fn invoke_feature(&self, path: &str) -> DriverResult<()>;

    /// Start producing frames.
    async fn start_stream(&self, config: StreamConfig) -> DriverResult<Box<dyn FrameStream>>;
}

/// Capability: Frame Delivery
///
/// Frames arrive in production order. Dropping the stream stops the producer.
#[async_trait]
pub trait FrameStream: Send {
    /// Wait up to `timeout` for the next buffer.
    async fn grab_frame(&mut self, timeout: Duration) -> DriverResult<GrabOutcome>;

    /// Stop the producer. Idempotent.
    async fn stop(&mut self) -> DriverResult<()>;
}
