//! Emulated transport and cameras.
//!
//! The emulation transport exposes a configurable number of cameras that
//! implement the full driver contract: a GenICam-like feature map, free-run
//! and software-triggered streaming, and fault injection for tests. It lets
//! the whole stack run without hardware.

mod camera;
mod faults;
mod nodemap;
pub mod pattern;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use camera::{MockCamera, MockFrameStream, EMULATION_DEVICE_CLASS};
pub use faults::{FaultInjector, Operation};

use crate::error::{DriverError, DriverErrorKind, DriverResult};
use crate::hardware::capabilities::{CameraDevice, TransportLayer};
use crate::hardware::descriptor::{DeviceDescriptor, TransportDescriptor};

/// Sensor configuration of an emulated camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockCameraConfig {
    /// Sensor width in pixels (default: 1024)
    #[serde(default = "default_width")]
    pub width: u32,

    /// Sensor height in pixels (default: 1040)
    #[serde(default = "default_height")]
    pub height: u32,

    /// Whether writes are confirmed by the device (default: true)
    #[serde(default = "default_confirm_writes")]
    pub confirm_writes: bool,
}

fn default_width() -> u32 {
    1024
}
fn default_height() -> u32 {
    1040
}
fn default_confirm_writes() -> bool {
    true
}

impl Default for MockCameraConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            confirm_writes: default_confirm_writes(),
        }
    }
}

/// Transport serving emulated cameras.
///
/// Opening the same descriptor twice returns the same camera instance, so a
/// test can hold on to a camera for fault injection while the registry opens it.
pub struct MockTransport {
    cameras: Vec<Arc<MockCamera>>,
}

impl MockTransport {
    /// Transport with `count` default cameras.
    pub fn new(count: usize) -> Self {
        Self::with_config(count, MockCameraConfig::default())
    }

    /// Transport with `count` cameras sharing one sensor configuration.
    pub fn with_config(count: usize, config: MockCameraConfig) -> Self {
        let cameras = (0..count)
            .map(|index| Arc::new(MockCamera::with_config(index, config.clone())))
            .collect();
        Self { cameras }
    }

    /// Camera number `index`.
    pub fn camera(&self, index: usize) -> Option<Arc<MockCamera>> {
        self.cameras.get(index).cloned()
    }
}

#[async_trait]
impl TransportLayer for MockTransport {
    fn descriptor(&self) -> TransportDescriptor {
        TransportDescriptor {
            device_class: EMULATION_DEVICE_CLASS.to_string(),
            friendly_name: "Camera Emulation".to_string(),
            full_name: "Emulation/camctl camera emulation".to_string(),
            vendor_name: "camctl".to_string(),
        }
    }

    async fn enumerate_devices(&self) -> DriverResult<Vec<DeviceDescriptor>> {
        Ok(self
            .cameras
            .iter()
            .map(|camera| camera.descriptor().clone())
            .collect())
    }

    async fn open(&self, descriptor: &DeviceDescriptor) -> DriverResult<Arc<dyn CameraDevice>> {
        let camera = self
            .cameras
            .iter()
            .find(|camera| camera.descriptor().full_name == descriptor.full_name)
            .ok_or_else(|| {
                DriverError::new(
                    "emulation",
                    DriverErrorKind::NotFound,
                    format!("no emulated camera '{}'", descriptor.full_name),
                )
            })?;
        debug!(device = %descriptor.full_name, "emulated camera opened");
        let camera: Arc<dyn CameraDevice> = camera.clone();
        Ok(camera)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enumerates_configured_cameras() {
        let transport = MockTransport::new(3);
        let devices = transport.enumerate_devices().await.unwrap();
        assert_eq!(devices.len(), 3);
        assert!(devices.iter().all(|d| d.device_class == EMULATION_DEVICE_CLASS));
        assert_ne!(devices[0].serial_number, devices[1].serial_number);
    }

    #[tokio::test]
    async fn open_unknown_device_is_not_found() {
        let transport = MockTransport::new(1);
        let mut descriptor = transport.enumerate_devices().await.unwrap().remove(0);
        descriptor.full_name = "gone".into();
        let err = match transport.open(&descriptor).await {
            Err(e) => e,
            Ok(_) => panic!("open should fail"),
        };
        assert_eq!(err.kind, DriverErrorKind::NotFound);
    }
}
