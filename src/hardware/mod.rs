//! Hardware contract and drivers.
//!
//! - [`capabilities`]: async driver traits (`TransportLayer`, `CameraDevice`, `FrameStream`)
//! - [`descriptor`]: transport and device descriptors
//! - [`features`]: feature metadata a device reports
//! - [`frame`]: image frames
//! - [`handle`]: open devices and the exclusive streaming grant
//! - [`registry`]: transport registry and device selection
//! - [`mock`]: emulated transport and cameras

pub mod capabilities;
pub mod descriptor;
pub mod features;
pub mod frame;
pub mod handle;
pub mod mock;
pub mod registry;

pub use capabilities::{CameraDevice, FrameStream, GrabOutcome, StreamConfig, TransportLayer, WriteAck};
pub use descriptor::{DeviceDescriptor, InfoValue, TransportDescriptor};
pub use features::{FeatureAccess, FeatureDescriptor, FeatureType};
pub use frame::{Frame, PixelType};
pub use handle::{DeviceHandle, StreamPhase, StreamingGrant};
pub use mock::{MockCamera, MockCameraConfig, MockTransport};
pub use registry::{DeviceSelector, TransportRegistry};
