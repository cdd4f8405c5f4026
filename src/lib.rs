//! # camctl
//!
//! Control and acquisition library for industrial GenICam-style cameras.
//!
//! ## Crate Structure
//!
//! - **`hardware`**: the driver contract (`TransportLayer`, `CameraDevice`,
//!   `FrameStream`), device descriptors, device handles with their exclusive
//!   streaming grant, the transport registry, and an emulated transport.
//! - **`parameter`**: the device-parameter tree: typed, constrained,
//!   observable nodes built from a device's feature enumeration.
//! - **`acquisition`**: the acquisition session state machine driving
//!   triggered frame capture.
//! - **`render`**: tables and trees for the command line.
//! - **`config`**: figment-based configuration (`config/camctl.toml` + `CAMCTL_*`).
//! - **`tracing_setup`**: tracing subscriber initialization.
//! - **`error`**: `CamError` and `DriverError`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use camctl::acquisition::{cancel_pair, trigger_channel, AcquisitionConfig, AcquisitionSession};
//! use camctl::hardware::{MockTransport, TransportRegistry};
//! use camctl::parameter::ParameterTree;
//!
//! let mut registry = TransportRegistry::new();
//! registry.register(Arc::new(MockTransport::new(1)));
//! let handle = Arc::new(registry.open_device(&"cam0".parse()?).await?);
//!
//! let tree = ParameterTree::build(handle).await?;
//! tree.set("AOI/Height", 512i64.into()).await?;
//!
//! let (_cancel, token) = cancel_pair();
//! let (_triggers, receiver) = trigger_channel();
//! let report = AcquisitionSession::new(&tree, AcquisitionConfig::default())?
//!     .acquire(token, receiver)
//!     .await?;
//! println!("{} frames in {:?}", report.frames_grabbed, report.elapsed);
//! ```

pub mod acquisition;
pub mod config;
pub mod error;
pub mod hardware;
pub mod parameter;
pub mod render;
pub mod tracing_setup;

pub use error::{CamError, CamResult};
