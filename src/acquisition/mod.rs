//! Triggered frame acquisition.
//!
//! [`AcquisitionSession`] is a one-shot state machine
//! (`Created → Opened → Configured → Streaming → Stopping → Closed`, or
//! `Failed`) that holds a device's exclusive streaming grant for its whole
//! life. It is driven from the caller's task; [`CancelToken`] and
//! [`TriggerReceiver`] are the only ways to influence a running loop.

mod cancel;
mod config;
mod session;
mod state;
mod trigger;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use config::{
    AcquisitionConfig, Binning, FailedFrameAccounting, FailurePolicy, FrameCount, Roi, TriggerMode,
};
pub use session::{AcquisitionReport, AcquisitionSession, FrameObserver, FrameRecord};
pub use state::SessionState;
pub use trigger::{trigger_channel, TriggerReceiver, TriggerSender};
