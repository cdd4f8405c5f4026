//! Open device handles and the exclusive streaming grant.
//!
//! A [`DeviceHandle`] wraps an open [`CameraDevice`] together with its
//! stream gate. At most one acquisition session holds the gate at a time;
//! the [`StreamingGrant`] token releases it on drop, so a session that is
//! dropped mid-flight (a cancelled future, a panic unwinding) frees the
//! device for the next one.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{watch, RwLock, RwLockReadGuard};
use tracing::debug;
use uuid::Uuid;

use super::capabilities::CameraDevice;
use super::descriptor::DeviceDescriptor;
use crate::error::{CamError, CamResult};

/// Streaming phase of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamPhase {
    /// No session holds the device.
    Idle,
    /// A session holds the grant but is not streaming yet.
    Granted,
    /// Frames are being produced.
    Streaming,
    /// The holder is shutting the stream down.
    Stopping,
}

impl StreamPhase {
    /// Whether streaming-critical settings are locked.
    pub fn locks_settings(self) -> bool {
        matches!(self, StreamPhase::Streaming | StreamPhase::Stopping)
    }
}

impl fmt::Display for StreamPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StreamPhase::Idle => "idle",
            StreamPhase::Granted => "granted",
            StreamPhase::Streaming => "streaming",
            StreamPhase::Stopping => "stopping",
        };
        f.write_str(label)
    }
}

#[derive(Debug)]
struct GateState {
    phase: StreamPhase,
    owner: Option<Uuid>,
}

/// Per-device holder of the streaming phase.
#[derive(Debug)]
struct StreamGate {
    state: Mutex<GateState>,
    phase_tx: watch::Sender<StreamPhase>,
    // Shared by streaming-critical writes for their whole device round trip;
    // exclusive while the phase changes.
    settings: RwLock<()>,
}

impl StreamGate {
    fn new() -> Self {
        let (phase_tx, _) = watch::channel(StreamPhase::Idle);
        Self {
            state: Mutex::new(GateState {
                phase: StreamPhase::Idle,
                owner: None,
            }),
            phase_tx,
            settings: RwLock::new(()),
        }
    }

    fn set_phase(&self, state: &mut GateState, phase: StreamPhase) {
        state.phase = phase;
        self.phase_tx.send_replace(phase);
    }
}

/// An open device plus its stream gate.
pub struct DeviceHandle {
    device: Arc<dyn CameraDevice>,
    gate: Arc<StreamGate>,
}

impl DeviceHandle {
    /// Wrap an open device.
    pub fn new(device: Arc<dyn CameraDevice>) -> Self {
        Self {
            device,
            gate: Arc::new(StreamGate::new()),
        }
    }

    /// The underlying driver.
    pub fn device(&self) -> &dyn CameraDevice {
        self.device.as_ref()
    }

    /// Descriptor the device was opened with.
    pub fn descriptor(&self) -> &DeviceDescriptor {
        self.device.descriptor()
    }

    /// Name used in log events.
    pub fn name(&self) -> &str {
        &self.descriptor().friendly_name
    }

    /// Current streaming phase.
    pub fn stream_phase(&self) -> StreamPhase {
        self.gate.state.lock().phase
    }

    /// Watch streaming phase changes.
    pub fn watch_stream_phase(&self) -> watch::Receiver<StreamPhase> {
        self.gate.phase_tx.subscribe()
    }

    /// Hold off phase changes until the guard is dropped.
    ///
    /// Streaming-critical writes keep this guard from the phase check until
    /// the device has answered.
    pub async fn hold_phase(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.settings.read().await
    }

    /// Take the exclusive streaming grant for `owner`.
    ///
    /// Fails with [`CamError::DeviceBusy`] while another grant is alive.
    pub fn acquire_stream(&self, owner: Uuid) -> CamResult<StreamingGrant> {
        let mut state = self.gate.state.lock();
        if let Some(holder) = state.owner {
            return Err(CamError::DeviceBusy(format!(
                "{} is held by session {} ({})",
                self.name(),
                holder,
                state.phase
            )));
        }
        state.owner = Some(owner);
        self.gate.set_phase(&mut state, StreamPhase::Granted);
        debug!(device = %self.name(), session = %owner, "streaming grant acquired");
        Ok(StreamingGrant {
            gate: Arc::clone(&self.gate),
            owner,
        })
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("device", &self.descriptor().full_name)
            .field("phase", &self.stream_phase())
            .finish()
    }
}

/// Exclusive right to stream from a device. Releases the gate on drop.
#[derive(Debug)]
pub struct StreamingGrant {
    gate: Arc<StreamGate>,
    owner: Uuid,
}

impl StreamingGrant {
    /// Session that holds the grant.
    pub fn owner(&self) -> Uuid {
        self.owner
    }

    /// Advance the gate's phase once in-flight guarded writes have finished.
    pub async fn set_phase(&self, phase: StreamPhase) {
        let _exclusive = self.gate.settings.write().await;
        let mut state = self.gate.state.lock();
        self.gate.set_phase(&mut state, phase);
    }
}

impl Drop for StreamingGrant {
    fn drop(&mut self) {
        let mut state = self.gate.state.lock();
        if state.owner == Some(self.owner) {
            state.owner = None;
            self.gate.set_phase(&mut state, StreamPhase::Idle);
            debug!(session = %self.owner, "streaming grant released");
        }
    }
}
