//! Acquisition session state machine.
//!
//! A session borrows a [`ParameterTree`] (and through it the device handle),
//! takes the device's exclusive streaming grant, configures trigger, exposure
//! and geometry through tree writes, and drives the grab loop. Every exit path
//! stops the stream and releases the grant.
//!
//! # Example
//!
//! ```rust,ignore
//! let session = AcquisitionSession::new(&tree, AcquisitionConfig {
//!     frame_count: FrameCount::new(3),
//!     exposure: Duration::from_millis(100),
//!     ..AcquisitionConfig::default()
//! })?;
//! let report = session.acquire(CancelToken::never(), TriggerReceiver::closed()).await?;
//! assert_eq!(report.frames_grabbed, 3);
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::cancel::CancelToken;
use super::config::{AcquisitionConfig, Binning, FailedFrameAccounting, FailurePolicy, TriggerMode};
use super::state::SessionState;
use super::trigger::TriggerReceiver;
use crate::error::{CamError, CamResult};
use crate::hardware::capabilities::{FrameStream, GrabOutcome, StreamConfig};
use crate::hardware::frame::{Frame, PixelType};
use crate::hardware::handle::{StreamPhase, StreamingGrant};
use crate::parameter::{ParameterTree, ParameterValue};

/// Metadata of one grabbed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    /// Slot the frame filled (0-based).
    pub slot: u64,
    /// Device frame counter.
    pub frame_number: u64,
    /// Device timestamp.
    pub timestamp: DateTime<Utc>,
    /// Time since the session was opened.
    pub since_start: Duration,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel storage type.
    pub pixel_type: PixelType,
}

impl FrameRecord {
    /// Array shape, `(height, width)`.
    pub fn shape(&self) -> (u32, u32) {
        (self.height, self.width)
    }
}

/// Outcome of a completed acquisition.
#[derive(Debug, Clone)]
pub struct AcquisitionReport {
    /// Session identifier.
    pub session_id: Uuid,
    /// Device name.
    pub device: String,
    /// Frames delivered.
    pub frames_grabbed: u64,
    /// Timeouts and failed buffers.
    pub failed_frames: u64,
    /// Time from open to close.
    pub elapsed: Duration,
    /// Wall-clock start.
    pub started_at: Option<DateTime<Utc>>,
    /// Per-frame metadata, in grab order.
    pub frames: Vec<FrameRecord>,
    /// State the session ended in.
    pub final_state: SessionState,
    /// Whether the run ended because of cancellation.
    pub cancelled: bool,
}

/// Callback invoked for every grabbed frame.
pub type FrameObserver<'t> = Box<dyn FnMut(&FrameRecord, &Frame) + Send + 't>;

/// Result of one cancellable grab.
enum Grab {
    Cancelled,
    Done(GrabOutcome),
}

/// One acquisition on one device.
pub struct AcquisitionSession<'t> {
    id: Uuid,
    tree: &'t ParameterTree,
    config: AcquisitionConfig,
    state_tx: watch::Sender<SessionState>,
    // The stream is declared before the grant so it stops before the gate opens.
    stream: Option<Box<dyn FrameStream>>,
    grant: Option<StreamingGrant>,
    frames_grabbed: u64,
    failed_frames: u64,
    frames: Vec<FrameRecord>,
    start_time: Option<Instant>,
    started_at: Option<DateTime<Utc>>,
    elapsed: Option<Duration>,
    cancelled: bool,
    observer: Option<FrameObserver<'t>>,
}

impl<'t> AcquisitionSession<'t> {
    /// Create a session in state `Created`.
    pub fn new(tree: &'t ParameterTree, config: AcquisitionConfig) -> CamResult<Self> {
        config.validate()?;
        let (state_tx, _) = watch::channel(SessionState::Created);
        Ok(Self {
            id: Uuid::new_v4(),
            tree,
            config,
            state_tx,
            stream: None,
            grant: None,
            frames_grabbed: 0,
            failed_frames: 0,
            frames: Vec::new(),
            start_time: None,
            started_at: None,
            elapsed: None,
            cancelled: false,
            observer: None,
        })
    }

    /// Call `observer` for every grabbed frame.
    pub fn with_frame_observer(
        mut self,
        observer: impl FnMut(&FrameRecord, &Frame) + Send + 't,
    ) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Session identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Acquisition parameters.
    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Observe state changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Frames delivered so far.
    pub fn frames_grabbed(&self) -> u64 {
        self.frames_grabbed
    }

    /// Timeouts and failed buffers so far.
    pub fn failed_frames(&self) -> u64 {
        self.failed_frames
    }

    /// Per-frame metadata so far.
    pub fn frames(&self) -> &[FrameRecord] {
        &self.frames
    }

    /// Wall-clock time the session was opened.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Time since open; frozen once the session is closed or failed.
    pub fn elapsed(&self) -> Duration {
        match (self.elapsed, self.start_time) {
            (Some(elapsed), _) => elapsed,
            (None, Some(start)) => start.elapsed(),
            (None, None) => Duration::ZERO,
        }
    }

    /// Whether the run was cancelled.
    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    fn device_name(&self) -> &str {
        self.tree.device().name()
    }

    // =========================================================================
    // State handling
    // =========================================================================

    fn expect_state(&self, expected: SessionState, operation: &str) -> CamResult<()> {
        let current = self.state();
        if current == expected {
            Ok(())
        } else {
            Err(CamError::Configuration(format!(
                "cannot {} session {}: state is {}, expected {}",
                operation, self.id, current, expected
            )))
        }
    }

    fn transition(&mut self, next: SessionState) {
        let current = self.state();
        if !current.can_transition_to(next) {
            warn!(session = %self.id, from = %current, to = %next, "ignoring illegal state transition");
            return;
        }
        self.state_tx.send_replace(next);
        debug!(session = %self.id, device = %self.device_name(), from = %current, to = %next, "session state changed");
    }

    async fn set_phase(&self, phase: StreamPhase) {
        if let Some(grant) = &self.grant {
            grant.set_phase(phase).await;
        }
    }

    fn freeze_elapsed(&mut self) {
        if self.elapsed.is_none() {
            self.elapsed = Some(self.start_time.map(|s| s.elapsed()).unwrap_or_default());
        }
    }

    /// Release everything and enter `Failed`. Returns `err` for propagation.
    async fn fail(&mut self, err: CamError) -> CamError {
        if self.stream.is_some() {
            self.set_phase(StreamPhase::Stopping).await;
        }
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.stop().await {
                warn!(session = %self.id, error = %e, "stream stop failed during failure cleanup");
            }
        }
        self.grant = None;
        self.freeze_elapsed();
        self.transition(SessionState::Failed);
        error!(session = %self.id, device = %self.device_name(), error = %err, "acquisition failed");
        err
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// `Created → Opened`: take the streaming grant.
    pub async fn open(&mut self) -> CamResult<()> {
        self.expect_state(SessionState::Created, "open")?;
        match self.tree.device().acquire_stream(self.id) {
            Ok(grant) => {
                self.grant = Some(grant);
                self.start_time = Some(Instant::now());
                self.started_at = Some(Utc::now());
                self.transition(SessionState::Opened);
                Ok(())
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// `Opened → Configured`: program trigger, exposure and geometry.
    pub async fn configure(&mut self) -> CamResult<()> {
        self.expect_state(SessionState::Opened, "configure")?;
        match self.configure_device().await {
            Ok(()) => {
                self.transition(SessionState::Configured);
                Ok(())
            }
            Err(e) => {
                let err = CamError::Configuration(format!("{} rejected the acquisition setup: {}", self.device_name(), e));
                Err(self.fail(err).await)
            }
        }
    }

    async fn configure_device(&self) -> CamResult<()> {
        let tree = self.tree;
        let config = &self.config;

        self.configure_trigger().await?;
        self.set_if_present("AcquisitionMode", ParameterValue::Enum("Continuous".into()))
            .await?;

        tree.set(
            "ExposureTime",
            ParameterValue::Float(config.exposure.as_secs_f64() * 1e6),
        )
        .await?;

        match config.frame_rate_limit() {
            None => {
                self.set_if_present("AcquisitionFrameRateEnable", ParameterValue::Bool(false))
                    .await?
            }
            Some(rate) => {
                tree.set("AcquisitionFrameRateEnable", ParameterValue::Bool(true)).await?;
                tree.set("AcquisitionFrameRate", ParameterValue::Float(rate)).await?;
            }
        }

        // Reset binning, offsets and size before applying the requested geometry.
        self.set_binning(Binning::NONE).await?;
        tree.set("OffsetX", ParameterValue::Int(0)).await?;
        tree.set("OffsetY", ParameterValue::Int(0)).await?;
        let width_max = tree.read_through("WidthMax").await?;
        let height_max = tree.read_through("HeightMax").await?;
        tree.set("Width", width_max.clone()).await?;
        tree.set("Height", height_max.clone()).await?;
        tree.set("PixelFormat", ParameterValue::Enum(config.pixel_format.clone()))
            .await?;

        let (x, y, width, height) = match &config.roi {
            Some(roi) => (
                ParameterValue::Int(i64::from(roi.x)),
                ParameterValue::Int(i64::from(roi.y)),
                ParameterValue::Int(i64::from(roi.width)),
                ParameterValue::Int(i64::from(roi.height)),
            ),
            None => (
                ParameterValue::Int(0),
                ParameterValue::Int(0),
                width_max,
                height_max,
            ),
        };
        tree.set("Width", width).await?;
        tree.set("Height", height).await?;
        tree.set("OffsetX", x).await?;
        tree.set("OffsetY", y).await?;

        if config.binning != Binning::NONE {
            self.set_binning(config.binning).await?;
        }

        // Trigger settings depend on the selector and geometry on binning.
        tree.refresh().await?;
        debug!(
            session = %self.id,
            trigger = %config.trigger_mode,
            exposure_us = config.exposure.as_secs_f64() * 1e6,
            "device configured"
        );
        Ok(())
    }

    async fn configure_trigger(&self) -> CamResult<()> {
        let tree = self.tree;
        let selectors = match tree.resolve("TriggerSelector") {
            Ok((_, node)) if !node.access().is_read_only() => node.choices().to_vec(),
            _ => {
                debug!(session = %self.id, "device has no writable trigger selector");
                return match self.config.trigger_mode {
                    TriggerMode::Internal => Ok(()),
                    TriggerMode::Software => Err(CamError::Configuration(
                        "device does not support software triggering".into(),
                    )),
                };
            }
        };

        for selector in &selectors {
            tree.set("TriggerSelector", ParameterValue::Enum(selector.clone()))
                .await?;
            tree.set("TriggerMode", ParameterValue::Enum("Off".into())).await?;
        }

        if self.config.trigger_mode == TriggerMode::Software {
            let selector = selectors
                .iter()
                .find(|s| s.as_str() == "FrameStart")
                .or_else(|| selectors.first())
                .cloned()
                .ok_or_else(|| CamError::Configuration("trigger selector has no entries".into()))?;
            tree.set("TriggerSelector", ParameterValue::Enum(selector)).await?;
            tree.set("TriggerMode", ParameterValue::Enum("On".into())).await?;
            tree.set("TriggerSource", ParameterValue::Enum("Software".into()))
                .await?;
        }
        Ok(())
    }

    async fn set_binning(&self, binning: Binning) -> CamResult<()> {
        self.set_if_present(
            "BinningHorizontal",
            ParameterValue::Int(i64::from(binning.horizontal)),
        )
        .await?;
        self.set_if_present(
            "BinningVertical",
            ParameterValue::Int(i64::from(binning.vertical)),
        )
        .await
    }

    /// Write an optional feature; devices without it are left alone.
    async fn set_if_present(&self, path: &str, value: ParameterValue) -> CamResult<()> {
        match self.tree.set(path, value).await {
            Err(CamError::NotFound(_)) => {
                debug!(session = %self.id, feature = path, "optional feature not present");
                Ok(())
            }
            other => other,
        }
    }

    /// `Configured → Streaming`: start the frame stream.
    pub async fn start(&mut self) -> CamResult<()> {
        self.expect_state(SessionState::Configured, "start")?;
        let stream_config = StreamConfig {
            buffer_count: self.config.buffer_count,
        };
        // Lock streaming-critical settings before the device starts producing.
        self.set_phase(StreamPhase::Streaming).await;
        match self.tree.device().device().start_stream(stream_config).await {
            Ok(stream) => {
                self.stream = Some(stream);
                self.transition(SessionState::Streaming);
                info!(
                    session = %self.id,
                    device = %self.device_name(),
                    frames = %self.config.frame_count,
                    trigger = %self.config.trigger_mode,
                    "acquisition started"
                );
                Ok(())
            }
            Err(e) => {
                let err = CamError::device_io("start stream", e);
                Err(self.fail(err).await)
            }
        }
    }

    /// Drive the grab loop until every slot is used or the run is cancelled.
    ///
    /// Leaves the session in `Stopping` on success and `Failed` on error.
    pub async fn run(
        &mut self,
        cancel: &mut CancelToken,
        triggers: &mut TriggerReceiver,
    ) -> CamResult<()> {
        self.expect_state(SessionState::Streaming, "run")?;
        let timeout = self.config.effective_frame_timeout();
        let mut slot: u64 = 0;
        let mut slot_failures: u32 = 0;

        while !self.config.frame_count.is_exhausted(slot) {
            if self.config.trigger_mode == TriggerMode::Software {
                let fired = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => false,
                    fired = triggers.next() => fired,
                };
                if !fired {
                    debug!(session = %self.id, slot, "trigger wait ended");
                    self.cancelled = true;
                    break;
                }
                if let Err(e) = self.tree.invoke("TriggerSoftware").await {
                    return Err(self.fail(e).await);
                }
            }

            let grab = {
                let Some(stream) = self.stream.as_mut() else {
                    let err = CamError::DeviceIo("stream is not running".into());
                    return Err(self.fail(err).await);
                };
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Ok(Grab::Cancelled),
                    outcome = stream.grab_frame(timeout) => outcome.map(Grab::Done),
                }
            };

            let failure = match grab {
                Ok(Grab::Cancelled) => {
                    debug!(session = %self.id, slot, "grab cancelled");
                    self.cancelled = true;
                    break;
                }
                Err(e) => return Err(self.fail(CamError::device_io("grab frame", e)).await),
                Ok(Grab::Done(GrabOutcome::Frame(frame))) => {
                    self.record_frame(slot, &frame);
                    slot += 1;
                    slot_failures = 0;
                    continue;
                }
                Ok(Grab::Done(GrabOutcome::Timeout)) => {
                    warn!(session = %self.id, device = %self.device_name(), slot, timeout = ?timeout, "grab timed out");
                    format!("no frame within {:?}", timeout)
                }
                Ok(Grab::Done(GrabOutcome::Failed(reason))) => {
                    error!(session = %self.id, device = %self.device_name(), slot, %reason, "error grabbing");
                    reason
                }
            };

            self.failed_frames += 1;
            if self.config.failure_policy == FailurePolicy::Abort {
                let err = CamError::DeviceIo(format!("frame {} failed: {}", slot, failure));
                return Err(self.fail(err).await);
            }
            match self.config.failed_frame_accounting {
                FailedFrameAccounting::ConsumesSlot => slot += 1,
                FailedFrameAccounting::Retry { max_attempts } => {
                    slot_failures += 1;
                    if slot_failures >= max_attempts {
                        let err = CamError::DeviceIo(format!(
                            "frame {} failed {} times, last: {}",
                            slot, slot_failures, failure
                        ));
                        return Err(self.fail(err).await);
                    }
                }
            }
        }

        self.set_phase(StreamPhase::Stopping).await;
        self.transition(SessionState::Stopping);
        Ok(())
    }

    fn record_frame(&mut self, slot: u64, frame: &Frame) {
        let record = FrameRecord {
            slot,
            frame_number: frame.frame_number,
            timestamp: frame.timestamp,
            since_start: self.elapsed(),
            width: frame.width,
            height: frame.height,
            pixel_type: frame.pixel_type,
        };
        self.frames_grabbed += 1;
        info!(
            timestamp = %frame.timestamp,
            thread = ?std::thread::current().id(),
            device = %self.device_name(),
            shape = ?frame.shape(),
            pixel_type = %frame.pixel_type,
            frame = frame.frame_number,
            "grabbed"
        );
        if let Some(observer) = self.observer.as_mut() {
            observer(&record, frame);
        }
        self.frames.push(record);
    }

    /// Release path: stop the stream, release the grant, freeze `elapsed`.
    ///
    /// Ends in `Closed`, or `Failed` if the stream could not be stopped.
    /// Calling it on a closed or failed session does nothing.
    pub async fn close(&mut self) -> CamResult<()> {
        let state = self.state();
        if state.is_terminal() {
            return Ok(());
        }
        if state == SessionState::Created {
            let err = CamError::Configuration(format!("session {} was never opened", self.id));
            return Err(self.fail(err).await);
        }
        if state != SessionState::Stopping {
            self.set_phase(StreamPhase::Stopping).await;
            self.transition(SessionState::Stopping);
        }

        let stopped = match self.stream.take() {
            Some(mut stream) => stream.stop().await,
            None => Ok(()),
        };
        self.grant = None;
        self.freeze_elapsed();

        match stopped {
            Ok(()) => {
                self.transition(SessionState::Closed);
                info!(
                    session = %self.id,
                    device = %self.device_name(),
                    frames = self.frames_grabbed,
                    failed = self.failed_frames,
                    elapsed_ms = self.elapsed().as_secs_f64() * 1e3,
                    "acquisition finished"
                );
                Ok(())
            }
            Err(e) => Err(self.fail(CamError::device_io("stop stream", e)).await),
        }
    }

    /// Run the whole lifecycle: open, configure, start, run, close.
    pub async fn acquire(
        mut self,
        mut cancel: CancelToken,
        mut triggers: TriggerReceiver,
    ) -> CamResult<AcquisitionReport> {
        self.open().await?;
        self.configure().await?;
        self.start().await?;
        self.run(&mut cancel, &mut triggers).await?;
        self.close().await?;
        Ok(self.report())
    }

    /// Summary of the session so far.
    pub fn report(&self) -> AcquisitionReport {
        AcquisitionReport {
            session_id: self.id,
            device: self.device_name().to_string(),
            frames_grabbed: self.frames_grabbed,
            failed_frames: self.failed_frames,
            elapsed: self.elapsed(),
            started_at: self.started_at,
            frames: self.frames.clone(),
            final_state: self.state(),
            cancelled: self.cancelled,
        }
    }
}

impl Drop for AcquisitionSession<'_> {
    fn drop(&mut self) {
        let state = self.state();
        if !state.is_terminal() && state != SessionState::Created {
            warn!(session = %self.id, state = %state, "session dropped while active; releasing device");
            self.state_tx.send_replace(SessionState::Failed);
        }
    }
}
