//! Emulated camera with trigger and streaming support.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, trace};

use super::faults::{FaultInjector, Operation, DRIVER_TYPE};
use super::nodemap::{feature_name, NodeMap, StreamSettings, TriggerKind};
use super::pattern;
use super::MockCameraConfig;
use crate::error::{DriverError, DriverErrorKind, DriverResult};
use crate::hardware::capabilities::{CameraDevice, FrameStream, GrabOutcome, StreamConfig, WriteAck};
use crate::hardware::descriptor::{DeviceDescriptor, InfoValue};
use crate::hardware::features::{FeatureDescriptor, FeatureType};
use crate::hardware::frame::Frame;
use crate::parameter::ParameterValue;

/// Device class reported by the emulated transport and its cameras.
pub const EMULATION_DEVICE_CLASS: &str = "Emulation";

// =============================================================================
// Shared stream state
// =============================================================================

#[derive(Debug, Default)]
struct StreamShared {
    streaming: AtomicBool,
    trigger_tx: Mutex<Option<mpsc::UnboundedSender<()>>>,
    pending_failed: AtomicU32,
    frames_produced: AtomicU64,
    writes: AtomicU64,
}

// =============================================================================
// MockCamera
// =============================================================================

/// Emulated GenICam camera.
///
/// Free-running streams produce one frame per exposure (or per frame-rate
/// period when the limiter is enabled and slower). With
/// `TriggerMode=On`/`TriggerSource=Software` on the `FrameStart` selector,
/// each `TriggerSoftware` produces one frame after the exposure time.
/// `ForceFailedBuffer` marks the next `ForceFailedBufferCount` buffers as
/// failed.
pub struct MockCamera {
    descriptor: DeviceDescriptor,
    nodemap: Arc<Mutex<NodeMap>>,
    faults: FaultInjector,
    shared: Arc<StreamShared>,
    config: MockCameraConfig,
}

impl MockCamera {
    /// Camera number `index` with the default sensor.
    pub fn new(index: usize) -> Self {
        Self::with_config(index, MockCameraConfig::default())
    }

    /// Camera number `index` with a custom configuration.
    pub fn with_config(index: usize, config: MockCameraConfig) -> Self {
        let nodemap = NodeMap::new(index, &config);
        let serial = nodemap
            .read("DeviceSerialNumber")
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let octet = u8::try_from(index % 254 + 1).unwrap_or(1);
        let descriptor = DeviceDescriptor {
            full_name: format!("Emulation (0815-{:04})", index),
            user_defined_name: format!("cam{}", index),
            model_name: "Emulated Camera".to_string(),
            device_factory: "Emulation/camctl".to_string(),
            friendly_name: format!("Emulated Camera ({})", serial),
            device_class: EMULATION_DEVICE_CLASS.to_string(),
            vendor_name: "camctl".to_string(),
            serial_number: serial,
            ip_address: Some(IpAddr::V4(Ipv4Addr::new(127, 0, 0, octet))),
            mac_address: Some(format!("00:30:53:00:00:{:02x}", octet)),
        };
        Self {
            descriptor,
            nodemap: Arc::new(Mutex::new(nodemap)),
            faults: FaultInjector::none(),
            shared: Arc::new(StreamShared::default()),
            config,
        }
    }

    /// Fault injection handle.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Change a feature behind the host's back.
    pub fn poke(&self, name: &str, value: ParameterValue) -> DriverResult<()> {
        self.nodemap.lock().poke(name, value)
    }

    /// Whether a stream is running.
    pub fn is_streaming(&self) -> bool {
        self.shared.streaming.load(Ordering::SeqCst)
    }

    /// Frames (and failed buffers) produced so far.
    pub fn frames_produced(&self) -> u64 {
        self.shared.frames_produced.load(Ordering::SeqCst)
    }

    /// Number of `write_feature` calls that reached the device.
    pub fn write_count(&self) -> u64 {
        self.shared.writes.load(Ordering::SeqCst)
    }

    fn info_text(&self, name: &str) -> InfoValue {
        let value = self.nodemap.lock().read(name).ok();
        InfoValue::Text(value.map(|v| v.to_string()).unwrap_or_default())
    }
}

#[async_trait]
impl CameraDevice for MockCamera {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    async fn device_info(&self) -> DriverResult<BTreeMap<String, InfoValue>> {
        self.faults.check(Operation::Read)?;
        let mut info = BTreeMap::new();
        for name in [
            "DeviceVendorName",
            "DeviceModelName",
            "DeviceVersion",
            "DeviceFirmwareVersion",
            "DeviceSerialNumber",
            "DeviceUserID",
        ] {
            info.insert(name.to_string(), self.info_text(name));
        }
        info.insert(
            "SensorWidth".to_string(),
            InfoValue::Integer(i64::from(self.config.width)),
        );
        info.insert(
            "SensorHeight".to_string(),
            InfoValue::Integer(i64::from(self.config.height)),
        );
        info.insert("IsStreaming".to_string(), InfoValue::Flag(self.is_streaming()));
        Ok(info)
    }

    async fn query_features(&self) -> DriverResult<FeatureDescriptor> {
        self.faults.check(Operation::Query)?;
        Ok(self.nodemap.lock().snapshot())
    }

    async fn read_feature(&self, path: &str) -> DriverResult<ParameterValue> {
        self.faults.check(Operation::Read)?;
        self.nodemap.lock().read(path)
    }

    async fn write_feature(&self, path: &str, value: &ParameterValue) -> DriverResult<WriteAck> {
        self.shared.writes.fetch_add(1, Ordering::SeqCst);
        self.faults.check_write(feature_name(path))?;
        self.nodemap.lock().write(path, value)?;
        trace!(device = %self.descriptor.friendly_name, feature = path, %value, "feature written");
        Ok(if self.config.confirm_writes {
            WriteAck::Confirmed
        } else {
            WriteAck::Sent
        })
    }

    async fn invoke_feature(&self, path: &str) -> DriverResult<()> {
        self.faults.check(Operation::Invoke)?;
        let name = feature_name(path);
        let feature_type = self.nodemap.lock().feature_type(name)?;
        if feature_type != FeatureType::Command {
            return Err(DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::Rejected,
                format!("'{}' is not a command", name),
            ));
        }

        match name {
            "TriggerSoftware" => match self.shared.trigger_tx.lock().as_ref() {
                Some(tx) => {
                    // A closed receiver means the producer is gone; nothing to trigger.
                    let _ = tx.send(());
                }
                None => debug!(
                    device = %self.descriptor.friendly_name,
                    "software trigger ignored: no software-triggered stream"
                ),
            },
            "ForceFailedBuffer" => {
                let count = self.nodemap.lock().failed_buffer_count();
                self.shared.pending_failed.fetch_add(count, Ordering::SeqCst);
                debug!(device = %self.descriptor.friendly_name, count, "forcing failed buffers");
            }
            other => debug!(device = %self.descriptor.friendly_name, command = other, "command executed"),
        }
        Ok(())
    }

    async fn start_stream(&self, config: StreamConfig) -> DriverResult<Box<dyn FrameStream>> {
        self.faults.check(Operation::StartStream)?;
        if self.shared.streaming.swap(true, Ordering::SeqCst) {
            return Err(DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::Rejected,
                "stream already running",
            ));
        }

        let settings = {
            let mut nodemap = self.nodemap.lock();
            nodemap.set_locked(true);
            nodemap.stream_settings()
        };

        let (frame_tx, frame_rx) = mpsc::channel(config.buffer_count.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
        if settings.trigger == TriggerKind::Software {
            *self.shared.trigger_tx.lock() = Some(trigger_tx);
        }

        debug!(
            device = %self.descriptor.friendly_name,
            width = settings.width,
            height = settings.height,
            trigger = ?settings.trigger,
            period_ms = settings.period.as_secs_f64() * 1e3,
            "emulated stream started"
        );

        let task = tokio::spawn(produce(
            settings,
            Arc::clone(&self.shared),
            frame_tx,
            shutdown_rx,
            trigger_rx,
        ));

        Ok(Box::new(MockFrameStream {
            frames: frame_rx,
            shutdown: Some(shutdown_tx),
            task: Some(task),
            shared: Arc::clone(&self.shared),
            nodemap: Arc::clone(&self.nodemap),
            faults: self.faults.clone(),
            released: false,
        }))
    }
}

// =============================================================================
// Producer task
// =============================================================================

/// Wait until the next frame should be completed. Returns false when the
/// trigger source is gone.
async fn next_frame_due(
    settings: &StreamSettings,
    triggers: &mut mpsc::UnboundedReceiver<()>,
) -> bool {
    match settings.trigger {
        TriggerKind::FreeRun => {
            sleep(settings.period).await;
            true
        }
        TriggerKind::Software => {
            if triggers.recv().await.is_none() {
                return false;
            }
            sleep(settings.exposure).await;
            true
        }
        TriggerKind::Line => {
            futures::future::pending::<()>().await;
            false
        }
    }
}

async fn produce(
    settings: StreamSettings,
    shared: Arc<StreamShared>,
    frames: mpsc::Sender<GrabOutcome>,
    mut shutdown: oneshot::Receiver<()>,
    mut triggers: mpsc::UnboundedReceiver<()>,
) {
    // Static images are rendered once.
    let still: Option<Bytes> = match settings.test_image.as_str() {
        "Testimage2" | "Off" => None,
        selector => Some(pattern::render(
            selector,
            settings.width,
            settings.height,
            settings.pixel_type,
            0,
        )),
    };

    loop {
        let due = tokio::select! {
            _ = &mut shutdown => break,
            due = next_frame_due(&settings, &mut triggers) => due,
        };
        if !due {
            break;
        }

        let frame_number = shared.frames_produced.fetch_add(1, Ordering::SeqCst);
        let failed = shared
            .pending_failed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        let outcome = if failed {
            GrabOutcome::Failed(format!("buffer {} forced to fail", frame_number))
        } else {
            let data = match &still {
                Some(data) => data.clone(),
                None => pattern::render(
                    &settings.test_image,
                    settings.width,
                    settings.height,
                    settings.pixel_type,
                    frame_number,
                ),
            };
            GrabOutcome::Frame(Frame::new(
                settings.width,
                settings.height,
                settings.pixel_type,
                data,
                frame_number,
            ))
        };

        tokio::select! {
            _ = &mut shutdown => break,
            sent = frames.send(outcome) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    trace!("emulated stream producer finished");
}

// =============================================================================
// MockFrameStream
// =============================================================================

/// Consumer side of an emulated stream.
pub struct MockFrameStream {
    frames: mpsc::Receiver<GrabOutcome>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    shared: Arc<StreamShared>,
    nodemap: Arc<Mutex<NodeMap>>,
    faults: FaultInjector,
    released: bool,
}

impl MockFrameStream {
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.shared.trigger_tx.lock().take();
        self.nodemap.lock().set_locked(false);
        self.shared.streaming.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl FrameStream for MockFrameStream {
    async fn grab_frame(&mut self, timeout: Duration) -> DriverResult<GrabOutcome> {
        self.faults.check(Operation::Grab)?;
        match tokio::time::timeout(timeout, self.frames.recv()).await {
            Err(_) => Ok(GrabOutcome::Timeout),
            Ok(Some(outcome)) => Ok(outcome),
            Ok(None) => Err(DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::Communication,
                "stream closed",
            )),
        }
    }

    async fn stop(&mut self) -> DriverResult<()> {
        self.release();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                return Err(DriverError::new(
                    DRIVER_TYPE,
                    DriverErrorKind::Hardware,
                    format!("producer task failed: {}", e),
                ));
            }
        }
        Ok(())
    }
}

impl Drop for MockFrameStream {
    fn drop(&mut self) {
        self.release();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn free_run_produces_frames_of_sensor_size() {
        let camera = MockCamera::new(0);
        camera
            .write_feature("ExposureTime", &ParameterValue::Float(1000.0))
            .await
            .unwrap();
        let mut stream = camera.start_stream(StreamConfig::default()).await.unwrap();

        for expected in 0..3 {
            match stream.grab_frame(Duration::from_secs(1)).await.unwrap() {
                GrabOutcome::Frame(frame) => {
                    assert_eq!(frame.shape(), (1040, 1024));
                    assert_eq!(frame.frame_number, expected);
                }
                other => panic!("unexpected outcome: {:?}", other),
            }
        }
        stream.stop().await.unwrap();
        assert!(!camera.is_streaming());
    }

    #[tokio::test]
    async fn software_trigger_produces_one_frame_per_trigger() {
        let camera = MockCamera::new(0);
        for (name, value) in [
            ("TriggerSelector", "FrameStart"),
            ("TriggerMode", "On"),
            ("TriggerSource", "Software"),
        ] {
            camera
                .write_feature(name, &ParameterValue::Enum(value.into()))
                .await
                .unwrap();
        }
        camera
            .write_feature("ExposureTime", &ParameterValue::Float(100.0))
            .await
            .unwrap();
        let mut stream = camera.start_stream(StreamConfig::default()).await.unwrap();

        let outcome = stream.grab_frame(Duration::from_millis(50)).await.unwrap();
        assert!(matches!(outcome, GrabOutcome::Timeout));

        camera.invoke_feature("TriggerSoftware").await.unwrap();
        let outcome = stream.grab_frame(Duration::from_secs(1)).await.unwrap();
        assert!(matches!(outcome, GrabOutcome::Frame(_)));
        stream.stop().await.unwrap();
    }

    #[tokio::test]
    async fn forced_failed_buffers() {
        let camera = MockCamera::new(0);
        camera
            .write_feature("ExposureTime", &ParameterValue::Float(100.0))
            .await
            .unwrap();
        camera
            .write_feature("ForceFailedBufferCount", &ParameterValue::Int(2))
            .await
            .unwrap();
        camera.invoke_feature("ForceFailedBuffer").await.unwrap();
        let mut stream = camera.start_stream(StreamConfig::default()).await.unwrap();

        let mut failed = 0;
        let mut ok = 0;
        while ok == 0 {
            match stream.grab_frame(Duration::from_secs(1)).await.unwrap() {
                GrabOutcome::Failed(_) => failed += 1,
                GrabOutcome::Frame(_) => ok += 1,
                GrabOutcome::Timeout => panic!("free run timed out"),
            }
        }
        assert_eq!(failed, 2);
        stream.stop().await.unwrap();
    }

    #[tokio::test]
    async fn second_stream_is_rejected_and_drop_unlocks() {
        let camera = MockCamera::new(0);
        let stream = camera.start_stream(StreamConfig::default()).await.unwrap();
        assert!(camera.start_stream(StreamConfig::default()).await.is_err());
        assert!(camera
            .write_feature("PixelFormat", &ParameterValue::Enum("Mono12".into()))
            .await
            .is_err());

        drop(stream);
        assert!(!camera.is_streaming());
        assert!(camera
            .write_feature("PixelFormat", &ParameterValue::Enum("Mono12".into()))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn invoke_rejects_non_commands() {
        let camera = MockCamera::new(0);
        let err = camera.invoke_feature("Width").await.unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Rejected);
        let err = camera.invoke_feature("NoSuchThing").await.unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::NotFound);
    }
}
