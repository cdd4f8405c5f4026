//! End-to-end flow through the registry: enumerate, select, open, build the
//! tree, apply transport settings, acquire, render.

use std::sync::Arc;
use std::time::Duration;

use camctl::acquisition::{
    cancel_pair, AcquisitionConfig, AcquisitionSession, FrameCount, SessionState, TriggerMode,
    TriggerReceiver,
};
use camctl::config::{CamctlConfig, TransportSettings};
use camctl::error::CamError;
use camctl::hardware::{DeviceSelector, MockTransport, PixelType, StreamPhase, TransportRegistry};
use camctl::parameter::{ParameterTree, ParameterValue};
use camctl::render::{self, NameFilter};
use tracing_test::traced_test;

fn registry(count: usize) -> (TransportRegistry, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::new(count));
    let mut registry = TransportRegistry::new();
    registry.register(transport.clone());
    (registry, transport)
}

async fn open(registry: &TransportRegistry, selector: &str) -> ParameterTree {
    let selector: DeviceSelector = selector.parse().unwrap();
    let handle = Arc::new(registry.open_device(&selector).await.unwrap());
    ParameterTree::build(handle).await.unwrap()
}

// =============================================================================
// Discovery
// =============================================================================

#[tokio::test]
async fn test_enumerate_and_render_devices() {
    let (registry, _) = registry(2);

    let transports = registry.enumerate_transports();
    assert_eq!(transports.len(), 1);
    let table = render::transport_table(&transports);
    println!("{}", table);
    assert_eq!(table.rows().len(), 1);

    let devices = registry.enumerate_devices(None).await.unwrap();
    assert_eq!(devices.len(), 2);
    let table = render::camera_table(&devices, &NameFilter::any());
    println!("{}", table);
    assert!(table.headers().iter().any(|h| h == "User name"));
    assert!(!table.headers().iter().any(|h| h == "IpAddress"));
    assert_eq!(table.column("User name").unwrap(), vec!["cam0", "cam1"]);

    assert!(registry
        .enumerate_devices(Some("NoSuchClass"))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_selectors_reach_the_same_device() {
    let (registry, _) = registry(2);
    let devices = registry.enumerate_devices(None).await.unwrap();
    let serial = devices[1].serial_number.clone();

    let selectors = [
        format!("serial:{}", serial),
        serial.clone(),
        "name:cam1".to_string(),
        "cam1".to_string(),
    ];
    for selector in selectors {
        let tree = open(&registry, &selector).await;
        assert_eq!(
            tree.get("DeviceSerialNumber").unwrap(),
            ParameterValue::String(serial.clone()),
            "selector {}",
            selector
        );
    }

    let err = registry
        .open_device(&"serial:does-not-exist".parse().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, CamError::NotFound(_)));
}

// =============================================================================
// Parameters
// =============================================================================

#[tokio::test]
async fn test_transport_settings_are_applied() {
    let (registry, _) = registry(1);
    let tree = open(&registry, "cam0").await;

    let settings = TransportSettings {
        packet_size: 9000,
        inter_packet_delay: 100,
        frame_transmission_delay: 0,
        output_queue_size: 8,
    };
    let written = settings.apply(&tree).await.unwrap();
    assert_eq!(written, 3);
    assert_eq!(tree.get("GevSCPSPacketSize").unwrap(), ParameterValue::Int(9000));
    assert_eq!(tree.get("GevSCPD").unwrap(), ParameterValue::Int(100));

    let bad = TransportSettings {
        packet_size: 9001,
        ..settings
    };
    let err = bad.apply(&tree).await.unwrap_err();
    assert!(matches!(err, CamError::Validation { .. }));
}

#[tokio::test]
async fn test_render_parameter_views() {
    let (registry, _) = registry(1);
    let tree = open(&registry, "cam0").await;
    let snapshot = tree.snapshot();

    let rendered = render::parameter_tree(&snapshot, &NameFilter::new("Trigger*").unwrap());
    println!("{}", rendered);
    assert!(rendered.contains("AcquisitionControl"));
    assert!(rendered.contains("TriggerSelector"));
    assert!(!rendered.contains("ExposureTime"));
    assert!(!rendered.contains("AOI"));

    assert_eq!(
        render::parameter_tree(&snapshot, &NameFilter::new("NoSuch*").unwrap()),
        ""
    );

    let table = render::parameter_table(&snapshot, &NameFilter::new("Width*").unwrap());
    println!("{}", table);
    let names = table.column("Name").unwrap();
    assert!(names.contains(&"Width"));
    assert!(names.contains(&"WidthMax"));

    let (_, width) = tree.resolve("AOI/Width").unwrap();
    assert_eq!(render::parameter_display(&width), "Width: 1024 px (RW) (i) [16:4096:4]");
}

// =============================================================================
// Acquisition
// =============================================================================

#[tokio::test]
#[traced_test]
async fn test_internal_trigger_acquisition_end_to_end() {
    let (registry, transport) = registry(1);
    let tree = open(&registry, "cam0").await;
    let config = CamctlConfig::default();
    config.transport.apply(&tree).await.unwrap();

    let acquisition = AcquisitionConfig {
        trigger_mode: TriggerMode::Internal,
        frame_count: FrameCount::new(3),
        exposure: Duration::from_millis(100),
        ..config.acquisition_config()
    };

    let mut lines = Vec::new();
    let (_cancel, token) = cancel_pair();
    let report = AcquisitionSession::new(&tree, acquisition)
        .unwrap()
        .with_frame_observer(|record, _| lines.push(render::frame_line(record)))
        .acquire(token, TriggerReceiver::closed())
        .await
        .unwrap();

    println!("{}", render::acquisition_summary(&report));
    assert_eq!(report.final_state, SessionState::Closed);
    assert_eq!(report.frames_grabbed, 3);
    assert!(report.elapsed >= Duration::from_millis(300));
    assert_eq!(report.device, tree.device().name());
    for record in &report.frames {
        assert_eq!(record.shape(), (1040, 1024));
        assert_eq!(record.pixel_type, PixelType::U8);
    }

    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains("shape=(1040, 1024)"));
    assert!(lines[0].contains("dtype=uint8"));
    assert!(render::acquisition_summary(&report).starts_with("Acquired 3 frames (0 failed)"));

    assert!(logs_contain("grabbed"));
    assert!(logs_contain("acquisition finished"));

    let camera = transport.camera(0).unwrap();
    assert!(!camera.is_streaming());
    assert_eq!(tree.device().stream_phase(), StreamPhase::Idle);
}

#[tokio::test]
async fn test_settings_unlock_after_acquisition() {
    let (registry, _) = registry(1);
    let tree = open(&registry, "cam0").await;

    let acquisition = AcquisitionConfig {
        frame_count: FrameCount::new(1),
        exposure: Duration::from_millis(10),
        ..AcquisitionConfig::default()
    };
    let (_cancel, token) = cancel_pair();
    AcquisitionSession::new(&tree, acquisition)
        .unwrap()
        .acquire(token, TriggerReceiver::closed())
        .await
        .unwrap();

    tree.set("AOI/Height", ParameterValue::Int(512)).await.unwrap();
    assert_eq!(tree.get("Height").unwrap(), ParameterValue::Int(512));
}
