//! Integration tests for the acquisition session state machine.
//!
//! Exposures are kept in the tens of milliseconds so the whole file runs in
//! well under a few seconds.

use std::sync::Arc;
use std::time::Duration;

use camctl::acquisition::{
    cancel_pair, trigger_channel, AcquisitionConfig, AcquisitionSession, Binning,
    FailedFrameAccounting, FailurePolicy, FrameCount, Roi, SessionState, TriggerMode,
    TriggerReceiver,
};
use camctl::error::CamError;
use camctl::hardware::mock::MockCamera;
use camctl::hardware::{DeviceHandle, PixelType, StreamPhase};
use camctl::parameter::{ParameterTree, ParameterValue};
use tracing_test::traced_test;

async fn setup() -> (Arc<MockCamera>, ParameterTree) {
    let camera = Arc::new(MockCamera::new(0));
    let handle = Arc::new(DeviceHandle::new(camera.clone()));
    let tree = ParameterTree::build(handle).await.unwrap();
    (camera, tree)
}

fn fast(frames: u64) -> AcquisitionConfig {
    AcquisitionConfig {
        frame_count: FrameCount::new(frames),
        exposure: Duration::from_millis(10),
        ..AcquisitionConfig::default()
    }
}

/// Make the next `count` buffers fail.
async fn force_failed_buffers(tree: &ParameterTree, count: i64) {
    tree.set("ForceFailedBufferCount", ParameterValue::Int(count))
        .await
        .unwrap();
    tree.invoke("ForceFailedBuffer").await.unwrap();
}

// =============================================================================
// Happy paths
// =============================================================================

#[tokio::test]
async fn test_internal_trigger_acquisition() {
    let (camera, tree) = setup().await;
    let config = AcquisitionConfig {
        exposure: Duration::from_millis(20),
        ..fast(3)
    };

    let (_cancel, token) = cancel_pair();
    let report = AcquisitionSession::new(&tree, config)
        .unwrap()
        .acquire(token, TriggerReceiver::closed())
        .await
        .unwrap();

    assert_eq!(report.final_state, SessionState::Closed);
    assert_eq!(report.frames_grabbed, 3);
    assert_eq!(report.failed_frames, 0);
    assert!(!report.cancelled);
    assert!(report.elapsed >= Duration::from_millis(60), "elapsed {:?}", report.elapsed);
    assert!(report.started_at.is_some());

    let slots: Vec<u64> = report.frames.iter().map(|f| f.slot).collect();
    assert_eq!(slots, vec![0, 1, 2]);
    for record in &report.frames {
        assert_eq!(record.shape(), (1040, 1024));
        assert_eq!(record.pixel_type, PixelType::U8);
    }
    assert!(report
        .frames
        .windows(2)
        .all(|w| w[0].since_start <= w[1].since_start));

    assert_eq!(tree.device().stream_phase(), StreamPhase::Idle);
    assert!(!camera.is_streaming());
}

#[tokio::test]
async fn test_configure_programs_the_device() {
    let (_camera, tree) = setup().await;
    let config = AcquisitionConfig {
        exposure: Duration::from_millis(20),
        latency: Duration::from_millis(30),
        pixel_format: "Mono12".into(),
        ..fast(1)
    };

    let mut session = AcquisitionSession::new(&tree, config).unwrap();
    session.open().await.unwrap();
    session.configure().await.unwrap();
    assert_eq!(session.state(), SessionState::Configured);

    let exposure = tree.get("ExposureTime").unwrap().as_float().unwrap();
    assert!((exposure - 20_000.0).abs() < 1e-6);
    assert_eq!(
        tree.get("AcquisitionFrameRateEnable").unwrap(),
        ParameterValue::Bool(true)
    );
    let rate = tree.get("AcquisitionFrameRate").unwrap().as_float().unwrap();
    assert!((rate - 20.0).abs() < 1e-9);
    assert_eq!(tree.get("TriggerMode").unwrap(), ParameterValue::Enum("Off".into()));
    assert_eq!(tree.get("AcquisitionMode").unwrap(), ParameterValue::Enum("Continuous".into()));
    assert_eq!(tree.get("PixelFormat").unwrap(), ParameterValue::Enum("Mono12".into()));
    // The refresh at the end of configure picks up derived values.
    let resulting = tree.get("ResultingFrameRate").unwrap().as_float().unwrap();
    assert!((resulting - 20.0).abs() < 1e-6);

    session.close().await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_roi_binning_and_pixel_format_shape_frames() {
    let (_camera, tree) = setup().await;
    let config = AcquisitionConfig {
        roi: Some(Roi {
            x: 0,
            y: 0,
            width: 512,
            height: 256,
        }),
        binning: Binning {
            horizontal: 2,
            vertical: 2,
        },
        pixel_format: "Mono16".into(),
        ..fast(1)
    };

    let (_cancel, token) = cancel_pair();
    let report = AcquisitionSession::new(&tree, config)
        .unwrap()
        .acquire(token, TriggerReceiver::closed())
        .await
        .unwrap();
    assert_eq!(report.frames[0].shape(), (256, 512));
    assert_eq!(report.frames[0].pixel_type, PixelType::U16);
    assert_eq!(tree.get("WidthMax").unwrap(), ParameterValue::Int(512));

    // The next session resets binning and returns to full frame.
    let (_cancel, token) = cancel_pair();
    let report = AcquisitionSession::new(&tree, fast(1))
        .unwrap()
        .acquire(token, TriggerReceiver::closed())
        .await
        .unwrap();
    assert_eq!(report.frames[0].shape(), (1040, 1024));
}

#[tokio::test]
async fn test_frame_observer_sees_every_frame() {
    let (_camera, tree) = setup().await;
    let mut seen = Vec::new();

    let (_cancel, token) = cancel_pair();
    let report = AcquisitionSession::new(&tree, fast(2))
        .unwrap()
        .with_frame_observer(|record, frame| seen.push((record.slot, frame.data.len())))
        .acquire(token, TriggerReceiver::closed())
        .await
        .unwrap();

    assert_eq!(report.frames_grabbed, 2);
    assert_eq!(seen, vec![(0, 1040 * 1024), (1, 1040 * 1024)]);
}

#[tokio::test]
async fn test_software_trigger_one_frame_per_trigger() {
    let (camera, tree) = setup().await;
    let config = AcquisitionConfig {
        trigger_mode: TriggerMode::Software,
        ..fast(2)
    };

    let (triggers, receiver) = trigger_channel();
    assert!(triggers.fire());
    assert!(triggers.fire());

    let (_cancel, token) = cancel_pair();
    let report = AcquisitionSession::new(&tree, config)
        .unwrap()
        .acquire(token, receiver)
        .await
        .unwrap();

    assert_eq!(report.frames_grabbed, 2);
    assert!(!report.cancelled);
    assert_eq!(report.final_state, SessionState::Closed);
    assert_eq!(camera.frames_produced(), 2);
    assert_eq!(tree.get("TriggerMode").unwrap(), ParameterValue::Enum("On".into()));
    assert_eq!(tree.get("TriggerSource").unwrap(), ParameterValue::Enum("Software".into()));
}

// =============================================================================
// Cancellation and end of triggers
// =============================================================================

#[tokio::test]
async fn test_cancel_during_trigger_wait_releases_device() {
    let (camera, tree) = setup().await;
    let config = AcquisitionConfig {
        trigger_mode: TriggerMode::Software,
        ..fast(5)
    };

    let (_triggers, receiver) = trigger_channel();
    let (cancel, token) = cancel_pair();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let report = AcquisitionSession::new(&tree, config)
        .unwrap()
        .acquire(token, receiver)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.frames_grabbed, 0);
    assert_eq!(report.final_state, SessionState::Closed);
    assert!(report.elapsed >= Duration::from_millis(40));
    assert_eq!(camera.frames_produced(), 0);
    assert_eq!(tree.device().stream_phase(), StreamPhase::Idle);

    // The grant is free again.
    let mut next = AcquisitionSession::new(&tree, fast(1)).unwrap();
    next.open().await.unwrap();
    next.close().await.unwrap();
}

#[tokio::test]
async fn test_cancel_during_unbounded_run() {
    let (_camera, tree) = setup().await;
    let (cancel, token) = cancel_pair();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let report = AcquisitionSession::new(&tree, fast(0))
        .unwrap()
        .acquire(token, TriggerReceiver::closed())
        .await
        .unwrap();
    assert!(report.cancelled);
    assert!(report.frames_grabbed >= 1);
    assert_eq!(report.final_state, SessionState::Closed);
}

#[tokio::test]
async fn test_closed_trigger_channel_ends_run() {
    let (_camera, tree) = setup().await;
    let config = AcquisitionConfig {
        trigger_mode: TriggerMode::Software,
        ..fast(3)
    };

    let (triggers, receiver) = trigger_channel();
    triggers.fire();
    drop(triggers);

    let (_cancel, token) = cancel_pair();
    let report = AcquisitionSession::new(&tree, config)
        .unwrap()
        .acquire(token, receiver)
        .await
        .unwrap();
    assert_eq!(report.frames_grabbed, 1);
    assert_eq!(report.final_state, SessionState::Closed);
}

// =============================================================================
// Exclusivity and lifecycle
// =============================================================================

#[tokio::test]
async fn test_second_session_is_busy() {
    let (_camera, tree) = setup().await;

    let mut first = AcquisitionSession::new(&tree, fast(1)).unwrap();
    first.open().await.unwrap();
    assert_eq!(tree.device().stream_phase(), StreamPhase::Granted);

    let mut second = AcquisitionSession::new(&tree, fast(1)).unwrap();
    let err = second.open().await.unwrap_err();
    assert!(matches!(err, CamError::DeviceBusy(_)));
    assert_eq!(second.state(), SessionState::Failed);

    // The failed session did not disturb the holder.
    assert_eq!(tree.device().stream_phase(), StreamPhase::Granted);
    first.close().await.unwrap();
    assert_eq!(tree.device().stream_phase(), StreamPhase::Idle);
}

#[tokio::test]
async fn test_out_of_order_calls_are_rejected() {
    let (_camera, tree) = setup().await;
    let mut session = AcquisitionSession::new(&tree, fast(1)).unwrap();

    assert!(matches!(session.configure().await, Err(CamError::Configuration(_))));
    assert!(matches!(session.start().await, Err(CamError::Configuration(_))));
    assert_eq!(session.state(), SessionState::Created);

    session.open().await.unwrap();
    assert!(matches!(session.open().await, Err(CamError::Configuration(_))));
    assert_eq!(session.state(), SessionState::Opened);

    session.close().await.unwrap();
    // Closed sessions stay closed.
    session.close().await.unwrap();
    assert!(matches!(session.open().await, Err(CamError::Configuration(_))));
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_dropping_an_open_session_frees_the_grant() {
    let (_camera, tree) = setup().await;
    let mut session = AcquisitionSession::new(&tree, fast(1)).unwrap();
    let states = session.watch_state();
    session.open().await.unwrap();
    drop(session);

    assert_eq!(*states.borrow(), SessionState::Failed);
    assert_eq!(tree.device().stream_phase(), StreamPhase::Idle);
}

#[tokio::test]
async fn test_invalid_config_is_rejected_up_front() {
    let (_camera, tree) = setup().await;
    let config = AcquisitionConfig {
        exposure: Duration::ZERO,
        ..fast(1)
    };
    assert!(matches!(
        AcquisitionSession::new(&tree, config),
        Err(CamError::Configuration(_))
    ));
}

#[tokio::test]
async fn test_rejected_geometry_fails_configure() {
    let (_camera, tree) = setup().await;
    let config = AcquisitionConfig {
        roi: Some(Roi {
            x: 512,
            y: 0,
            width: 1024,
            height: 64,
        }),
        ..fast(1)
    };

    let mut session = AcquisitionSession::new(&tree, config).unwrap();
    session.open().await.unwrap();
    let err = session.configure().await.unwrap_err();
    assert!(matches!(err, CamError::Configuration(_)));
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(tree.device().stream_phase(), StreamPhase::Idle);
}

#[tokio::test]
async fn test_state_watch_is_monotonic() {
    let (_camera, tree) = setup().await;
    let session = AcquisitionSession::new(&tree, fast(2)).unwrap();

    let mut states = session.watch_state();
    let collector = tokio::spawn(async move {
        let mut seen = vec![*states.borrow_and_update()];
        while states.changed().await.is_ok() {
            seen.push(*states.borrow_and_update());
        }
        seen
    });

    let (_cancel, token) = cancel_pair();
    session
        .acquire(token, TriggerReceiver::closed())
        .await
        .unwrap();

    let seen = collector.await.unwrap();
    assert_eq!(seen.first(), Some(&SessionState::Created));
    assert_eq!(seen.last(), Some(&SessionState::Closed));
    assert!(seen.windows(2).all(|w| w[0] < w[1]), "states went backwards: {:?}", seen);
}

// =============================================================================
// Failed frames
// =============================================================================

#[tokio::test]
async fn test_failed_buffer_aborts_by_default() {
    let (camera, tree) = setup().await;
    force_failed_buffers(&tree, 1).await;

    let mut session = AcquisitionSession::new(&tree, fast(3)).unwrap();
    session.open().await.unwrap();
    session.configure().await.unwrap();
    session.start().await.unwrap();

    let (_cancel, mut token) = cancel_pair();
    let mut triggers = TriggerReceiver::closed();
    let err = session.run(&mut token, &mut triggers).await.unwrap_err();

    assert!(matches!(err, CamError::DeviceIo(_)));
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(session.failed_frames(), 1);
    assert_eq!(session.frames_grabbed(), 0);
    assert_eq!(tree.device().stream_phase(), StreamPhase::Idle);
    assert!(!camera.is_streaming());
}

#[tokio::test]
async fn test_failed_frames_consume_slots_when_skipped() {
    let (_camera, tree) = setup().await;
    force_failed_buffers(&tree, 2).await;
    let config = AcquisitionConfig {
        failure_policy: FailurePolicy::Skip,
        ..fast(3)
    };

    let (_cancel, token) = cancel_pair();
    let report = AcquisitionSession::new(&tree, config)
        .unwrap()
        .acquire(token, TriggerReceiver::closed())
        .await
        .unwrap();

    assert_eq!(report.failed_frames, 2);
    assert_eq!(report.frames_grabbed, 1);
    assert_eq!(report.frames_grabbed + report.failed_frames, 3);
    assert_eq!(report.frames[0].slot, 2);
    assert_eq!(report.final_state, SessionState::Closed);
}

#[tokio::test]
async fn test_retry_accounting_repeats_the_slot() {
    let (_camera, tree) = setup().await;
    force_failed_buffers(&tree, 2).await;
    let config = AcquisitionConfig {
        failure_policy: FailurePolicy::Skip,
        failed_frame_accounting: FailedFrameAccounting::Retry { max_attempts: 3 },
        ..fast(2)
    };

    let (_cancel, token) = cancel_pair();
    let report = AcquisitionSession::new(&tree, config)
        .unwrap()
        .acquire(token, TriggerReceiver::closed())
        .await
        .unwrap();

    assert_eq!(report.failed_frames, 2);
    assert_eq!(report.frames_grabbed, 2);
    let slots: Vec<u64> = report.frames.iter().map(|f| f.slot).collect();
    assert_eq!(slots, vec![0, 1]);
}

#[tokio::test]
async fn test_retry_gives_up_after_max_attempts() {
    let (_camera, tree) = setup().await;
    force_failed_buffers(&tree, 2).await;
    let config = AcquisitionConfig {
        failure_policy: FailurePolicy::Skip,
        failed_frame_accounting: FailedFrameAccounting::Retry { max_attempts: 2 },
        ..fast(2)
    };

    let (_cancel, token) = cancel_pair();
    let err = AcquisitionSession::new(&tree, config)
        .unwrap()
        .acquire(token, TriggerReceiver::closed())
        .await
        .unwrap_err();
    assert!(matches!(err, CamError::DeviceIo(_)));
    assert_eq!(tree.device().stream_phase(), StreamPhase::Idle);
}

#[tokio::test]
#[traced_test]
async fn test_timeouts_are_counted() {
    let (_camera, tree) = setup().await;
    let config = AcquisitionConfig {
        exposure: Duration::from_millis(300),
        frame_timeout: Some(Duration::from_millis(20)),
        failure_policy: FailurePolicy::Skip,
        ..fast(2)
    };

    let (_cancel, token) = cancel_pair();
    let report = AcquisitionSession::new(&tree, config)
        .unwrap()
        .acquire(token, TriggerReceiver::closed())
        .await
        .unwrap();
    assert_eq!(report.frames_grabbed, 0);
    assert_eq!(report.failed_frames, 2);
    assert!(report.elapsed < Duration::from_millis(300));
    assert!(logs_contain("grab timed out"));
    assert!(logs_contain("timeout=20ms"));
}

#[tokio::test]
async fn test_communication_loss_while_streaming_fails_session() {
    let (camera, tree) = setup().await;
    let mut session = AcquisitionSession::new(&tree, fast(3)).unwrap();
    session.open().await.unwrap();
    session.configure().await.unwrap();
    session.start().await.unwrap();

    camera.faults().drop_communication();
    let (_cancel, mut token) = cancel_pair();
    let mut triggers = TriggerReceiver::closed();
    let err = session.run(&mut token, &mut triggers).await.unwrap_err();
    assert!(matches!(err, CamError::DeviceIo(_)));
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(tree.device().stream_phase(), StreamPhase::Idle);
    assert!(!camera.is_streaming());
}
