//! Sequence acquisition into the circular buffer.
//!
//! These tests spawn producer threads with real (short) exposures, so they
//! run one at a time.

use mmcore::{AcquisitionState, Core, CoreError, CoreEvent};
use parking_lot::Mutex;
use serial_test::serial;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn demo_core() -> Core {
    let core = Core::new();
    core.load_device("Camera", "DemoCamera", "DCam").unwrap();
    core.initialize_device("Camera").unwrap();
    core.set_camera_device("Camera").unwrap();
    core.set_exposure(1.0).unwrap();
    core
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

fn wait_for_idle(core: &Core) {
    assert!(
        wait_until(|| !core.is_sequence_running()),
        "sequence did not finish"
    );
}

#[test]
#[serial]
fn test_continuous_start_and_stop() {
    let core = demo_core();
    assert_eq!(core.acquisition_state(), AcquisitionState::Idle);

    core.start_continuous_sequence_acquisition(0.0).unwrap();
    assert!(core.is_sequence_running());
    assert!(core.is_sequence_running_for("Camera"));
    assert!(wait_until(|| core.get_remaining_image_count() > 0));

    core.stop_sequence_acquisition().unwrap();
    assert!(!core.is_sequence_running());
    assert_eq!(core.acquisition_state(), AcquisitionState::Idle);
    assert!(core.get_remaining_image_count() > 0);

    // stopping again is harmless
    core.stop_sequence_acquisition().unwrap();
}

#[test]
#[serial]
fn test_finite_sequence_is_fifo() {
    let core = demo_core();
    core.start_sequence_acquisition(5, 0.0, true).unwrap();
    wait_for_idle(&core);
    assert_eq!(core.get_remaining_image_count(), 5);

    let last = core.get_last_image_metadata().unwrap();
    assert_eq!(last.get("ImageNumber").unwrap(), "4");
    let before = core.get_n_before_last_image_metadata(1).unwrap();
    assert_eq!(before.get("ImageNumber").unwrap(), "3");
    assert!(matches!(
        core.get_n_before_last_image_metadata(5),
        Err(CoreError::BufferEmpty)
    ));
    assert!(matches!(
        core.get_n_before_last_image(5),
        Err(CoreError::BufferEmpty)
    ));
    let newest = core.get_last_image().unwrap();
    assert_eq!(core.get_n_before_last_image(0).unwrap(), newest);
    let second_newest = core.get_n_before_last_image(1).unwrap();
    let (_, second_tags) = core.get_n_before_last_image_and_metadata(1).unwrap();
    assert_eq!(second_tags.get("ImageNumber").unwrap(), "3");
    // peeking leaves the queue untouched
    assert_eq!(core.get_remaining_image_count(), 5);

    let mut popped = Vec::new();
    for expected in 0..5u64 {
        let (image, metadata) = core.pop_next_image_and_metadata().unwrap();
        assert_eq!(image.width, 512);
        assert_eq!(metadata.get("ImageNumber").unwrap(), expected.to_string());
        popped.push(image);
    }
    assert_eq!(popped[3], second_newest);
    assert_eq!(popped[4], newest);
    assert!(matches!(core.pop_next_image(), Err(CoreError::BufferEmpty)));
    assert!(!core.is_buffer_overflowed());
}

#[test]
#[serial]
fn test_frame_metadata() {
    let core = demo_core();
    core.start_sequence_acquisition(2, 0.0, true).unwrap();
    wait_for_idle(&core);

    let (_, metadata) = core.pop_next_image_and_metadata().unwrap();
    assert_eq!(metadata.get("Camera").unwrap(), "Camera");
    assert_eq!(metadata.get("PixelType").unwrap(), "GRAY16");
    assert_eq!(metadata.get("Width").unwrap(), "512");
    assert_eq!(metadata.get("Height").unwrap(), "512");
    assert_eq!(metadata.get("Binning").unwrap(), "1");
    assert_eq!(metadata.get("Exposure-ms").unwrap(), "1");
    assert!(metadata.get("ElapsedTime-ms").unwrap().parse::<f64>().is_ok());
    assert!(metadata.contains("TimeReceivedByCore"));
    assert!(metadata.contains("Camera-Mode"));
    assert_eq!(metadata.get("Camera-ScanMode").unwrap(), "1");
    assert!(matches!(
        metadata.get("Nope"),
        Err(CoreError::MetadataKeyNotFound(_))
    ));
}

#[test]
#[serial]
fn test_busy_camera_rejects_conflicting_calls() {
    let core = demo_core();
    core.start_continuous_sequence_acquisition(0.0).unwrap();
    assert_eq!(core.acquisition_state(), AcquisitionState::Running);

    assert!(matches!(
        core.start_sequence_acquisition(3, 0.0, true),
        Err(CoreError::AcquisitionBusy(_))
    ));
    assert!(matches!(core.snap_image(), Err(CoreError::AcquisitionBusy(_))));
    assert!(matches!(
        core.set_roi(0, 0, 64, 64),
        Err(CoreError::AcquisitionBusy(_))
    ));
    assert!(matches!(
        core.unload_device("Camera"),
        Err(CoreError::AcquisitionBusy(_))
    ));
    assert!(matches!(
        core.set_circular_buffer_memory_footprint(10),
        Err(CoreError::BufferBusy(_))
    ));

    core.stop_sequence_acquisition().unwrap();
    core.clear_circular_buffer();
    core.snap_image().unwrap();
    core.unload_device("Camera").unwrap();
}

#[test]
#[serial]
fn test_unload_never_overlaps_a_start() {
    let core = demo_core();
    core.set_exposure(0.0).unwrap();

    std::thread::scope(|scope| {
        let starter = scope.spawn(|| loop {
            match core.start_sequence_acquisition_for("Camera", 1, 0.0, true) {
                Ok(()) => wait_for_idle(&core),
                Err(CoreError::DeviceNotFound(_)) => break,
                Err(_) => std::thread::yield_now(),
            }
        });

        assert!(wait_until(|| match core.unload_device("Camera") {
            Ok(()) => true,
            Err(CoreError::AcquisitionBusy(_)) => false,
            Err(e) => panic!("unexpected unload error: {e}"),
        }));
        assert!(!core.is_sequence_running());
        starter.join().unwrap();
    });
    assert!(!core.is_sequence_running());
    assert_eq!(core.get_loaded_devices(), vec!["Core"]);
}

#[test]
#[serial]
fn test_invalid_arguments() {
    let core = demo_core();
    assert!(matches!(
        core.start_sequence_acquisition(0, 0.0, true),
        Err(CoreError::InvalidArgument(_))
    ));
    assert!(matches!(
        core.start_sequence_acquisition(3, -1.0, true),
        Err(CoreError::InvalidArgument(_))
    ));
    assert!(matches!(
        core.start_sequence_acquisition_for("Ghost", 3, 0.0, true),
        Err(CoreError::DeviceNotFound(_))
    ));
    assert!(!core.is_sequence_running());
}

#[test]
#[serial]
fn test_overflow_stops_when_requested() {
    let core = demo_core();
    core.set_circular_buffer_memory_footprint(1).unwrap();
    core.initialize_circular_buffer().unwrap();
    assert_eq!(core.get_buffer_total_capacity(), 2);

    core.start_sequence_acquisition(10, 0.0, true).unwrap();
    wait_for_idle(&core);
    assert!(core.is_buffer_overflowed());
    assert_eq!(core.get_remaining_image_count(), 2);
    assert_eq!(core.get_buffer_free_capacity(), 0);

    core.clear_circular_buffer();
    assert!(!core.is_buffer_overflowed());
    assert_eq!(core.get_remaining_image_count(), 0);
}

#[test]
#[serial]
fn test_overflow_drops_frames_otherwise() {
    let core = demo_core();
    core.set_circular_buffer_memory_footprint(1).unwrap();

    core.start_sequence_acquisition(6, 0.0, false).unwrap();
    wait_for_idle(&core);
    assert!(core.is_buffer_overflowed());
    assert_eq!(core.get_remaining_image_count(), 2);

    let (_, first) = core.pop_next_image_and_metadata().unwrap();
    assert_eq!(first.get("ImageNumber").unwrap(), "0");
}

#[test]
#[serial]
fn test_camera_error_ends_sequence() {
    let core = demo_core();
    core.set_property("Camera", "FailAfterFrames", "3").unwrap();

    core.start_sequence_acquisition(10, 0.0, true).unwrap();
    wait_for_idle(&core);
    assert_eq!(core.get_remaining_image_count(), 3);
}

#[test]
#[serial]
fn test_stop_times_out_on_slow_camera() {
    let core = demo_core();
    core.set_exposure(1500.0).unwrap();
    core.set_timeout_ms(100).unwrap();
    core.start_continuous_sequence_acquisition(0.0).unwrap();

    assert!(matches!(
        core.stop_sequence_acquisition(),
        Err(CoreError::AcquisitionTimeout { timeout_ms: 100 })
    ));
    assert!(core.is_sequence_running());

    core.set_timeout_ms(10_000).unwrap();
    core.stop_sequence_acquisition().unwrap();
    assert!(!core.is_sequence_running());
    assert_eq!(core.acquisition_state(), AcquisitionState::Idle);
}

#[test]
#[serial]
fn test_start_and_stop_events() {
    let core = demo_core();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    core.register_observer(Arc::new(move |e: &CoreEvent| {
        if e.name().starts_with("Sequence") {
            sink.lock().push(e.clone());
        }
    }));

    core.start_sequence_acquisition(3, 1.0, true).unwrap();
    assert!(wait_until(|| events.lock().len() == 2));
    assert_eq!(
        *events.lock(),
        vec![
            CoreEvent::SequenceAcquisitionStarted {
                camera: "Camera".into()
            },
            CoreEvent::SequenceAcquisitionStopped {
                camera: "Camera".into()
            },
        ]
    );

    // a finished session is reaped by the next start
    core.start_sequence_acquisition(1, 0.0, true).unwrap();
    wait_for_idle(&core);
    assert!(wait_until(|| events.lock().len() == 4));
}

#[test]
#[serial]
fn test_observer_can_stop_from_producer_thread() {
    let core = Arc::new(demo_core());
    let weak = Arc::downgrade(&core);
    core.register_observer(Arc::new(move |e: &CoreEvent| {
        if matches!(e, CoreEvent::SequenceAcquisitionStarted { .. }) {
            if let Some(core) = weak.upgrade() {
                core.stop_sequence_acquisition().unwrap();
            }
        }
    }));

    core.start_continuous_sequence_acquisition(0.0).unwrap();
    wait_for_idle(&core);
    assert_eq!(core.get_remaining_image_count(), 1);
}

#[test]
#[serial]
fn test_prepare_arms_camera() {
    let core = demo_core();
    core.prepare_sequence_acquisition("Camera").unwrap();
    assert_eq!(core.acquisition_state(), AcquisitionState::Armed);

    core.start_sequence_acquisition(1, 0.0, true).unwrap();
    wait_for_idle(&core);
    assert_eq!(core.acquisition_state(), AcquisitionState::Idle);
}

#[test]
#[serial]
fn test_reset_stops_running_sequence() {
    let core = demo_core();
    core.start_continuous_sequence_acquisition(0.0).unwrap();
    core.reset().unwrap();
    assert!(!core.is_sequence_running());
    assert_eq!(core.get_loaded_devices(), vec!["Core"]);
}
