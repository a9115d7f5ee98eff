//! Writing acquired frames through the storage role, and the log surface.

use mmcore::{Core, CoreError, PixelType};
use serial_test::serial;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing_test::traced_test;

fn camera_and_store() -> Core {
    let core = Core::new();
    core.load_device("Camera", "DemoCamera", "DCam").unwrap();
    core.load_device("Store", "DemoCamera", "DStorage").unwrap();
    core.initialize_all_devices().unwrap();
    core.set_camera_device("Camera").unwrap();
    core.set_storage_device("Store").unwrap();
    core.set_exposure(0.0).unwrap();
    core.set_property("Camera", "OnCameraCCDXSize", "64").unwrap();
    core.set_property("Camera", "OnCameraCCDYSize", "32").unwrap();
    core
}

fn single_dataset_dir(root: &Path) -> std::path::PathBuf {
    let mut dirs: Vec<_> = std::fs::read_dir(root)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.is_dir())
        .collect();
    assert_eq!(dirs.len(), 1);
    dirs.remove(0)
}

#[test]
#[serial]
fn test_sequence_to_dataset() {
    let root = tempfile::tempdir().unwrap();
    let core = camera_and_store();

    core.start_sequence_acquisition(3, 0.0, true).unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while core.is_sequence_running() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(core.get_remaining_image_count(), 3);

    let path = root.path().to_string_lossy().into_owned();
    let handle = core
        .create_dataset(&path, "run", &[3, 32, 64], PixelType::Gray16, r#"{"Objective":"10X"}"#)
        .unwrap();
    assert!(core.is_dataset_open(&handle).unwrap());
    for t in 0..3 {
        core.save_next_image(&handle, &[t]).unwrap();
    }
    assert!(matches!(
        core.save_next_image(&handle, &[0]),
        Err(CoreError::BufferEmpty)
    ));
    core.close_dataset(&handle).unwrap();
    assert!(!core.is_dataset_open(&handle).unwrap());

    let dir = single_dataset_dir(root.path());
    let data = std::fs::metadata(dir.join("data.raw")).unwrap();
    assert_eq!(data.len(), 3 * 32 * 64 * 2);

    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.join("summary.json")).unwrap()).unwrap();
    assert_eq!(summary["pixel_type"], "GRAY16");
    assert_eq!(summary["summary"]["Objective"], "10X");

    let frames = std::fs::read_to_string(dir.join("frames.jsonl")).unwrap();
    let records: Vec<serde_json::Value> = frames
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(records.len(), 3);
    for (t, record) in records.iter().enumerate() {
        assert_eq!(record["coordinates"][0], t as u64);
        assert_eq!(record["metadata"]["ImageNumber"], t.to_string());
        assert_eq!(record["metadata"]["Camera"], "Camera");
    }
}

#[test]
fn test_closed_handle_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let core = camera_and_store();
    let path = root.path().to_string_lossy().into_owned();
    let handle = core
        .create_dataset(&path, "once", &[1, 32, 64], PixelType::Gray16, "")
        .unwrap();
    core.close_dataset(&handle).unwrap();

    assert!(matches!(
        core.write_frame(&handle, &[0], &[0u8; 32 * 64 * 2], "{}"),
        Err(CoreError::Storage(_))
    ));
    assert!(matches!(core.close_dataset(&handle), Err(CoreError::Storage(_))));
}

#[test]
fn test_wrong_frame_size_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let core = camera_and_store();
    let path = root.path().to_string_lossy().into_owned();
    let handle = core
        .create_dataset(&path, "small", &[2, 32, 64], PixelType::Gray16, "{}")
        .unwrap();
    let err = core.write_frame(&handle, &[0], &[0u8; 16], "{}").unwrap_err();
    assert!(err.to_string().contains("Store"));
    core.close_dataset(&handle).unwrap();
}

#[test]
#[serial]
fn test_failed_save_keeps_frame_buffered() {
    let root = tempfile::tempdir().unwrap();
    let core = Core::new();
    core.load_device("Camera", "DemoCamera", "DCam").unwrap();
    core.load_device("Store", "DemoCamera", "DStorage").unwrap();
    core.initialize_all_devices().unwrap();
    core.set_camera_device("Camera").unwrap();
    core.set_exposure(0.0).unwrap();
    core.set_property("Camera", "OnCameraCCDXSize", "64").unwrap();
    core.set_property("Camera", "OnCameraCCDYSize", "32").unwrap();

    core.start_sequence_acquisition(2, 0.0, true).unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while core.is_sequence_running() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(core.get_remaining_image_count(), 2);

    // no storage role yet
    assert!(matches!(
        core.save_next_image("nohandle", &[0]),
        Err(CoreError::RoleNotAssigned(_))
    ));
    assert_eq!(core.get_remaining_image_count(), 2);

    core.set_storage_device("Store").unwrap();
    assert!(matches!(
        core.save_next_image("nohandle", &[0]),
        Err(CoreError::Storage(_))
    ));
    assert_eq!(core.get_remaining_image_count(), 2);

    // a dataset whose frames are smaller than the camera's rejects the write
    let path = root.path().to_string_lossy().into_owned();
    let handle = core
        .create_dataset(&path, "tiny", &[2, 8, 8], PixelType::Gray16, "{}")
        .unwrap();
    assert!(matches!(
        core.save_next_image(&handle, &[0]),
        Err(CoreError::Storage(_))
    ));
    assert_eq!(core.get_remaining_image_count(), 2);
    core.close_dataset(&handle).unwrap();

    let handle = core
        .create_dataset(&path, "fits", &[2, 32, 64], PixelType::Gray16, "{}")
        .unwrap();
    core.save_next_image(&handle, &[0]).unwrap();
    assert_eq!(core.get_remaining_image_count(), 1);
    core.close_dataset(&handle).unwrap();
}

#[test]
#[traced_test]
fn test_core_log_reaches_tracing() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("core.log");
    let debug_path = dir.path().join("debug.log");

    let core = Core::new();
    core.set_primary_log_file(&log_path, true).unwrap();
    let secondary = core.start_secondary_log(&debug_path, true, true).unwrap();

    core.load_device("Camera", "DemoCamera", "DCam").unwrap();
    core.log_message("client note", false);
    core.log_message("client detail", true);
    core.stop_secondary_log(secondary).unwrap();
    assert!(matches!(
        core.stop_secondary_log(secondary),
        Err(CoreError::UnknownLogHandle(_))
    ));

    assert!(logs_contain("Device Camera loaded from DemoCamera.DCam"));
    assert!(logs_contain("client note"));

    let primary = std::fs::read_to_string(&log_path).unwrap();
    assert!(primary.contains("[IFO,Core] Device Camera loaded"));
    assert!(primary.contains("[IFO,App] client note"));
    assert!(!primary.contains("client detail"));

    let debug = std::fs::read_to_string(&debug_path).unwrap();
    assert!(debug.contains("[dbg,App] client detail"));
}
