//! Loading and saving system configuration files.

use mmcore::{Core, CoreError, CoreEvent};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn fixture() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/demo.cfg")
}

fn loaded_events(core: &Core) -> Arc<Mutex<usize>> {
    let count = Arc::new(Mutex::new(0));
    let sink = count.clone();
    core.register_observer(Arc::new(move |e: &CoreEvent| {
        if *e == CoreEvent::SystemConfigurationLoaded {
            *sink.lock() += 1;
        }
    }));
    count
}

#[test]
fn test_load_demo_configuration() {
    let core = Core::new();
    let loaded = loaded_events(&core);
    core.load_system_configuration(fixture()).unwrap();
    assert_eq!(*loaded.lock(), 1);

    assert_eq!(
        core.get_loaded_devices(),
        vec!["Core", "Camera", "Shutter", "Z", "XY", "Wheel", "Objective"]
    );
    assert_eq!(core.get_camera_device(), "Camera");
    assert_eq!(core.get_shutter_device(), "Shutter");
    assert_eq!(core.get_focus_device(), "Z");
    assert_eq!(core.get_xy_stage_device(), "XY");
    assert_eq!(core.get_channel_group(), "Channel");
    assert_eq!(core.get_timeout_ms(), 5000);

    assert_eq!(core.get_image_width().unwrap(), 256);
    assert_eq!(core.get_image_height().unwrap(), 128);
    // System/Startup was applied after the replay
    assert_eq!(core.get_property("Camera", "Gain").unwrap(), "1");

    assert_eq!(&core.get_state_labels("Wheel").unwrap()[..3], ["DAPI", "FITC", "TRITC"]);
    assert_eq!(core.get_state_from_label("Objective", "40X").unwrap(), 1);

    assert_eq!(core.get_available_config_groups(), vec!["Camera", "Channel", "System"]);
    assert_eq!(core.get_available_configs("Channel").unwrap(), vec!["DAPI", "FITC"]);
    core.set_config("Channel", "FITC").unwrap();
    assert_eq!(core.get_state("Wheel").unwrap(), 1);
    assert_eq!(core.get_exposure().unwrap(), 20.0);
    assert_eq!(core.get_current_config("Channel").unwrap(), "FITC");

    assert_eq!(core.get_current_pixel_size_config(), "Res10x");
    assert!((core.get_pixel_size_um() - 0.65).abs() < 1e-12);
    assert_eq!(core.get_pixel_size_affine(), [0.65, 0.0, 0.0, 0.0, 0.65, 0.0]);
    core.set_state_label("Objective", "40X").unwrap();
    assert_eq!(core.get_current_pixel_size_config(), "Res40x");
}

#[test]
fn test_loading_replaces_previous_setup() {
    let core = Core::new();
    core.load_device("Old", "DemoCamera", "DShutter").unwrap();
    core.define_config("Leftover", "Preset").unwrap();

    core.load_system_configuration(fixture()).unwrap();
    assert!(!core.get_loaded_devices().contains(&"Old".to_string()));
    assert!(!core.is_group_defined("Leftover"));
}

#[test]
fn test_save_and_reload_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let saved = dir.path().join("saved.cfg");

    let core = Core::new();
    core.load_system_configuration(fixture()).unwrap();
    core.define_config("Empty", "Nothing").unwrap();
    core.define_config_group("Bare").unwrap();
    core.define_config_setting("Channel", "Cy5", "Wheel", "Label", "State-5")
        .unwrap();
    core.set_auto_shutter(false);
    core.save_system_configuration(&saved).unwrap();

    let text = std::fs::read_to_string(&saved).unwrap();
    assert!(text.starts_with("# System configuration"));
    assert!(text.contains("Device,Camera,DemoCamera,DCam"));
    assert!(text.contains("ConfigGroup,Bare\n"));
    assert!(text.contains("ConfigGroup,Empty,Nothing\n"));
    assert!(text.contains("Property,Core,Initialize,1"));

    let copy = Core::new();
    copy.load_system_configuration(&saved).unwrap();
    assert_eq!(copy.get_loaded_devices(), core.get_loaded_devices());
    assert_eq!(copy.get_available_config_groups(), core.get_available_config_groups());
    for group in core.get_available_config_groups() {
        for preset in core.get_available_configs(&group).unwrap() {
            assert_eq!(
                copy.get_config_data(&group, &preset).unwrap(),
                core.get_config_data(&group, &preset).unwrap(),
                "{group}.{preset}"
            );
        }
    }
    assert_eq!(copy.get_state_labels("Wheel").unwrap(), core.get_state_labels("Wheel").unwrap());
    assert_eq!(
        copy.get_available_pixel_size_configs(),
        core.get_available_pixel_size_configs()
    );
    assert_eq!(copy.get_pixel_size_um_by_id("Res40x").unwrap(), 0.1625);
    assert_eq!(copy.get_camera_device(), "Camera");
    assert_eq!(copy.get_channel_group(), "Channel");
    assert!(!copy.get_auto_shutter());
}

#[test]
fn test_failed_line_unloads_everything() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.cfg");
    std::fs::write(
        &path,
        "Device,Camera,DemoCamera,DCam\nProperty,Core,Initialize,1\nProperty,Camera,Binning,3\n",
    )
    .unwrap();

    let core = Core::new();
    let loaded = loaded_events(&core);
    let err = core.load_system_configuration(&path).unwrap_err();
    assert!(matches!(err, CoreError::ConfigFile { line: 3, .. }));
    assert_eq!(core.get_loaded_devices(), vec!["Core"]);
    assert_eq!(*loaded.lock(), 0);
}

#[test]
fn test_initialization_failure_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("init.cfg");
    std::fs::write(
        &path,
        "Device,Camera,DemoCamera,DCam\nProperty,Camera,FailInitialize,1\nProperty,Core,Initialize,1\n",
    )
    .unwrap();

    let core = Core::new();
    let err = core.load_system_configuration(&path).unwrap_err();
    assert!(matches!(err, CoreError::ConfigFile { line: 3, .. }));
    assert_eq!(core.get_loaded_devices(), vec!["Core"]);
}

#[test]
fn test_missing_file() {
    let core = Core::new();
    core.load_device("Camera", "DemoCamera", "DCam").unwrap();
    let err = core
        .load_system_configuration("/nonexistent/mmcore/none.cfg")
        .unwrap_err();
    assert!(matches!(err, CoreError::Io(_)));
    // an unreadable file leaves the current setup alone
    assert_eq!(core.get_loaded_devices(), vec!["Core", "Camera"]);
}
