//! Device registry behavior through the `Core` facade.

use mmcore::{Core, CoreError, DeviceRole, DeviceType, InitializationState};

fn demo_core() -> Core {
    let core = Core::new();
    core.load_device("Camera", "DemoCamera", "DCam").unwrap();
    core.load_device("Shutter", "DemoCamera", "DShutter").unwrap();
    core.load_device("Z", "DemoCamera", "DStage").unwrap();
    core.load_device("Wheel", "DemoCamera", "DWheel").unwrap();
    core.initialize_all_devices().unwrap();
    core
}

#[test]
fn test_load_lists_label_once() {
    let core = Core::new();
    core.load_device("Camera", "DemoCamera", "DCam").unwrap();
    let loaded = core.get_loaded_devices();
    assert_eq!(loaded, vec!["Core", "Camera"]);
    assert_eq!(loaded.iter().filter(|l| *l == "Camera").count(), 1);

    let err = core.load_device("Camera", "DemoCamera", "DStage").unwrap_err();
    assert!(matches!(err, CoreError::AlreadyLoaded(label) if label == "Camera"));
    assert_eq!(core.get_loaded_devices().len(), 2);
}

#[test]
fn test_load_unknown_module_or_device() {
    let core = Core::new();
    assert!(matches!(
        core.load_device("X", "NoSuchModule", "DCam"),
        Err(CoreError::AdapterLoadFailure { .. })
    ));
    assert!(matches!(
        core.load_device("X", "DemoCamera", "DLaser"),
        Err(CoreError::AdapterLoadFailure { .. })
    ));
    assert_eq!(core.get_loaded_devices(), vec!["Core"]);
}

#[test]
fn test_concurrent_initialize_runs_once() {
    let core = Core::new();
    core.load_device("Camera", "DemoCamera", "DCam").unwrap();

    let results: Vec<_> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| core.initialize_device("Camera")))
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    let succeeded = results
        .iter()
        .filter(|r| matches!(r, Ok(InitializationState::InitializedSuccessfully)))
        .count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(CoreError::AlreadyInitialized(_))))
        .count();
    assert_eq!(succeeded, 1);
    assert_eq!(rejected, 7);
}

#[test]
fn test_second_initialize_is_rejected() {
    let core = Core::new();
    core.load_device("Camera", "DemoCamera", "DCam").unwrap();
    assert_eq!(
        core.get_device_initialization_state("Camera").unwrap(),
        InitializationState::Uninitialized
    );
    assert_eq!(
        core.initialize_device("Camera").unwrap(),
        InitializationState::InitializedSuccessfully
    );
    assert!(matches!(
        core.initialize_device("Camera"),
        Err(CoreError::AlreadyInitialized(_))
    ));
    assert_eq!(
        core.get_device_initialization_state("Camera").unwrap(),
        InitializationState::InitializedSuccessfully
    );
}

#[test]
fn test_failed_initialization_is_state_and_retryable() {
    let core = Core::new();
    core.load_device("Camera", "DemoCamera", "DCam").unwrap();
    core.set_property("Camera", "FailInitialize", "1").unwrap();
    assert_eq!(
        core.initialize_device("Camera").unwrap(),
        InitializationState::InitializationFailed
    );
    assert_eq!(core.get_loaded_devices(), vec!["Core", "Camera"]);

    core.set_property("Camera", "FailInitialize", "0").unwrap();
    assert_eq!(
        core.initialize_device("Camera").unwrap(),
        InitializationState::InitializedSuccessfully
    );
}

#[test]
fn test_post_init_property_needs_initialization() {
    let core = Core::new();
    core.load_device("Camera", "DemoCamera", "DCam").unwrap();
    assert!(matches!(
        core.set_property("Camera", "Exposure", "5"),
        Err(CoreError::DeviceNotInitialized(_))
    ));
}

#[test]
fn test_reset_always_leaves_only_core() {
    let core = demo_core();
    core.set_camera_device("Camera").unwrap();
    core.define_config("Channel", "DAPI").unwrap();
    assert!(core.get_loaded_devices().len() > 1);

    core.reset().unwrap();
    assert_eq!(core.get_loaded_devices(), vec!["Core"]);
    assert_eq!(core.get_camera_device(), "");
    assert!(core.get_available_config_groups().is_empty());

    core.reset().unwrap();
    assert_eq!(core.get_loaded_devices(), vec!["Core"]);
}

#[test]
fn test_reset_releases_the_buffer() {
    let core = demo_core();
    core.set_camera_device("Camera").unwrap();
    core.initialize_circular_buffer().unwrap();
    assert!(core.get_buffer_total_capacity() > 0);

    core.reset().unwrap();
    assert_eq!(core.get_buffer_total_capacity(), 0);
    assert_eq!(core.get_remaining_image_count(), 0);
}

#[test]
fn test_unload_unknown_label() {
    let core = Core::new();
    let err = core.unload_device("Ghost").unwrap_err();
    assert!(matches!(err, CoreError::DeviceNotFound(_)));
    assert!(err.to_string().contains("Ghost"));
}

#[test]
fn test_unload_releases_roles_and_label() {
    let core = demo_core();
    core.set_camera_device("Camera").unwrap();
    core.unload_device("Camera").unwrap();
    assert_eq!(core.get_camera_device(), "");
    assert!(!core.get_loaded_devices().contains(&"Camera".to_string()));

    core.load_device("Camera", "DemoCamera", "DCam").unwrap();
    assert_eq!(
        core.get_device_initialization_state("Camera").unwrap(),
        InitializationState::Uninitialized
    );
}

#[test]
fn test_role_setters_check_type() {
    let core = demo_core();
    assert!(matches!(
        core.set_camera_device("Z"),
        Err(CoreError::IncompatibleDevice { .. })
    ));
    assert!(matches!(
        core.set_focus_device("Nope"),
        Err(CoreError::DeviceNotFound(_))
    ));
    core.set_focus_device("Z").unwrap();
    assert_eq!(core.get_focus_device(), "Z");
    assert_eq!(core.get_role(DeviceRole::Focus), "Z");
    core.set_focus_device("").unwrap();
    assert_eq!(core.get_focus_device(), "");
}

#[test]
fn test_device_queries() {
    let core = demo_core();
    assert_eq!(core.get_device_type("Wheel").unwrap(), DeviceType::State);
    assert_eq!(core.get_device_library("Camera").unwrap(), "DemoCamera");
    assert_eq!(core.get_device_name("Camera").unwrap(), "DCam");
    assert_eq!(core.get_device_description("Camera").unwrap(), "Demo camera");
    assert_eq!(
        core.get_loaded_devices_of_type(DeviceType::Stage),
        vec!["Z"]
    );
    assert!(core
        .get_loaded_devices_of_type(DeviceType::Any)
        .contains(&"Shutter".to_string()));
}

#[test]
fn test_wait_for_device_returns_when_idle() {
    let core = demo_core();
    core.set_focus_device("Z").unwrap();
    core.set_position(100.0).unwrap();
    core.wait_for_device("Z").unwrap();
    assert!(!core.device_busy("Z").unwrap());
    core.wait_for_system().unwrap();
}

#[test]
fn test_adapter_discovery() {
    let core = Core::new();
    assert_eq!(core.get_device_adapter_names(), vec!["DemoCamera"]);
    let devices = core.get_available_devices("DemoCamera").unwrap();
    assert!(devices.contains(&"DCam".to_string()));
    let types = core.get_available_device_types("DemoCamera").unwrap();
    assert_eq!(types.len(), devices.len());
    assert_eq!(
        core.get_available_device_descriptions("DemoCamera").unwrap().len(),
        devices.len()
    );
}
