//! Command-line front end for mmcore.
//!
//! Loads a system configuration (or, with the `demo-adapter` feature and no
//! `--config`, a small simulated setup) and runs one command against it.
//!
//! ```bash
//! mmcore devices
//! mmcore --config scope.cfg snap --exposure 20
//! mmcore sequence --count 50 --interval-ms 10
//! mmcore state
//! mmcore save-config scope-copy.cfg
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mmcore::tracing_setup::{self, OutputFormat, TracingConfig};
use mmcore::{Core, CoreError, CoreSettings, DeviceType};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "mmcore")]
#[command(about = "Microscope device control and image acquisition", long_about = None)]
struct Cli {
    /// Settings file (TOML); `MMCORE_*` variables override it
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// System configuration file to load
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Diagnostic output format
    #[arg(long, value_enum, default_value_t = LogFormat::Compact, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl From<LogFormat> for OutputFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Pretty => OutputFormat::Pretty,
            LogFormat::Compact => OutputFormat::Compact,
            LogFormat::Json => OutputFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List adapter modules and loaded devices
    Devices,

    /// Snap one image on the current camera
    Snap {
        /// Exposure in milliseconds
        #[arg(long)]
        exposure: Option<f64>,
    },

    /// Acquire a finite sequence into the circular buffer
    Sequence {
        /// Number of frames
        #[arg(long, default_value = "10")]
        count: u64,

        /// Pause between frames in milliseconds
        #[arg(long, default_value = "0")]
        interval_ms: f64,
    },

    /// Print every property of every device
    State,

    /// Write the current system configuration
    SaveConfig {
        /// Output file
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => CoreSettings::load_from(path),
        None => CoreSettings::load(),
    }
    .context("cannot load settings")?;

    let tracing = TracingConfig::from_settings(&settings)
        .map_err(anyhow::Error::msg)?
        .with_format(cli.log_format.into());
    tracing_setup::init(tracing).map_err(anyhow::Error::msg)?;

    let core = Core::with_settings(&settings)?;
    match &cli.config {
        Some(path) => core
            .load_system_configuration(path)
            .with_context(|| format!("cannot load {}", path.display()))?,
        None => load_default_setup(&core)?,
    }

    match cli.command {
        Commands::Devices => list_devices(&core),
        Commands::Snap { exposure } => snap(&core, exposure),
        Commands::Sequence { count, interval_ms } => sequence(&core, count, interval_ms),
        Commands::State => print_state(&core),
        Commands::SaveConfig { path } => {
            core.save_system_configuration(&path)?;
            println!("Saved {}", path.display());
            Ok(())
        }
    }
}

#[cfg(feature = "demo-adapter")]
fn load_default_setup(core: &Core) -> Result<()> {
    for (label, device) in [("Camera", "DCam"), ("Shutter", "DShutter"), ("Z", "DStage")] {
        core.load_device(label, mmc_driver_demo::MODULE_NAME, device)?;
    }
    core.initialize_all_devices()?;
    core.set_camera_device("Camera")?;
    core.set_shutter_device("Shutter")?;
    core.set_focus_device("Z")?;
    tracing::info!("no --config given, using the simulated demo setup");
    Ok(())
}

#[cfg(not(feature = "demo-adapter"))]
fn load_default_setup(_core: &Core) -> Result<()> {
    bail!("no --config given and the demo adapter is not built in")
}

fn list_devices(core: &Core) -> Result<()> {
    println!("Adapter modules:");
    for module in core.get_device_adapter_names() {
        println!("  {module}");
        let names = core.get_available_devices(&module)?;
        let descriptions = core.get_available_device_descriptions(&module)?;
        for (name, description) in names.iter().zip(&descriptions) {
            println!("    {name:<12} {description}");
        }
    }

    println!("Loaded devices:");
    for label in core.get_loaded_devices() {
        let device_type = core.get_device_type(&label)?;
        if device_type == DeviceType::Core {
            println!("  {label:<12} {}", device_type.label());
            continue;
        }
        println!(
            "  {label:<12} {:<14} {:?}",
            device_type.label(),
            core.get_device_initialization_state(&label)?
        );
    }
    Ok(())
}

fn snap(core: &Core, exposure: Option<f64>) -> Result<()> {
    if let Some(exposure) = exposure {
        core.set_exposure(exposure)?;
    }
    let started = Instant::now();
    core.snap_image()?;
    let image = core.get_image()?;
    println!(
        "{}x{} px, {} channel(s), {} bytes/element, mean {:.1}, {:.1} ms",
        image.width,
        image.height,
        image.channels,
        image.element_bytes,
        image.mean(),
        started.elapsed().as_secs_f64() * 1000.0
    );
    Ok(())
}

fn sequence(core: &Core, count: u64, interval_ms: f64) -> Result<()> {
    if count == 0 {
        bail!("--count must be at least 1");
    }
    let started = Instant::now();
    core.start_sequence_acquisition(count, interval_ms, false)?;

    let mut received = 0u64;
    loop {
        match core.pop_next_image_and_metadata() {
            Ok((_, metadata)) => {
                received += 1;
                tracing::debug!(
                    image = metadata.get("ImageNumber").unwrap_or("?"),
                    elapsed_ms = metadata.get("ElapsedTime-ms").unwrap_or("?"),
                    "frame popped"
                );
            }
            Err(CoreError::BufferEmpty) if core.is_sequence_running() => {
                std::thread::sleep(Duration::from_millis(2));
            }
            Err(CoreError::BufferEmpty) if core.get_remaining_image_count() == 0 => break,
            Err(CoreError::BufferEmpty) => {}
            Err(e) => return Err(e.into()),
        }
    }

    let seconds = started.elapsed().as_secs_f64();
    println!(
        "{received}/{count} frames in {seconds:.2} s ({:.1} fps){}",
        received as f64 / seconds.max(f64::EPSILON),
        if core.is_buffer_overflowed() { ", buffer overflowed" } else { "" }
    );
    Ok(())
}

fn print_state(core: &Core) -> Result<()> {
    for setting in &core.get_system_state()? {
        println!("{},{},{}", setting.device, setting.property, setting.value);
    }
    Ok(())
}
