//! Sequence acquisition.
//!
//! # State machine
//!
//! ```text
//! Idle ──prepare──▶ Armed ──start──▶ Running ──stop / count reached──▶ Idle
//!   └─────────────────start──────────────┘
//! ```
//!
//! A running sequence owns one named producer thread. Per frame it asks the
//! camera for one exposure, runs the current image processor, tags the frame
//! and inserts it into the circular buffer. The stop flag is checked between
//! frames only, so at least one frame is always captured and no hardware read
//! is interrupted. `SequenceAcquisitionStarted` and
//! `SequenceAcquisitionStopped` are dispatched on the producer thread.
//!
//! Stopping sets the flag and waits on a condvar for the producer to report
//! completion, bounded by the core timeout, then joins the thread.

use crate::core::{Core, RoleTable};
use crate::logging::LogManager;
use bytes::Bytes;
use mmc_core::device::{Camera, DeviceRole, InitializationState};
use mmc_core::error::{CoreError, CoreResult};
use mmc_core::events::{CoreEvent, EventDispatcher};
use mmc_core::image::{FrameGeometry, ImageFrame, PixelType};
use mmc_core::limits::STOP_POLL_INTERVAL;
use mmc_core::metadata::{tags, Metadata};
use mmc_hardware::DeviceRegistry;
use mmc_storage::CircularBuffer;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Where the acquisition state machine stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    /// No sequence prepared or running.
    Idle,
    /// A camera has been prepared for a sequence.
    Armed,
    /// The producer thread is running.
    Running,
}

/// One-shot completion signal set by the producer on exit.
#[derive(Debug, Default)]
struct Completion {
    done: Mutex<bool>,
    signal: Condvar,
}

impl Completion {
    fn finish(&self) {
        *self.done.lock() = true;
        self.signal.notify_all();
    }

    fn is_done(&self) -> bool {
        *self.done.lock()
    }

    /// Waits up to `timeout`; true once finished.
    fn wait(&self, timeout: Duration) -> bool {
        let mut done = self.done.lock();
        if !*done {
            self.signal.wait_while_for(&mut done, |d| !*d, timeout);
        }
        *done
    }
}

struct Session {
    camera: String,
    stop: Arc<AtomicBool>,
    completion: Arc<Completion>,
    producer: Option<JoinHandle<()>>,
}

/// Session bookkeeping shared by the start/stop operations.
#[derive(Default)]
pub(crate) struct AcquisitionEngine {
    /// Serializes start, prepare and stop.
    pub(crate) control: Mutex<()>,
    session: Mutex<Option<Session>>,
    armed: Mutex<Option<String>>,
}

impl AcquisitionEngine {
    /// Camera of the running sequence.
    pub(crate) fn running_camera(&self) -> Option<String> {
        self.session
            .lock()
            .as_ref()
            .filter(|s| !s.completion.is_done())
            .map(|s| s.camera.clone())
    }

    pub(crate) fn state(&self) -> AcquisitionState {
        if self.running_camera().is_some() {
            AcquisitionState::Running
        } else if self.armed.lock().is_some() {
            AcquisitionState::Armed
        } else {
            AcquisitionState::Idle
        }
    }

    pub(crate) fn disarm(&self, label: &str) {
        let mut armed = self.armed.lock();
        if armed.as_deref() == Some(label) {
            *armed = None;
        }
    }

    pub(crate) fn disarm_all(&self) {
        self.armed.lock().take();
    }

    /// Stops the current session, if any, and reaps its thread.
    pub(crate) fn stop(&self, timeout: Duration) -> CoreResult<()> {
        let producer = {
            let _control = self.control.lock();
            self.halt(timeout)?
        };
        reap(producer);
        Ok(())
    }

    /// Signals the producer and waits for it; returns the thread to join.
    ///
    /// Called with `control` held.
    fn halt(&self, timeout: Duration) -> CoreResult<Option<JoinHandle<()>>> {
        let (stop, completion, on_producer) = {
            let session = self.session.lock();
            let Some(session) = session.as_ref() else {
                return Ok(None);
            };
            let on_producer = session
                .producer
                .as_ref()
                .is_some_and(|h| h.thread().id() == std::thread::current().id());
            (session.stop.clone(), session.completion.clone(), on_producer)
        };
        stop.store(true, Ordering::Release);
        if on_producer {
            // An observer on the producer thread; the loop exits after this frame.
            return Ok(None);
        }
        if !completion.wait(timeout) {
            return Err(CoreError::AcquisitionTimeout {
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        Ok(self.session.lock().take().and_then(|mut s| s.producer.take()))
    }
}

fn reap(producer: Option<JoinHandle<()>>) {
    let Some(handle) = producer else {
        return;
    };
    if handle.thread().id() == std::thread::current().id() {
        return;
    }
    if handle.join().is_err() {
        tracing::error!("acquisition producer thread panicked");
    }
}

/// Runs the current image processor over `pixels`, if one is assigned.
pub(crate) fn process_frame(
    registry: &DeviceRegistry,
    roles: &RoleTable,
    pixels: Bytes,
    geometry: &FrameGeometry,
) -> CoreResult<Bytes> {
    let Some(label) = roles.get(DeviceRole::ImageProcessor) else {
        return Ok(pixels);
    };
    let processor = registry.image_processor(&label)?;
    let mut frame = pixels.to_vec();
    processor
        .process(&mut frame, geometry)
        .map_err(|e| CoreError::device(&label, e))?;
    Ok(Bytes::from(frame))
}

/// State moved onto the producer thread.
struct Producer {
    label: String,
    camera: Arc<dyn Camera>,
    geometry: FrameGeometry,
    pixel_type: PixelType,
    buffer: Arc<CircularBuffer>,
    events: Arc<EventDispatcher>,
    registry: Arc<DeviceRegistry>,
    roles: Arc<RoleTable>,
    log: Arc<LogManager>,
    target: Option<u64>,
    interval: Duration,
    stop_on_overflow: bool,
    stop: Arc<AtomicBool>,
    completion: Arc<Completion>,
}

impl Producer {
    fn run(self) {
        self.events.dispatch(&CoreEvent::SequenceAcquisitionStarted {
            camera: self.label.clone(),
        });
        let (captured, reason) = self.capture();

        if let Err(e) = self.camera.stop_sequence() {
            tracing::warn!(camera = %self.label, error = %format!("{e:#}"), "camera stop_sequence failed");
        }
        self.buffer.set_active(false);
        self.log.core(&format!(
            "Sequence acquisition on {} finished after {captured} frames: {reason}",
            self.label
        ));
        self.completion.finish();
        self.events.dispatch(&CoreEvent::SequenceAcquisitionStopped {
            camera: self.label.clone(),
        });
    }

    fn capture(&self) -> (u64, &'static str) {
        let started = Instant::now();
        let mut captured: u64 = 0;
        loop {
            if captured > 0 && self.stop.load(Ordering::Acquire) {
                return (captured, "stop requested");
            }
            if self.target.is_some_and(|t| captured >= t) {
                return (captured, "sequence complete");
            }

            let pixels = match self.camera.acquire_frame() {
                Ok(pixels) => pixels,
                Err(e) => {
                    tracing::warn!(camera = %self.label, error = %format!("{e:#}"), "camera error ends sequence");
                    return (captured, "camera error");
                }
            };
            let pixels = match process_frame(&self.registry, &self.roles, pixels, &self.geometry) {
                Ok(pixels) => pixels,
                Err(e) => {
                    tracing::warn!(camera = %self.label, error = %e, "image processor error ends sequence");
                    return (captured, "image processor error");
                }
            };
            let metadata = self.metadata(captured, started.elapsed());
            match self.buffer.insert(ImageFrame::new(self.geometry, pixels, metadata)) {
                Ok(_) => {}
                Err(CoreError::BufferOverflow) if self.stop_on_overflow => {
                    tracing::warn!(camera = %self.label, frame = captured, "circular buffer overflow ends sequence");
                    return (captured, "buffer overflow");
                }
                Err(CoreError::BufferOverflow) => {
                    tracing::debug!(camera = %self.label, frame = captured, "circular buffer full, frame dropped");
                }
                Err(e) => {
                    tracing::warn!(camera = %self.label, error = %e, "buffer rejected frame");
                    return (captured, "buffer rejected frame");
                }
            }
            captured += 1;

            if !self.interval.is_zero() && !self.target.is_some_and(|t| captured >= t) {
                self.pause();
            }
        }
    }

    fn metadata(&self, image_number: u64, elapsed: Duration) -> Metadata {
        let mut md = Metadata::new()
            .with(tags::CAMERA, &self.label)
            .with(tags::PIXEL_TYPE, self.pixel_type.tag())
            .with(tags::WIDTH, self.geometry.width)
            .with(tags::HEIGHT, self.geometry.height)
            .with(tags::BINNING, self.camera.binning())
            .with(tags::EXPOSURE_MS, self.camera.exposure())
            .with(tags::IMAGE_NUMBER, image_number)
            .with(
                tags::ELAPSED_TIME_MS,
                format!("{:.3}", elapsed.as_secs_f64() * 1000.0),
            )
            .with(
                tags::TIME_RECEIVED,
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.6f"),
            );
        for (key, value) in self.camera.frame_tags() {
            md.put(format!("{}-{key}", self.label), value);
        }
        md
    }

    /// Sleeps out the frame interval in slices, returning early on stop.
    fn pause(&self) {
        let deadline = Instant::now() + self.interval;
        while !self.stop.load(Ordering::Acquire) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(STOP_POLL_INTERVAL.min(deadline - now));
        }
    }
}

impl Core {
    /// Prepares `camera` for a sequence (Idle → Armed).
    pub fn prepare_sequence_acquisition(&self, camera: &str) -> CoreResult<()> {
        let _control = self.acquisition.control.lock();
        let device = self.sequence_camera(camera)?;
        if let Some(running) = self.acquisition.running_camera() {
            return Err(CoreError::AcquisitionBusy(running));
        }
        device
            .prepare_sequence()
            .map_err(|e| CoreError::device(camera, e))?;
        *self.acquisition.armed.lock() = Some(camera.to_string());
        self.log
            .core_debug(&format!("Sequence acquisition prepared on {camera}"));
        Ok(())
    }

    /// Starts a finite sequence of `count` frames on the current camera.
    pub fn start_sequence_acquisition(
        &self,
        count: u64,
        interval_ms: f64,
        stop_on_overflow: bool,
    ) -> CoreResult<()> {
        let camera = self.require_role(DeviceRole::Camera)?;
        self.start_sequence_acquisition_for(&camera, count, interval_ms, stop_on_overflow)
    }

    /// Starts a finite sequence of `count` frames on `camera`.
    pub fn start_sequence_acquisition_for(
        &self,
        camera: &str,
        count: u64,
        interval_ms: f64,
        stop_on_overflow: bool,
    ) -> CoreResult<()> {
        if count == 0 {
            return Err(CoreError::InvalidArgument(
                "a sequence needs at least one frame".into(),
            ));
        }
        self.start_session(camera, Some(count), interval_ms, stop_on_overflow)
    }

    /// Starts acquiring on the current camera until stopped.
    ///
    /// Frames that find the buffer full are dropped.
    pub fn start_continuous_sequence_acquisition(&self, interval_ms: f64) -> CoreResult<()> {
        let camera = self.require_role(DeviceRole::Camera)?;
        self.start_session(&camera, None, interval_ms, false)
    }

    fn sequence_camera(&self, camera: &str) -> CoreResult<Arc<dyn Camera>> {
        let entry = self.loaded(camera)?;
        let device = self.registry.camera(camera)?;
        if entry.state != InitializationState::InitializedSuccessfully {
            return Err(CoreError::DeviceNotInitialized(camera.to_string()));
        }
        Ok(device)
    }

    fn start_session(
        &self,
        camera: &str,
        target: Option<u64>,
        interval_ms: f64,
        stop_on_overflow: bool,
    ) -> CoreResult<()> {
        if !(interval_ms.is_finite() && interval_ms >= 0.0) {
            return Err(CoreError::InvalidArgument(format!(
                "invalid frame interval {interval_ms} ms"
            )));
        }
        // `unload_device` takes `control` too
        let _control = self.acquisition.control.lock();
        let device = self.sequence_camera(camera)?;
        if let Some(running) = self.acquisition.running_camera() {
            return Err(CoreError::AcquisitionBusy(running));
        }
        reap(self.acquisition.halt(self.timeout())?);

        let geometry = device.geometry();
        let pixel_type = geometry.pixel_type()?;
        self.buffer.initialize(geometry)?;
        device
            .prepare_sequence()
            .map_err(|e| CoreError::device(camera, e))?;
        self.acquisition.armed.lock().take();

        let stop = Arc::new(AtomicBool::new(false));
        let completion = Arc::new(Completion::default());
        let producer = Producer {
            label: camera.to_string(),
            camera: device,
            geometry,
            pixel_type,
            buffer: self.buffer.clone(),
            events: self.events.clone(),
            registry: self.registry.clone(),
            roles: self.roles.clone(),
            log: self.log.clone(),
            target,
            interval: Duration::from_secs_f64(interval_ms / 1000.0),
            stop_on_overflow,
            stop: stop.clone(),
            completion: completion.clone(),
        };

        self.buffer.set_active(true);
        let handle = std::thread::Builder::new()
            .name(format!("mmcore-sequence-{camera}"))
            .spawn(move || producer.run())
            .map_err(|e| {
                self.buffer.set_active(false);
                CoreError::Io(e)
            })?;
        *self.acquisition.session.lock() = Some(Session {
            camera: camera.to_string(),
            stop,
            completion,
            producer: Some(handle),
        });

        match target {
            Some(count) => self.log.core(&format!(
                "Started sequence acquisition of {count} frames on {camera}, interval {interval_ms} ms"
            )),
            None => self.log.core(&format!(
                "Started continuous acquisition on {camera}, interval {interval_ms} ms"
            )),
        }
        Ok(())
    }

    /// Stops the running sequence, waiting up to the core timeout.
    ///
    /// A no-op when nothing is running.
    pub fn stop_sequence_acquisition(&self) -> CoreResult<()> {
        self.acquisition.stop(self.timeout())
    }

    /// Stops the sequence running on `camera`, if any.
    pub fn stop_sequence_acquisition_for(&self, camera: &str) -> CoreResult<()> {
        self.loaded(camera)?;
        if self.acquisition.running_camera().as_deref() == Some(camera) {
            self.stop_sequence_acquisition()?;
        }
        Ok(())
    }

    /// True while a producer thread runs.
    pub fn is_sequence_running(&self) -> bool {
        self.acquisition.running_camera().is_some()
    }

    /// True while a producer thread runs on `camera`.
    pub fn is_sequence_running_for(&self, camera: &str) -> bool {
        self.acquisition.running_camera().as_deref() == Some(camera)
    }

    /// Current acquisition state.
    pub fn acquisition_state(&self) -> AcquisitionState {
        self.acquisition.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_wait_times_out_then_finishes() {
        let completion = Arc::new(Completion::default());
        assert!(!completion.wait(Duration::from_millis(5)));
        let signal = completion.clone();
        let worker = std::thread::spawn(move || signal.finish());
        assert!(completion.wait(Duration::from_secs(5)));
        worker.join().unwrap();
        assert!(completion.is_done());
    }

    #[test]
    fn test_engine_starts_idle() {
        let engine = AcquisitionEngine::default();
        assert_eq!(engine.state(), AcquisitionState::Idle);
        *engine.armed.lock() = Some("Camera".into());
        assert_eq!(engine.state(), AcquisitionState::Armed);
        engine.disarm("Other");
        assert_eq!(engine.state(), AcquisitionState::Armed);
        engine.disarm("Camera");
        assert_eq!(engine.state(), AcquisitionState::Idle);
        assert!(engine.stop(Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn test_process_frame_without_processor_is_identity() {
        let registry = DeviceRegistry::new();
        let roles = RoleTable::default();
        let geometry = FrameGeometry::new(2, 2, 1, 1);
        let pixels = Bytes::from_static(&[1, 2, 3, 4]);
        let out = process_frame(&registry, &roles, pixels.clone(), &geometry).unwrap();
        assert_eq!(out, pixels);
    }
}
