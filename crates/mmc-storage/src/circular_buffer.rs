//! Slot-based circular buffer for sequence acquisition.
//!
//! Frames from the acquisition producer are queued here until a consumer pops
//! them (FIFO) or peeks at the newest ones (live preview). The buffer holds a
//! fixed number of equal-size slots computed from the memory footprint and
//! the current frame geometry.
//!
//! # Architecture
//!
//! Two monotonically increasing cursors index the slot ring:
//!
//! - `write_head`: sequence number of the next frame to insert. Only the
//!   producer advances it, under `insert_lock`.
//! - `read_tail`: sequence number of the next frame to pop. Only consumers
//!   advance it, under `pop_lock`.
//!
//! `write_head - read_tail` is the number of pending frames. A slot is
//! addressed by `sequence % capacity`.
//!
//! # Thread Safety
//!
//! - **Insert**: never blocks on consumers. When the ring is full the insert
//!   fails with `BufferOverflow` and the sticky overflow flag is set.
//! - **Pop**: never blocks on the producer. A consumer takes the frame out of
//!   its slot before publishing the new `read_tail`, so the producer can only
//!   reuse a slot once it is empty.
//! - **Peek**: lock-free on the cursors; a peek that races with a pop of the
//!   same frame reports `BufferEmpty`.
//! - **Resize**: the slot ring is replaced under the `RwLock` write lock, and
//!   only while the buffer is empty and no acquisition is active.

use mmc_core::error::{CoreError, CoreResult};
use mmc_core::image::{FrameGeometry, ImageFrame};
use mmc_core::limits::DEFAULT_BUFFER_FOOTPRINT_MB;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// One generation of slots, sized for a single frame geometry.
struct SlotRing {
    geometry: Option<FrameGeometry>,
    frame_bytes: usize,
    slots: Vec<Mutex<Option<ImageFrame>>>,
    write_head: AtomicU64,
    read_tail: AtomicU64,
    insert_lock: Mutex<()>,
    pop_lock: Mutex<()>,
    overflow: AtomicBool,
}

impl SlotRing {
    fn empty() -> Self {
        Self::with_slots(None, 0, 0)
    }

    fn with_slots(geometry: Option<FrameGeometry>, frame_bytes: usize, count: usize) -> Self {
        Self {
            geometry,
            frame_bytes,
            slots: (0..count).map(|_| Mutex::new(None)).collect(),
            write_head: AtomicU64::new(0),
            read_tail: AtomicU64::new(0),
            insert_lock: Mutex::new(()),
            pop_lock: Mutex::new(()),
            overflow: AtomicBool::new(false),
        }
    }

    fn capacity(&self) -> u64 {
        self.slots.len() as u64
    }

    fn pending(&self) -> u64 {
        let tail = self.read_tail.load(Ordering::Acquire);
        let head = self.write_head.load(Ordering::Acquire);
        head.saturating_sub(tail)
    }

    fn slot(&self, sequence: u64) -> &Mutex<Option<ImageFrame>> {
        &self.slots[(sequence % self.capacity()) as usize]
    }
}

/// Bounded FIFO of frames with newest-first peeking.
///
/// # Example
///
/// ```rust
/// use mmc_core::image::{FrameGeometry, ImageFrame};
/// use mmc_core::metadata::Metadata;
/// use mmc_storage::CircularBuffer;
///
/// let buffer = CircularBuffer::new();
/// buffer.set_memory_footprint(1).unwrap();
/// let geometry = FrameGeometry::new(64, 64, 2, 1);
/// buffer.initialize(geometry).unwrap();
/// assert_eq!(buffer.total_capacity(), 128);
///
/// buffer.insert(ImageFrame::new(geometry, vec![0u8; 64 * 64 * 2], Metadata::new())).unwrap();
/// assert_eq!(buffer.remaining(), 1);
/// let frame = buffer.pop_next().unwrap();
/// assert_eq!(frame.sequence, 0);
/// ```
pub struct CircularBuffer {
    footprint_mb: AtomicU64,
    ring: RwLock<Arc<SlotRing>>,
    active: AtomicBool,
}

impl Default for CircularBuffer {
    fn default() -> Self {
        Self::with_footprint(DEFAULT_BUFFER_FOOTPRINT_MB)
    }
}

impl CircularBuffer {
    /// Creates a buffer with the default footprint and no geometry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a buffer with `megabytes` of footprint and no geometry.
    pub fn with_footprint(megabytes: u64) -> Self {
        Self {
            footprint_mb: AtomicU64::new(megabytes),
            ring: RwLock::new(Arc::new(SlotRing::empty())),
            active: AtomicBool::new(false),
        }
    }

    fn ring(&self) -> Arc<SlotRing> {
        self.ring.read().clone()
    }

    /// Marks whether an acquisition is feeding the buffer.
    ///
    /// While active, geometry and footprint changes are rejected.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// True while an acquisition is feeding the buffer.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn ensure_idle(&self, ring: &SlotRing, action: &str) -> CoreResult<()> {
        if self.is_active() {
            return Err(CoreError::BufferBusy(format!(
                "cannot {action} during sequence acquisition"
            )));
        }
        let pending = ring.pending();
        if pending > 0 {
            return Err(CoreError::BufferBusy(format!(
                "cannot {action} while {pending} frames are pending"
            )));
        }
        Ok(())
    }

    /// Sets the memory footprint and recomputes the slot count for the
    /// current geometry, if one is known.
    pub fn set_memory_footprint(&self, megabytes: u64) -> CoreResult<()> {
        if megabytes == 0 {
            return Err(CoreError::InvalidArgument(
                "circular buffer footprint must be at least 1 MB".into(),
            ));
        }
        let mut guard = self.ring.write();
        self.ensure_idle(&guard, "resize the circular buffer")?;
        if let Some(geometry) = guard.geometry {
            *guard = Arc::new(build_ring(geometry, megabytes)?);
        }
        self.footprint_mb.store(megabytes, Ordering::Release);
        tracing::debug!(megabytes, slots = guard.capacity(), "circular buffer footprint set");
        Ok(())
    }

    /// Configured footprint in megabytes.
    pub fn memory_footprint_mb(&self) -> u64 {
        self.footprint_mb.load(Ordering::Acquire)
    }

    /// Sizes the slots for `geometry` and empties the buffer.
    ///
    /// Resets the sequence counter and the overflow flag.
    pub fn initialize(&self, geometry: FrameGeometry) -> CoreResult<()> {
        let mut guard = self.ring.write();
        if self.is_active() {
            return Err(CoreError::BufferBusy(
                "cannot initialize during sequence acquisition".into(),
            ));
        }
        let ring = build_ring(geometry, self.memory_footprint_mb())?;
        tracing::debug!(
            width = geometry.width,
            height = geometry.height,
            bytes_per_pixel = geometry.bytes_per_pixel,
            slots = ring.capacity(),
            "circular buffer initialized"
        );
        *guard = Arc::new(ring);
        Ok(())
    }

    /// Drops the slots and forgets the geometry, as on a new buffer.
    ///
    /// The footprint is kept. Rejected while an acquisition is active.
    pub fn release(&self) -> CoreResult<()> {
        let mut guard = self.ring.write();
        if self.is_active() {
            return Err(CoreError::BufferBusy(
                "cannot release during sequence acquisition".into(),
            ));
        }
        *guard = Arc::new(SlotRing::empty());
        tracing::debug!("circular buffer released");
        Ok(())
    }

    /// Geometry the slots are sized for.
    pub fn geometry(&self) -> Option<FrameGeometry> {
        self.ring().geometry
    }

    /// Queues `frame`, assigning it the next sequence number.
    ///
    /// Never blocks on consumers: a full ring fails with `BufferOverflow` and
    /// sets the overflow flag.
    pub fn insert(&self, mut frame: ImageFrame) -> CoreResult<u64> {
        let ring = self.ring();
        if ring.capacity() == 0 {
            return Err(CoreError::InvalidArgument(
                "circular buffer is not initialized".into(),
            ));
        }
        if frame.pixels.len() != ring.frame_bytes {
            return Err(CoreError::FrameSizeMismatch {
                expected: ring.frame_bytes,
                actual: frame.pixels.len(),
            });
        }

        let _insert = ring.insert_lock.lock();
        let head = ring.write_head.load(Ordering::Acquire);
        let tail = ring.read_tail.load(Ordering::Acquire);
        if head - tail >= ring.capacity() {
            ring.overflow.store(true, Ordering::Release);
            return Err(CoreError::BufferOverflow);
        }
        frame.sequence = head;
        *ring.slot(head).lock() = Some(frame);
        ring.write_head.store(head + 1, Ordering::Release);
        Ok(head)
    }

    /// Removes and returns the oldest pending frame.
    pub fn pop_next(&self) -> CoreResult<ImageFrame> {
        let ring = self.ring();
        let _pop = ring.pop_lock.lock();
        let tail = ring.read_tail.load(Ordering::Acquire);
        let head = ring.write_head.load(Ordering::Acquire);
        if tail >= head {
            return Err(CoreError::BufferEmpty);
        }
        let frame = ring.slot(tail).lock().take();
        ring.read_tail.store(tail + 1, Ordering::Release);
        frame.ok_or(CoreError::BufferEmpty)
    }

    /// Hands the oldest pending frame to `consume` and removes it only if
    /// `consume` succeeds; on error the frame stays at the head of the queue.
    ///
    /// Other consumers wait while `consume` runs.
    pub fn pop_next_with<T>(
        &self,
        consume: impl FnOnce(&ImageFrame) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let ring = self.ring();
        let _pop = ring.pop_lock.lock();
        let tail = ring.read_tail.load(Ordering::Acquire);
        if tail >= ring.write_head.load(Ordering::Acquire) {
            return Err(CoreError::BufferEmpty);
        }
        let frame = ring
            .slot(tail)
            .lock()
            .clone()
            .ok_or(CoreError::BufferEmpty)?;
        let out = consume(&frame)?;
        ring.slot(tail).lock().take();
        ring.read_tail.store(tail + 1, Ordering::Release);
        Ok(out)
    }

    /// Newest pending frame, without removing it.
    pub fn peek_last(&self) -> CoreResult<ImageFrame> {
        self.peek_n_before_last(0)
    }

    /// The frame `n` positions before the newest, without removing it.
    ///
    /// Fails with `BufferEmpty` when fewer than `n + 1` frames are pending.
    pub fn peek_n_before_last(&self, n: u64) -> CoreResult<ImageFrame> {
        let ring = self.ring();
        let head = ring.write_head.load(Ordering::Acquire);
        let tail = ring.read_tail.load(Ordering::Acquire);
        if n >= head.saturating_sub(tail) {
            return Err(CoreError::BufferEmpty);
        }
        let sequence = head - 1 - n;
        let guard = ring.slot(sequence).lock();
        match guard.as_ref() {
            Some(frame) if frame.sequence == sequence => Ok(frame.clone()),
            _ => Err(CoreError::BufferEmpty),
        }
    }

    /// Pending frames.
    pub fn remaining(&self) -> u64 {
        self.ring().pending()
    }

    /// Slots available for new frames.
    pub fn free_capacity(&self) -> u64 {
        let ring = self.ring();
        ring.capacity().saturating_sub(ring.pending())
    }

    /// Total slots; 0 until a geometry is known.
    pub fn total_capacity(&self) -> u64 {
        self.ring().capacity()
    }

    /// Bytes of one slot.
    pub fn frame_bytes(&self) -> usize {
        self.ring().frame_bytes
    }

    /// True once an insert found no free slot; cleared by [`clear`](Self::clear)
    /// and [`initialize`](Self::initialize).
    pub fn is_overflowed(&self) -> bool {
        self.ring().overflow.load(Ordering::Acquire)
    }

    /// Drops every pending frame and clears the overflow flag.
    pub fn clear(&self) {
        let ring = self.ring();
        let _insert = ring.insert_lock.lock();
        let _pop = ring.pop_lock.lock();
        for slot in &ring.slots {
            slot.lock().take();
        }
        let head = ring.write_head.load(Ordering::Acquire);
        ring.read_tail.store(head, Ordering::Release);
        ring.overflow.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for CircularBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ring = self.ring();
        f.debug_struct("CircularBuffer")
            .field("footprint_mb", &self.memory_footprint_mb())
            .field("capacity", &ring.capacity())
            .field("write_head", &ring.write_head.load(Ordering::Relaxed))
            .field("read_tail", &ring.read_tail.load(Ordering::Relaxed))
            .field("overflow", &ring.overflow.load(Ordering::Relaxed))
            .finish()
    }
}

fn build_ring(geometry: FrameGeometry, footprint_mb: u64) -> CoreResult<SlotRing> {
    let frame_bytes = geometry.frame_size()?.bytes;
    let footprint_bytes = footprint_mb.saturating_mul(BYTES_PER_MB);
    let count = footprint_bytes / frame_bytes as u64;
    if count == 0 {
        return Err(CoreError::InvalidArgument(format!(
            "{footprint_mb} MB cannot hold a single {frame_bytes}-byte frame"
        )));
    }
    Ok(SlotRing::with_slots(Some(geometry), frame_bytes, count as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmc_core::metadata::Metadata;
    use std::thread;

    fn geometry() -> FrameGeometry {
        FrameGeometry::new(16, 16, 1, 1)
    }

    fn frame(tag: u8) -> ImageFrame {
        ImageFrame::new(
            geometry(),
            vec![tag; 256],
            Metadata::new().with("Tag", tag),
        )
    }

    /// 1 MB of 16x16x1 frames: 4096 slots.
    fn small_buffer() -> CircularBuffer {
        let buffer = CircularBuffer::with_footprint(1);
        buffer.initialize(geometry()).unwrap();
        buffer
    }

    #[test]
    fn test_capacity_zero_before_geometry() {
        let buffer = CircularBuffer::new();
        assert_eq!(buffer.total_capacity(), 0);
        assert_eq!(buffer.free_capacity(), 0);
        assert!(buffer.insert(frame(0)).is_err());
    }

    #[test]
    fn test_footprint_divides_by_frame_size() {
        let buffer = CircularBuffer::new();
        buffer.set_memory_footprint(100).unwrap();
        buffer.initialize(FrameGeometry::new(512, 512, 2, 1)).unwrap();
        assert_eq!(buffer.total_capacity(), 200);
        assert_eq!(buffer.free_capacity(), 200);
    }

    #[test]
    fn test_footprint_too_small_for_one_frame() {
        let buffer = CircularBuffer::with_footprint(1);
        let err = buffer
            .initialize(FrameGeometry::new(2048, 2048, 8, 4))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    #[test]
    fn test_fifo_order_then_empty() {
        let buffer = small_buffer();
        for i in 0..5 {
            assert_eq!(buffer.insert(frame(i)).unwrap(), u64::from(i));
        }
        for i in 0..5u8 {
            let popped = buffer.pop_next().unwrap();
            assert_eq!(popped.sequence, u64::from(i));
            assert_eq!(popped.metadata.get("Tag").unwrap(), i.to_string());
        }
        assert!(matches!(buffer.pop_next(), Err(CoreError::BufferEmpty)));
    }

    #[test]
    fn test_release_forgets_geometry() {
        let buffer = small_buffer();
        buffer.insert(frame(1)).unwrap();
        buffer.set_active(true);
        assert!(matches!(buffer.release(), Err(CoreError::BufferBusy(_))));
        buffer.set_active(false);

        buffer.release().unwrap();
        assert_eq!(buffer.total_capacity(), 0);
        assert_eq!(buffer.remaining(), 0);
        assert!(buffer.geometry().is_none());
        assert_eq!(buffer.memory_footprint_mb(), 1);
        assert!(buffer.insert(frame(2)).is_err());
    }

    #[test]
    fn test_pop_with_keeps_frame_on_error() {
        let buffer = small_buffer();
        buffer.insert(frame(7)).unwrap();
        buffer.insert(frame(8)).unwrap();

        let err = buffer
            .pop_next_with(|_| -> CoreResult<()> { Err(CoreError::Storage("disk full".into())) })
            .unwrap_err();
        assert!(matches!(err, CoreError::Storage(_)));
        assert_eq!(buffer.remaining(), 2);

        let tag = buffer
            .pop_next_with(|f| f.metadata.get("Tag").map(str::to_string))
            .unwrap();
        assert_eq!(tag, "7");
        assert_eq!(buffer.remaining(), 1);
        assert_eq!(buffer.pop_next().unwrap().metadata.get("Tag").unwrap(), "8");
        assert!(matches!(
            buffer.pop_next_with(|_| Ok(())),
            Err(CoreError::BufferEmpty)
        ));
    }

    #[test]
    fn test_peek_newest_first() {
        let buffer = small_buffer();
        for i in 0..4 {
            buffer.insert(frame(i)).unwrap();
        }
        assert_eq!(buffer.peek_last().unwrap().sequence, 3);
        assert_eq!(buffer.peek_n_before_last(1).unwrap().sequence, 2);
        assert!(matches!(
            buffer.peek_n_before_last(4),
            Err(CoreError::BufferEmpty)
        ));
        assert_eq!(buffer.remaining(), 4);
    }

    #[test]
    fn test_overflow_is_sticky_and_keeps_oldest() {
        let buffer = CircularBuffer::with_footprint(1);
        // 1 MB / 512 KiB = 2 slots
        let big = FrameGeometry::new(512, 512, 2, 1);
        buffer.initialize(big).unwrap();
        assert_eq!(buffer.total_capacity(), 2);

        let make = |tag: u8| ImageFrame::new(big, vec![tag; 512 * 512 * 2], Metadata::new());
        buffer.insert(make(0)).unwrap();
        buffer.insert(make(1)).unwrap();
        assert!(matches!(buffer.insert(make(2)), Err(CoreError::BufferOverflow)));
        assert!(buffer.is_overflowed());

        let oldest = buffer.pop_next().unwrap();
        assert_eq!(oldest.pixels[0], 0);
        assert!(buffer.is_overflowed());

        buffer.clear();
        assert!(!buffer.is_overflowed());
        assert_eq!(buffer.remaining(), 0);
    }

    #[test]
    fn test_frame_size_mismatch() {
        let buffer = small_buffer();
        let wrong = ImageFrame::new(geometry(), vec![0u8; 10], Metadata::new());
        assert!(matches!(
            buffer.insert(wrong),
            Err(CoreError::FrameSizeMismatch {
                expected: 256,
                actual: 10
            })
        ));
    }

    #[test]
    fn test_resize_rejected_while_pending_or_active() {
        let buffer = small_buffer();
        buffer.insert(frame(0)).unwrap();
        assert!(matches!(
            buffer.set_memory_footprint(2),
            Err(CoreError::BufferBusy(_))
        ));
        buffer.clear();
        buffer.set_active(true);
        assert!(matches!(
            buffer.set_memory_footprint(2),
            Err(CoreError::BufferBusy(_))
        ));
        assert!(buffer.initialize(geometry()).is_err());
        buffer.set_active(false);
        buffer.set_memory_footprint(2).unwrap();
        assert_eq!(buffer.total_capacity(), 2 * 1024 * 1024 / 256);
    }

    #[test]
    fn test_initialize_resets_sequence() {
        let buffer = small_buffer();
        buffer.insert(frame(0)).unwrap();
        buffer.pop_next().unwrap();
        buffer.initialize(geometry()).unwrap();
        assert_eq!(buffer.insert(frame(1)).unwrap(), 0);
    }

    #[test]
    fn test_concurrent_producer_consumer() {
        let buffer = Arc::new(CircularBuffer::with_footprint(1));
        buffer.initialize(geometry()).unwrap();
        let total = 2_000u64;

        let producer = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                let mut inserted = 0u64;
                while inserted < total {
                    match buffer.insert(frame((inserted % 251) as u8)) {
                        Ok(_) => inserted += 1,
                        Err(CoreError::BufferOverflow) => thread::yield_now(),
                        Err(e) => panic!("unexpected insert error: {e}"),
                    }
                }
            })
        };

        let mut expected = 0u64;
        while expected < total {
            match buffer.pop_next() {
                Ok(f) => {
                    assert_eq!(f.sequence, expected);
                    assert!(f.pixels.iter().all(|b| *b == (expected % 251) as u8));
                    expected += 1;
                }
                Err(CoreError::BufferEmpty) => thread::yield_now(),
                Err(e) => panic!("unexpected pop error: {e}"),
            }
        }
        producer.join().unwrap();
        assert_eq!(buffer.remaining(), 0);
    }
}
