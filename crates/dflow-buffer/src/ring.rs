//! The fixed-capacity SPSC batch ring buffer.
//!
//! Slot ownership moves through a small state machine per slot:
//! `Empty -> Ready -> Consuming -> Empty`. A producer only ever writes a
//! slot it observes as `Empty`; a consumer only ever reads a slot it
//! observes as `Ready` (transitioning it to `Consuming` for the duration of
//! the read so a concurrent `DropTail` reclaim can tell a torn read would
//! result and wait or refuse instead). This is the one place in the
//! workspace that needs `unsafe`: producer and consumer threads hold
//! references into the same arena at the same time by construction, and
//! the state machine above is what makes that sound instead of a data
//! race.
//!
//! `get_head` hands the producer a view of its current slot without
//! blocking; the overflow policy is resolved in `submit`, which is the
//! point at which the ring's fullness (`head - tail == capacity`) actually
//! matters. `get_tail` blocks the consumer until a batch is available.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use dflow_error::Ec;

use crate::batch::{BatchHead, BatchMeta, BatchTail};
use crate::config::{BufferConfig, OverflowPolicy};

const EMPTY: u8 = 0;
const READY: u8 = 1;
const CONSUMING: u8 = 2;

/// Point-in-time counters read off a buffer's [`BufferStats`].
///
/// Field names match the buffer attributes named in the data model:
/// `total_batches`, `dropped_by_producer`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStatsSnapshot {
    /// Batches successfully submitted by the producer.
    pub total_batches: u64,
    /// Batches successfully released by the consumer.
    pub consumed: u64,
    /// Batches the producer dropped, under either overflow policy:
    /// `DropHead` (the incoming batch was discarded) or `DropTail` (the
    /// oldest unconsumed batch was reclaimed/overwritten).
    pub dropped_by_producer: u64,
}

/// Atomic activity counters for a `BatchBuffer`, safe to read from any
/// thread at any time.
#[derive(Debug, Default)]
pub struct BufferStats {
    total_batches: AtomicU64,
    consumed: AtomicU64,
    dropped_by_producer: AtomicU64,
}

impl BufferStats {
    /// Takes a consistent snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> BufferStatsSnapshot {
        BufferStatsSnapshot {
            total_batches: self.total_batches.load(Ordering::Relaxed),
            consumed: self.consumed.load(Ordering::Relaxed),
            dropped_by_producer: self.dropped_by_producer.load(Ordering::Relaxed),
        }
    }
}

struct Slot {
    state: AtomicU8,
    meta: UnsafeCell<BatchMeta>,
}

/// A fixed-capacity single-producer/single-consumer ring buffer of batches.
///
/// Capacity, dtype, and per-slot byte size are fixed at construction
/// (B-I1). The only heap growth this type ever does is the one allocation
/// made in [`BatchBuffer::new`].
pub struct BatchBuffer {
    config: BufferConfig,
    slot_bytes: usize,
    mask: u64,
    arena: UnsafeCell<Box<[u8]>>,
    slots: Box<[Slot]>,
    /// Unbounded producer counter; actual slot index is `head & mask`.
    head: AtomicU64,
    /// Unbounded consumer counter; actual slot index is `tail & mask`.
    tail: AtomicU64,
    running: AtomicBool,
    lock: Mutex<()>,
    not_full: Condvar,
    not_empty: Condvar,
    stats: BufferStats,
}

// SAFETY: the producer only ever touches the slot at `head & mask`, and the
// consumer only ever touches the slot at `tail & mask`. Those coincide only
// when the ring is empty (no data there for the consumer to read) or full
// (in which case the slot's atomic `state` is READY/CONSUMING and the
// producer either waits, or, under DropTail, re-checks `state` itself
// before reclaiming). No two threads ever hold a live reference into the
// same byte range at once.
unsafe impl Send for BatchBuffer {}
unsafe impl Sync for BatchBuffer {}

impl BatchBuffer {
    /// Allocates a new buffer for the given configuration.
    ///
    /// # Errors
    /// Returns [`Ec::InvalidConfig`] if `config` fails validation, or
    /// [`Ec::Alloc`] if the arena allocation would overflow `usize` (in
    /// practice, never on a 64-bit host short of genuine OOM).
    pub fn new(config: BufferConfig) -> Result<Self, Ec> {
        use validator::Validate;
        config.validate().map_err(|_| Ec::InvalidConfig)?;

        let slot_bytes = config.max_batch_samples * config.dtype.sample_width();
        let arena_bytes = config.capacity.checked_mul(slot_bytes).ok_or(Ec::Alloc)?;

        let arena = vec![0u8; arena_bytes].into_boxed_slice();
        let slots = (0..config.capacity)
            .map(|_| Slot {
                state: AtomicU8::new(EMPTY),
                meta: UnsafeCell::new(BatchMeta::default()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            mask: (config.capacity as u64) - 1,
            slot_bytes,
            arena: UnsafeCell::new(arena),
            slots,
            head: AtomicU64::new(0),
            tail: AtomicU64::new(0),
            running: AtomicBool::new(false),
            lock: Mutex::new(()),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            stats: BufferStats::default(),
            config,
        })
    }

    /// The buffer's configuration.
    #[must_use]
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Activity counters.
    #[must_use]
    pub fn stats(&self) -> BufferStatsSnapshot {
        self.stats.snapshot()
    }

    /// Ring capacity in slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Number of slots currently holding unconsumed, fully-submitted data.
    #[must_use]
    pub fn occupancy(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail) as usize
    }

    /// `true` if no submitted batch is waiting to be consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.occupancy() == 0
    }

    /// `true` if the ring holds `capacity` unconsumed batches.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.occupancy() >= self.capacity()
    }

    /// Marks the buffer running. A producer/consumer pair must call this
    /// before using `get_head`/`get_tail`.
    ///
    /// # Errors
    /// [`Ec::AlreadyRunning`] if already running.
    pub fn start(&self) -> Result<(), Ec> {
        let was_running = self.running.swap(true, Ordering::AcqRel);
        if was_running {
            return Err(Ec::AlreadyRunning);
        }
        Ok(())
    }

    /// Marks the buffer as shut down: any thread currently blocked in
    /// `submit`/`get_tail` wakes with [`Ec::Stopped`], and future blocking
    /// calls return it immediately. Mirrors `bb_stop`. May be called
    /// multiple times; may be followed by another `start`.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let _guard = self.lock.lock().expect("buffer mutex poisoned");
        drop(_guard);
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Releases the buffer's resources. Idempotent; stops first if still
    /// running. The arena is actually freed when the last reference to
    /// this `BatchBuffer` is dropped (Rust's ownership model makes a
    /// separate "free arena" step unnecessary), so this only needs to
    /// guarantee the running side is quiesced.
    pub fn deinit(&self) {
        self.stop();
    }

    fn idx_of(&self, seq: u64) -> usize {
        (seq & self.mask) as usize
    }

    fn slot_bytes_range(&self, idx: usize) -> std::ops::Range<usize> {
        let start = idx * self.slot_bytes;
        start..start + self.slot_bytes
    }

    /// Returns a writable view of the producer's current slot.
    ///
    /// Does not block and does not inspect ring fullness: whether this
    /// slot can actually be published is decided by `submit`. The producer
    /// may write into it speculatively; if `submit` ultimately drops the
    /// batch, the write is simply discarded.
    ///
    /// # Errors
    /// [`Ec::Stopped`] if the buffer has been shut down.
    pub fn get_head(&self) -> Result<BatchHead<'_>, Ec> {
        if !self.running.load(Ordering::Acquire) {
            return Err(Ec::Stopped);
        }

        let head = self.head.load(Ordering::Relaxed);
        let idx = self.idx_of(head);

        // SAFETY: only the producer calls `get_head`/`submit` (SPSC), and
        // this slot is only handed to the consumer after `submit`
        // publishes it. No other live reference to this slot's bytes or
        // metadata exists right now.
        let meta = unsafe { &mut *self.slots[idx].meta.get() };
        *meta = BatchMeta::default();
        let range = self.slot_bytes_range(idx);
        let bytes = unsafe { &mut (*self.arena.get())[range] };

        Ok(BatchHead {
            bytes,
            meta,
            dtype: self.config.dtype,
            slot: idx,
        })
    }

    /// Publishes (or, under overflow, disposes of) the batch written into
    /// `head`, per `overflow_policy`.
    ///
    /// # Errors
    /// - [`Ec::Timeout`] if `Block` overflow and `timeout` elapses before a
    ///   slot frees up.
    /// - [`Ec::Stopped`] if the buffer is shut down while blocked.
    /// - [`Ec::ConsumerActive`] if `DropTail` found the reclaim target
    ///   `CONSUMING` and `consumer_active_returns_error` is set.
    pub fn submit(&self, head: BatchHead<'_>, timeout: Option<Duration>) -> Result<(), Ec> {
        let idx = head.slot();
        drop(head);

        if self.is_full() {
            match self.config.overflow_policy {
                OverflowPolicy::Block => {
                    self.wait_until(&self.not_full, timeout, || !self.is_full())?;
                }
                OverflowPolicy::DropHead => {
                    self.stats.dropped_by_producer.fetch_add(1, Ordering::Relaxed);
                    // `head` is not advanced; the slot's contents are
                    // simply overwritten the next time `get_head` is
                    // called for this index.
                    return Ok(());
                }
                OverflowPolicy::DropTail => {
                    self.reclaim_tail(timeout)?;
                }
            }
        }

        self.slots[idx].state.store(READY, Ordering::Release);
        self.head.fetch_add(1, Ordering::Release);
        self.stats.total_batches.fetch_add(1, Ordering::Relaxed);

        let _guard = self.lock.lock().expect("buffer mutex poisoned");
        drop(_guard);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Acquires the next readable slot for the consumer, blocking until a
    /// batch is submitted or `timeout` elapses.
    ///
    /// # Errors
    /// - [`Ec::Complete`] if the batch at the tail is the terminal
    ///   `COMPLETE` marker (the slot is released automatically).
    /// - [`Ec::Stopped`] if the buffer was shut down while blocked.
    /// - [`Ec::Timeout`] if `timeout` elapses first.
    pub fn get_tail(&self, timeout: Option<Duration>) -> Result<BatchTail<'_>, Ec> {
        let tail = self.tail.load(Ordering::Relaxed);
        let idx = self.idx_of(tail);

        if self.slots[idx].state.load(Ordering::Acquire) != READY {
            if !self.running.load(Ordering::Acquire) {
                return Err(Ec::Stopped);
            }
            self.wait_until(&self.not_empty, timeout, || {
                self.slots[idx].state.load(Ordering::Acquire) == READY
            })?;
        }

        self.slots[idx].state.store(CONSUMING, Ordering::AcqRel);

        // SAFETY: `state` transitioned from READY (producer-published,
        // visible via the Acquire above) to CONSUMING under our exclusive
        // observation; the producer will not touch this slot's bytes again
        // until we release it back to EMPTY.
        let meta = unsafe { &*self.slots[idx].meta.get() };
        let range = self.slot_bytes_range(idx);
        let bytes = unsafe { &(*self.arena.get())[range] };

        if meta.is_complete() && meta.head == 0 {
            // An empty COMPLETE marker batch: surface EOF directly and
            // release the slot immediately rather than handing back an
            // empty view (GUARANTEE_FULL excludes the COMPLETE-carrying
            // batch itself).
            self.slots[idx].state.store(EMPTY, Ordering::Release);
            self.tail.fetch_add(1, Ordering::Release);
            let _guard = self.lock.lock().expect("buffer mutex poisoned");
            drop(_guard);
            self.not_full.notify_one();
            return Err(Ec::Complete);
        }

        Ok(BatchTail {
            bytes,
            meta,
            dtype: self.config.dtype,
            slot: idx,
        })
    }

    /// Releases a slot the consumer finished reading, freeing it for the
    /// producer. Does not block.
    pub fn release_tail(&self, tail: BatchTail<'_>) {
        let idx = tail.slot();
        drop(tail);

        self.slots[idx].state.store(EMPTY, Ordering::Release);
        self.tail.fetch_add(1, Ordering::Release);
        self.stats.consumed.fetch_add(1, Ordering::Relaxed);

        let _guard = self.lock.lock().expect("buffer mutex poisoned");
        drop(_guard);
        self.not_full.notify_one();
    }

    /// `DropTail`: reclaims the oldest unconsumed slot (`tail & mask`),
    /// subject to the `CONSUMING` interlock (P2). If that slot is mid-read,
    /// falls back to blocking unless `consumer_active_returns_error` is
    /// set, in which case it reports `CONSUMER_ACTIVE` instead.
    fn reclaim_tail(&self, timeout: Option<Duration>) -> Result<(), Ec> {
        let tail = self.tail.load(Ordering::Relaxed);
        let idx = self.idx_of(tail);

        loop {
            let state = self.slots[idx].state.load(Ordering::Acquire);
            match state {
                READY => {
                    let _guard = self.lock.lock().expect("buffer mutex poisoned");
                    self.stats.dropped_by_producer.fetch_add(1, Ordering::Relaxed);
                    self.slots[idx].state.store(EMPTY, Ordering::Release);
                    self.tail.fetch_add(1, Ordering::Release);
                    drop(_guard);
                    return Ok(());
                }
                CONSUMING if self.config.consumer_active_returns_error => {
                    return Err(Ec::ConsumerActive);
                }
                CONSUMING => {
                    self.wait_until(&self.not_empty, timeout, || {
                        self.slots[idx].state.load(Ordering::Acquire) != CONSUMING
                    })?;
                }
                EMPTY => return Ok(()),
                _ => unreachable!("slot state is one of EMPTY, READY, CONSUMING"),
            }
        }
    }

    fn wait_until(
        &self,
        cv: &Condvar,
        timeout: Option<Duration>,
        predicate: impl Fn() -> bool,
    ) -> Result<(), Ec> {
        let mut guard = self.lock.lock().expect("buffer mutex poisoned");
        let deadline = timeout.map(|d| Instant::now() + d);

        while !predicate() {
            if !self.running.load(Ordering::Acquire) {
                return Err(Ec::Stopped);
            }
            guard = match deadline {
                Some(dl) => {
                    let now = Instant::now();
                    if now >= dl {
                        return Err(Ec::Timeout);
                    }
                    let (next_guard, result) =
                        cv.wait_timeout(guard, dl - now).expect("buffer mutex poisoned");
                    if result.timed_out() && !predicate() {
                        return Err(Ec::Timeout);
                    }
                    next_guard
                }
                None => cv.wait(guard).expect("buffer mutex poisoned"),
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::batch::Sample;
    use crate::dtype::DType;

    fn config(capacity: usize, overflow_policy: OverflowPolicy) -> BufferConfig {
        BufferConfig {
            capacity,
            max_batch_samples: 4,
            dtype: DType::F32,
            overflow_policy,
            consumer_active_returns_error: false,
            default_timeout_ms: 50,
        }
    }

    fn submit_samples(buf: &BatchBuffer, values: &[f32]) {
        let mut head = buf.get_head().unwrap();
        let samples: Vec<Sample> = values.iter().map(|v| Sample::F32(*v)).collect();
        head.fill(&samples);
        buf.submit(head, Some(Duration::from_millis(10))).unwrap();
    }

    #[test]
    fn round_trips_one_batch() {
        let buf = BatchBuffer::new(config(2, OverflowPolicy::Block)).unwrap();
        buf.start().unwrap();
        submit_samples(&buf, &[1.0, 2.0, 3.0]);

        let tail = buf.get_tail(Some(Duration::from_millis(10))).unwrap();
        assert_eq!(tail.meta().head, 3);
        assert_eq!(tail.read(0), Sample::F32(1.0));
        assert_eq!(tail.read(2), Sample::F32(3.0));
        buf.release_tail(tail);

        assert_eq!(buf.stats().total_batches, 1);
        assert_eq!(buf.stats().consumed, 1);
    }

    #[test]
    fn get_tail_times_out_when_empty() {
        let buf = BatchBuffer::new(config(2, OverflowPolicy::Block)).unwrap();
        buf.start().unwrap();
        let err = buf.get_tail(Some(Duration::from_millis(5))).unwrap_err();
        assert_eq!(err, Ec::Timeout);
    }

    #[test]
    fn block_policy_blocks_producer_when_full() {
        let buf = BatchBuffer::new(config(1, OverflowPolicy::Block)).unwrap();
        buf.start().unwrap();
        submit_samples(&buf, &[1.0]);

        let head = buf.get_head().unwrap();
        let err = buf.submit(head, Some(Duration::from_millis(5))).unwrap_err();
        assert_eq!(err, Ec::Timeout);
    }

    #[test]
    fn drop_head_discards_incoming_batch_when_full() {
        let buf = BatchBuffer::new(config(1, OverflowPolicy::DropHead)).unwrap();
        buf.start().unwrap();
        submit_samples(&buf, &[1.0]);

        let head = buf.get_head().unwrap();
        buf.submit(head, Some(Duration::from_millis(5))).unwrap();
        assert_eq!(buf.stats().dropped_by_producer, 1);

        let tail = buf.get_tail(Some(Duration::from_millis(10))).unwrap();
        assert_eq!(tail.read(0), Sample::F32(1.0));
        buf.release_tail(tail);
    }

    #[test]
    fn drop_tail_overwrites_oldest_unconsumed_batch() {
        let buf = BatchBuffer::new(config(1, OverflowPolicy::DropTail)).unwrap();
        buf.start().unwrap();
        submit_samples(&buf, &[1.0]);
        submit_samples(&buf, &[2.0]);

        assert_eq!(buf.stats().dropped_by_producer, 1);
        let tail = buf.get_tail(Some(Duration::from_millis(10))).unwrap();
        assert_eq!(tail.read(0), Sample::F32(2.0));
        buf.release_tail(tail);
    }

    #[test]
    fn drop_tail_reports_consumer_active_when_configured() {
        let mut cfg = config(1, OverflowPolicy::DropTail);
        cfg.consumer_active_returns_error = true;
        let buf = BatchBuffer::new(cfg).unwrap();
        buf.start().unwrap();
        submit_samples(&buf, &[1.0]);

        let consuming = buf.get_tail(Some(Duration::from_millis(10))).unwrap();

        let head = buf.get_head().unwrap();
        let err = buf.submit(head, Some(Duration::from_millis(5))).unwrap_err();
        assert_eq!(err, Ec::ConsumerActive);

        buf.release_tail(consuming);
    }

    #[test]
    fn complete_marker_surfaces_as_end_of_stream() {
        let buf = BatchBuffer::new(config(2, OverflowPolicy::Block)).unwrap();
        buf.start().unwrap();

        let mut head = buf.get_head().unwrap();
        head.meta_mut().ec = Ec::Complete;
        buf.submit(head, Some(Duration::from_millis(10))).unwrap();

        let err = buf.get_tail(Some(Duration::from_millis(10))).unwrap_err();
        assert_eq!(err, Ec::Complete);
    }

    #[test]
    fn stop_wakes_blocked_consumer() {
        use std::sync::Arc;
        use std::thread;

        let buf = Arc::new(BatchBuffer::new(config(2, OverflowPolicy::Block)).unwrap());
        buf.start().unwrap();
        let reader = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || buf.get_tail(None))
        };

        thread::sleep(Duration::from_millis(20));
        buf.stop();

        let err = reader.join().unwrap().unwrap_err();
        assert_eq!(err, Ec::Stopped);
    }
}
