//! The batch: the unit of data exchanged between filters, and the
//! read/write views a producer and consumer use to access it.

use std::any::Any;
use std::sync::Arc;

use dflow_error::Ec;

use crate::dtype::DType;

/// Opaque per-batch side-channel payload (spec: "opaque pointer for
/// per-batch side-channel; owned by producer, must be stable until
/// `release_tail`"). An `Arc` gives the producer a cheap, stable handle it
/// can clone into the slot at `get_head` time; the consumer downcasts it at
/// `get_tail` time without the buffer ever needing to know the concrete
/// type.
pub type SideChannel = Arc<dyn Any + Send + Sync>;

/// One typed sample value, used by the dtype-generic read/write accessors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    /// A 32-bit float sample.
    F32(f32),
    /// A 32-bit signed integer sample.
    I32(i32),
    /// A 32-bit unsigned integer sample.
    U32(u32),
}

/// The non-sample-data fields of a batch.
///
/// `ec == Ec::Complete` terminates the stream for downstream consumers
/// (B-I1/B-I2 and the `COMPLETE` semantics apply as specified).
#[derive(Clone)]
pub struct BatchMeta {
    /// Number of valid samples in `data[0..head)`.
    pub head: usize,
    /// Timestamp, in nanoseconds, of `data[0]`.
    pub t_ns: i64,
    /// Sample period in nanoseconds. `0` means irregular/event data.
    pub period_ns: u64,
    /// Monotonically increasing per-producer sequence number.
    pub batch_id: u64,
    /// End-of-stream / error code for this batch.
    pub ec: Ec,
    /// Opaque per-batch side channel, owned by the producer.
    pub meta: Option<SideChannel>,
}

impl Default for BatchMeta {
    fn default() -> Self {
        Self {
            head: 0,
            t_ns: 0,
            period_ns: 0,
            batch_id: 0,
            ec: Ec::Ok,
            meta: None,
        }
    }
}

impl BatchMeta {
    /// `true` for regular (fixed sample period) data.
    #[must_use]
    pub fn is_regular(&self) -> bool {
        self.period_ns > 0
    }

    /// `true` if this batch carries the terminal `COMPLETE` marker.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.ec == Ec::Complete
    }

    /// B-I2: for regular data, `t_ns` must be a multiple of `period_ns`
    /// unless a phase-aligner collaborator has declared otherwise.
    #[must_use]
    pub fn is_phase_aligned(&self) -> bool {
        if self.period_ns == 0 {
            true
        } else {
            self.t_ns.rem_euclid(self.period_ns as i64) == 0
        }
    }

    /// The implicit timestamp of sample `i` in a regular batch.
    #[must_use]
    pub fn sample_time_ns(&self, i: usize) -> i64 {
        self.t_ns + (i as i64) * (self.period_ns as i64)
    }
}

fn assert_dtype(expected: DType, got: DType) {
    assert_eq!(
        expected, got,
        "sample accessor used with the wrong dtype (buffer dtype is {got}, accessor expects {expected})"
    );
}

/// A writable view of one ring slot, returned by `BatchBuffer::get_head`.
///
/// The slot's byte range and capacity never change across the buffer's
/// lifetime (B-I1); only `head` and the sample region `data[0..head)` are
/// written by the producer.
pub struct BatchHead<'a> {
    pub(crate) bytes: &'a mut [u8],
    pub(crate) meta: &'a mut BatchMeta,
    pub(crate) dtype: DType,
    pub(crate) slot: usize,
}

impl<'a> BatchHead<'a> {
    /// Number of samples this slot can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        let width = self.dtype.sample_width();
        if width == 0 {
            0
        } else {
            self.bytes.len() / width
        }
    }

    /// The dtype of this buffer.
    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// The ring slot this view occupies.
    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Read-only access to the batch metadata (before the producer has
    /// finished writing it).
    #[must_use]
    pub fn meta(&self) -> &BatchMeta {
        self.meta
    }

    /// Mutable access to the batch metadata; the producer writes `head`,
    /// `t_ns`, `period_ns`, `batch_id`, `ec`, and `meta` here before calling
    /// `submit`.
    pub fn meta_mut(&mut self) -> &mut BatchMeta {
        self.meta
    }

    /// Writes one sample at `index`, reinterpreting its bytes according to
    /// the buffer's dtype.
    ///
    /// # Panics
    /// Panics if `sample`'s variant does not match the buffer's dtype, or if
    /// `index >= capacity()`.
    pub fn write(&mut self, index: usize, sample: Sample) {
        let width = self.dtype.sample_width();
        let start = index * width;
        let slot = &mut self.bytes[start..start + width];
        match (self.dtype, sample) {
            (DType::F32, Sample::F32(v)) => slot.copy_from_slice(&v.to_ne_bytes()),
            (DType::I32, Sample::I32(v)) => slot.copy_from_slice(&v.to_ne_bytes()),
            (DType::U32, Sample::U32(v)) => slot.copy_from_slice(&v.to_ne_bytes()),
            (expected, other) => {
                let got = match other {
                    Sample::F32(_) => DType::F32,
                    Sample::I32(_) => DType::I32,
                    Sample::U32(_) => DType::U32,
                };
                assert_dtype(expected, got);
            }
        }
    }

    /// Writes a contiguous run of samples starting at `data[0]` and sets
    /// `head` to `samples.len()`. Convenience wrapper over repeated
    /// `write()` calls, used by sources that produce full batches.
    ///
    /// # Panics
    /// Panics if `samples.len() > capacity()`.
    pub fn fill(&mut self, samples: &[Sample]) {
        assert!(samples.len() <= self.capacity(), "batch overflow: too many samples for capacity");
        for (i, s) in samples.iter().enumerate() {
            self.write(i, *s);
        }
        self.meta.head = samples.len();
    }

    /// Direct byte-level access to the sample region, for callers that want
    /// to `memcpy` raw bytes (e.g. a passthrough filter copying a whole
    /// batch verbatim).
    pub fn raw_mut(&mut self) -> &mut [u8] {
        self.bytes
    }
}

/// A read-only view of one ring slot, returned by `BatchBuffer::get_tail`.
pub struct BatchTail<'a> {
    pub(crate) bytes: &'a [u8],
    pub(crate) meta: &'a BatchMeta,
    pub(crate) dtype: DType,
    pub(crate) slot: usize,
}

impl<'a> BatchTail<'a> {
    /// Number of samples this slot can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        let width = self.dtype.sample_width();
        if width == 0 {
            0
        } else {
            self.bytes.len() / width
        }
    }

    /// The dtype of this buffer.
    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// The ring slot this view occupies.
    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// The batch metadata.
    #[must_use]
    pub fn meta(&self) -> &BatchMeta {
        self.meta
    }

    /// Reads one sample at `index`, reinterpreting its bytes according to
    /// the buffer's dtype.
    ///
    /// # Panics
    /// Panics if `index >= capacity()`.
    #[must_use]
    pub fn read(&self, index: usize) -> Sample {
        let width = self.dtype.sample_width();
        let start = index * width;
        let slot = &self.bytes[start..start + width];
        match self.dtype {
            DType::F32 => Sample::F32(f32::from_ne_bytes(slot.try_into().expect("width"))),
            DType::I32 => Sample::I32(i32::from_ne_bytes(slot.try_into().expect("width"))),
            DType::U32 => Sample::U32(u32::from_ne_bytes(slot.try_into().expect("width"))),
            DType::Undefined => panic!("cannot read a sample from an undefined-dtype buffer"),
        }
    }

    /// Returns the valid sample region `data[0..head)` as typed values.
    #[must_use]
    pub fn valid_samples(&self) -> Vec<Sample> {
        (0..self.meta.head).map(|i| self.read(i)).collect()
    }

    /// Direct byte-level access to the valid sample region
    /// (`data[0..head*width)`), for bitwise-equality comparisons (P1) or
    /// zero-copy forwarding.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        let width = self.dtype.sample_width();
        &self.bytes[..self.meta.head * width]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn batch_meta_phase_alignment() {
        let mut meta = BatchMeta {
            period_ns: 1000,
            ..Default::default()
        };
        meta.t_ns = 2000;
        assert!(meta.is_phase_aligned());
        meta.t_ns = 2500;
        assert!(!meta.is_phase_aligned());
    }

    #[test]
    fn irregular_batch_is_always_aligned() {
        let meta = BatchMeta {
            period_ns: 0,
            t_ns: 12345,
            ..Default::default()
        };
        assert!(meta.is_phase_aligned());
    }

    #[test]
    fn sample_time_is_linear_in_index() {
        let meta = BatchMeta {
            t_ns: 1_000_000,
            period_ns: 1000,
            ..Default::default()
        };
        assert_eq!(meta.sample_time_ns(0), 1_000_000);
        assert_eq!(meta.sample_time_ns(5), 1_005_000);
    }
}
