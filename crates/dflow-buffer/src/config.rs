//! Declarative configuration for a `BatchBuffer`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::dtype::DType;

/// What a producer does when it finds the ring full (`head - tail ==
/// capacity`) at `submit` time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Block the producer (subject to its call's timeout) until a slot frees
    /// up.
    Block,
    /// Discard the batch the producer just wrote: `head` is not advanced,
    /// the write is silently dropped, `dropped_by_producer` is incremented.
    DropHead,
    /// Reclaim the oldest unconsumed slot, overwriting it, subject to the
    /// `CONSUMING` interlock: a slot the consumer is mid-read of is never
    /// reclaimed out from under it.
    DropTail,
}

/// Configuration for one `BatchBuffer`, validated before the buffer is
/// constructed.
///
/// Mirrors the way this runtime's filters are configured: a plain
/// `serde`-deserializable struct with `validator` constraints, so a pipeline
/// description loaded from YAML can be checked in one pass before any
/// buffer is allocated.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BufferConfig {
    /// Number of slots in the ring. Must be a power of two so index
    /// wraparound can use a mask instead of a modulo.
    #[validate(custom = "validate_power_of_two")]
    pub capacity: usize,

    /// Maximum number of samples one batch can hold.
    #[validate(range(min = 1))]
    pub max_batch_samples: usize,

    /// The dtype of samples this buffer carries.
    pub dtype: DType,

    /// Overflow behavior when the ring is full at `get_head` time.
    pub overflow_policy: OverflowPolicy,

    /// When `overflow_policy == DropTail` and the producer finds the
    /// contested slot still in `CONSUMING` state (the consumer is mid-read
    /// of the very slot being dropped), this flag decides the outcome:
    /// `true` returns `Ec::ConsumerActive` to the producer instead of
    /// silently counting the batch as dropped.
    #[serde(default)]
    pub consumer_active_returns_error: bool,

    /// Default timeout applied to `get_head`/`get_tail`/`submit` calls that
    /// don't specify their own, in milliseconds. `0` means block
    /// indefinitely.
    #[serde(default)]
    pub default_timeout_ms: u64,
}

impl BufferConfig {
    /// The default timeout as a `Duration`, or `None` for "block
    /// indefinitely".
    #[must_use]
    pub fn default_timeout(&self) -> Option<Duration> {
        if self.default_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.default_timeout_ms))
        }
    }

    /// The size, in bytes, of the arena this config requires:
    /// `capacity * max_batch_samples * dtype.sample_width()`.
    #[must_use]
    pub fn arena_bytes(&self) -> usize {
        self.capacity * self.max_batch_samples * self.dtype.sample_width()
    }
}

fn validate_power_of_two(capacity: &usize) -> Result<(), validator::ValidationError> {
    if *capacity == 0 || !capacity.is_power_of_two() {
        return Err(validator::ValidationError::new("capacity must be a nonzero power of two"));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn base_config() -> BufferConfig {
        BufferConfig {
            capacity: 8,
            max_batch_samples: 128,
            dtype: DType::F32,
            overflow_policy: OverflowPolicy::Block,
            consumer_active_returns_error: false,
            default_timeout_ms: 0,
        }
    }

    #[test]
    fn rejects_non_power_of_two_capacity() {
        let mut config = base_config();
        config.capacity = 7;
        assert!(config.validate().is_err());
    }

    #[test]
    fn accepts_power_of_two_capacity() {
        let config = base_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_max_batch_samples() {
        let mut config = base_config();
        config.max_batch_samples = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_timeout_means_block_indefinitely() {
        let config = base_config();
        assert_eq!(config.default_timeout(), None);
    }

    #[test]
    fn arena_bytes_accounts_for_dtype_width() {
        let config = base_config();
        assert_eq!(config.arena_bytes(), 8 * 128 * 4);
    }
}
