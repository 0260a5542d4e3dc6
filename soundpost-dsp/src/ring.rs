//! Lock-free circular sample buffer
//!
//! Single producer (the real-time audio callback), any number of
//! readers. Readers carry their own positions; the buffer itself holds
//! no read cursor, only the monotone count of samples ever written.

use std::sync::atomic::{AtomicI16, AtomicU64, Ordering};

use soundpost_common::{AudioError, AudioResult};
use tracing::warn;

/// Preallocated ring of int16 samples sized for a fixed history window.
///
/// The valid readable range at any instant is
/// `[max(0, total_written - capacity), total_written)`.
pub struct SampleRing {
    slots: Box<[AtomicI16]>,
    capacity: u64,
    total_written: AtomicU64,
}

impl SampleRing {
    /// Allocate a ring holding `history_seconds` of interleaved audio.
    pub fn new(sample_rate_hz: u32, num_channels: u16, history_seconds: u32) -> AudioResult<Self> {
        if sample_rate_hz == 0 {
            return Err(AudioError::invalid_argument(
                "sample_rate_hz must be positive",
            ));
        }
        if num_channels == 0 {
            return Err(AudioError::invalid_argument("num_channels must be positive"));
        }
        if history_seconds == 0 {
            return Err(AudioError::invalid_argument(
                "history_seconds must be positive",
            ));
        }

        let capacity = sample_rate_hz as u64 * num_channels as u64 * history_seconds as u64;
        let mut slots = Vec::with_capacity(capacity as usize);
        slots.resize_with(capacity as usize, || AtomicI16::new(0));

        Ok(Self {
            slots: slots.into_boxed_slice(),
            capacity,
            total_written: AtomicU64::new(0),
        })
    }

    /// Fixed sample capacity of the ring.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Producer-side write of one sample. Never fails.
    ///
    /// The slot store is Relaxed; the Release increment of the counter
    /// guarantees that a reader which observes the new count also sees
    /// the sample. A slot is only revisited after the counter has rolled
    /// past it, so Relaxed slot access on the reader side is safe too.
    pub fn write_sample(&self, sample: i16) {
        let position = self.total_written.load(Ordering::Relaxed);
        let index = (position % self.capacity) as usize;
        self.slots[index].store(sample, Ordering::Relaxed);
        self.total_written.fetch_add(1, Ordering::Release);
    }

    /// Copy up to `out.len()` samples starting at `read_position`.
    ///
    /// Reading past the write position returns 0 samples. A reader that
    /// fell more than `capacity` behind is skipped forward to the oldest
    /// available sample; the loss is logged, never raised. Advances
    /// `read_position` by the count returned.
    pub fn read_samples(&self, out: &mut [i16], read_position: &mut u64) -> usize {
        let write_position = self.total_written.load(Ordering::Acquire);

        if *read_position > write_position {
            warn!(
                read_position = *read_position,
                write_position, "read position is ahead of write position, no samples available"
            );
            return 0;
        }

        if write_position - *read_position > self.capacity {
            let oldest = write_position - self.capacity;
            warn!(
                lost = oldest - *read_position,
                "audio buffer overrun: read position {} has been overwritten, \
                 skipping to oldest available sample at {}",
                *read_position,
                oldest
            );
            *read_position = oldest;
        }

        let available = write_position - *read_position;
        let to_read = (out.len() as u64).min(available) as usize;

        for (offset, slot) in out.iter_mut().take(to_read).enumerate() {
            let index = ((*read_position + offset as u64) % self.capacity) as usize;
            *slot = self.slots[index].load(Ordering::Relaxed);
        }

        *read_position += to_read as u64;
        to_read
    }

    /// Total samples ever written.
    pub fn write_position(&self) -> u64 {
        self.total_written.load(Ordering::Acquire)
    }

    /// Test helper: reset the counter and zero every slot.
    pub fn clear(&self) {
        self.total_written.store(0, Ordering::Release);
        for slot in self.slots.iter() {
            slot.store(0, Ordering::Relaxed);
        }
    }
}
