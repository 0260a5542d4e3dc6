//! Stream contexts: a sample ring plus direction-specific state
//!
//! An input context adds the timing anchor that maps sample indices to
//! wall-clock time; an output context adds the playback cursor the
//! host callback advances as it drains the ring.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use soundpost_common::{now_ns, AudioInfo, AudioResult, NANOS_PER_SECOND};

use crate::ring::SampleRing;

/// Capture-side context for one microphone stream.
///
/// The real-time callback is the only producer; any number of capture
/// readers consume with their own positions. All fields written by the
/// callback are atomic so the callback never allocates or locks.
pub struct InputStreamContext {
    ring: SampleRing,
    info: AudioInfo,
    /// Wall clock at the first callback, ns since the epoch
    stream_start_wall_ns: AtomicI64,
    /// Host capture-clock offset of the first buffer, ns
    adc_anchor_ns: AtomicU64,
    first_callback_seen: AtomicBool,
}

impl InputStreamContext {
    pub fn new(info: AudioInfo, history_seconds: u32) -> AudioResult<Self> {
        Ok(Self {
            ring: SampleRing::new(info.sample_rate_hz, info.num_channels, history_seconds)?,
            info,
            stream_start_wall_ns: AtomicI64::new(0),
            adc_anchor_ns: AtomicU64::new(0),
            first_callback_seen: AtomicBool::new(false),
        })
    }

    pub fn info(&self) -> &AudioInfo {
        &self.info
    }

    pub fn ring(&self) -> &SampleRing {
        &self.ring
    }

    /// Record the stream's timing anchor. Called once, from the first
    /// host callback that carries samples; later calls are ignored.
    pub fn anchor(&self, wall_clock_ns: i64, adc_offset: Duration) {
        if self.first_callback_seen.load(Ordering::Acquire) {
            return;
        }
        self.adc_anchor_ns
            .store(adc_offset.as_nanos() as u64, Ordering::Relaxed);
        self.stream_start_wall_ns
            .store(wall_clock_ns, Ordering::Release);
        self.first_callback_seen.store(true, Ordering::Release);
    }

    /// Producer entry point, called from the real-time callback with one
    /// host buffer of interleaved samples.
    ///
    /// The first invocation anchors the stream before any sample is
    /// announced to readers; every invocation publishes each sample
    /// through the ring.
    pub fn on_host_buffer(&self, samples: &[i16], adc_offset: Duration) {
        if !self.first_callback_seen.load(Ordering::Acquire) {
            self.anchor(now_ns(), adc_offset);
        }
        for &sample in samples {
            self.ring.write_sample(sample);
        }
    }

    pub fn first_callback_seen(&self) -> bool {
        self.first_callback_seen.load(Ordering::Acquire)
    }

    pub fn stream_start_wall_ns(&self) -> i64 {
        self.stream_start_wall_ns.load(Ordering::Acquire)
    }

    pub fn adc_anchor(&self) -> Duration {
        Duration::from_nanos(self.adc_anchor_ns.load(Ordering::Relaxed))
    }

    /// Wall-clock timestamp (ns since the epoch) of a sample index.
    ///
    /// `timestamp(i) = stream_start + (i / channels) * 1e9 / sample_rate`
    pub fn timestamp(&self, sample_index: u64) -> i64 {
        let start = self.stream_start_wall_ns.load(Ordering::Acquire);
        let frames = (sample_index / self.info.num_channels as u64) as i128;
        let elapsed = frames * NANOS_PER_SECOND as i128 / self.info.sample_rate_hz as i128;
        start + elapsed as i64
    }

    /// Interleaved sample index corresponding to a wall-clock timestamp,
    /// floored. Timestamps at or before the stream start map to 0.
    pub fn sample_index(&self, timestamp_ns: i64) -> u64 {
        let start = self.stream_start_wall_ns.load(Ordering::Acquire);
        if timestamp_ns <= start {
            return 0;
        }
        let elapsed = (timestamp_ns - start) as u128;
        let samples = elapsed * self.info.sample_rate_hz as u128 * self.info.num_channels as u128
            / NANOS_PER_SECOND as u128;
        samples as u64
    }
}

/// Playback-side context for one speaker stream.
///
/// The playback service writes decoded samples into the ring; the
/// real-time output callback drains them, advancing the cursor.
pub struct OutputStreamContext {
    ring: SampleRing,
    info: AudioInfo,
    /// Samples the host has consumed from this buffer. Only the output
    /// callback mutates it.
    playback_cursor: AtomicU64,
}

impl OutputStreamContext {
    pub fn new(info: AudioInfo, history_seconds: u32) -> AudioResult<Self> {
        Ok(Self {
            ring: SampleRing::new(info.sample_rate_hz, info.num_channels, history_seconds)?,
            info,
            playback_cursor: AtomicU64::new(0),
        })
    }

    pub fn info(&self) -> &AudioInfo {
        &self.info
    }

    pub fn ring(&self) -> &SampleRing {
        &self.ring
    }

    pub fn playback_cursor(&self) -> u64 {
        self.playback_cursor.load(Ordering::Acquire)
    }

    /// Consumer entry point for the real-time output callback: drain up
    /// to `out.len()` samples at the cursor, zero-fill any shortfall.
    pub fn fill_host_buffer(&self, out: &mut [i16]) {
        let mut cursor = self.playback_cursor.load(Ordering::Relaxed);
        let drained = self.ring.read_samples(out, &mut cursor);
        self.playback_cursor.store(cursor, Ordering::Release);

        for slot in out[drained..].iter_mut() {
            *slot = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soundpost_common::AudioCodec;

    const T0: i64 = 1_700_000_000_000_000_000;

    fn mono_context(sample_rate_hz: u32) -> InputStreamContext {
        let info = AudioInfo::new(AudioCodec::Pcm16, sample_rate_hz, 1);
        let ctx = InputStreamContext::new(info, 1).unwrap();
        ctx.anchor(T0, Duration::ZERO);
        ctx
    }

    #[test]
    fn test_timestamp_math() {
        let ctx = mono_context(44100);

        assert_eq!(ctx.timestamp(0), T0);

        let one_second = ctx.timestamp(44100) - T0;
        assert!((one_second - NANOS_PER_SECOND).abs() <= 1000, "{one_second}");

        let half_second = ctx.timestamp(22050) - T0;
        assert!(
            (half_second - NANOS_PER_SECOND / 2).abs() <= 1000,
            "{half_second}"
        );
    }

    #[test]
    fn test_timestamp_accounts_for_channels() {
        let info = AudioInfo::new(AudioCodec::Pcm16, 48000, 2);
        let ctx = InputStreamContext::new(info, 1).unwrap();
        ctx.anchor(T0, Duration::ZERO);

        // 96000 interleaved samples = 48000 frames = one second.
        assert_eq!(ctx.timestamp(96000), T0 + NANOS_PER_SECOND);
    }

    #[test]
    fn test_sample_index_inverts_timestamp() {
        let ctx = mono_context(48000);

        for sample in [0u64, 1, 480, 48000, 123_456] {
            let ts = ctx.timestamp(sample);
            let index = ctx.sample_index(ts);
            // timestamp(sample_index(ts)) <= ts < timestamp(sample_index(ts)+1)
            assert!(ctx.timestamp(index) <= ts);
            assert!(ts < ctx.timestamp(index + 1));
        }
    }

    #[test]
    fn test_sample_index_before_stream_start_is_zero() {
        let ctx = mono_context(48000);
        assert_eq!(ctx.sample_index(T0 - 5), 0);
        assert_eq!(ctx.sample_index(T0), 0);
    }

    #[test]
    fn test_anchor_only_takes_effect_once() {
        let ctx = mono_context(48000);
        ctx.anchor(T0 + 12345, Duration::from_millis(3));
        assert_eq!(ctx.stream_start_wall_ns(), T0);
        assert_eq!(ctx.adc_anchor(), Duration::ZERO);
    }

    #[test]
    fn test_on_host_buffer_anchors_then_publishes() {
        let info = AudioInfo::new(AudioCodec::Pcm16, 8000, 1);
        let ctx = InputStreamContext::new(info, 1).unwrap();
        assert!(!ctx.first_callback_seen());

        ctx.on_host_buffer(&[1, 2, 3], Duration::from_micros(250));

        assert!(ctx.first_callback_seen());
        assert_eq!(ctx.adc_anchor(), Duration::from_micros(250));
        assert_eq!(ctx.ring().write_position(), 3);
    }

    #[test]
    fn test_fill_host_buffer_zero_fills_shortfall() {
        let info = AudioInfo::new(AudioCodec::Pcm16, 8000, 1);
        let ctx = OutputStreamContext::new(info, 1).unwrap();
        for sample in [10, 20, 30] {
            ctx.ring().write_sample(sample);
        }

        let mut out = [99i16; 8];
        ctx.fill_host_buffer(&mut out);

        assert_eq!(out, [10, 20, 30, 0, 0, 0, 0, 0]);
        assert_eq!(ctx.playback_cursor(), 3);

        // Nothing queued: all silence, cursor unchanged.
        let mut out = [99i16; 4];
        ctx.fill_host_buffer(&mut out);
        assert_eq!(out, [0, 0, 0, 0]);
        assert_eq!(ctx.playback_cursor(), 3);
    }
}
