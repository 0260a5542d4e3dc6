//! Microphone resource
//!
//! The host's real-time callback writes captured samples into the live
//! input context; any number of get_audio calls read from it with
//! their own positions, encode chunks, and hand them to the caller.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use soundpost_common::{
    Attributes, AudioChunk, AudioCodec, AudioError, AudioInfo, AudioProperties, AudioResult,
    ConfigParams, DEFAULT_HISTORICAL_THROTTLE_MS, DEFAULT_HISTORY_SECONDS, NANOS_PER_SECOND,
};
use soundpost_dsp::{codec, InputStreamContext, Mp3Encoder};
use soundpost_host::{HostBinding, HostStream, StreamDirection, StreamSpec};
use tracing::{debug, error, info, warn};

use crate::factory;

pub const MICROPHONE_MODEL: &str = "soundpost:audio:microphone";

/// Pause while the ring has less than a full chunk available.
const STARVED_POLL: Duration = Duration::from_millis(10);

struct MicrophoneState {
    stream: Option<Box<dyn HostStream>>,
    context: Arc<InputStreamContext>,
    device_name: String,
    sample_rate_hz: u32,
    num_channels: u16,
    latency: Duration,
    historical_throttle_ms: u64,
    /// Advisory count of running get_audio calls
    active_streams: u32,
}

pub struct Microphone {
    name: String,
    host: Arc<dyn HostBinding>,
    /// Protects the live stream, context, and stream configuration
    state: Mutex<MicrophoneState>,
}

impl Microphone {
    pub fn new(
        name: impl Into<String>,
        host: Arc<dyn HostBinding>,
        attributes: &Attributes,
    ) -> AudioResult<Self> {
        let name = name.into();
        let params = ConfigParams::from_attributes(attributes)?;
        let (spec, context) = setup(host.as_ref(), &params)?;

        host.is_format_supported(&spec)?;
        let mut stream = None;
        factory::restart_stream(&mut stream, || {
            host.open_input_stream(&spec, context.clone())
        })?;
        info!(name = %name, device = %spec.device_name, "microphone stream started");

        Ok(Self {
            name,
            host,
            state: Mutex::new(MicrophoneState {
                stream,
                context,
                device_name: spec.device_name,
                sample_rate_hz: spec.sample_rate_hz,
                num_channels: spec.num_channels,
                latency: spec.suggested_latency,
                historical_throttle_ms: params
                    .historical_throttle_ms
                    .unwrap_or(DEFAULT_HISTORICAL_THROTTLE_MS),
                active_streams: 0,
            }),
        })
    }

    /// Typed attribute checks; hard failures surface as errors, the
    /// returned list carries non-fatal warnings.
    pub fn validate(attributes: &Attributes) -> AudioResult<Vec<String>> {
        ConfigParams::from_attributes(attributes)?;
        Ok(Vec::new())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_name(&self) -> String {
        self.state.lock().device_name.clone()
    }

    pub fn reconfigure(&self, attributes: &Attributes) -> AudioResult<()> {
        info!(name = %self.name, "microphone reconfigure start");
        let params = ConfigParams::from_attributes(attributes)?;

        {
            let state = self.state.lock();
            if state.active_streams > 0 {
                // Changing the sample rate or channel count mid stream
                // leaves a brief gap; clients must re-check the chunk
                // info for changes.
                info!(
                    active_streams = state.active_streams,
                    "reconfiguring with active capture stream(s)"
                );
            }
        }

        let (spec, context) = setup(self.host.as_ref(), &params)?;
        self.host.is_format_supported(&spec)?;

        let mut state = self.state.lock();
        let mut stream = state.stream.take();
        match factory::restart_stream(&mut stream, || {
            self.host.open_input_stream(&spec, context.clone())
        }) {
            Ok(()) => {
                // Swap (stream, context) together; in-flight readers
                // rebind on their next loop pass.
                state.stream = stream;
                state.context = context;
                state.device_name = spec.device_name;
                state.sample_rate_hz = spec.sample_rate_hz;
                state.num_channels = spec.num_channels;
                state.latency = spec.suggested_latency;
                state.historical_throttle_ms = params
                    .historical_throttle_ms
                    .unwrap_or(DEFAULT_HISTORICAL_THROTTLE_MS);
                info!(name = %self.name, "microphone reconfigure completed");
                Ok(())
            }
            Err(e) => {
                state.stream = stream;
                error!(name = %self.name, error = %e, "microphone reconfigure failed");
                Err(e)
            }
        }
    }

    pub fn get_properties(&self) -> AudioProperties {
        let state = self.state.lock();
        AudioProperties {
            supported_codecs: vec![
                AudioCodec::Pcm16,
                AudioCodec::Pcm32,
                AudioCodec::Pcm32Float,
                AudioCodec::Mp3,
            ],
            sample_rate_hz: state.sample_rate_hz,
            num_channels: state.num_channels,
        }
    }

    pub fn do_command(&self, _command: &Attributes) -> AudioResult<Attributes> {
        error!(name = %self.name, "do_command not implemented for microphone");
        Ok(Attributes::new())
    }

    /// Stream encoded chunks to `chunk_handler` until it returns false,
    /// `duration_seconds` of audio have been delivered (0 means
    /// unbounded), or an error occurs.
    ///
    /// `previous_timestamp_ns` of 0 starts at the live edge; a non-zero
    /// value replays history from that wall-clock instant, throttled
    /// once the reader is more than a second behind real time.
    pub fn get_audio(
        &self,
        codec: &str,
        mut chunk_handler: impl FnMut(AudioChunk) -> bool,
        duration_seconds: f64,
        previous_timestamp_ns: i64,
        _extra: &Attributes,
    ) -> AudioResult<()> {
        debug!(
            name = %self.name,
            codec,
            duration_seconds,
            previous_timestamp_ns,
            "get_audio called"
        );
        let codec = AudioCodec::parse(codec)?;
        let _guard = StreamGuard::new(self);

        let (mut context, mut sample_rate_hz, mut num_channels, mut throttle_ms) = {
            let state = self.state.lock();
            (
                state.context.clone(),
                state.sample_rate_hz,
                state.num_channels,
                state.historical_throttle_ms,
            )
        };

        let mut read_position = initial_read_position(&context, previous_timestamp_ns)?;

        let mut mp3_encoder = match codec {
            AudioCodec::Mp3 => Some(Mp3Encoder::new(sample_rate_hz, num_channels)?),
            _ => None,
        };
        let mut samples_per_chunk =
            chunk_size(codec, sample_rate_hz, num_channels, mp3_encoder.as_ref())?;

        let historical = previous_timestamp_ns != 0;
        let mut sequence: u64 = 0;
        let mut first_chunk_start_ns: i64 = 0;
        let mut duration_limit_set = false;
        let mut last_chunk_end_position: u64 = 0;

        loop {
            // Rebind if a reconfigure swapped the live context.
            {
                let state = self.state.lock();
                if !Arc::ptr_eq(&state.context, &context) {
                    info!(name = %self.name, "detected stream change (device reconfigure)");
                    sample_rate_hz = state.sample_rate_hz;
                    num_channels = state.num_channels;
                    throttle_ms = state.historical_throttle_ms;

                    if codec == AudioCodec::Mp3 {
                        // Encoder state is tied to the old rate/channels.
                        mp3_encoder = Some(Mp3Encoder::new(sample_rate_hz, num_channels)?);
                    }
                    samples_per_chunk =
                        chunk_size(codec, sample_rate_hz, num_channels, mp3_encoder.as_ref())?;

                    context = state.context.clone();
                    read_position = context.ring().write_position();
                    // Brief gap in audio; the stream continues.
                }
            }

            let write_position = context.ring().write_position();
            let available = write_position.saturating_sub(read_position);
            if available < samples_per_chunk {
                thread::sleep(STARVED_POLL);
                continue;
            }

            let mut samples = vec![0i16; samples_per_chunk as usize];
            let chunk_start_position = read_position;
            let samples_read = context.ring().read_samples(&mut samples, &mut read_position);
            if (samples_read as u64) < samples_per_chunk {
                // Shouldn't happen given the availability check above.
                warn!(
                    samples_read,
                    expected = samples_per_chunk,
                    "read fewer samples than expected"
                );
                continue;
            }

            let mut data = Vec::new();
            codec::encode_chunk(codec, &samples, mp3_encoder.as_mut(), &mut data)?;

            let chunk_end_position = chunk_start_position + samples_read as u64;
            let (timestamp_start, timestamp_end) = match &mp3_encoder {
                Some(encoder) => {
                    // Shift the reported range earlier so it lines up
                    // with the data the encoder actually returned.
                    let delay = encoder.encoder_delay() as u64 * num_channels as u64;
                    (
                        chunk_start_position.saturating_sub(delay),
                        chunk_end_position.saturating_sub(delay),
                    )
                }
                None => (chunk_start_position, chunk_end_position),
            };
            last_chunk_end_position = timestamp_end;

            let chunk = AudioChunk {
                data: Bytes::from(data),
                info: AudioInfo::new(codec, sample_rate_hz, num_channels),
                sequence_number: sequence,
                start_timestamp_ns: context.timestamp(timestamp_start),
                end_timestamp_ns: context.timestamp(timestamp_end),
            };
            sequence += 1;

            if !duration_limit_set && duration_seconds > 0.0 {
                first_chunk_start_ns = chunk.start_timestamp_ns;
                duration_limit_set = true;
                debug!(
                    duration_seconds,
                    first_chunk_start_ns, "audio duration limit set"
                );
            }

            if duration_limit_set {
                let elapsed_ns = chunk.end_timestamp_ns - first_chunk_start_ns;
                if elapsed_ns as f64 / NANOS_PER_SECOND as f64 >= duration_seconds {
                    debug!(elapsed_ns, "reached audio duration limit");
                    // Deliver the final chunk before leaving the loop.
                    chunk_handler(chunk);
                    break;
                }
            }

            if !chunk_handler(chunk) {
                info!(name = %self.name, "chunk handler returned false, client disconnected");
                return Ok(());
            }

            if historical {
                let behind = context
                    .ring()
                    .write_position()
                    .saturating_sub(read_position);
                let one_second = sample_rate_hz as u64 * num_channels as u64;
                if behind > one_second {
                    // Catching up on history; give the client time to
                    // process instead of saturating it.
                    thread::sleep(Duration::from_millis(throttle_ms));
                }
            }
        }

        // Flush the MP3 encoder so the last ~encoder_delay samples per
        // channel are not lost.
        if let Some(encoder) = mp3_encoder.as_mut() {
            let mut tail = Vec::new();
            encoder.flush(&mut tail)?;
            if !tail.is_empty() {
                let delay = encoder.encoder_delay() as u64 * num_channels as u64;
                debug!(
                    bytes = tail.len(),
                    last_chunk_end_position, "sending final MP3 flush chunk"
                );
                chunk_handler(AudioChunk {
                    data: Bytes::from(tail),
                    info: AudioInfo::new(codec, sample_rate_hz, num_channels),
                    sequence_number: sequence,
                    start_timestamp_ns: context.timestamp(last_chunk_end_position),
                    end_timestamp_ns: context.timestamp(last_chunk_end_position + delay),
                });
            }
        }

        debug!(name = %self.name, "get_audio stream completed");
        Ok(())
    }
}

impl Drop for Microphone {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if let Some(stream) = state.stream.as_mut() {
            if let Err(e) = stream.stop() {
                error!(name = %self.name, error = %e, "failed to stop stream in drop");
            }
        }
    }
}

fn setup(
    host: &dyn HostBinding,
    params: &ConfigParams,
) -> AudioResult<(StreamSpec, Arc<InputStreamContext>)> {
    let spec = factory::build_stream_spec(host, params, StreamDirection::Input)?;
    let info = AudioInfo::new(AudioCodec::Pcm16, spec.sample_rate_hz, spec.num_channels);
    let context = Arc::new(InputStreamContext::new(info, DEFAULT_HISTORY_SECONDS)?);
    Ok((spec, context))
}

/// RAII guard for the advisory active-stream counter.
struct StreamGuard<'a> {
    microphone: &'a Microphone,
}

impl<'a> StreamGuard<'a> {
    fn new(microphone: &'a Microphone) -> Self {
        microphone.state.lock().active_streams += 1;
        Self { microphone }
    }
}

impl Drop for StreamGuard<'_> {
    fn drop(&mut self) {
        self.microphone.state.lock().active_streams -= 1;
    }
}

/// Initial ring position for a capture call; pure in the context state
/// and the requested timestamp.
fn initial_read_position(
    context: &InputStreamContext,
    previous_timestamp_ns: i64,
) -> AudioResult<u64> {
    // Default: start from the most recent audio.
    if previous_timestamp_ns == 0 {
        return Ok(context.ring().write_position());
    }

    if previous_timestamp_ns < 0 {
        return Err(AudioError::InvalidArgument(format!(
            "invalid previous_timestamp {previous_timestamp_ns}: must be non-negative"
        )));
    }

    let stream_start_ns = context.stream_start_wall_ns();
    if previous_timestamp_ns < stream_start_ns {
        return Err(AudioError::InvalidArgument(format!(
            "requested timestamp {previous_timestamp_ns} is before the stream started at \
             {stream_start_ns}"
        )));
    }

    // Read from the sample after the requested instant.
    let read_position = context.sample_index(previous_timestamp_ns) + 1;

    let write_position = context.ring().write_position();
    if read_position > write_position {
        let latest = context.timestamp(write_position);
        return Err(AudioError::InvalidArgument(format!(
            "requested timestamp {previous_timestamp_ns} is in the future (latest available: \
             {latest}): audio not yet captured"
        )));
    }

    if write_position - read_position > context.ring().capacity() {
        return Err(AudioError::InvalidArgument(format!(
            "requested timestamp is too old: audio has been overwritten, the buffer holds \
             {DEFAULT_HISTORY_SECONDS} seconds of history"
        )));
    }

    Ok(read_position)
}

/// Samples per chunk for the requested codec.
///
/// PCM chunks cover 100 ms. MP3 chunks target 150 ms rounded to whole
/// encoder frames so every encode call is frame aligned.
fn chunk_size(
    codec: AudioCodec,
    sample_rate_hz: u32,
    num_channels: u16,
    mp3_encoder: Option<&Mp3Encoder>,
) -> AudioResult<u64> {
    let samples_per_chunk = match codec {
        AudioCodec::Mp3 => {
            let encoder = mp3_encoder.ok_or_else(|| {
                AudioError::codec_failure(
                    "MP3 encoder must be initialised before calculating chunk size",
                )
            })?;
            let frame_size = encoder.frame_size() as u64;
            if frame_size == 0 {
                return Err(AudioError::codec_failure("MP3 encoder reported frame size 0"));
            }
            let target_samples_per_channel = sample_rate_hz as f64 * 0.15;
            let frames = ((target_samples_per_channel / frame_size as f64) + 0.5) as u64;
            let frames = frames.max(1);
            debug!(
                frames,
                frame_size,
                sample_rate_hz,
                num_channels,
                "calculated MP3-aligned chunk size"
            );
            frames * frame_size * num_channels as u64
        }
        _ => (sample_rate_hz as f64 * 0.1).round() as u64 * num_channels as u64,
    };

    if samples_per_chunk == 0 {
        return Err(AudioError::InvalidArgument(format!(
            "calculated invalid samples_per_chunk {samples_per_chunk} with sample rate \
             {sample_rate_hz} and {num_channels} channels"
        )));
    }
    Ok(samples_per_chunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(sample_rate_hz: u32, num_channels: u16) -> InputStreamContext {
        let info = AudioInfo::new(AudioCodec::Pcm16, sample_rate_hz, num_channels);
        InputStreamContext::new(info, 1).unwrap()
    }

    #[test]
    fn test_initial_position_zero_timestamp_is_live_edge() {
        let ctx = context(8000, 1);
        for _ in 0..100 {
            ctx.ring().write_sample(1);
        }
        assert_eq!(initial_read_position(&ctx, 0).unwrap(), 100);
    }

    #[test]
    fn test_initial_position_negative_timestamp_fails() {
        let ctx = context(8000, 1);
        assert!(matches!(
            initial_read_position(&ctx, -5),
            Err(AudioError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_initial_position_before_stream_start_fails() {
        let ctx = context(8000, 1);
        ctx.anchor(1_000_000_000_000, Duration::ZERO);
        assert!(matches!(
            initial_read_position(&ctx, 999_999_999_999),
            Err(AudioError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_initial_position_future_timestamp_fails() {
        let ctx = context(8000, 1);
        ctx.anchor(1_000_000_000_000, Duration::ZERO);
        for _ in 0..800 {
            ctx.ring().write_sample(0);
        }
        // Two seconds past the stream start but only 0.1s captured.
        assert!(matches!(
            initial_read_position(&ctx, 1_002_000_000_000),
            Err(AudioError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_initial_position_valid_history() {
        let ctx = context(8000, 1);
        ctx.anchor(1_000_000_000_000, Duration::ZERO);
        for _ in 0..8000 {
            ctx.ring().write_sample(0);
        }
        // Half a second in: sample 4000, read from the next one.
        let position = initial_read_position(&ctx, 1_000_500_000_000).unwrap();
        assert_eq!(position, 4001);
    }

    #[test]
    fn test_pcm_chunk_size_is_100ms() {
        assert_eq!(chunk_size(AudioCodec::Pcm16, 48000, 2, None).unwrap(), 9600);
        assert_eq!(chunk_size(AudioCodec::Pcm32, 44100, 1, None).unwrap(), 4410);
    }

    #[test]
    fn test_mp3_chunk_size_requires_encoder() {
        assert!(matches!(
            chunk_size(AudioCodec::Mp3, 48000, 2, None),
            Err(AudioError::CodecFailure(_))
        ));
    }
}
