//! Speaker resource
//!
//! play() decodes client audio to PCM16, rate-matches it to the output
//! device, writes it into the live output context, and blocks until
//! the real-time callback has drained it.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use soundpost_common::{
    Attributes, AudioCodec, AudioError, AudioInfo, AudioProperties, AudioResult, ConfigParams,
    DEFAULT_HISTORY_SECONDS,
};
use soundpost_dsp::{codec, resample, OutputStreamContext};
use soundpost_host::{HostBinding, HostStream, StreamDirection, StreamSpec};
use tracing::{debug, error, info, warn};

use crate::factory;
use crate::volume;

pub const SPEAKER_MODEL: &str = "soundpost:audio:speaker";

/// Pause between drain checks while waiting for playback to finish.
const DRAIN_POLL: Duration = Duration::from_millis(10);

struct SpeakerState {
    stream: Option<Box<dyn HostStream>>,
    context: Arc<OutputStreamContext>,
    device_name: String,
    sample_rate_hz: u32,
    num_channels: u16,
    latency: Duration,
}

pub struct Speaker {
    name: String,
    host: Arc<dyn HostBinding>,
    /// Protects the live stream, context, and stream configuration
    state: Mutex<SpeakerState>,
    /// Serialises play() so decoded streams never interleave
    playback: Mutex<()>,
}

impl Speaker {
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
            host.open_output_stream(&spec, context.clone())
        })?;
        info!(name = %name, device = %spec.device_name, "speaker stream started");

        if let Some(volume) = params.volume {
            volume::set_device_volume(&spec.device_name, volume);
        }

        Ok(Self {
            name,
            host,
            state: Mutex::new(SpeakerState {
                stream,
                context,
                device_name: spec.device_name,
                sample_rate_hz: spec.sample_rate_hz,
                num_channels: spec.num_channels,
                latency: spec.suggested_latency,
            }),
            playback: Mutex::new(()),
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
        info!(name = %self.name, "speaker reconfigure start");
        let params = ConfigParams::from_attributes(attributes)?;

        {
            let state = self.state.lock();
            let write_position = state.context.ring().write_position();
            let playback_cursor = state.context.playback_cursor();
            if write_position > playback_cursor {
                let unplayed = write_position - playback_cursor;
                let seconds = unplayed as f64
                    / (state.sample_rate_hz as f64 * state.num_channels as f64);
                warn!(
                    name = %self.name,
                    seconds,
                    "discarding unplayed audio on reconfigure"
                );
            }
        }

        let (spec, context) = setup(self.host.as_ref(), &params)?;
        self.host.is_format_supported(&spec)?;

        let mut state = self.state.lock();
        let mut stream = state.stream.take();
        match factory::restart_stream(&mut stream, || {
            self.host.open_output_stream(&spec, context.clone())
        }) {
            Ok(()) => {
                // Swap (stream, context) together; a blocked play() call
                // notices the swap and returns interrupted.
                state.stream = stream;
                state.context = context;
                state.device_name = spec.device_name.clone();
                state.sample_rate_hz = spec.sample_rate_hz;
                state.num_channels = spec.num_channels;
                state.latency = spec.suggested_latency;
                drop(state);

                if let Some(volume) = params.volume {
                    volume::set_device_volume(&spec.device_name, volume);
                }
                info!(name = %self.name, "speaker reconfigure completed");
                Ok(())
            }
            Err(e) => {
                state.stream = stream;
                error!(name = %self.name, error = %e, "speaker reconfigure failed");
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

    /// Decode, rate-match, queue, and play `audio_data`, blocking until
    /// the output callback has consumed every queued sample.
    ///
    /// Returns without error if a reconfigure swaps the output stream
    /// mid-playback.
    pub fn play(
        &self,
        audio_data: &[u8],
        info: Option<AudioInfo>,
        _extra: &Attributes,
    ) -> AudioResult<()> {
        let _playback = self.playback.lock();

        let info = info.ok_or_else(|| {
            AudioError::invalid_argument("audio info with a codec is required for play")
        })?;
        info!(
            name = %self.name,
            bytes = audio_data.len(),
            codec = %info.codec,
            "play called"
        );

        // Decode to interleaved PCM16. MP3 streams carry their own rate
        // and channel count; for PCM the caller's info stands.
        let mut pcm_bytes = Vec::new();
        let discovered = codec::decode_chunk(info.codec, audio_data, &mut pcm_bytes)?;
        let (source_rate, source_channels) = match discovered {
            Some((rate, channels)) => (rate, channels),
            None => (info.sample_rate_hz, info.num_channels),
        };

        if pcm_bytes.len() % 2 != 0 {
            return Err(AudioError::InvalidArgument(format!(
                "audio data size must be even for PCM16 format, got {} bytes",
                pcm_bytes.len()
            )));
        }
        let mut samples: Vec<i16> = pcm_bytes
            .chunks_exact(2)
            .map(|bytes| i16::from_le_bytes([bytes[0], bytes[1]]))
            .collect();

        let (speaker_rate, speaker_channels, latency) = {
            let state = self.state.lock();
            (state.sample_rate_hz, state.num_channels, state.latency)
        };

        if source_channels != speaker_channels {
            return Err(AudioError::InvalidArgument(format!(
                "audio has {source_channels} channels but the speaker is configured for \
                 {speaker_channels}"
            )));
        }

        if source_rate != speaker_rate {
            debug!(source_rate, speaker_rate, "resampling playback audio");
            let mut resampled = Vec::new();
            resample::resample(
                source_rate,
                speaker_rate,
                speaker_channels,
                &samples,
                &mut resampled,
            )?;
            samples = resampled;
        }

        let duration_seconds =
            samples.len() as f64 / (speaker_rate as f64 * speaker_channels as f64);
        if duration_seconds > DEFAULT_HISTORY_SECONDS as f64 {
            return Err(AudioError::InvalidArgument(format!(
                "file too long: {duration_seconds:.1}s of audio exceeds the \
                 {DEFAULT_HISTORY_SECONDS}s playback buffer"
            )));
        }

        // Queue under the state lock, then wait without it.
        let (context, start_position) = {
            let state = self.state.lock();
            let context = state.context.clone();
            let start_position = context.ring().write_position();
            for &sample in &samples {
                context.ring().write_sample(sample);
            }
            (context, start_position)
        };
        let num_samples = samples.len() as u64;

        debug!(num_samples, start_position, "waiting for playback to complete");
        while context.playback_cursor().saturating_sub(start_position) < num_samples {
            {
                let state = self.state.lock();
                if !Arc::ptr_eq(&state.context, &context) {
                    info!(name = %self.name, "playback interrupted by reconfigure");
                    return Ok(());
                }
            }
            thread::sleep(DRAIN_POLL);
        }

        // Let the host's own pipeline drain before returning.
        thread::sleep(latency);
        info!(name = %self.name, "audio playback complete");
        Ok(())
    }

    /// `{"set_volume": 0..=100}` -> `{"volume": n}`; other commands are
    /// logged and ignored.
    pub fn do_command(&self, command: &Attributes) -> AudioResult<Attributes> {
        if let Some(value) = command.get("set_volume") {
            let volume = value.as_i64().ok_or_else(|| {
                AudioError::invalid_argument("set_volume must be an integer")
            })?;
            if !(0..=100).contains(&volume) {
                return Err(AudioError::InvalidArgument(format!(
                    "set_volume must be between 0 and 100, got {volume}"
                )));
            }

            let device_name = self.state.lock().device_name.clone();
            volume::set_device_volume(&device_name, volume);

            let mut reply = Attributes::new();
            reply.insert("volume".to_string(), serde_json::json!(volume));
            return Ok(reply);
        }

        error!(name = %self.name, "unrecognised do_command request");
        Ok(Attributes::new())
    }
}

impl Drop for Speaker {
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
) -> AudioResult<(StreamSpec, Arc<OutputStreamContext>)> {
    let spec = factory::build_stream_spec(host, params, StreamDirection::Output)?;
    let info = AudioInfo::new(AudioCodec::Pcm16, spec.sample_rate_hz, spec.num_channels);
    let context = Arc::new(OutputStreamContext::new(info, DEFAULT_HISTORY_SECONDS)?);
    Ok((spec, context))
}
