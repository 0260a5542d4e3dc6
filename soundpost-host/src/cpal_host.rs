//! cpal-backed host binding
//!
//! Wraps the platform audio host behind [`HostBinding`]. Devices are
//! enumerated once at construction; device ids are indices into that
//! snapshot.

use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use soundpost_common::{AudioError, AudioResult};
use soundpost_dsp::{InputStreamContext, OutputStreamContext};
use tracing::{debug, error, info};

use crate::{
    DeviceId, DeviceInfo, HostBinding, HostStream, StreamDirection, StreamInfo, StreamSpec,
};

/// Latency suggestion used where cpal exposes no host hint.
const DEFAULT_LATENCY: Duration = Duration::from_millis(10);

pub struct CpalHost {
    host: cpal::Host,
    devices: Vec<cpal::Device>,
}

// Device handles are only used behind &self, one call at a time per
// resource; cpal marks them !Sync on some backends.
unsafe impl Send for CpalHost {}
unsafe impl Sync for CpalHost {}

impl CpalHost {
    pub fn new() -> AudioResult<Self> {
        let host = cpal::default_host();
        let devices: Vec<cpal::Device> = host
            .devices()
            .map_err(|e| AudioError::HostFailure(format!("failed to enumerate devices: {e}")))?
            .collect();
        info!(devices = devices.len(), "audio host initialised");
        Ok(Self { host, devices })
    }

    fn device(&self, device: DeviceId) -> AudioResult<&cpal::Device> {
        self.devices
            .get(device)
            .ok_or_else(|| AudioError::NotFound(format!("no audio device at index {device}")))
    }

    fn position_of(&self, wanted: &cpal::Device) -> Option<DeviceId> {
        let name = wanted.name().ok()?;
        self.devices
            .iter()
            .position(|device| device.name().map(|n| n == name).unwrap_or(false))
    }
}

fn range_matches(
    range: &cpal::SupportedStreamConfigRange,
    num_channels: u16,
    rate: cpal::SampleRate,
) -> bool {
    range.channels() == num_channels
        && range.min_sample_rate() <= rate
        && range.max_sample_rate() >= rate
        && range.sample_format() == cpal::SampleFormat::I16
}

impl HostBinding for CpalHost {
    fn initialize(&self) -> AudioResult<()> {
        // Enumeration happened in new(); nothing further to bring up.
        Ok(())
    }

    fn device_count(&self) -> usize {
        self.devices.len()
    }

    fn device_info(&self, device: DeviceId) -> Option<DeviceInfo> {
        let dev = self.devices.get(device)?;
        let name = dev.name().ok()?;

        let mut max_input_channels = 0u16;
        if let Ok(configs) = dev.supported_input_configs() {
            for config in configs {
                max_input_channels = max_input_channels.max(config.channels());
            }
        }
        let mut max_output_channels = 0u16;
        if let Ok(configs) = dev.supported_output_configs() {
            for config in configs {
                max_output_channels = max_output_channels.max(config.channels());
            }
        }

        let default_sample_rate = dev
            .default_input_config()
            .map(|config| config.sample_rate().0)
            .or_else(|_| dev.default_output_config().map(|config| config.sample_rate().0))
            .unwrap_or(0);

        Some(DeviceInfo {
            name,
            max_input_channels,
            max_output_channels,
            default_sample_rate,
            default_low_input_latency: DEFAULT_LATENCY,
            default_low_output_latency: DEFAULT_LATENCY,
        })
    }

    fn default_input_device(&self) -> Option<DeviceId> {
        let device = self.host.default_input_device()?;
        self.position_of(&device)
    }

    fn default_output_device(&self) -> Option<DeviceId> {
        let device = self.host.default_output_device()?;
        self.position_of(&device)
    }

    fn is_format_supported(&self, spec: &StreamSpec) -> AudioResult<()> {
        let dev = self.device(spec.device)?;
        let rate = cpal::SampleRate(spec.sample_rate_hz);

        let supported = match spec.direction {
            StreamDirection::Input => dev
                .supported_input_configs()
                .map(|mut configs| configs.any(|c| range_matches(&c, spec.num_channels, rate))),
            StreamDirection::Output => dev
                .supported_output_configs()
                .map(|mut configs| configs.any(|c| range_matches(&c, spec.num_channels, rate))),
        };

        match supported {
            Ok(true) => Ok(()),
            Ok(false) => Err(AudioError::FormatUnsupported(format!(
                "audio format not supported by device '{}': requested {} Hz, {} channels, \
                 16-bit PCM, {:.3}s latency",
                spec.device_name,
                spec.sample_rate_hz,
                spec.num_channels,
                spec.suggested_latency.as_secs_f64(),
            ))),
            Err(e) => Err(AudioError::HostFailure(format!(
                "format query failed for device '{}': {e}",
                spec.device_name
            ))),
        }
    }

    fn open_input_stream(
        &self,
        spec: &StreamSpec,
        context: Arc<InputStreamContext>,
    ) -> AudioResult<Box<dyn HostStream>> {
        let dev = self.device(spec.device)?;
        debug!(
            device = %spec.device_name,
            sample_rate_hz = spec.sample_rate_hz,
            num_channels = spec.num_channels,
            "opening input stream"
        );

        let config = cpal::StreamConfig {
            channels: spec.num_channels,
            sample_rate: cpal::SampleRate(spec.sample_rate_hz),
            // Let the host pick the frames per buffer.
            buffer_size: cpal::BufferSize::Default,
        };

        let device_name = spec.device_name.clone();
        let stream = dev
            .build_input_stream(
                &config,
                move |data: &[i16], callback_info: &cpal::InputCallbackInfo| {
                    // Real-time thread: the preallocated context is the
                    // only state touched here.
                    let timestamp = callback_info.timestamp();
                    let adc_offset = timestamp
                        .callback
                        .duration_since(&timestamp.capture)
                        .unwrap_or_default();
                    context.on_host_buffer(data, adc_offset);
                },
                move |err| {
                    error!("input stream error on '{device_name}': {err}");
                },
                None,
            )
            .map_err(|e| {
                AudioError::HostFailure(format!(
                    "failed to open audio stream for device '{}': {e} (sample_rate={}, \
                     channels={}, latency={:.3}s)",
                    spec.device_name,
                    spec.sample_rate_hz,
                    spec.num_channels,
                    spec.suggested_latency.as_secs_f64(),
                ))
            })?;

        Ok(Box::new(CpalStream {
            stream: Some(stream),
            sample_rate_hz: spec.sample_rate_hz,
            latency: spec.suggested_latency,
        }))
    }

    fn open_output_stream(
        &self,
        spec: &StreamSpec,
        context: Arc<OutputStreamContext>,
    ) -> AudioResult<Box<dyn HostStream>> {
        let dev = self.device(spec.device)?;
        debug!(
            device = %spec.device_name,
            sample_rate_hz = spec.sample_rate_hz,
            num_channels = spec.num_channels,
            "opening output stream"
        );

        let config = cpal::StreamConfig {
            channels: spec.num_channels,
            sample_rate: cpal::SampleRate(spec.sample_rate_hz),
            buffer_size: cpal::BufferSize::Default,
        };

        let device_name = spec.device_name.clone();
        let stream = dev
            .build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    context.fill_host_buffer(data);
                },
                move |err| {
                    error!("output stream error on '{device_name}': {err}");
                },
                None,
            )
            .map_err(|e| {
                AudioError::HostFailure(format!(
                    "failed to open audio stream for device '{}': {e} (sample_rate={}, \
                     channels={}, latency={:.3}s)",
                    spec.device_name,
                    spec.sample_rate_hz,
                    spec.num_channels,
                    spec.suggested_latency.as_secs_f64(),
                ))
            })?;

        Ok(Box::new(CpalStream {
            stream: Some(stream),
            sample_rate_hz: spec.sample_rate_hz,
            latency: spec.suggested_latency,
        }))
    }

    fn terminate(&self) -> AudioResult<()> {
        Ok(())
    }
}

struct CpalStream {
    stream: Option<cpal::Stream>,
    sample_rate_hz: u32,
    latency: Duration,
}

// cpal streams are !Send on some backends; the handle is only driven
// from behind the owning resource's state lock.
unsafe impl Send for CpalStream {}

impl HostStream for CpalStream {
    fn start(&mut self) -> AudioResult<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| AudioError::host_failure("stream already closed"))?;
        stream
            .play()
            .map_err(|e| AudioError::HostFailure(format!("failed to start stream: {e}")))
    }

    fn stop(&mut self) -> AudioResult<()> {
        if let Some(stream) = self.stream.as_ref() {
            stream
                .pause()
                .map_err(|e| AudioError::HostFailure(format!("failed to stop stream: {e}")))?;
        }
        Ok(())
    }

    fn info(&self) -> Option<StreamInfo> {
        self.stream.as_ref()?;
        Some(StreamInfo {
            input_latency: self.latency,
            output_latency: self.latency,
            sample_rate_hz: self.sample_rate_hz,
        })
    }
}
