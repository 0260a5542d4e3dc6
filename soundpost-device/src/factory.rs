//! Resolve resource configuration into an openable stream
//!
//! Shared by the microphone and speaker: pick the device, fill in
//! defaults from its capabilities, and restart the host stream on
//! (re)configuration.

use std::time::Duration;

use soundpost_common::{AudioError, AudioResult, ConfigParams};
use soundpost_host::{find_device_by_name, HostBinding, HostStream, StreamDirection, StreamSpec};
use tracing::debug;

/// Resolve `params` against the host's device list.
///
/// An empty device name selects the direction's default device;
/// otherwise the name must match exactly. Unset attributes fall back
/// to the device's defaults (one channel if the device count allows).
pub fn build_stream_spec(
    host: &dyn HostBinding,
    params: &ConfigParams,
    direction: StreamDirection,
) -> AudioResult<StreamSpec> {
    let device = if params.device_name.is_empty() {
        let found = match direction {
            StreamDirection::Input => host.default_input_device(),
            StreamDirection::Output => host.default_output_device(),
        };
        found.ok_or_else(|| AudioError::NotFound("no default audio device found".to_string()))?
    } else {
        find_device_by_name(host, &params.device_name, direction).ok_or_else(|| {
            AudioError::NotFound(format!(
                "audio device with name '{}' not found",
                params.device_name
            ))
        })?
    };

    let info = host.device_info(device).ok_or_else(|| {
        AudioError::HostFailure(format!("failed to get device info for device {device}"))
    })?;

    let sample_rate_hz = params.sample_rate.unwrap_or(info.default_sample_rate);
    let num_channels = params.num_channels.unwrap_or(1);

    let max_channels = match direction {
        StreamDirection::Input => info.max_input_channels,
        StreamDirection::Output => info.max_output_channels,
    };
    if num_channels > max_channels {
        return Err(AudioError::InvalidArgument(format!(
            "requested {num_channels} channels but device '{}' only supports {max_channels}",
            info.name
        )));
    }

    let default_latency = match direction {
        StreamDirection::Input => info.default_low_input_latency,
        StreamDirection::Output => info.default_low_output_latency,
    };
    let suggested_latency = params
        .latency_ms
        .map(|ms| Duration::from_secs_f64(ms / 1000.0))
        .unwrap_or(default_latency);

    debug!(
        device = %info.name,
        sample_rate_hz,
        num_channels,
        latency_s = suggested_latency.as_secs_f64(),
        "stream configured"
    );

    Ok(StreamSpec {
        device,
        device_name: info.name,
        sample_rate_hz,
        num_channels,
        suggested_latency,
        direction,
    })
}

/// Replace `current` with a freshly opened, started stream.
///
/// Any existing stream is stopped and closed first. If the new stream
/// fails to start it is closed again and the error surfaces; `current`
/// is left empty in that case.
pub fn restart_stream(
    current: &mut Option<Box<dyn HostStream>>,
    open: impl FnOnce() -> AudioResult<Box<dyn HostStream>>,
) -> AudioResult<()> {
    if let Some(mut stream) = current.take() {
        stream.stop()?;
        // Dropping the handle closes the stream.
    }

    let mut stream = open()?;
    if let Err(e) = stream.start() {
        drop(stream);
        return Err(e);
    }

    *current = Some(stream);
    Ok(())
}
