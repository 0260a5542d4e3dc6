//! One-shot PCM16 sample-rate conversion
//!
//! Playback is the only caller: client audio arriving at a different
//! rate is converted to the output device's native rate in one pass
//! before it is queued.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use soundpost_common::{AudioError, AudioResult};
use tracing::debug;

use crate::codec::INT16_TO_FLOAT_SCALE;

/// Convert interleaved PCM16 from `in_rate` to `out_rate`.
///
/// `out` is replaced with round(in_frames * out_rate / in_rate) frames
/// worth of samples, trimmed to the exact count the resampler produced.
pub fn resample(
    in_rate: u32,
    out_rate: u32,
    num_channels: u16,
    input: &[i16],
    out: &mut Vec<i16>,
) -> AudioResult<()> {
    let channels = num_channels as usize;
    if channels == 0 || input.len() % channels != 0 {
        return Err(AudioError::InvalidArgument(format!(
            "input of {} samples is not a whole number of {channels}-channel frames",
            input.len()
        )));
    }

    let in_frames = input.len() / channels;
    out.clear();
    if in_frames == 0 {
        return Ok(());
    }

    let expected_frames =
        ((in_frames as u64 * out_rate as u64 + in_rate as u64 / 2) / in_rate as u64) as usize;

    let parameters = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(
        out_rate as f64 / in_rate as f64,
        2.0,
        parameters,
        in_frames,
        channels,
    )
    .map_err(|e| AudioError::InvalidArgument(format!("failed to build resampler: {e}")))?;

    // Deinterleave into the planar float layout the resampler works in.
    let mut planar: Vec<Vec<f32>> = vec![Vec::with_capacity(in_frames); channels];
    for frame in input.chunks_exact(channels) {
        for (channel, &sample) in frame.iter().enumerate() {
            planar[channel].push(sample as f32 * INT16_TO_FLOAT_SCALE);
        }
    }

    let mut produced = resampler
        .process(&planar, None)
        .map_err(|e| AudioError::InvalidArgument(format!("resample failed: {e}")))?;

    // The sinc stage holds back its filter delay; drain until silent.
    loop {
        let tail = resampler
            .process_partial(Option::<&[Vec<f32>]>::None, None)
            .map_err(|e| AudioError::InvalidArgument(format!("resample flush failed: {e}")))?;
        if tail.first().map_or(true, |channel| channel.is_empty()) {
            break;
        }
        for (channel, samples) in produced.iter_mut().zip(tail) {
            channel.extend(samples);
        }
    }

    let delay = resampler.output_delay().min(produced[0].len());
    let available = produced[0].len() - delay;
    let frames_out = available.min(expected_frames);

    out.reserve(frames_out * channels);
    for frame in delay..delay + frames_out {
        for channel in produced.iter() {
            let value = (channel[frame] / INT16_TO_FLOAT_SCALE).round();
            out.push(value.clamp(i16::MIN as f32, i16::MAX as f32) as i16);
        }
    }

    debug!(
        in_frames,
        out_frames = frames_out,
        in_rate,
        out_rate,
        "resampled audio"
    );
    Ok(())
}
