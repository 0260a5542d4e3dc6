//! PCM conversions and the per-codec encode/decode dispatch
//!
//! The capture format is interleaved PCM16; encoders convert outward
//! from it and decoders convert back to it. MP3 is the only stateful
//! codec and lives in [`crate::mp3`].

use soundpost_common::{AudioCodec, AudioError, AudioResult};

use crate::mp3::{Mp3Decoder, Mp3Encoder};

/// Scale factor for converting int16 samples to float [-1.0, 1.0]
pub const INT16_TO_FLOAT_SCALE: f32 = 1.0 / 32768.0;

/// Append PCM16 samples to `out` as little-endian bytes.
pub fn copy_pcm16(samples: &[i16], out: &mut Vec<u8>) {
    out.reserve(samples.len() * 2);
    for &sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
}

/// Append PCM16 samples as little-endian int32, shifted left to
/// preserve volume.
pub fn pcm16_to_pcm32(samples: &[i16], out: &mut Vec<u8>) {
    out.reserve(samples.len() * 4);
    for &sample in samples {
        out.extend_from_slice(&((sample as i32) << 16).to_le_bytes());
    }
}

/// Append PCM16 samples as little-endian float32 normalised to
/// [-1.0, 1.0].
pub fn pcm16_to_float32(samples: &[i16], out: &mut Vec<u8>) {
    out.reserve(samples.len() * 4);
    for &sample in samples {
        out.extend_from_slice(&(sample as f32 * INT16_TO_FLOAT_SCALE).to_le_bytes());
    }
}

/// Convert PCM32 bytes back to PCM16.
pub fn pcm32_to_pcm16(data: &[u8], out: &mut Vec<u8>) -> AudioResult<()> {
    if data.len() % 4 != 0 {
        return Err(AudioError::invalid_argument(
            "PCM32 data size must be divisible by 4",
        ));
    }
    out.reserve(data.len() / 2);
    for bytes in data.chunks_exact(4) {
        let sample = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        out.extend_from_slice(&((sample >> 16) as i16).to_le_bytes());
    }
    Ok(())
}

/// Convert float32 bytes back to PCM16, clamping to [-1.0, 1.0].
pub fn float32_to_pcm16(data: &[u8], out: &mut Vec<u8>) -> AudioResult<()> {
    if data.len() % 4 != 0 {
        return Err(AudioError::invalid_argument(
            "float32 data size must be divisible by 4",
        ));
    }
    out.reserve(data.len() / 2);
    for bytes in data.chunks_exact(4) {
        let sample = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let clamped = sample.clamp(-1.0, 1.0);
        out.extend_from_slice(&((clamped * 32767.0) as i16).to_le_bytes());
    }
    Ok(())
}

/// Encode one chunk of captured PCM16 into the requested codec,
/// appending to `out`. MP3 requires an initialised encoder.
pub fn encode_chunk(
    codec: AudioCodec,
    samples: &[i16],
    mp3_encoder: Option<&mut Mp3Encoder>,
    out: &mut Vec<u8>,
) -> AudioResult<()> {
    match codec {
        AudioCodec::Pcm16 => copy_pcm16(samples, out),
        AudioCodec::Pcm32 => pcm16_to_pcm32(samples, out),
        AudioCodec::Pcm32Float => pcm16_to_float32(samples, out),
        AudioCodec::Mp3 => {
            let encoder = mp3_encoder
                .ok_or_else(|| AudioError::codec_failure("MP3 encoder not initialised"))?;
            encoder.encode(samples, out)?;
        }
    }
    Ok(())
}

/// Decode client audio to interleaved PCM16, appending to `out`.
///
/// Returns the sample rate and channel count when the codec discovers
/// them from the stream itself (MP3); `None` means the caller's info
/// stands.
pub fn decode_chunk(
    codec: AudioCodec,
    data: &[u8],
    out: &mut Vec<u8>,
) -> AudioResult<Option<(u32, u16)>> {
    match codec {
        AudioCodec::Pcm16 => {
            out.extend_from_slice(data);
            Ok(None)
        }
        AudioCodec::Pcm32 => {
            pcm32_to_pcm16(data, out)?;
            Ok(None)
        }
        AudioCodec::Pcm32Float => {
            float32_to_pcm16(data, out)?;
            Ok(None)
        }
        AudioCodec::Mp3 => {
            let mut decoder = Mp3Decoder::new()?;
            let discovered = decoder.decode(data, out)?;
            Ok(Some(discovered))
        }
    }
}
