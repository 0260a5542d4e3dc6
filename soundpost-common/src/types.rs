//! Common audio types used across soundpost components

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::AudioError;

/// Nanoseconds in one second, for sample/timestamp math
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Audio codecs carried on the wire
///
/// The internal capture and playback format is always interleaved
/// 16-bit PCM; the other tags exist at the encode/decode boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioCodec {
    Pcm16,
    Pcm32,
    Pcm32Float,
    Mp3,
}

impl AudioCodec {
    /// Parse a codec string (case-insensitive)
    pub fn parse(codec: &str) -> Result<Self, AudioError> {
        match codec.to_ascii_lowercase().as_str() {
            "pcm16" => Ok(Self::Pcm16),
            "pcm32" => Ok(Self::Pcm32),
            "pcm32_float" => Ok(Self::Pcm32Float),
            "mp3" => Ok(Self::Mp3),
            other => Err(AudioError::InvalidArgument(format!(
                "unsupported codec: {other}. Supported codecs: pcm16, pcm32, pcm32_float, mp3"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pcm16 => "pcm16",
            Self::Pcm32 => "pcm32",
            Self::Pcm32Float => "pcm32_float",
            Self::Mp3 => "mp3",
        }
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioCodec {
    type Err = AudioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Format of an audio stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioInfo {
    /// Codec of the data this info describes
    pub codec: AudioCodec,
    /// Sample rate in Hz (positive)
    pub sample_rate_hz: u32,
    /// Interleaved channel count (positive)
    pub num_channels: u16,
}

impl AudioInfo {
    pub fn new(codec: AudioCodec, sample_rate_hz: u32, num_channels: u16) -> Self {
        Self {
            codec,
            sample_rate_hz,
            num_channels,
        }
    }
}

/// One encoded run of captured audio, produced by a capture iteration
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Encoded bytes in the requested codec
    pub data: Bytes,
    /// Codec, sample rate, and channel count of the source stream
    pub info: AudioInfo,
    /// Monotone per capture call, starting at 0
    pub sequence_number: u64,
    /// Wall-clock time of the first sample, ns since the epoch
    pub start_timestamp_ns: i64,
    /// Wall-clock time just past the last sample, ns since the epoch
    pub end_timestamp_ns: i64,
}

/// Static capabilities reported by a resource
#[derive(Debug, Clone)]
pub struct AudioProperties {
    pub supported_codecs: Vec<AudioCodec>,
    pub sample_rate_hz: u32,
    pub num_channels: u16,
}

/// Current wall-clock time in nanoseconds since the Unix epoch
pub fn now_ns() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_parse_round_trip() {
        for codec in [
            AudioCodec::Pcm16,
            AudioCodec::Pcm32,
            AudioCodec::Pcm32Float,
            AudioCodec::Mp3,
        ] {
            assert_eq!(AudioCodec::parse(codec.as_str()).unwrap(), codec);
        }
    }

    #[test]
    fn test_codec_parse_is_case_insensitive() {
        assert_eq!(AudioCodec::parse("PCM16").unwrap(), AudioCodec::Pcm16);
        assert_eq!(
            AudioCodec::parse("Pcm32_Float").unwrap(),
            AudioCodec::Pcm32Float
        );
    }

    #[test]
    fn test_codec_parse_rejects_unknown() {
        let err = AudioCodec::parse("opus").unwrap_err();
        assert!(matches!(err, AudioError::InvalidArgument(_)));
    }
}
