//! Soundpost DSP - the audio data path
//!
//! Everything between the real-time host callback and a client-facing
//! resource lives here:
//! - Lock-free circular sample buffer (one producer, many readers)
//! - Input/output stream contexts with timestamp and cursor tracking
//! - PCM and MP3 encode/decode
//! - One-shot sample-rate conversion

pub mod codec;
pub mod mp3;
pub mod resample;
pub mod ring;
pub mod stream;

pub use mp3::{Mp3Decoder, Mp3Encoder};
pub use ring::SampleRing;
pub use stream::{InputStreamContext, OutputStreamContext};
