//! MP3 encode and decode over libmp3lame
//!
//! Safe wrappers around the LAME encoder and its bundled hip decoder.
//! Encoder state must not survive a sample-rate or channel change;
//! callers drop the wrapper and create a fresh one instead of
//! reconfiguring in place.

use std::ffi::{c_int, c_uchar, c_ulong};

use soundpost_common::{AudioError, AudioResult};
use tracing::{debug, info};

/// Target bit rate in kbps; how many bits represent one second of audio.
const MP3_BIT_RATE_KBPS: c_int = 192;
/// LAME quality setting, 0 = best/slowest, 9 = worst/fastest.
const MP3_QUALITY: c_int = 2;

/// Decoded samples per channel hip can hand back in one call.
const DECODE_BUFFER_SAMPLES: usize = 8192;
/// Consecutive empty decoder returns tolerated before declaring end of
/// stream.
const MAX_EMPTY_DECODES: u32 = 10;

// ======================== FFI declarations ========================

/// Opaque type for lame_global_flags
#[repr(C)]
struct LameGlobalFlags {
    _private: [u8; 0],
}

/// Opaque type for hip_global_flags
#[repr(C)]
struct HipGlobalFlags {
    _private: [u8; 0],
}

/// Header data reported by the hip decoder, mirrors mp3data_struct
#[repr(C)]
struct Mp3Data {
    header_parsed: c_int,
    stereo: c_int,
    samplerate: c_int,
    bitrate: c_int,
    mode: c_int,
    mode_ext: c_int,
    framesize: c_int,
    nsamp: c_ulong,
    totalframes: c_int,
    framenum: c_int,
}

extern "C" {
    fn lame_init() -> *mut LameGlobalFlags;
    fn lame_set_in_samplerate(gfp: *mut LameGlobalFlags, rate: c_int) -> c_int;
    fn lame_set_out_samplerate(gfp: *mut LameGlobalFlags, rate: c_int) -> c_int;
    fn lame_set_num_channels(gfp: *mut LameGlobalFlags, channels: c_int) -> c_int;
    fn lame_set_brate(gfp: *mut LameGlobalFlags, brate: c_int) -> c_int;
    fn lame_set_quality(gfp: *mut LameGlobalFlags, quality: c_int) -> c_int;
    fn lame_init_params(gfp: *mut LameGlobalFlags) -> c_int;
    fn lame_get_encoder_delay(gfp: *const LameGlobalFlags) -> c_int;
    fn lame_get_framesize(gfp: *const LameGlobalFlags) -> c_int;
    fn lame_encode_buffer(
        gfp: *mut LameGlobalFlags,
        left: *const i16,
        right: *const i16,
        num_samples: c_int,
        mp3buf: *mut c_uchar,
        mp3buf_size: c_int,
    ) -> c_int;
    fn lame_encode_buffer_interleaved(
        gfp: *mut LameGlobalFlags,
        pcm: *mut i16,
        num_samples: c_int,
        mp3buf: *mut c_uchar,
        mp3buf_size: c_int,
    ) -> c_int;
    fn lame_encode_flush(gfp: *mut LameGlobalFlags, mp3buf: *mut c_uchar, size: c_int) -> c_int;
    fn lame_close(gfp: *mut LameGlobalFlags) -> c_int;

    fn hip_decode_init() -> *mut HipGlobalFlags;
    fn hip_decode_exit(hip: *mut HipGlobalFlags) -> c_int;
    fn hip_decode1_headers(
        hip: *mut HipGlobalFlags,
        mp3buf: *mut c_uchar,
        len: usize,
        pcm_l: *mut i16,
        pcm_r: *mut i16,
        mp3data: *mut Mp3Data,
    ) -> c_int;
}

// ======================== Encoder ========================

/// Stateful MP3 encoder for the capture path.
///
/// Encodes interleaved PCM16 at 192 kbps CBR. The encoder delay and
/// frame size reported by LAME drive chunk alignment and timestamp
/// adjustment upstream.
#[derive(Debug)]
pub struct Mp3Encoder {
    handle: *mut LameGlobalFlags,
    sample_rate_hz: u32,
    num_channels: u16,
    /// Samples per channel LAME prepends before real output starts
    encoder_delay: u32,
    /// Samples per channel in one MP3 frame
    frame_size: u32,
    /// Interleaved samples short of a whole frame, kept for the next call
    pending: Vec<i16>,
}

// The LAME handle is only touched through &mut self.
unsafe impl Send for Mp3Encoder {}

impl Mp3Encoder {
    pub fn new(sample_rate_hz: u32, num_channels: u16) -> AudioResult<Self> {
        if num_channels != 1 && num_channels != 2 {
            return Err(AudioError::CodecFailure(format!(
                "MP3 encoder supports mono or stereo, got {num_channels} channels"
            )));
        }

        let handle = unsafe { lame_init() };
        if handle.is_null() {
            return Err(AudioError::codec_failure("failed to allocate LAME encoder"));
        }

        unsafe {
            lame_set_in_samplerate(handle, sample_rate_hz as c_int);
            lame_set_out_samplerate(handle, sample_rate_hz as c_int);
            lame_set_num_channels(handle, num_channels as c_int);
            lame_set_brate(handle, MP3_BIT_RATE_KBPS);
            lame_set_quality(handle, MP3_QUALITY);
        }

        if unsafe { lame_init_params(handle) } < 0 {
            unsafe { lame_close(handle) };
            return Err(AudioError::CodecFailure(format!(
                "LAME rejected configuration: {sample_rate_hz} Hz, {num_channels} channels"
            )));
        }

        let encoder_delay = unsafe { lame_get_encoder_delay(handle) }.max(0) as u32;
        let frame_size = unsafe { lame_get_framesize(handle) }.max(0) as u32;

        info!(
            sample_rate_hz,
            num_channels, encoder_delay, frame_size, "MP3 encoder initialised"
        );

        Ok(Self {
            handle,
            sample_rate_hz,
            num_channels,
            encoder_delay,
            frame_size,
            pending: Vec::new(),
        })
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    pub fn num_channels(&self) -> u16 {
        self.num_channels
    }

    pub fn encoder_delay(&self) -> u32 {
        self.encoder_delay
    }

    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    /// Encode interleaved PCM16, appending framed MP3 bytes to `out`.
    ///
    /// Samples short of a whole MP3 frame are buffered for the next
    /// call; an empty input is a no-op.
    pub fn encode(&mut self, samples: &[i16], out: &mut Vec<u8>) -> AudioResult<()> {
        self.pending.extend_from_slice(samples);

        let samples_per_frame = (self.frame_size * self.num_channels as u32) as usize;
        let whole = self.pending.len() / samples_per_frame * samples_per_frame;
        if whole == 0 {
            return Ok(());
        }

        let frames = whole / self.num_channels as usize;
        // Worst-case output per the LAME docs: 1.25 * samples + 7200.
        let mp3buf_size = frames * 5 / 4 + 7200;
        let start = out.len();
        out.resize(start + mp3buf_size, 0);

        let written = unsafe {
            let mp3buf = out[start..].as_mut_ptr();
            if self.num_channels == 2 {
                lame_encode_buffer_interleaved(
                    self.handle,
                    self.pending.as_mut_ptr(),
                    frames as c_int,
                    mp3buf,
                    mp3buf_size as c_int,
                )
            } else {
                lame_encode_buffer(
                    self.handle,
                    self.pending.as_ptr(),
                    self.pending.as_ptr(),
                    frames as c_int,
                    mp3buf,
                    mp3buf_size as c_int,
                )
            }
        };

        if written < 0 {
            out.truncate(start);
            return Err(AudioError::CodecFailure(format!(
                "LAME encode failed: {written}"
            )));
        }

        out.truncate(start + written as usize);
        self.pending.drain(..whole);
        Ok(())
    }

    /// Drain the encoder's internal lookahead, appending the tail bytes
    /// to `out`. Required at the end of a capture stream so the last
    /// ~encoder_delay samples per channel are not lost.
    pub fn flush(&mut self, out: &mut Vec<u8>) -> AudioResult<()> {
        let start = out.len();
        out.resize(start + 7200, 0);

        let written =
            unsafe { lame_encode_flush(self.handle, out[start..].as_mut_ptr(), 7200 as c_int) };
        if written < 0 {
            out.truncate(start);
            return Err(AudioError::CodecFailure(format!(
                "LAME flush failed: {written}"
            )));
        }
        out.truncate(start + written as usize);

        if !self.pending.is_empty() {
            debug!(
                samples = self.pending.len() / self.num_channels as usize,
                "discarding partial frame buffered at end of stream"
            );
            self.pending.clear();
        }
        Ok(())
    }
}

impl Drop for Mp3Encoder {
    fn drop(&mut self) {
        unsafe {
            lame_close(self.handle);
        }
    }
}

// ======================== Decoder ========================

/// Stateful MP3 decoder for the playback path.
///
/// Sample rate and channel count are discovered from the first frame
/// that yields samples and become authoritative for the stream.
pub struct Mp3Decoder {
    handle: *mut HipGlobalFlags,
    sample_rate_hz: u32,
    num_channels: u16,
}

// The hip handle is only touched through &mut self.
unsafe impl Send for Mp3Decoder {}

impl Mp3Decoder {
    pub fn new() -> AudioResult<Self> {
        let handle = unsafe { hip_decode_init() };
        if handle.is_null() {
            return Err(AudioError::codec_failure("failed to initialise MP3 decoder"));
        }
        Ok(Self {
            handle,
            sample_rate_hz: 0,
            num_channels: 0,
        })
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    pub fn num_channels(&self) -> u16 {
        self.num_channels
    }

    /// Decode an entire MP3 stream to interleaved PCM16, appending to
    /// `out`. Returns the discovered (sample_rate_hz, num_channels).
    ///
    /// An optional ID3v2 header and any padding before the first frame
    /// sync are skipped. The whole tail is fed to hip once, then the
    /// decoder is drained with empty reads until it stays silent.
    pub fn decode(&mut self, data: &[u8], out: &mut Vec<u8>) -> AudioResult<(u32, u16)> {
        let offset = skip_id3v2(data);
        if offset >= data.len() {
            return Err(AudioError::invalid_argument(
                "MP3 data contains only an ID3 tag, no audio frames",
            ));
        }

        let body = &data[offset..];
        let sync = find_frame_sync(body).ok_or_else(|| {
            AudioError::invalid_argument("no MPEG frame sync found in MP3 data")
        })?;
        let frames = &body[sync..];

        debug!(bytes = frames.len(), skipped = offset + sync, "decoding MP3 data");

        let mut pcm_l = vec![0i16; DECODE_BUFFER_SAMPLES];
        let mut pcm_r = vec![0i16; DECODE_BUFFER_SAMPLES];
        let mut mp3data: Mp3Data = unsafe { std::mem::zeroed() };

        let start_len = out.len();
        let mut fed = false;
        let mut empty_returns = 0u32;
        loop {
            let (buffer, len) = if fed {
                (std::ptr::null_mut(), 0)
            } else {
                (frames.as_ptr() as *mut c_uchar, frames.len())
            };

            let decoded = unsafe {
                hip_decode1_headers(
                    self.handle,
                    buffer,
                    len,
                    pcm_l.as_mut_ptr(),
                    pcm_r.as_mut_ptr(),
                    &mut mp3data,
                )
            };
            fed = true;

            if decoded < 0 {
                return Err(AudioError::CodecFailure(format!(
                    "MP3 decode failed: {decoded}"
                )));
            }
            if decoded == 0 {
                empty_returns += 1;
                if empty_returns >= MAX_EMPTY_DECODES {
                    break;
                }
                continue;
            }
            empty_returns = 0;

            if self.sample_rate_hz == 0 {
                self.sample_rate_hz = mp3data.samplerate.max(0) as u32;
                self.num_channels = mp3data.stereo.max(0) as u16;
                debug!(
                    sample_rate_hz = self.sample_rate_hz,
                    num_channels = self.num_channels,
                    "MP3 stream properties discovered"
                );
            }

            let count = (decoded as usize).min(DECODE_BUFFER_SAMPLES);
            for i in 0..count {
                out.extend_from_slice(&pcm_l[i].to_le_bytes());
                if self.num_channels == 2 {
                    out.extend_from_slice(&pcm_r[i].to_le_bytes());
                }
            }
        }

        if out.len() == start_len {
            return Err(AudioError::codec_failure(
                "no audio data was decoded from MP3 stream",
            ));
        }

        debug!(
            bytes = out.len() - start_len,
            sample_rate_hz = self.sample_rate_hz,
            num_channels = self.num_channels,
            "MP3 decode complete"
        );
        Ok((self.sample_rate_hz, self.num_channels))
    }
}

impl Drop for Mp3Decoder {
    fn drop(&mut self) {
        unsafe {
            hip_decode_exit(self.handle);
        }
    }
}

/// Byte count of an ID3v2 header at the start of `data`, 0 if absent.
/// The size field is a 28-bit synchsafe integer after the 10-byte
/// header.
fn skip_id3v2(data: &[u8]) -> usize {
    if data.len() < 10 || &data[0..3] != b"ID3" {
        return 0;
    }
    let size = ((data[6] as usize & 0x7F) << 21)
        | ((data[7] as usize & 0x7F) << 14)
        | ((data[8] as usize & 0x7F) << 7)
        | (data[9] as usize & 0x7F);
    size + 10
}

/// Offset of the first MPEG frame sync (11 set bits) in `data`.
fn find_frame_sync(data: &[u8]) -> Option<usize> {
    data.windows(2)
        .position(|pair| pair[0] == 0xFF && pair[1] & 0xE0 == 0xE0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_id3v2() {
        assert_eq!(skip_id3v2(b"no tag here"), 0);

        // 10-byte header + 100-byte synchsafe size.
        let mut tagged = vec![b'I', b'D', b'3', 4, 0, 0, 0, 0, 0, 100];
        tagged.extend_from_slice(&[0u8; 100]);
        assert_eq!(skip_id3v2(&tagged), 110);
    }

    #[test]
    fn test_find_frame_sync() {
        assert_eq!(find_frame_sync(&[0x00, 0xFF, 0xFB, 0x90]), Some(1));
        assert_eq!(find_frame_sync(&[0xFF, 0x00, 0xFF, 0x1F]), None);
        assert_eq!(find_frame_sync(&[]), None);
    }

    #[test]
    fn test_encoder_rejects_bad_channel_counts() {
        for channels in [0u16, 3, 6] {
            let err = Mp3Encoder::new(48000, channels).unwrap_err();
            assert!(matches!(err, AudioError::CodecFailure(_)));
        }
    }

    #[test]
    fn test_encoder_reports_delay_and_frame_size() {
        let encoder = Mp3Encoder::new(48000, 1).unwrap();
        assert!(encoder.encoder_delay() > 0);
        // MPEG-1 Layer 3 frames carry 1152 samples per channel.
        assert_eq!(encoder.frame_size(), 1152);
    }

    #[test]
    fn test_encode_empty_input_is_noop() {
        let mut encoder = Mp3Encoder::new(44100, 2).unwrap();
        let mut out = Vec::new();
        encoder.encode(&[], &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_encode_buffers_partial_frames_until_flush() {
        let mut encoder = Mp3Encoder::new(48000, 1).unwrap();
        let mut out = Vec::new();
        // Half a frame: nothing encodable yet.
        encoder.encode(&vec![0i16; 576], &mut out).unwrap();
        assert!(out.is_empty());

        encoder.flush(&mut out).unwrap();
        // Flush drops the partial frame but still emits the lookahead.
        assert!(!out.is_empty());
    }

    fn sine_samples(frames: usize, rate: u32) -> Vec<i16> {
        (0..frames)
            .map(|i| {
                let t = i as f32 / rate as f32;
                ((t * 440.0 * std::f32::consts::TAU).sin() * 12000.0) as i16
            })
            .collect()
    }

    #[test]
    fn test_mp3_round_trip() {
        let rate = 48000;
        let mut encoder = Mp3Encoder::new(rate, 1).unwrap();
        let frames = encoder.frame_size() as usize * 4;

        let mut encoded = Vec::new();
        encoder
            .encode(&sine_samples(frames, rate), &mut encoded)
            .unwrap();
        encoder.flush(&mut encoded).unwrap();
        assert!(!encoded.is_empty());

        let mut decoder = Mp3Decoder::new().unwrap();
        let mut pcm = Vec::new();
        let (decoded_rate, decoded_channels) = decoder.decode(&encoded, &mut pcm).unwrap();

        assert_eq!(decoded_rate, rate);
        assert_eq!(decoded_channels, 1);
        assert!(!pcm.is_empty());
    }

    #[test]
    fn test_decoder_rejects_garbage() {
        let mut decoder = Mp3Decoder::new().unwrap();
        let mut pcm = Vec::new();
        assert!(decoder.decode(&[0x00, 0x01, 0x02, 0x03], &mut pcm).is_err());
    }
}
