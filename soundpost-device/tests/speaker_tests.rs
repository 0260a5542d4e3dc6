//! Integration tests for the speaker resource
//!
//! The mock host never drains audio on its own; tests that need the
//! playback cursor to move run a consumer thread standing in for the
//! real-time output callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use soundpost_common::{Attributes, AudioCodec, AudioError, AudioInfo};
use soundpost_device::Speaker;
use soundpost_host::mock::MockHost;
use soundpost_host::HostBinding;

fn attrs(pairs: &[(&str, serde_json::Value)]) -> Attributes {
    let mut map = Attributes::new();
    for (key, value) in pairs {
        map.insert((*key).to_string(), value.clone());
    }
    map
}

fn new_speaker(host: &Arc<MockHost>, attributes: &Attributes) -> Speaker {
    let binding: Arc<dyn HostBinding> = host.clone();
    Speaker::new("speaker-1", binding, attributes).expect("failed to build speaker")
}

/// Stand-in for the real-time output callback: keeps draining the live
/// output context until told to stop.
fn spawn_drain(host: &Arc<MockHost>, stop: &Arc<AtomicBool>) -> std::thread::JoinHandle<()> {
    let host = host.clone();
    let stop = stop.clone();
    std::thread::spawn(move || {
        let mut buffer = [0i16; 512];
        while !stop.load(Ordering::SeqCst) {
            if let Some(context) = host.output_context() {
                context.fill_host_buffer(&mut buffer);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    })
}

fn pcm16_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

#[test]
fn test_play_requires_info() {
    let host = Arc::new(MockHost::fixture());
    let speaker = new_speaker(&host, &attrs(&[("latency", json!(0.0))]));

    let result = speaker.play(&[0, 0], None, &Attributes::new());
    assert!(matches!(result, Err(AudioError::InvalidArgument(_))));
}

#[test]
fn test_play_rejects_channel_mismatch() {
    let host = Arc::new(MockHost::fixture());
    let speaker = new_speaker(
        &host,
        &attrs(&[("num_channels", json!(1.0)), ("latency", json!(0.0))]),
    );

    let info = AudioInfo::new(AudioCodec::Pcm16, 48000, 2);
    let result = speaker.play(&pcm16_bytes(&[0; 96]), Some(info), &Attributes::new());
    assert!(matches!(result, Err(AudioError::InvalidArgument(_))));
}

#[test]
fn test_play_rejects_odd_byte_length() {
    let host = Arc::new(MockHost::fixture());
    let speaker = new_speaker(
        &host,
        &attrs(&[("num_channels", json!(1.0)), ("latency", json!(0.0))]),
    );

    let info = AudioInfo::new(AudioCodec::Pcm16, 48000, 1);
    let result = speaker.play(&[1, 2, 3], Some(info), &Attributes::new());
    assert!(matches!(result, Err(AudioError::InvalidArgument(_))));
}

#[test]
fn test_play_rejects_audio_longer_than_history() {
    let host = Arc::new(MockHost::fixture());
    let speaker = new_speaker(
        &host,
        &attrs(&[
            ("sample_rate", json!(8000.0)),
            ("num_channels", json!(1.0)),
            ("latency", json!(0.0)),
        ]),
    );

    // 31 seconds into a 30 second buffer.
    let samples = vec![0i16; 8000 * 31];
    let info = AudioInfo::new(AudioCodec::Pcm16, 8000, 1);
    let result = speaker.play(&pcm16_bytes(&samples), Some(info), &Attributes::new());
    assert!(matches!(result, Err(AudioError::InvalidArgument(_))));
}

#[test]
fn test_play_blocks_until_drained() {
    let host = Arc::new(MockHost::fixture());
    let speaker = new_speaker(
        &host,
        &attrs(&[
            ("sample_rate", json!(8000.0)),
            ("num_channels", json!(1.0)),
            ("latency", json!(0.0)),
        ]),
    );

    let stop = Arc::new(AtomicBool::new(false));
    let drain = spawn_drain(&host, &stop);

    let samples: Vec<i16> = (0..800).map(|i| (i % 100) as i16).collect();
    let info = AudioInfo::new(AudioCodec::Pcm16, 8000, 1);
    speaker
        .play(&pcm16_bytes(&samples), Some(info), &Attributes::new())
        .expect("play failed");

    // After play returns the cursor has consumed everything we queued.
    let context = host.output_context().unwrap();
    assert!(context.playback_cursor() >= 800);

    stop.store(true, Ordering::SeqCst);
    drain.join().unwrap();
}

#[test]
fn test_play_resamples_to_device_rate() {
    let host = Arc::new(MockHost::fixture());
    let speaker = new_speaker(
        &host,
        &attrs(&[
            ("sample_rate", json!(16000.0)),
            ("num_channels", json!(1.0)),
            ("latency", json!(0.0)),
        ]),
    );

    let stop = Arc::new(AtomicBool::new(false));
    let drain = spawn_drain(&host, &stop);

    // 0.1 s at 8 kHz; the speaker runs at 16 kHz.
    let samples: Vec<i16> = (0..800)
        .map(|i| ((i as f32 * 0.05).sin() * 10000.0) as i16)
        .collect();
    let info = AudioInfo::new(AudioCodec::Pcm16, 8000, 1);
    speaker
        .play(&pcm16_bytes(&samples), Some(info), &Attributes::new())
        .expect("play failed");

    // Roughly twice the frames were queued and drained.
    let context = host.output_context().unwrap();
    let queued = context.ring().write_position();
    assert!(queued > 1500 && queued <= 1600, "queued {queued}");

    stop.store(true, Ordering::SeqCst);
    drain.join().unwrap();
}

#[test]
fn test_play_mp3_discovers_stream_format() {
    let host = Arc::new(MockHost::fixture());
    let speaker = new_speaker(
        &host,
        &attrs(&[
            ("sample_rate", json!(48000.0)),
            ("num_channels", json!(1.0)),
            ("latency", json!(0.0)),
        ]),
    );

    // Encode a short mono tone; play() must pick 48 kHz mono out of the
    // stream itself, not from the caller's info.
    let mut encoder = soundpost_dsp::Mp3Encoder::new(48000, 1).unwrap();
    let samples: Vec<i16> = (0..1152 * 4)
        .map(|i| ((i as f32 * 0.02).sin() * 8000.0) as i16)
        .collect();
    let mut encoded = Vec::new();
    encoder.encode(&samples, &mut encoded).unwrap();
    encoder.flush(&mut encoded).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let drain = spawn_drain(&host, &stop);

    // Deliberately wrong rate in the caller's info.
    let info = AudioInfo::new(AudioCodec::Mp3, 8000, 1);
    speaker
        .play(&encoded, Some(info), &Attributes::new())
        .expect("mp3 play failed");

    stop.store(true, Ordering::SeqCst);
    drain.join().unwrap();
}

#[test]
fn test_play_interrupted_by_reconfigure_returns_ok() {
    let host = Arc::new(MockHost::fixture());
    let speaker = Arc::new(new_speaker(
        &host,
        &attrs(&[
            ("sample_rate", json!(8000.0)),
            ("num_channels", json!(1.0)),
            ("latency", json!(0.0)),
        ]),
    ));

    // No drain thread: the cursor never advances, so play can only
    // return through the reconfigure interruption.
    let player = {
        let speaker = speaker.clone();
        std::thread::spawn(move || {
            let samples = vec![100i16; 800];
            let info = AudioInfo::new(AudioCodec::Pcm16, 8000, 1);
            speaker.play(&pcm16_bytes(&samples), Some(info), &Attributes::new())
        })
    };

    std::thread::sleep(Duration::from_millis(50));
    speaker
        .reconfigure(&attrs(&[
            ("sample_rate", json!(8000.0)),
            ("num_channels", json!(1.0)),
            ("latency", json!(0.0)),
        ]))
        .expect("reconfigure failed");

    player
        .join()
        .unwrap()
        .expect("interrupted play should not error");
}

#[test]
fn test_do_command_set_volume() {
    let host = Arc::new(MockHost::fixture());
    let speaker = new_speaker(&host, &attrs(&[("latency", json!(0.0))]));

    let reply = speaker
        .do_command(&attrs(&[("set_volume", json!(50))]))
        .expect("set_volume failed");
    assert_eq!(reply.get("volume"), Some(&json!(50)));

    let result = speaker.do_command(&attrs(&[("set_volume", json!(150))]));
    assert!(matches!(result, Err(AudioError::InvalidArgument(_))));

    let result = speaker.do_command(&attrs(&[("set_volume", json!("loud"))]));
    assert!(matches!(result, Err(AudioError::InvalidArgument(_))));

    // Unknown commands are logged and ignored.
    let reply = speaker
        .do_command(&attrs(&[("make_coffee", json!(true))]))
        .expect("unknown command should not error");
    assert!(reply.is_empty());
}

#[test]
fn test_validate_checks_volume_range() {
    assert!(Speaker::validate(&attrs(&[("volume", json!(80))])).is_ok());
    assert!(Speaker::validate(&attrs(&[("volume", json!(101))])).is_err());
    assert!(Speaker::validate(&attrs(&[("volume", json!("max"))])).is_err());
}
