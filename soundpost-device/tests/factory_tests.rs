//! Stream spec resolution against the mock host.

use std::time::Duration;

use serde_json::json;
use soundpost_common::{Attributes, AudioError, ConfigParams};
use soundpost_device::factory;
use soundpost_host::mock::MockHost;
use soundpost_host::{DeviceInfo, StreamDirection};

fn params(pairs: &[(&str, serde_json::Value)]) -> ConfigParams {
    let mut map = Attributes::new();
    for (key, value) in pairs {
        map.insert((*key).to_string(), value.clone());
    }
    ConfigParams::from_attributes(&map).unwrap()
}

#[test]
fn test_empty_device_name_uses_direction_default() {
    let host = MockHost::fixture();

    let spec =
        factory::build_stream_spec(&host, &ConfigParams::default(), StreamDirection::Input)
            .unwrap();
    assert_eq!(spec.device_name, "Mock Microphone");
    assert_eq!(spec.sample_rate_hz, 48000);
    assert_eq!(spec.num_channels, 1);

    let spec =
        factory::build_stream_spec(&host, &ConfigParams::default(), StreamDirection::Output)
            .unwrap();
    assert_eq!(spec.device_name, "Mock Speaker");
}

#[test]
fn test_no_default_device_fails() {
    let host = MockHost::new(vec![DeviceInfo {
        name: "Output Only".to_string(),
        max_input_channels: 0,
        max_output_channels: 2,
        default_sample_rate: 48000,
        default_low_input_latency: Duration::ZERO,
        default_low_output_latency: Duration::ZERO,
    }]);

    let result =
        factory::build_stream_spec(&host, &ConfigParams::default(), StreamDirection::Input);
    assert!(matches!(result, Err(AudioError::NotFound(_))));
}

#[test]
fn test_named_device_must_exist() {
    let host = MockHost::fixture();
    let result = factory::build_stream_spec(
        &host,
        &params(&[("device_name", json!("Ghost Device"))]),
        StreamDirection::Input,
    );
    assert!(matches!(result, Err(AudioError::NotFound(_))));
}

#[test]
fn test_explicit_attributes_override_device_defaults() {
    let host = MockHost::fixture();
    let spec = factory::build_stream_spec(
        &host,
        &params(&[
            ("device_name", json!("Mock Microphone")),
            ("sample_rate", json!(22050.0)),
            ("num_channels", json!(2.0)),
            ("latency", json!(25.0)),
        ]),
        StreamDirection::Input,
    )
    .unwrap();

    assert_eq!(spec.sample_rate_hz, 22050);
    assert_eq!(spec.num_channels, 2);
    assert_eq!(spec.suggested_latency, Duration::from_millis(25));
}

#[test]
fn test_channel_count_capped_by_device() {
    let host = MockHost::fixture();
    let result = factory::build_stream_spec(
        &host,
        &params(&[("num_channels", json!(8.0))]),
        StreamDirection::Input,
    );
    assert!(matches!(result, Err(AudioError::InvalidArgument(_))));
}
