//! Resource configuration attributes and their typed parsing
//!
//! The control plane hands resources a loosely typed attribute map;
//! `ConfigParams::from_attributes` is the single source of truth for
//! turning it into typed values, shared by validate() and construction.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AudioError, AudioResult};

/// Loosely typed attribute map, as delivered by the control plane
pub type Attributes = serde_json::Map<String, Value>;

/// How much audio history each stream retains, in seconds
pub const DEFAULT_HISTORY_SECONDS: u32 = 30;

/// Default pause between chunks when a client catches up on history
pub const DEFAULT_HISTORICAL_THROTTLE_MS: u64 = 50;

/// A resource record as produced by discovery or read from a config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub name: String,
    pub model: String,
    pub api: String,
    #[serde(default)]
    pub attributes: Attributes,
}

/// Typed view of a resource's configuration attributes
///
/// All fields are optional in the raw config; resolution against the
/// chosen device's defaults happens when the stream spec is built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigParams {
    /// Exact device name, empty for the direction's default device
    pub device_name: String,
    pub sample_rate: Option<u32>,
    pub num_channels: Option<u16>,
    /// Suggested latency in milliseconds
    pub latency_ms: Option<f64>,
    /// Microphone only
    pub historical_throttle_ms: Option<u64>,
    /// Speaker only, 0..=100
    pub volume: Option<i64>,
}

impl ConfigParams {
    pub fn from_attributes(attributes: &Attributes) -> AudioResult<Self> {
        let mut params = ConfigParams::default();

        if let Some(value) = attributes.get("device_name") {
            params.device_name = value
                .as_str()
                .ok_or_else(|| {
                    AudioError::invalid_argument("device_name attribute must be a string")
                })?
                .to_string();
        }

        if let Some(value) = attributes.get("sample_rate") {
            let sample_rate = value.as_f64().ok_or_else(|| {
                AudioError::invalid_argument("sample_rate attribute must be a number")
            })?;
            if sample_rate <= 0.0 {
                return Err(AudioError::invalid_argument(
                    "sample_rate must be greater than zero",
                ));
            }
            params.sample_rate = Some(sample_rate as u32);
        }

        if let Some(value) = attributes.get("num_channels") {
            let num_channels = value.as_f64().ok_or_else(|| {
                AudioError::invalid_argument("num_channels attribute must be a number")
            })?;
            if num_channels <= 0.0 {
                return Err(AudioError::invalid_argument(
                    "num_channels must be greater than zero",
                ));
            }
            params.num_channels = Some(num_channels as u16);
        }

        if let Some(value) = attributes.get("latency") {
            let latency_ms = value.as_f64().ok_or_else(|| {
                AudioError::invalid_argument("latency attribute must be a number")
            })?;
            if latency_ms < 0.0 {
                return Err(AudioError::invalid_argument("latency must be non-negative"));
            }
            params.latency_ms = Some(latency_ms);
        }

        if let Some(value) = attributes.get("historical_throttle_ms") {
            let throttle_ms = value.as_f64().ok_or_else(|| {
                AudioError::invalid_argument("historical_throttle_ms attribute must be a number")
            })?;
            if throttle_ms < 0.0 {
                return Err(AudioError::invalid_argument(
                    "historical_throttle_ms must be non-negative",
                ));
            }
            params.historical_throttle_ms = Some(throttle_ms as u64);
        }

        if let Some(value) = attributes.get("volume") {
            let volume = value.as_i64().ok_or_else(|| {
                AudioError::invalid_argument("volume attribute must be an integer")
            })?;
            if !(0..=100).contains(&volume) {
                return Err(AudioError::invalid_argument(format!(
                    "volume must be between 0 and 100, got {volume}"
                )));
            }
            params.volume = Some(volume);
        }

        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(pairs: &[(&str, Value)]) -> Attributes {
        let mut map = Attributes::new();
        for (key, value) in pairs {
            map.insert((*key).to_string(), value.clone());
        }
        map
    }

    #[test]
    fn test_empty_attributes_give_defaults() {
        let params = ConfigParams::from_attributes(&Attributes::new()).unwrap();
        assert_eq!(params, ConfigParams::default());
    }

    #[test]
    fn test_full_attributes() {
        let params = ConfigParams::from_attributes(&attrs(&[
            ("device_name", json!("USB Audio")),
            ("sample_rate", json!(48000.0)),
            ("num_channels", json!(2.0)),
            ("latency", json!(20.0)),
            ("historical_throttle_ms", json!(10.0)),
            ("volume", json!(80)),
        ]))
        .unwrap();

        assert_eq!(params.device_name, "USB Audio");
        assert_eq!(params.sample_rate, Some(48000));
        assert_eq!(params.num_channels, Some(2));
        assert_eq!(params.latency_ms, Some(20.0));
        assert_eq!(params.historical_throttle_ms, Some(10));
        assert_eq!(params.volume, Some(80));
    }

    #[test]
    fn test_wrong_types_are_rejected() {
        for (key, value) in [
            ("device_name", json!(3)),
            ("sample_rate", json!("fast")),
            ("num_channels", json!("two")),
            ("latency", json!("low")),
            ("historical_throttle_ms", json!("never")),
            ("volume", json!("loud")),
        ] {
            let err = ConfigParams::from_attributes(&attrs(&[(key, value)])).unwrap_err();
            assert!(matches!(err, AudioError::InvalidArgument(_)), "{key}");
        }
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        for (key, value) in [
            ("sample_rate", json!(0.0)),
            ("sample_rate", json!(-44100.0)),
            ("num_channels", json!(0.0)),
            ("latency", json!(-1.0)),
            ("historical_throttle_ms", json!(-5.0)),
            ("volume", json!(101)),
            ("volume", json!(-1)),
        ] {
            let err = ConfigParams::from_attributes(&attrs(&[(key, value)])).unwrap_err();
            assert!(matches!(err, AudioError::InvalidArgument(_)), "{key}");
        }
    }

    #[test]
    fn test_parse_is_pure() {
        let attributes = attrs(&[("sample_rate", json!(16000.0)), ("volume", json!(30))]);
        let first = ConfigParams::from_attributes(&attributes).unwrap();
        let second = ConfigParams::from_attributes(&attributes).unwrap();
        assert_eq!(first, second);
    }
}
