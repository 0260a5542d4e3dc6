//! One-shot device discovery
//!
//! Maps the host's device list to resource config records: every
//! device with input channels yields a microphone config, every device
//! with output channels a speaker config.

use serde_json::json;
use soundpost_common::{Attributes, ResourceConfig};
use soundpost_host::HostBinding;
use tracing::{info, warn};

use crate::microphone::MICROPHONE_MODEL;
use crate::speaker::SPEAKER_MODEL;

pub const MICROPHONE_API: &str = "component:audio_in";
pub const SPEAKER_API: &str = "component:audio_out";

pub fn discover_resources(host: &dyn HostBinding) -> Vec<ResourceConfig> {
    let device_count = host.device_count();
    if device_count == 0 {
        warn!("no audio devices found during discovery");
        return Vec::new();
    }
    info!(device_count, "discovery found audio devices");

    let mut configs = Vec::new();
    let mut microphone_count = 0u32;
    let mut speaker_count = 0u32;

    for device in 0..device_count {
        let Some(device_info) = host.device_info(device) else {
            warn!(device, "could not get device info, skipping");
            continue;
        };

        if device_info.max_input_channels > 0 {
            microphone_count += 1;
            info!(
                "Microphone {} - name: {}, default sample rate: {}, max channels: {}",
                microphone_count,
                device_info.name,
                device_info.default_sample_rate,
                device_info.max_input_channels
            );
            configs.push(ResourceConfig {
                name: format!("microphone-{microphone_count}"),
                model: MICROPHONE_MODEL.to_string(),
                api: MICROPHONE_API.to_string(),
                attributes: device_attributes(
                    &device_info.name,
                    device_info.default_sample_rate,
                    device_info.max_input_channels,
                ),
            });
        }

        if device_info.max_output_channels > 0 {
            speaker_count += 1;
            info!(
                "Speaker {} - name: {}, default sample rate: {}, max channels: {}",
                speaker_count,
                device_info.name,
                device_info.default_sample_rate,
                device_info.max_output_channels
            );
            configs.push(ResourceConfig {
                name: format!("speaker-{speaker_count}"),
                model: SPEAKER_MODEL.to_string(),
                api: SPEAKER_API.to_string(),
                attributes: device_attributes(
                    &device_info.name,
                    device_info.default_sample_rate,
                    device_info.max_output_channels,
                ),
            });
        }
    }

    configs
}

fn device_attributes(device_name: &str, sample_rate: u32, num_channels: u16) -> Attributes {
    let mut attributes = Attributes::new();
    attributes.insert("device_name".to_string(), json!(device_name));
    attributes.insert("sample_rate".to_string(), json!(sample_rate));
    attributes.insert("num_channels".to_string(), json!(num_channels));
    attributes
}
