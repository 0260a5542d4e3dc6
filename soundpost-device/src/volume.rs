//! Platform playback gain
//!
//! Linux maps the 0..=100 level onto the system mixer; everywhere else
//! the request is logged and ignored. Mixer failures are logged, never
//! raised: volume is best-effort.

#[cfg(target_os = "linux")]
mod linux {
    use alsa::mixer::{Mixer, SelemId};
    use tracing::{debug, error, warn};

    /// Extract the ALSA card identifier from a host device name.
    /// Device names look like "bcm2835 Headphones: - (hw:0,0)" on a Pi.
    fn extract_card(device_name: &str) -> String {
        for prefix in ["plughw:", "hw:"] {
            if let Some(position) = device_name.find(prefix) {
                let rest = &device_name[position..];
                let end = rest.find([',', ')']).unwrap_or(rest.len());
                return rest[..end].to_string();
            }
        }
        warn!(device_name, "couldn't find device card, falling back to default");
        "default".to_string()
    }

    pub fn set_device_volume(device_name: &str, volume: i64) {
        let card = extract_card(device_name);
        debug!(volume, card = %card, "setting ALSA playback volume");

        let mixer = match Mixer::new(&card, false) {
            Ok(mixer) => mixer,
            Err(e) => {
                error!("failed to open ALSA mixer on card {card}: {e}");
                return;
            }
        };

        // The volume control element is called PCM, Master, or Speaker
        // depending on the device.
        let mut element = None;
        for name in ["PCM", "Master", "Speaker"] {
            if let Some(found) = mixer.find_selem(&SelemId::new(name, 0)) {
                debug!(name, "found mixer element");
                element = Some(found);
                break;
            }
        }
        let Some(element) = element else {
            error!("could not find a PCM, Master, or Speaker mixer element");
            return;
        };

        let (min, max) = element.get_playback_volume_range();
        let target = min + (max - min) * volume / 100;
        if let Err(e) = element.set_playback_volume_all(target) {
            error!("failed to set playback volume: {e}");
        }
    }

    #[cfg(test)]
    mod tests {
        use super::extract_card;

        #[test]
        fn test_extract_card() {
            assert_eq!(extract_card("bcm2835 Headphones: - (hw:0,0)"), "hw:0");
            assert_eq!(extract_card("USB Audio (plughw:2,0)"), "plughw:2");
            assert_eq!(extract_card("Something Unrecognisable"), "default");
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux::set_device_volume;

#[cfg(not(target_os = "linux"))]
pub fn set_device_volume(_device_name: &str, _volume: i64) {
    tracing::warn!("volume control is not supported on this platform");
}
