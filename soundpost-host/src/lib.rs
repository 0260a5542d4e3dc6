//! Soundpost Host - the seam to the platform audio host
//!
//! The rest of the module talks to device hardware exclusively through
//! [`HostBinding`]. Production code injects [`CpalHost`]; tests inject
//! [`mock::MockHost`] and drive the stream contexts by hand.

pub mod cpal_host;
pub mod mock;

use std::sync::Arc;
use std::time::Duration;

use soundpost_common::AudioResult;
use soundpost_dsp::{InputStreamContext, OutputStreamContext};

pub use cpal_host::CpalHost;

/// Direction of a host stream relative to this machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    Input,
    Output,
}

/// Index of a host device, stable for the life of the binding
pub type DeviceId = usize;

/// Snapshot of one host device's capabilities
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    pub default_sample_rate: u32,
    pub default_low_input_latency: Duration,
    pub default_low_output_latency: Duration,
}

/// Resolved parameters for opening one stream
#[derive(Debug, Clone)]
pub struct StreamSpec {
    pub device: DeviceId,
    pub device_name: String,
    pub sample_rate_hz: u32,
    pub num_channels: u16,
    pub suggested_latency: Duration,
    pub direction: StreamDirection,
}

/// Runtime information reported by an open stream
#[derive(Debug, Clone, Copy)]
pub struct StreamInfo {
    pub input_latency: Duration,
    pub output_latency: Duration,
    pub sample_rate_hz: u32,
}

/// A host stream that has been opened. Dropping the handle closes it.
pub trait HostStream: Send {
    fn start(&mut self) -> AudioResult<()>;
    fn stop(&mut self) -> AudioResult<()>;
    fn info(&self) -> Option<StreamInfo>;
}

/// The audio host, reduced to the operations the module needs.
///
/// Implementations must be injectable so the device layer can be
/// exercised against a mock. All failures carry the host's own error
/// text.
pub trait HostBinding: Send + Sync {
    fn initialize(&self) -> AudioResult<()>;

    fn device_count(&self) -> usize;
    fn device_info(&self, device: DeviceId) -> Option<DeviceInfo>;
    fn default_input_device(&self) -> Option<DeviceId>;
    fn default_output_device(&self) -> Option<DeviceId>;

    /// Check that the device supports 16-bit PCM at the spec's sample
    /// rate and channel count.
    fn is_format_supported(&self, spec: &StreamSpec) -> AudioResult<()>;

    /// Open a capture stream feeding the preallocated context. The
    /// real-time callback owns no other state, so it can never allocate
    /// or lock.
    fn open_input_stream(
        &self,
        spec: &StreamSpec,
        context: Arc<InputStreamContext>,
    ) -> AudioResult<Box<dyn HostStream>>;

    /// Open a playback stream draining the preallocated context.
    fn open_output_stream(
        &self,
        spec: &StreamSpec,
        context: Arc<OutputStreamContext>,
    ) -> AudioResult<Box<dyn HostStream>>;

    fn terminate(&self) -> AudioResult<()>;
}

/// Linear scan for a device by exact name with channels in `direction`.
/// Input and output devices can share a name, so the direction check
/// matters.
pub fn find_device_by_name(
    host: &dyn HostBinding,
    name: &str,
    direction: StreamDirection,
) -> Option<DeviceId> {
    for device in 0..host.device_count() {
        let Some(info) = host.device_info(device) else {
            tracing::warn!(device, "could not get device info, skipping");
            continue;
        };
        if info.name != name {
            continue;
        }
        let channels = match direction {
            StreamDirection::Input => info.max_input_channels,
            StreamDirection::Output => info.max_output_channels,
        };
        if channels > 0 {
            return Some(device);
        }
    }
    None
}
