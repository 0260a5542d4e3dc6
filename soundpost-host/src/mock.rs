//! Scriptable host binding for the test suites
//!
//! Streams opened here never run on their own; tests pump samples into
//! the captured contexts by hand and assert on what the device layer
//! does with them.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use soundpost_common::{AudioError, AudioResult};
use soundpost_dsp::{InputStreamContext, OutputStreamContext};

use crate::{DeviceId, DeviceInfo, HostBinding, HostStream, StreamInfo, StreamSpec};

#[derive(Default)]
pub struct MockHost {
    devices: Vec<DeviceInfo>,
    default_input: Option<DeviceId>,
    default_output: Option<DeviceId>,
    /// Fail the next format check / open / start when set
    pub fail_format_check: AtomicBool,
    pub fail_open: AtomicBool,
    pub fail_start: AtomicBool,
    opened_streams: AtomicUsize,
    last_input_context: Mutex<Option<Arc<InputStreamContext>>>,
    last_output_context: Mutex<Option<Arc<OutputStreamContext>>>,
}

impl MockHost {
    /// Defaults are the first device with channels in each direction.
    pub fn new(devices: Vec<DeviceInfo>) -> Self {
        let default_input = devices.iter().position(|d| d.max_input_channels > 0);
        let default_output = devices.iter().position(|d| d.max_output_channels > 0);
        Self {
            devices,
            default_input,
            default_output,
            ..Default::default()
        }
    }

    /// Standard fixture: one 48 kHz stereo microphone and one 48 kHz
    /// stereo speaker.
    pub fn fixture() -> Self {
        Self::new(vec![
            DeviceInfo {
                name: "Mock Microphone".to_string(),
                max_input_channels: 2,
                max_output_channels: 0,
                default_sample_rate: 48000,
                default_low_input_latency: Duration::ZERO,
                default_low_output_latency: Duration::ZERO,
            },
            DeviceInfo {
                name: "Mock Speaker".to_string(),
                max_input_channels: 0,
                max_output_channels: 2,
                default_sample_rate: 48000,
                default_low_input_latency: Duration::ZERO,
                default_low_output_latency: Duration::ZERO,
            },
        ])
    }

    /// Context of the most recently opened input stream.
    pub fn input_context(&self) -> Option<Arc<InputStreamContext>> {
        self.last_input_context.lock().clone()
    }

    /// Context of the most recently opened output stream.
    pub fn output_context(&self) -> Option<Arc<OutputStreamContext>> {
        self.last_output_context.lock().clone()
    }

    /// Total streams ever opened through this binding.
    pub fn opened_streams(&self) -> usize {
        self.opened_streams.load(Ordering::SeqCst)
    }

    fn check_open(&self, spec: &StreamSpec) -> AudioResult<()> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(AudioError::host_failure("injected open failure"));
        }
        if spec.device >= self.devices.len() {
            return Err(AudioError::NotFound(format!(
                "no device at index {}",
                spec.device
            )));
        }
        Ok(())
    }

    fn new_stream(&self, spec: &StreamSpec) -> MockStream {
        self.opened_streams.fetch_add(1, Ordering::SeqCst);
        MockStream {
            started: Arc::new(AtomicBool::new(false)),
            fail_start: self.fail_start.load(Ordering::SeqCst),
            sample_rate_hz: spec.sample_rate_hz,
            latency: spec.suggested_latency,
        }
    }
}

impl HostBinding for MockHost {
    fn initialize(&self) -> AudioResult<()> {
        Ok(())
    }

    fn device_count(&self) -> usize {
        self.devices.len()
    }

    fn device_info(&self, device: DeviceId) -> Option<DeviceInfo> {
        self.devices.get(device).cloned()
    }

    fn default_input_device(&self) -> Option<DeviceId> {
        self.default_input
    }

    fn default_output_device(&self) -> Option<DeviceId> {
        self.default_output
    }

    fn is_format_supported(&self, spec: &StreamSpec) -> AudioResult<()> {
        if self.fail_format_check.load(Ordering::SeqCst) {
            return Err(AudioError::FormatUnsupported(format!(
                "audio format not supported by device '{}': requested {} Hz, {} channels, \
                 16-bit PCM",
                spec.device_name, spec.sample_rate_hz, spec.num_channels
            )));
        }
        Ok(())
    }

    fn open_input_stream(
        &self,
        spec: &StreamSpec,
        context: Arc<InputStreamContext>,
    ) -> AudioResult<Box<dyn HostStream>> {
        self.check_open(spec)?;
        *self.last_input_context.lock() = Some(context);
        Ok(Box::new(self.new_stream(spec)))
    }

    fn open_output_stream(
        &self,
        spec: &StreamSpec,
        context: Arc<OutputStreamContext>,
    ) -> AudioResult<Box<dyn HostStream>> {
        self.check_open(spec)?;
        *self.last_output_context.lock() = Some(context);
        Ok(Box::new(self.new_stream(spec)))
    }

    fn terminate(&self) -> AudioResult<()> {
        Ok(())
    }
}

pub struct MockStream {
    pub started: Arc<AtomicBool>,
    fail_start: bool,
    sample_rate_hz: u32,
    latency: Duration,
}

impl HostStream for MockStream {
    fn start(&mut self) -> AudioResult<()> {
        if self.fail_start {
            return Err(AudioError::host_failure("injected start failure"));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> AudioResult<()> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn info(&self) -> Option<StreamInfo> {
        Some(StreamInfo {
            input_latency: self.latency,
            output_latency: self.latency,
            sample_rate_hz: self.sample_rate_hz,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{find_device_by_name, StreamDirection};

    #[test]
    fn test_fixture_defaults() {
        let host = MockHost::fixture();
        assert_eq!(host.device_count(), 2);
        assert_eq!(host.default_input_device(), Some(0));
        assert_eq!(host.default_output_device(), Some(1));
    }

    #[test]
    fn test_find_device_by_name_respects_direction() {
        let host = MockHost::fixture();
        assert_eq!(
            find_device_by_name(&host, "Mock Microphone", StreamDirection::Input),
            Some(0)
        );
        assert_eq!(
            find_device_by_name(&host, "Mock Microphone", StreamDirection::Output),
            None
        );
        assert_eq!(
            find_device_by_name(&host, "Mock Speaker", StreamDirection::Output),
            Some(1)
        );
        assert_eq!(
            find_device_by_name(&host, "Does Not Exist", StreamDirection::Input),
            None
        );
    }
}
