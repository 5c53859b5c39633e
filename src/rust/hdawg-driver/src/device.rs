// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// A failed call into the device API, carrying the message of the underlying session.
#[derive(Error, Debug, PartialEq, Clone)]
#[error("{msg}")]
pub struct DeviceError {
    msg: String,
}

impl DeviceError {
    pub fn new<S: Into<String>>(msg: S) -> Self {
        Self { msg: msg.into() }
    }
}

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// The device session the driver talks through.
///
/// All calls block for their round trip. Node paths are absolute and built with [`Nodes`].
pub trait DeviceApi {
    fn set_int(&mut self, path: &str, value: i64) -> DeviceResult<()>;
    fn get_int(&mut self, path: &str) -> DeviceResult<i64>;
    fn set_double(&mut self, path: &str, value: f64) -> DeviceResult<()>;
    fn get_double(&mut self, path: &str) -> DeviceResult<f64>;
    /// Write a block of native waveform words.
    fn set_vector(&mut self, path: &str, data: &[u16]) -> DeviceResult<()>;
    /// Block until all previous writes have reached the device.
    fn sync(&mut self) -> DeviceResult<()>;

    /// Hand a sequencer program to the compiler, which starts compiling immediately.
    fn set_compiler_source(&mut self, program: &str) -> DeviceResult<()>;
    /// `-1` while compiling, then `0` (success), `1` (failure) or `2` (warnings).
    fn compile_status(&mut self) -> DeviceResult<i64>;
    fn compile_message(&mut self) -> DeviceResult<String>;
    /// Fraction of the program upload completed, in `[0, 1]`.
    fn upload_progress(&mut self) -> DeviceResult<f64>;
    /// ELF upload status: `0` success, `1` failure.
    fn upload_status(&mut self) -> DeviceResult<i64>;
    fn set_sequencer_enabled(&mut self, enabled: bool) -> DeviceResult<()>;

    /// Run the connection bootstrap again after the device stopped responding.
    fn reconnect(&mut self) -> DeviceResult<()>;
}

/// Node paths of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nodes {
    device: String,
}

impl Nodes {
    pub fn new<S: Into<String>>(device: S) -> Self {
        Self {
            device: device.into().to_lowercase(),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    fn node(&self, suffix: &str) -> String {
        format!("/{}/{}", self.device, suffix)
    }

    pub fn awg_enable(&self) -> String {
        self.node("awgs/0/enable")
    }

    pub fn user_register(&self, index: u16) -> String {
        self.node(&format!("awgs/0/userregs/{index}"))
    }

    /// Wave slot 0 of an AWG core. Interleaved pairs are written there as well.
    pub fn waveform(&self, core: usize) -> String {
        self.node(&format!("awgs/{core}/waveform/waves/0"))
    }

    pub fn memory_usage(&self) -> String {
        self.node("awgs/0/waveform/memoryusage")
    }

    pub fn sample_rate_divisor(&self) -> String {
        self.node("awgs/0/time")
    }

    pub fn oscillator_frequency(&self, oscillator: usize) -> String {
        self.node(&format!("oscs/{oscillator}/freq"))
    }

    pub fn channel_grouping(&self) -> String {
        self.node("system/awg/channelgrouping")
    }

    pub fn sample_clock_frequency(&self) -> String {
        self.node("system/clocks/sampleclock/freq")
    }

    pub fn sample_clock_status(&self) -> String {
        self.node("system/clocks/sampleclock/status")
    }

    pub fn reference_clock_source(&self) -> String {
        self.node("system/clocks/referenceclock/source")
    }
}

/// Oscillator used as the shared beat reference.
pub const BEAT_OSCILLATOR: usize = 0;
/// Oscillator timing the repetitions when the oscillator-based delay is used.
pub const REPETITION_OSCILLATOR: usize = 1;

/// Channel grouping values of `system/awg/channelgrouping`.
pub const GROUPING_4X2: i64 = 0;
pub const GROUPING_1X8: i64 = 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_paths() {
        let nodes = Nodes::new("DEV8123");
        assert_eq!(nodes.awg_enable(), "/dev8123/awgs/0/enable");
        assert_eq!(nodes.user_register(0), "/dev8123/awgs/0/userregs/0");
        assert_eq!(nodes.waveform(2), "/dev8123/awgs/2/waveform/waves/0");
        assert_eq!(nodes.oscillator_frequency(REPETITION_OSCILLATOR), "/dev8123/oscs/1/freq");
        assert_eq!(
            nodes.reference_clock_source(),
            "/dev8123/system/clocks/referenceclock/source"
        );
    }

    #[test]
    fn test_device_error_message() {
        let err = DeviceError::new("ZIAPITimeoutException");
        assert_eq!(err.to_string(), "ZIAPITimeoutException");
    }
}
