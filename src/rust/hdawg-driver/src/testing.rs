// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! In-memory stand-ins for the device, the host store and the sleeper.

use std::cell::Cell;
use std::collections::VecDeque;
use std::time::Duration;

use indexmap::IndexMap;

use crate::device::{DeviceApi, DeviceError, DeviceResult};
use crate::sleep::Sleep;
use crate::store::{ParameterStore, Severity, Value};

/// A call received by [`MockDevice`], in order of arrival.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SetInt(String, i64),
    SetDouble(String, f64),
    SetVector(String, Vec<u16>),
    Sync,
    Compile(String),
    SequencerEnabled(bool),
    Reconnect,
}

/// Scripted values are consumed in order; the last one repeats.
fn next<T: Copy>(queue: &mut VecDeque<T>, fallback: T) -> T {
    if queue.len() > 1 {
        queue.pop_front().unwrap_or(fallback)
    } else {
        queue.front().copied().unwrap_or(fallback)
    }
}

/// A device that stores whatever is written and replays scripted status values.
///
/// Unscripted, compilation succeeds at once and the upload is complete on the first poll.
#[derive(Debug, Default)]
pub struct MockDevice {
    ints: IndexMap<String, i64>,
    doubles: IndexMap<String, f64>,
    double_readbacks: IndexMap<String, f64>,
    int_readbacks: IndexMap<String, VecDeque<i64>>,
    compile: VecDeque<i64>,
    compile_message: String,
    progress: VecDeque<f64>,
    elf_status: VecDeque<i64>,
    upload_polls: usize,
    vector_failures: u32,
    calls: Vec<Call>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_compile(&mut self, statuses: &[i64]) {
        self.compile = statuses.iter().copied().collect();
    }

    pub fn set_compile_message(&mut self, message: &str) {
        self.compile_message = message.to_string();
    }

    pub fn script_upload(&mut self, progress: &[f64], statuses: &[i64]) {
        self.progress = progress.iter().copied().collect();
        self.elf_status = statuses.iter().copied().collect();
    }

    /// Make `path` read back `value` regardless of what is written to it.
    pub fn override_readback(&mut self, path: &str, value: f64) {
        self.double_readbacks.insert(path.to_string(), value);
    }

    /// Make `path` read back the given integers in order, repeating the last one.
    pub fn script_int_readback(&mut self, path: &str, values: &[i64]) {
        self.int_readbacks
            .insert(path.to_string(), values.iter().copied().collect());
    }

    /// Fail the next `count` vector writes.
    pub fn fail_vector_writes(&mut self, count: u32) {
        self.vector_failures = count;
    }

    pub fn written_double(&self, path: &str) -> Option<f64> {
        self.doubles.get(path).copied()
    }

    pub fn written_int(&self, path: &str) -> Option<i64> {
        self.ints.get(path).copied()
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn sync_count(&self) -> usize {
        self.count(|call| matches!(call, Call::Sync))
    }

    pub fn reconnect_count(&self) -> usize {
        self.count(|call| matches!(call, Call::Reconnect))
    }

    pub fn upload_polls(&self) -> usize {
        self.upload_polls
    }

    pub fn compiled_programs(&self) -> Vec<String> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Compile(program) => Some(program.clone()),
                _ => None,
            })
            .collect()
    }

    /// Successful vector writes as `(path, words)`.
    pub fn vectors(&self) -> Vec<(String, Vec<u16>)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::SetVector(path, data) => Some((path.clone(), data.clone())),
                _ => None,
            })
            .collect()
    }

    fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|call| predicate(call)).count()
    }
}

impl DeviceApi for MockDevice {
    fn set_int(&mut self, path: &str, value: i64) -> DeviceResult<()> {
        self.ints.insert(path.to_string(), value);
        self.calls.push(Call::SetInt(path.to_string(), value));
        Ok(())
    }

    fn get_int(&mut self, path: &str) -> DeviceResult<i64> {
        if let Some(queue) = self.int_readbacks.get_mut(path) {
            return Ok(next(queue, 0));
        }
        Ok(self.ints.get(path).copied().unwrap_or(0))
    }

    fn set_double(&mut self, path: &str, value: f64) -> DeviceResult<()> {
        self.doubles.insert(path.to_string(), value);
        self.calls.push(Call::SetDouble(path.to_string(), value));
        Ok(())
    }

    fn get_double(&mut self, path: &str) -> DeviceResult<f64> {
        Ok(self
            .double_readbacks
            .get(path)
            .or_else(|| self.doubles.get(path))
            .copied()
            .unwrap_or(0.0))
    }

    fn set_vector(&mut self, path: &str, data: &[u16]) -> DeviceResult<()> {
        if self.vector_failures > 0 {
            self.vector_failures -= 1;
            return Err(DeviceError::new("ZIAPITimeoutException"));
        }
        self.calls
            .push(Call::SetVector(path.to_string(), data.to_vec()));
        Ok(())
    }

    fn sync(&mut self) -> DeviceResult<()> {
        self.calls.push(Call::Sync);
        Ok(())
    }

    fn set_compiler_source(&mut self, program: &str) -> DeviceResult<()> {
        self.calls.push(Call::Compile(program.to_string()));
        Ok(())
    }

    fn compile_status(&mut self) -> DeviceResult<i64> {
        Ok(next(&mut self.compile, 0))
    }

    fn compile_message(&mut self) -> DeviceResult<String> {
        Ok(self.compile_message.clone())
    }

    fn upload_progress(&mut self) -> DeviceResult<f64> {
        self.upload_polls += 1;
        Ok(next(&mut self.progress, 1.0))
    }

    fn upload_status(&mut self) -> DeviceResult<i64> {
        Ok(next(&mut self.elf_status, 0))
    }

    fn set_sequencer_enabled(&mut self, enabled: bool) -> DeviceResult<()> {
        self.calls.push(Call::SequencerEnabled(enabled));
        Ok(())
    }

    fn reconnect(&mut self) -> DeviceResult<()> {
        self.calls.push(Call::Reconnect);
        Ok(())
    }
}

/// A host store backed by a map, keeping every logged message.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: IndexMap<String, Value>,
    messages: Vec<(String, Severity)>,
}

impl MemoryStore {
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn messages(&self) -> &[(String, Severity)] {
        &self.messages
    }

    pub fn warnings(&self) -> Vec<&str> {
        self.messages
            .iter()
            .filter(|(_, severity)| *severity == Severity::Warning)
            .map(|(text, _)| text.as_str())
            .collect()
    }
}

impl ParameterStore for MemoryStore {
    fn get_value(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }

    fn set_value(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    fn log_message(&mut self, text: &str, severity: Severity) {
        self.messages.push((text.to_string(), severity));
    }
}

/// A sleeper that returns at once and adds up the requested time.
#[derive(Debug, Default)]
pub struct NoSleep {
    total: Cell<Duration>,
}

impl NoSleep {
    pub fn total(&self) -> Duration {
        self.total.get()
    }
}

impl Sleep for NoSleep {
    fn sleep(&self, duration: Duration) {
        self.total.set(self.total.get() + duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_values_repeat_last() {
        let mut device = MockDevice::new();
        device.script_compile(&[-1, 2]);
        assert_eq!(device.compile_status().unwrap(), -1);
        assert_eq!(device.compile_status().unwrap(), 2);
        assert_eq!(device.compile_status().unwrap(), 2);
    }

    #[test]
    fn test_readback_override() {
        let mut device = MockDevice::new();
        device.set_double("/dev8000/oscs/1/freq", 1e6).unwrap();
        assert_eq!(device.get_double("/dev8000/oscs/1/freq").unwrap(), 1e6);
        device.override_readback("/dev8000/oscs/1/freq", 5.0);
        assert_eq!(device.get_double("/dev8000/oscs/1/freq").unwrap(), 5.0);
        assert_eq!(device.written_double("/dev8000/oscs/1/freq"), Some(1e6));
    }

    #[test]
    fn test_vector_failures() {
        let mut device = MockDevice::new();
        device.fail_vector_writes(1);
        assert!(device.set_vector("/dev8000/awgs/0/waveform/waves/0", &[1]).is_err());
        device.set_vector("/dev8000/awgs/0/waveform/waves/0", &[1]).unwrap();
        assert_eq!(device.vectors().len(), 1);
    }
}
