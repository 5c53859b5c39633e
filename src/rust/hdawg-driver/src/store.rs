// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! The host's parameter registry, as seen by the driver.

use std::fmt;

/// A setting value as held by the host.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Vector(Vec<f64>),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Bool(_) | Value::Vector(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            Value::Vector(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "'{v}'"),
            Value::Vector(v) => write!(f, "[{} values]", v.len()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
}

/// Named settings of the host plus its user-facing log.
pub trait ParameterStore {
    fn get_value(&self, name: &str) -> Option<Value>;
    fn set_value(&mut self, name: &str, value: Value);
    fn log_message(&mut self, text: &str, severity: Severity);
}

/// Setting names shared with the host.
pub mod names {
    pub const RUN_MODE: &str = "Run mode";
    pub const SEQUENCER_TRIGGERS: &str = "Sequencer triggers";
    pub const TRIGGER_OUT_DELAY: &str = "Trigger out delay";
    pub const CALIBRATE_TRIGGER_OUT_DELAY: &str = "Calibrate trigger out delay";
    pub const CALIBRATE_INTERNAL_TRIGGER_PERIOD: &str = "Calibrate internal trigger period";
    pub const HALT_ON_ILLEGAL_REPETITION_RATE: &str = "Halt on illegal repetition rate";
    pub const DYNAMIC_REPETITION_RATE: &str = "Dynamic repetition rate";
    pub const INTERNAL_TRIGGER_PERIOD: &str = "Internal trigger period";
    pub const USE_OSCILLATOR_DELAY: &str = "Use oscillator-based repetition delay";
    pub const MINIMISE_JITTER: &str = "Minimise inter-device asynchronous jitter";
    pub const BEAT_FREQUENCY: &str = "Beat frequency";
    pub const OUTPUT_SAMPLE_RATE: &str = "Output sample rate";
    pub const OUTPUT_SAMPLE_RATE_DIVISOR: &str = "Output sample rate divisor";
    pub const REFERENCE_CLOCK: &str = "Reference clock";

    /// Channels are numbered from 1 in setting names.
    pub fn channel_waveform(channel: usize) -> String {
        format!("Channel {} - Waveform", channel + 1)
    }

    pub fn waveform_blueprint(channel: usize) -> String {
        format!("Waveform {} sequence blueprint", channel + 1)
    }

    pub fn waveform_primitive(primitive: usize) -> String {
        format!("Waveform primitive {}", primitive + 1)
    }

    pub fn channel_range(channel: usize) -> String {
        format!("Channel {} - Range", channel + 1)
    }

    pub fn channel_bypass(channel: usize) -> String {
        format!("Channel {} - Bypass DAC to port", channel + 1)
    }

    pub fn marker_start(channel: usize, marker: usize) -> String {
        format!("Output {} Marker {} start time", channel + 1, marker + 1)
    }

    pub fn marker_duration(channel: usize, marker: usize) -> String {
        format!("Output {} Marker {} duration", channel + 1, marker + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Text(" 0.4 ".to_string()).as_f64(), Some(0.4));
        assert_eq!(Value::Float(2.0).as_i64(), Some(2));
        assert_eq!(Value::Float(2.5).as_i64(), None);
        assert_eq!(Value::Int(0).as_bool(), Some(false));
        assert_eq!(Value::Bool(true).as_f64(), None);
        assert_eq!(Value::Vector(vec![1.0]).as_vector(), Some(&[1.0][..]));
    }

    #[test]
    fn test_names() {
        assert_eq!(names::channel_waveform(0), "Channel 1 - Waveform");
        assert_eq!(names::waveform_blueprint(7), "Waveform 8 sequence blueprint");
        assert_eq!(names::waveform_primitive(3), "Waveform primitive 4");
        assert_eq!(names::marker_start(2, 1), "Output 3 Marker 2 start time");
    }
}
