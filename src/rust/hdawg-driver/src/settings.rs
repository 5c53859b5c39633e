// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Host settings the driver reacts to, and what each change sets in motion.
//!
//! Applying a [`Setting`] only updates [`SequencerSettings`]. The regions
//! to regenerate and the device actions to run are computed separately by
//! [`Setting::effects`], so the session decides when they happen.

use std::str::FromStr;

use hdawg_common::device_traits::DeviceTraits;
use hdawg_common::types::{ReferenceClock, RepetitionPolicy, RunMode, TriggerOutput};
use seqc_program::{ProgramSettings, Region, RegionSet, Samples};

use crate::feasibility::RepetitionRequest;
use crate::store::{Value, names};
use crate::tracker::MARKERS_PER_CHANNEL;
use crate::{Error, Result};

/// Sample clock of the device before division.
pub const DEFAULT_SAMPLE_RATE: f64 = 2.4e9;
/// Largest exponent of the `2^n` sample rate divisor.
pub const MAX_SAMPLE_RATE_DIVISOR: u32 = 13;

#[derive(Debug, Clone, PartialEq)]
pub enum Setting {
    RunMode(RunMode),
    SequencerTriggers(TriggerOutput),
    TriggerOutDelay(f64),
    CalibrateTriggerOutDelay(f64),
    CalibrateInternalTriggerPeriod(f64),
    HaltOnIllegalRepetitionRate(bool),
    DynamicRepetitionRate(bool),
    InternalTriggerPeriod(f64),
    UseOscillatorDelay(bool),
    MinimiseJitter(bool),
    BeatFrequency(f64),
    OutputSampleRate(f64),
    /// Exponent `n` of the `2^n` divisor.
    OutputSampleRateDivisor(u32),
    ReferenceClock(ReferenceClock),
    ChannelRange { channel: usize, range: f64 },
    BypassDac { channel: usize, enabled: bool },
    MarkerStart { channel: usize, marker: usize, seconds: f64 },
    MarkerDuration { channel: usize, marker: usize, seconds: f64 },
}

/// A device operation requested by a setting change.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Re-evaluate the channel grouping from the oscillator switches.
    ChannelGrouping,
    BeatOscillator(f64),
    RepetitionOscillator { period: f64, align_to_beat: bool },
    SampleClock(f64),
    SampleRateDivisor(u32),
    ReferenceClock(ReferenceClock),
    ConfigureMarker {
        channel: usize,
        marker: usize,
        start: i64,
        duration: i64,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Effects {
    pub dirty: RegionSet,
    pub repetition_check: bool,
    pub actions: Vec<Action>,
}

fn number(name: &str, value: &Value) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| Error::Configuration(format!("'{name}' expects a number, got {value}.")))
}

fn flag(name: &str, value: &Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| Error::Configuration(format!("'{name}' expects a boolean, got {value}.")))
}

fn option<T>(name: &str, value: &Value) -> Result<T>
where
    T: FromStr<Err = hdawg_common::Error>,
{
    let label = value
        .as_text()
        .ok_or_else(|| Error::Configuration(format!("'{name}' expects an option, got {value}.")))?;
    Ok(label.parse()?)
}

/// 1-based number in a setting name to a 0-based index.
fn index(number: &str) -> Option<usize> {
    number.trim().parse::<usize>().ok()?.checked_sub(1)
}

/// `Channel N - <rest>`
fn channel_setting(name: &str) -> Option<(usize, &str)> {
    let (channel, rest) = name.strip_prefix("Channel ")?.split_once(" - ")?;
    Some((index(channel)?, rest))
}

/// `Output N Marker M <rest>`
fn marker_setting(name: &str) -> Option<(usize, usize, &str)> {
    let (channel, rest) = name.strip_prefix("Output ")?.split_once(" Marker ")?;
    let (marker, rest) = rest.split_once(' ')?;
    Some((index(channel)?, index(marker)?, rest))
}

impl Setting {
    /// Interpret a host setting. Names the driver does not handle give `None`.
    pub fn parse(name: &str, value: &Value) -> Result<Option<Setting>> {
        let setting = match name {
            names::RUN_MODE => Setting::RunMode(option(name, value)?),
            names::SEQUENCER_TRIGGERS => Setting::SequencerTriggers(option(name, value)?),
            names::TRIGGER_OUT_DELAY => Setting::TriggerOutDelay(number(name, value)?),
            names::CALIBRATE_TRIGGER_OUT_DELAY => {
                Setting::CalibrateTriggerOutDelay(number(name, value)?)
            }
            names::CALIBRATE_INTERNAL_TRIGGER_PERIOD => {
                Setting::CalibrateInternalTriggerPeriod(number(name, value)?)
            }
            names::HALT_ON_ILLEGAL_REPETITION_RATE => {
                Setting::HaltOnIllegalRepetitionRate(flag(name, value)?)
            }
            names::DYNAMIC_REPETITION_RATE => Setting::DynamicRepetitionRate(flag(name, value)?),
            names::INTERNAL_TRIGGER_PERIOD => Setting::InternalTriggerPeriod(number(name, value)?),
            names::USE_OSCILLATOR_DELAY => Setting::UseOscillatorDelay(flag(name, value)?),
            names::MINIMISE_JITTER => Setting::MinimiseJitter(flag(name, value)?),
            names::BEAT_FREQUENCY => Setting::BeatFrequency(number(name, value)?),
            names::OUTPUT_SAMPLE_RATE => {
                let rate = number(name, value)?;
                if rate.is_nan() || rate <= 0.0 {
                    return Err(Error::Configuration(format!(
                        "'{name}' must be positive, got {rate}."
                    )));
                }
                Setting::OutputSampleRate(rate)
            }
            names::OUTPUT_SAMPLE_RATE_DIVISOR => {
                let divisor = value
                    .as_i64()
                    .and_then(|divisor| u32::try_from(divisor).ok())
                    .filter(|divisor| *divisor <= MAX_SAMPLE_RATE_DIVISOR)
                    .ok_or_else(|| {
                        Error::Configuration(format!(
                            "'{name}' must be an exponent between 0 and \
                            {MAX_SAMPLE_RATE_DIVISOR}, got {value}."
                        ))
                    })?;
                Setting::OutputSampleRateDivisor(divisor)
            }
            names::REFERENCE_CLOCK => Setting::ReferenceClock(option(name, value)?),
            _ => {
                if let Some((channel, rest)) = channel_setting(name) {
                    match rest {
                        "Range" => Setting::ChannelRange {
                            channel,
                            range: number(name, value)?,
                        },
                        "Bypass DAC to port" => Setting::BypassDac {
                            channel,
                            enabled: flag(name, value)?,
                        },
                        _ => return Ok(None),
                    }
                } else if let Some((channel, marker, rest)) = marker_setting(name) {
                    let seconds = number(name, value)?;
                    match rest {
                        "start time" => Setting::MarkerStart {
                            channel,
                            marker,
                            seconds,
                        },
                        "duration" => Setting::MarkerDuration {
                            channel,
                            marker,
                            seconds,
                        },
                        _ => return Ok(None),
                    }
                } else {
                    return Ok(None);
                }
            }
        };
        Ok(Some(setting))
    }

    /// Regions, repetition check and device actions caused by this setting,
    /// evaluated against `settings` after the setting was applied.
    pub fn effects(&self, settings: &SequencerSettings) -> Effects {
        let mut effects = Effects::default();
        match self {
            Setting::RunMode(_) => {
                effects.dirty.insert(Region::Repetition);
                effects.repetition_check = true;
            }
            Setting::SequencerTriggers(_) => {
                effects.dirty = RegionSet::from([Region::TriggerOutput, Region::TriggerOutDelay]);
                effects.repetition_check = true;
            }
            Setting::TriggerOutDelay(_)
            | Setting::CalibrateTriggerOutDelay(_)
            | Setting::CalibrateInternalTriggerPeriod(_)
            | Setting::HaltOnIllegalRepetitionRate(_)
            | Setting::DynamicRepetitionRate(_) => {
                effects.dirty.insert(Region::TriggerOutDelay);
                effects.repetition_check = true;
            }
            Setting::InternalTriggerPeriod(period) => {
                effects.repetition_check = true;
                if settings.use_oscillator_delay {
                    effects.actions.push(Action::RepetitionOscillator {
                        period: *period,
                        align_to_beat: settings.minimise_jitter,
                    });
                } else {
                    effects.dirty.insert(Region::Repetition);
                }
            }
            Setting::UseOscillatorDelay(_) => {
                effects.dirty.insert(Region::Repetition);
                effects.actions.push(Action::ChannelGrouping);
            }
            Setting::MinimiseJitter(_) => {
                effects.dirty.insert(Region::Synchronisation);
                effects.repetition_check = true;
                effects.actions.push(Action::ChannelGrouping);
            }
            Setting::BeatFrequency(frequency) => {
                effects.actions.push(Action::BeatOscillator(*frequency));
            }
            Setting::OutputSampleRate(rate) => {
                effects.dirty = RegionSet::from([Region::Repetition, Region::TriggerOutDelay]);
                effects.repetition_check = true;
                effects.actions.push(Action::SampleClock(*rate));
            }
            Setting::OutputSampleRateDivisor(divisor) => {
                effects.dirty = RegionSet::from([Region::Repetition, Region::TriggerOutDelay]);
                effects.repetition_check = true;
                effects.actions.push(Action::SampleRateDivisor(*divisor));
            }
            Setting::ReferenceClock(clock) => {
                effects.actions.push(Action::ReferenceClock(*clock));
            }
            Setting::ChannelRange { .. } | Setting::BypassDac { .. } => {}
            Setting::MarkerStart {
                channel, marker, ..
            }
            | Setting::MarkerDuration {
                channel, marker, ..
            } => {
                if let Some((start, duration)) = settings.marker_samples(*channel, *marker) {
                    effects.actions.push(Action::ConfigureMarker {
                        channel: *channel,
                        marker: *marker,
                        start,
                        duration,
                    });
                }
            }
        }
        effects
    }
}

/// Marker timing as set by the host, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MarkerTiming {
    pub start: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelOutput {
    pub range: f64,
    /// DAC bypassed to the port, which fixes the output range.
    pub bypass: bool,
    pub markers: [MarkerTiming; MARKERS_PER_CHANNEL],
}

impl Default for ChannelOutput {
    fn default() -> Self {
        Self {
            range: 1.0,
            bypass: false,
            markers: Default::default(),
        }
    }
}

/// The driver's view of the host settings.
#[derive(Debug, Clone)]
pub struct SequencerSettings {
    device_traits: &'static DeviceTraits,
    pub run_mode: RunMode,
    pub trigger_output: TriggerOutput,
    pub trigger_out_delay: f64,
    pub trigger_out_delay_calibration: f64,
    pub internal_period_calibration: f64,
    pub internal_trigger_period: f64,
    pub halt_on_illegal_repetition_rate: bool,
    pub dynamic_repetition_rate: bool,
    pub use_oscillator_delay: bool,
    pub minimise_jitter: bool,
    pub base_sample_rate: f64,
    pub sample_rate_divisor: u32,
    pub reference_clock: ReferenceClock,
    pub beat_frequency: f64,
    pub channels: Vec<ChannelOutput>,
}

impl SequencerSettings {
    pub fn new(channels: usize, device_traits: &'static DeviceTraits) -> Self {
        Self {
            device_traits,
            run_mode: RunMode::default(),
            trigger_output: TriggerOutput::default(),
            trigger_out_delay: 0.0,
            trigger_out_delay_calibration: 0.0,
            internal_period_calibration: 0.0,
            internal_trigger_period: 100e-6,
            halt_on_illegal_repetition_rate: true,
            dynamic_repetition_rate: false,
            use_oscillator_delay: false,
            minimise_jitter: false,
            base_sample_rate: DEFAULT_SAMPLE_RATE,
            sample_rate_divisor: 0,
            reference_clock: ReferenceClock::default(),
            beat_frequency: 0.0,
            channels: vec![ChannelOutput::default(); channels],
        }
    }

    /// Output sample rate after division, in Sa/s.
    pub fn sample_rate(&self) -> f64 {
        self.device_traits
            .sample_rate(self.base_sample_rate, self.sample_rate_divisor)
    }

    pub fn repetition_policy(&self) -> RepetitionPolicy {
        RepetitionPolicy::from_flags(
            self.halt_on_illegal_repetition_rate,
            self.dynamic_repetition_rate,
        )
    }

    /// Full-scale voltage a sample of `channel` is divided by.
    pub fn channel_scale(&self, channel: usize) -> f64 {
        match self.channels.get(channel) {
            Some(output) if output.bypass => self.device_traits.bypass_output_range,
            Some(output) => output.range,
            None => 1.0,
        }
    }

    /// Start and duration of a marker, rounded to samples at the current rate.
    pub fn marker_samples(&self, channel: usize, marker: usize) -> Option<(i64, i64)> {
        let timing = self.channels.get(channel)?.markers.get(marker)?;
        let rate = self.sample_rate();
        Some((
            (timing.start * rate).round() as i64,
            (timing.duration * rate).round() as i64,
        ))
    }

    pub fn program_settings(&self, verified_delay: f64) -> ProgramSettings {
        ProgramSettings {
            run_mode: self.run_mode,
            trigger_output: self.trigger_output,
            minimise_jitter: self.minimise_jitter,
            use_oscillator_delay: self.use_oscillator_delay,
            sample_rate: self.sample_rate(),
            verified_delay,
            trigger_out_delay: self.trigger_out_delay,
            trigger_out_delay_calibration: self.trigger_out_delay_calibration,
        }
    }

    pub fn repetition_request(
        &self,
        buffer_length: Samples,
        highest_active_channel: usize,
    ) -> RepetitionRequest {
        RepetitionRequest {
            requested_period: self.internal_trigger_period,
            trigger_output: self.trigger_output,
            sample_rate: self.sample_rate(),
            buffer_length,
            highest_active_channel,
            trigger_out_delay: self.trigger_out_delay,
            trigger_out_delay_calibration: self.trigger_out_delay_calibration,
            internal_period_calibration: self.internal_period_calibration,
        }
    }

    fn channel_mut(&mut self, channel: usize) -> Result<&mut ChannelOutput> {
        let count = self.channels.len();
        self.channels.get_mut(channel).ok_or_else(|| {
            Error::Configuration(format!(
                "Channel {} does not exist, the device has {count} channels.",
                channel + 1
            ))
        })
    }

    fn marker_mut(&mut self, channel: usize, marker: usize) -> Result<&mut MarkerTiming> {
        self.channel_mut(channel)?
            .markers
            .get_mut(marker)
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "Channel {} has no marker {}.",
                    channel + 1,
                    marker + 1
                ))
            })
    }

    pub fn apply(&mut self, setting: &Setting) -> Result<()> {
        match *setting {
            Setting::RunMode(mode) => self.run_mode = mode,
            Setting::SequencerTriggers(output) => self.trigger_output = output,
            Setting::TriggerOutDelay(delay) => self.trigger_out_delay = delay,
            Setting::CalibrateTriggerOutDelay(offset) => {
                self.trigger_out_delay_calibration = offset
            }
            Setting::CalibrateInternalTriggerPeriod(offset) => {
                self.internal_period_calibration = offset
            }
            Setting::HaltOnIllegalRepetitionRate(halt) => {
                self.halt_on_illegal_repetition_rate = halt
            }
            Setting::DynamicRepetitionRate(dynamic) => self.dynamic_repetition_rate = dynamic,
            Setting::InternalTriggerPeriod(period) => self.internal_trigger_period = period,
            Setting::UseOscillatorDelay(enabled) => self.use_oscillator_delay = enabled,
            Setting::MinimiseJitter(enabled) => self.minimise_jitter = enabled,
            Setting::BeatFrequency(frequency) => self.beat_frequency = frequency,
            Setting::OutputSampleRate(rate) => self.base_sample_rate = rate,
            Setting::OutputSampleRateDivisor(divisor) => self.sample_rate_divisor = divisor,
            Setting::ReferenceClock(clock) => self.reference_clock = clock,
            Setting::ChannelRange { channel, range } => {
                if range.is_nan() || range <= 0.0 {
                    return Err(Error::Configuration(format!(
                        "The range of channel {} must be positive, got {range}.",
                        channel + 1
                    )));
                }
                self.channel_mut(channel)?.range = range;
            }
            Setting::BypassDac { channel, enabled } => self.channel_mut(channel)?.bypass = enabled,
            Setting::MarkerStart {
                channel,
                marker,
                seconds,
            } => self.marker_mut(channel, marker)?.start = seconds,
            Setting::MarkerDuration {
                channel,
                marker,
                seconds,
            } => self.marker_mut(channel, marker)?.duration = seconds,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use hdawg_common::device_traits::HDAWG_TRAITS;

    use super::*;

    fn settings() -> SequencerSettings {
        SequencerSettings::new(8, &HDAWG_TRAITS)
    }

    fn text(label: &str) -> Value {
        Value::Text(label.to_string())
    }

    #[test]
    fn test_parse_options() {
        assert_eq!(
            Setting::parse(names::RUN_MODE, &text("External trigger")).unwrap(),
            Some(Setting::RunMode(RunMode::External))
        );
        assert_eq!(
            Setting::parse(
                names::SEQUENCER_TRIGGERS,
                &text("Send at AWG program start + finish")
            )
            .unwrap(),
            Some(Setting::SequencerTriggers(TriggerOutput::StartAndFinish))
        );
        assert_eq!(
            Setting::parse(names::REFERENCE_CLOCK, &text("ZSync")).unwrap(),
            Some(Setting::ReferenceClock(ReferenceClock::Zsync))
        );
    }

    #[test]
    fn test_unknown_option_is_configuration_error() {
        let err = Setting::parse(names::RUN_MODE, &text("Free running")).unwrap_err();
        assert!(matches!(err, Error::Configuration(ref m) if m.contains("Free running")));
        let err = Setting::parse(names::TRIGGER_OUT_DELAY, &Value::Bool(true)).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_parse_channel_settings() {
        assert_eq!(
            Setting::parse(&names::channel_range(2), &Value::Float(0.4)).unwrap(),
            Some(Setting::ChannelRange {
                channel: 2,
                range: 0.4
            })
        );
        assert_eq!(
            Setting::parse(&names::channel_bypass(0), &Value::Bool(true)).unwrap(),
            Some(Setting::BypassDac {
                channel: 0,
                enabled: true
            })
        );
        assert_eq!(
            Setting::parse(&names::marker_duration(7, 1), &Value::Float(1e-6)).unwrap(),
            Some(Setting::MarkerDuration {
                channel: 7,
                marker: 1,
                seconds: 1e-6
            })
        );
        assert_eq!(Setting::parse("Channel 0 - Range", &Value::Float(1.0)).unwrap(), None);
        assert_eq!(Setting::parse("Channel 1 - Offset", &Value::Float(1.0)).unwrap(), None);
        assert_eq!(Setting::parse("Command line box", &text("x")).unwrap(), None);
    }

    #[test]
    fn test_parse_divisor() {
        assert_eq!(
            Setting::parse(names::OUTPUT_SAMPLE_RATE_DIVISOR, &Value::Int(3)).unwrap(),
            Some(Setting::OutputSampleRateDivisor(3))
        );
        assert!(Setting::parse(names::OUTPUT_SAMPLE_RATE_DIVISOR, &Value::Int(14)).is_err());
        assert!(Setting::parse(names::OUTPUT_SAMPLE_RATE_DIVISOR, &Value::Int(-1)).is_err());
    }

    #[test]
    fn test_effects() {
        let settings = settings();
        let effects = Setting::SequencerTriggers(TriggerOutput::Finish).effects(&settings);
        assert_eq!(
            effects.dirty,
            RegionSet::from([Region::TriggerOutput, Region::TriggerOutDelay])
        );
        assert!(effects.repetition_check);
        assert!(effects.actions.is_empty());

        let effects = Setting::MinimiseJitter(true).effects(&settings);
        assert_eq!(effects.dirty, RegionSet::from([Region::Synchronisation]));
        assert_eq!(effects.actions, vec![Action::ChannelGrouping]);

        let effects = Setting::ChannelRange {
            channel: 0,
            range: 0.2,
        }
        .effects(&settings);
        assert_eq!(effects, Effects::default());
    }

    #[test]
    fn test_internal_period_effects_follow_oscillator_switch() {
        let mut settings = settings();
        let period = Setting::InternalTriggerPeriod(10e-6);
        let effects = period.effects(&settings);
        assert_eq!(effects.dirty, RegionSet::from([Region::Repetition]));
        assert!(effects.actions.is_empty());

        settings.use_oscillator_delay = true;
        settings.minimise_jitter = true;
        let effects = period.effects(&settings);
        assert!(effects.dirty.is_empty());
        assert!(effects.repetition_check);
        assert_eq!(
            effects.actions,
            vec![Action::RepetitionOscillator {
                period: 10e-6,
                align_to_beat: true
            }]
        );
    }

    #[test]
    fn test_marker_effects_use_current_rate() {
        let mut settings = settings();
        let start = Setting::MarkerStart {
            channel: 1,
            marker: 0,
            seconds: 1e-9,
        };
        let duration = Setting::MarkerDuration {
            channel: 1,
            marker: 0,
            seconds: 10e-9,
        };
        settings.apply(&start).unwrap();
        settings.apply(&duration).unwrap();
        assert_eq!(
            duration.effects(&settings).actions,
            vec![Action::ConfigureMarker {
                channel: 1,
                marker: 0,
                start: 2,
                duration: 24
            }]
        );
        settings
            .apply(&Setting::OutputSampleRateDivisor(1))
            .unwrap();
        assert_eq!(settings.marker_samples(1, 0), Some((1, 12)));
    }

    #[test]
    fn test_apply_rejects_missing_channel() {
        let mut settings = settings();
        let err = settings
            .apply(&Setting::BypassDac {
                channel: 8,
                enabled: true,
            })
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(
            settings
                .apply(&Setting::ChannelRange {
                    channel: 0,
                    range: 0.0
                })
                .is_err()
        );
    }

    #[test]
    fn test_channel_scale_and_policy() {
        let mut settings = settings();
        settings
            .apply(&Setting::ChannelRange {
                channel: 0,
                range: 0.4,
            })
            .unwrap();
        assert_eq!(settings.channel_scale(0), 0.4);
        settings
            .apply(&Setting::BypassDac {
                channel: 0,
                enabled: true,
            })
            .unwrap();
        assert_eq!(settings.channel_scale(0), 0.8);
        assert_eq!(settings.channel_scale(1), 1.0);

        assert_eq!(settings.repetition_policy(), RepetitionPolicy::Halt);
        settings
            .apply(&Setting::HaltOnIllegalRepetitionRate(false))
            .unwrap();
        assert_eq!(settings.repetition_policy(), RepetitionPolicy::Warn);
        settings.apply(&Setting::DynamicRepetitionRate(true)).unwrap();
        assert_eq!(settings.repetition_policy(), RepetitionPolicy::Relax);
    }

    #[test]
    fn test_program_settings() {
        let mut settings = settings();
        settings.apply(&Setting::OutputSampleRateDivisor(2)).unwrap();
        let program = settings.program_settings(-1e-6);
        assert_eq!(program.sample_rate, 600e6);
        assert_eq!(program.verified_delay, -1e-6);
        let request = settings.repetition_request(1200, 2);
        assert_eq!(request.sample_rate, 600e6);
        assert_eq!(request.requested_period, 100e-6);
    }
}
