// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::device_traits::DeviceTraits;

/// How the sequencer program is started and repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Play once immediately, then wait for an external trigger before every repetition.
    PlayOnceThenExternal,
    /// Repeat on an internally timed period.
    #[default]
    Internal,
    /// Wait for an external trigger at the start of every repetition.
    External,
}

impl RunMode {
    const LABELS: [(RunMode, &'static str); 3] = [
        (RunMode::PlayOnceThenExternal, "Play once, then external trigger"),
        (RunMode::Internal, "Internal trigger"),
        (RunMode::External, "External trigger"),
    ];
}

/// Trigger pulses emitted by the sequencer around playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutput {
    Start,
    Finish,
    HoldHigh,
    StartAndFinish,
    #[default]
    None,
}

impl TriggerOutput {
    const LABELS: [(TriggerOutput, &'static str); 5] = [
        (TriggerOutput::Start, "Send at AWG program start"),
        (TriggerOutput::Finish, "Send at AWG program finish"),
        (TriggerOutput::HoldHigh, "Hold high during playback"),
        (
            TriggerOutput::StartAndFinish,
            "Send at AWG program start + finish",
        ),
        (TriggerOutput::None, "Do not send sequencer triggers"),
    ];

    /// Number of `setTrigger()` calls the mode adds to one repetition.
    pub fn set_trigger_calls(&self) -> u16 {
        match self {
            TriggerOutput::None => 0,
            TriggerOutput::Start | TriggerOutput::Finish | TriggerOutput::HoldHigh => 2,
            TriggerOutput::StartAndFinish => 4,
        }
    }

    pub fn overhead_cycles(&self, traits: &DeviceTraits) -> u16 {
        self.set_trigger_calls() * traits.set_trigger_cycles
    }

    /// Whether a pulse is sent after playback, which is where a trigger-out delay applies.
    pub fn emits_finish_pulse(&self) -> bool {
        matches!(self, TriggerOutput::Finish | TriggerOutput::StartAndFinish)
    }
}

/// Source of the device reference clock. Discriminants match the device node values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceClock {
    #[default]
    Internal = 0,
    External = 1,
    Zsync = 2,
}

impl ReferenceClock {
    const LABELS: [(ReferenceClock, &'static str); 3] = [
        (ReferenceClock::Internal, "Internal"),
        (ReferenceClock::External, "External"),
        (ReferenceClock::Zsync, "ZSync"),
    ];

    pub fn node_value(&self) -> i64 {
        *self as i64
    }
}

/// What to do when the requested repetition period is shorter than one
/// playback cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepetitionPolicy {
    /// Abort, reporting the minimum feasible period.
    #[default]
    Halt,
    /// Replace the requested period with the minimum feasible one.
    Relax,
    /// Keep the requested period and log a warning.
    Warn,
}

impl RepetitionPolicy {
    /// Build the policy from the two host switches. Halting takes precedence.
    pub fn from_flags(halt_on_illegal_rate: bool, dynamic_rate: bool) -> Self {
        match (halt_on_illegal_rate, dynamic_rate) {
            (true, _) => RepetitionPolicy::Halt,
            (false, true) => RepetitionPolicy::Relax,
            (false, false) => RepetitionPolicy::Warn,
        }
    }
}

macro_rules! labelled_option {
    ($ty:ty, $setting:literal) => {
        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                <$ty>::LABELS
                    .iter()
                    .find(|(_, label)| label.eq_ignore_ascii_case(s.trim()))
                    .map(|(option, _)| *option)
                    .ok_or_else(|| Error::UnknownOption {
                        setting: $setting,
                        value: s.to_string(),
                    })
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let label = <$ty>::LABELS
                    .iter()
                    .find(|(option, _)| option == self)
                    .map(|(_, label)| *label)
                    .unwrap_or_default();
                write!(f, "{label}")
            }
        }
    };
}

labelled_option!(RunMode, "Run mode");
labelled_option!(TriggerOutput, "Sequencer triggers");
labelled_option!(ReferenceClock, "Reference clock");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_traits::HDAWG_TRAITS;

    #[test]
    fn test_parse_labels() {
        assert_eq!(
            "Internal trigger".parse::<RunMode>().unwrap(),
            RunMode::Internal
        );
        assert_eq!(
            "send at awg program start + finish"
                .parse::<TriggerOutput>()
                .unwrap(),
            TriggerOutput::StartAndFinish
        );
        assert_eq!(
            RunMode::PlayOnceThenExternal.to_string(),
            "Play once, then external trigger"
        );
    }

    #[test]
    fn test_unknown_option_is_error() {
        let err = "Sometimes".parse::<RunMode>().unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownOption {
                setting: "Run mode",
                ..
            }
        ));
    }

    #[test]
    fn test_trigger_overhead() {
        assert_eq!(TriggerOutput::None.overhead_cycles(&HDAWG_TRAITS), 0);
        assert_eq!(TriggerOutput::Start.overhead_cycles(&HDAWG_TRAITS), 2);
        assert_eq!(TriggerOutput::HoldHigh.overhead_cycles(&HDAWG_TRAITS), 2);
        assert_eq!(
            TriggerOutput::StartAndFinish.overhead_cycles(&HDAWG_TRAITS),
            4
        );
        assert!(TriggerOutput::Finish.emits_finish_pulse());
        assert!(!TriggerOutput::HoldHigh.emits_finish_pulse());
    }

    #[test]
    fn test_repetition_policy_precedence() {
        assert_eq!(RepetitionPolicy::from_flags(true, true), RepetitionPolicy::Halt);
        assert_eq!(RepetitionPolicy::from_flags(false, true), RepetitionPolicy::Relax);
        assert_eq!(RepetitionPolicy::from_flags(false, false), RepetitionPolicy::Warn);
    }

    #[test]
    fn test_reference_clock_node_value() {
        assert_eq!(ReferenceClock::External.node_value(), 1);
        assert_eq!(ReferenceClock::Zsync.node_value(), 2);
    }
}
