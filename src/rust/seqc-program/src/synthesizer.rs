// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use chrono::NaiveDateTime;
use hdawg_common::device_traits::DeviceTraits;
use hdawg_common::types::{RunMode, TriggerOutput};

use crate::region::{Region, RegionSet};
use crate::seqc_generator::SeqCGenerator;
use crate::seqc_statements::{FunctionCall, SeqCVariant};
use crate::template::{ProgramTemplate, Slot};
use crate::{Result, Samples};

const TIMESTAMP_FORMAT: &str = "%d-%b-%Y (%H:%M:%S)";

/// User register holding the trigger-out delay in sequencer cycles.
pub const TRIGGER_OUT_DELAY_REGISTER: u16 = 0;

/// Settings read by the program regions.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramSettings {
    pub run_mode: RunMode,
    pub trigger_output: TriggerOutput,
    pub minimise_jitter: bool,
    pub use_oscillator_delay: bool,
    /// Output sample rate after division, in Sa/s.
    pub sample_rate: f64,
    /// Result of the last repetition check, in seconds. Negative when infeasible.
    pub verified_delay: f64,
    pub trigger_out_delay: f64,
    pub trigger_out_delay_calibration: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelLayout {
    /// The channel holds a non-empty waveform.
    pub loaded: bool,
    pub has_markers: bool,
}

/// Snapshot of the waveform bookkeeping that shapes the declarations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackLayout {
    pub buffer_length: Samples,
    /// 1-based index of the last loaded channel, 0 if none is loaded.
    pub highest_active_channel: usize,
    pub channels: Vec<ChannelLayout>,
}

impl PlaybackLayout {
    pub fn any_markers(&self) -> bool {
        self.channels.iter().any(|channel| channel.has_markers)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UserRegisterWrite {
    pub index: u16,
    pub value: f64,
}

/// The requested trigger-out delay cannot be represented and must be reset to zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerOutDelayClamp {
    pub requested: f64,
    /// A non-zero delay was requested, so the user should be told.
    pub warn: bool,
}

/// Result of one synthesis. Register writes and clamps are only reported
/// when the region producing them was regenerated.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisOutcome {
    pub program: String,
    pub user_register: Option<UserRegisterWrite>,
    pub trigger_out_delay_clamp: Option<TriggerOutDelayClamp>,
}

/// Which channels are declared with the shared marker waveform.
///
/// Channels are grouped by AWG core (1-2, 3-4, ... on the HDAWG). Within
/// `highest_active_channel`, every channel of a core is flagged if one of
/// them carries markers. Channels past the last active one are not
/// declared, so an odd last channel only takes its own marker flag.
pub fn marker_declarations(layout: &PlaybackLayout, channels_per_core: usize) -> Vec<bool> {
    let has_markers = |channel: usize| {
        layout
            .channels
            .get(channel)
            .is_some_and(|channel| channel.has_markers)
    };
    let highest = layout.highest_active_channel;
    let per_core = channels_per_core.max(1);
    let mut declare = vec![false; layout.channels.len().max(highest)];
    for first in (0..highest).step_by(per_core) {
        let core = first..(first + per_core).min(highest);
        if core.clone().any(has_markers) {
            declare[core].fill(true);
        }
    }
    declare
}

/// Holds the program template between commits and regenerates the dirty regions.
#[derive(Debug, Clone)]
pub struct ProgramSynthesizer {
    device_traits: &'static DeviceTraits,
    template: ProgramTemplate,
}

impl ProgramSynthesizer {
    pub fn new(device_traits: &'static DeviceTraits) -> Self {
        Self {
            device_traits,
            template: ProgramTemplate::new(),
        }
    }

    /// Regenerate the regions in `dirty`, stamp the program and render it.
    ///
    /// Regions outside `dirty` keep the text of the previous synthesis.
    pub fn synthesize(
        &mut self,
        dirty: &RegionSet,
        settings: &ProgramSettings,
        layout: &PlaybackLayout,
        timestamp: NaiveDateTime,
    ) -> Result<SynthesisOutcome> {
        hdawg_log::diagnostic!("Regenerating program regions {:?}", dirty);
        let mut user_register = None;
        let mut trigger_out_delay_clamp = None;
        for region in dirty.iter() {
            self.template.invalidate(region);
            match region {
                Region::Playback => self.generate_playback(layout),
                Region::Loop => self.generate_loop(),
                Region::Repetition => self.generate_repetition(settings),
                Region::Synchronisation => self.generate_synchronisation(settings),
                Region::TriggerOutput => self.generate_trigger_output(settings),
                Region::TriggerOutDelay => {
                    match self.generate_trigger_out_delay(settings) {
                        TriggerOutDelay::None => {}
                        TriggerOutDelay::Register(write) => user_register = Some(write),
                        TriggerOutDelay::Clamped(clamp) => trigger_out_delay_clamp = Some(clamp),
                    }
                }
            }
        }
        self.template.set(
            Slot::Timestamp,
            format!(
                "// This sequencer code was automatically generated at {}",
                timestamp.format(TIMESTAMP_FORMAT)
            ),
        );
        let program = self.template.render()?;
        Ok(SynthesisOutcome {
            program,
            user_register,
            trigger_out_delay_clamp,
        })
    }

    fn generate_playback(&mut self, layout: &PlaybackLayout) {
        if layout.highest_active_channel == 0 {
            // An empty playWave() crashes the device.
            self.template.set(Slot::WaveformDeclaration, "");
            self.template.set(Slot::Playwave, "");
            self.template.set(Slot::Waitwave, "");
            return;
        }
        let declare_marker =
            marker_declarations(layout, usize::from(self.device_traits.channels_per_core));
        let mut declarations = SeqCGenerator::new();
        if layout.any_markers() {
            declarations.add_marker_declaration(layout.buffer_length);
        }
        for channel in 0..layout.highest_active_channel {
            let loaded = layout
                .channels
                .get(channel)
                .is_some_and(|channel| channel.loaded);
            declarations.add_zero_wave_declaration(
                channel,
                layout.buffer_length,
                declare_marker[channel],
                !loaded,
            );
        }
        declarations.add_blank_line();

        let mut play = SeqCGenerator::loop_body();
        play.add_play_wave((0..layout.highest_active_channel).collect());
        let mut wait = SeqCGenerator::loop_body();
        wait.add_function_call("waitWave", vec![]);

        self.template
            .set(Slot::WaveformDeclaration, declarations.generate_seq_c());
        self.template.set(Slot::Playwave, play.generate_seq_c());
        self.template.set(Slot::Waitwave, wait.generate_seq_c());
    }

    fn generate_loop(&mut self) {
        self.template.set(Slot::WhileLoopStart, "while(true){\n");
        self.template.set(Slot::WhileLoopEnd, "}\n\n");
    }

    fn generate_repetition(&mut self, settings: &ProgramSettings) {
        let wait_for_trigger = || {
            let mut generator = SeqCGenerator::loop_body();
            generator.add_function_call("waitDigTrigger", vec![SeqCVariant::Integer(1)]);
            generator.generate_seq_c()
        };
        let (initial, delay, repeat) = match settings.run_mode {
            RunMode::PlayOnceThenExternal => (String::new(), String::new(), wait_for_trigger()),
            RunMode::Internal => (String::new(), self.internal_delay(settings), String::new()),
            RunMode::External => (wait_for_trigger(), String::new(), String::new()),
        };
        self.template.set(Slot::WaitForInitialTrigger, initial);
        self.template.set(Slot::DelayBeforeLoopEnd, delay);
        self.template.set(Slot::WaitForTriggerToRepeat, repeat);
    }

    fn internal_delay(&self, settings: &ProgramSettings) -> String {
        let mut generator = SeqCGenerator::loop_body();
        if settings.verified_delay < 0.0 {
            // Already reported by the repetition check.
            generator.add_comment("Invalid internal repetition delay.");
        } else if settings.use_oscillator_delay {
            generator.add_function_call("waitSineOscPhase", vec![SeqCVariant::Integer(2)]);
        } else {
            let clock = self.device_traits.sequencer_clock(settings.sample_rate);
            let cycles = (settings.verified_delay * clock).round() as i64;
            generator.add_function_call("wait", vec![SeqCVariant::Integer(cycles)]);
        }
        generator.generate_seq_c()
    }

    fn generate_synchronisation(&mut self, settings: &ProgramSettings) {
        let mut generator = SeqCGenerator::loop_body();
        if settings.minimise_jitter {
            generator.add_function_call("waitSineOscPhase", vec![SeqCVariant::Integer(1)]);
        }
        self.template
            .set(Slot::SynchroniseToBeatingFrequency, generator.generate_seq_c());
    }

    fn generate_trigger_output(&mut self, settings: &ProgramSettings) {
        let set_trigger = |value: u8| FunctionCall {
            name: "setTrigger".to_string(),
            args: vec![SeqCVariant::Bits { value, width: 4 }],
        };
        let pulse = || {
            let mut generator = SeqCGenerator::loop_body();
            generator.add_function_calls(vec![set_trigger(0b1111), set_trigger(0b0000)]);
            generator.generate_seq_c()
        };
        let level = |value: u8| {
            let mut generator = SeqCGenerator::loop_body();
            generator.add_function_calls(vec![set_trigger(value)]);
            generator.generate_seq_c()
        };
        let (start, end) = match settings.trigger_output {
            TriggerOutput::Start => (pulse(), String::new()),
            TriggerOutput::Finish => (String::new(), pulse()),
            TriggerOutput::HoldHigh => (level(0b1111), level(0b0000)),
            TriggerOutput::StartAndFinish => (pulse(), pulse()),
            TriggerOutput::None => (String::new(), String::new()),
        };
        self.template.set(Slot::StartTriggerPulse, start);
        self.template.set(Slot::EndTriggerPulse, end);
    }

    fn generate_trigger_out_delay(&mut self, settings: &ProgramSettings) -> TriggerOutDelay {
        let requested = settings.trigger_out_delay;
        if requested <= 0.0 || !settings.trigger_output.emits_finish_pulse() {
            self.template.set(Slot::DelayBeforeEndTrigger, "");
            return TriggerOutDelay::None;
        }
        let clock = self.device_traits.sequencer_clock(settings.sample_rate);
        // Fetching the user register costs a few cycles of its own.
        let lowest_representable_delay =
            f64::from(self.device_traits.user_register_fetch_cycles) / clock;
        let delay = requested - settings.trigger_out_delay_calibration;
        if delay >= lowest_representable_delay {
            let mut generator = SeqCGenerator::loop_body();
            generator.add_function_call(
                "wait",
                vec![SeqCVariant::Expression(format!(
                    "getUserReg({TRIGGER_OUT_DELAY_REGISTER})"
                ))],
            );
            self.template
                .set(Slot::DelayBeforeEndTrigger, generator.generate_seq_c());
            TriggerOutDelay::Register(UserRegisterWrite {
                index: TRIGGER_OUT_DELAY_REGISTER,
                value: (delay * clock).round(),
            })
        } else {
            self.template.set(Slot::DelayBeforeEndTrigger, "");
            TriggerOutDelay::Clamped(TriggerOutDelayClamp {
                requested,
                warn: delay != 0.0,
            })
        }
    }
}

enum TriggerOutDelay {
    None,
    Register(UserRegisterWrite),
    Clamped(TriggerOutDelayClamp),
}
