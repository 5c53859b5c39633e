// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! One driver session: setting changes between commits, and the commit
//! cycle that brings program and waveform memory up to date.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use chrono::NaiveDateTime;
use hdawg_common::device_traits::{DeviceTraits, HDAWG_TRAITS};
use hdawg_common::types::RunMode;
use seqc_program::{ProgramSynthesizer, Region, RegionSet};

use crate::clocks;
use crate::config::DriverConfig;
use crate::context::DeviceContext;
use crate::device::{DeviceApi, Nodes};
use crate::feasibility::{check_repetition, program_repetition_oscillator};
use crate::memory::write_waveforms;
use crate::settings::{Action, SequencerSettings, Setting};
use crate::sleep::{Sleep, StdSleeper};
use crate::store::{ParameterStore, Value, names};
use crate::tracker::{WaveformTracker, assemble_blueprint};
use crate::upload::UploadSession;
use crate::Result;

/// What a commit did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitReport {
    /// Regions regenerated before the upload, empty when nothing was compiled.
    pub regenerated: RegionSet,
    pub compiled: bool,
    pub pairs_written: usize,
    /// The internal trigger period was raised to this minimum.
    pub relaxed_period: Option<f64>,
}

/// The collaborators a session talks to.
struct Io<D, P, S> {
    device: D,
    store: P,
    sleeper: S,
    config: DriverConfig,
    nodes: Nodes,
}

impl<D: DeviceApi, P: ParameterStore, S: Sleep> Io<D, P, S> {
    fn context(&mut self) -> DeviceContext<'_> {
        DeviceContext {
            device: &mut self.device,
            store: &mut self.store,
            sleeper: &self.sleeper,
            config: &self.config,
            nodes: &self.nodes,
        }
    }
}

pub struct AwgSession<D, P, S = StdSleeper> {
    io: Io<D, P, S>,
    device_traits: &'static DeviceTraits,
    settings: SequencerSettings,
    tracker: WaveformTracker,
    synthesizer: ProgramSynthesizer,
    dirty: RegionSet,
    repetition_check_pending: bool,
    verified_delay: f64,
    /// A synthesized program has not reached the device yet.
    program_pending: bool,
    stop: Arc<AtomicBool>,
    last_program: Option<String>,
}

impl<D: DeviceApi, P: ParameterStore, S: Sleep> AwgSession<D, P, S> {
    /// Start a session. Invalid configuration values are replaced and reported as warnings.
    pub fn new(device: D, store: P, sleeper: S, mut config: DriverConfig) -> Self {
        let changes = config.sanitize();
        let nodes = Nodes::new(config.device.as_str());
        let channels = config.channels;
        let mut io = Io {
            device,
            store,
            sleeper,
            config,
            nodes,
        };
        for change in changes {
            io.context().warn(&format!(
                "Configuration '{}' changed from {} to {}: {}",
                change.field, change.original, change.sanitized, change.reason
            ));
        }
        Self {
            io,
            device_traits: &HDAWG_TRAITS,
            settings: SequencerSettings::new(channels, &HDAWG_TRAITS),
            tracker: WaveformTracker::new(channels),
            synthesizer: ProgramSynthesizer::new(&HDAWG_TRAITS),
            dirty: RegionSet::all(),
            repetition_check_pending: true,
            verified_delay: 0.0,
            program_pending: true,
            stop: Arc::new(AtomicBool::new(false)),
            last_program: None,
        }
    }

    /// Flag sampled while waiting for the compiler. Raising it makes the
    /// running commit fail; the host lowers it again.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn settings(&self) -> &SequencerSettings {
        &self.settings
    }

    pub fn tracker(&self) -> &WaveformTracker {
        &self.tracker
    }

    pub fn device(&self) -> &D {
        &self.io.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.io.device
    }

    pub fn store(&self) -> &P {
        &self.io.store
    }

    pub fn store_mut(&mut self) -> &mut P {
        &mut self.io.store
    }

    pub fn config(&self) -> &DriverConfig {
        &self.io.config
    }

    /// Regions waiting to be regenerated.
    pub fn dirty(&self) -> RegionSet {
        self.dirty
    }

    pub fn verified_delay(&self) -> f64 {
        self.verified_delay
    }

    /// The program most recently uploaded to the device.
    pub fn last_program(&self) -> Option<&str> {
        self.last_program.as_deref()
    }

    /// Apply a host setting by name. Returns whether the driver handles it.
    pub fn apply_named(&mut self, name: &str, value: &Value) -> Result<bool> {
        match Setting::parse(name, value)? {
            Some(setting) => {
                self.apply_setting(setting)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn apply_setting(&mut self, setting: Setting) -> Result<()> {
        self.settings.apply(&setting)?;
        let effects = setting.effects(&self.settings);
        hdawg_log::debug!("{:?}: {:?}", setting, effects);
        self.dirty.extend(&effects.dirty);
        self.repetition_check_pending |= effects.repetition_check;
        for action in effects.actions {
            self.run_action(action)?;
        }
        Ok(())
    }

    fn run_action(&mut self, action: Action) -> Result<()> {
        let mut ctx = self.io.context();
        match action {
            Action::ChannelGrouping => {
                let in_use = self.settings.use_oscillator_delay || self.settings.minimise_jitter;
                clocks::set_channel_grouping(&mut ctx, in_use)?;
            }
            Action::BeatOscillator(frequency) => {
                let frequency =
                    clocks::program_beat_oscillator(&mut ctx, frequency, self.device_traits)?;
                ctx.store
                    .set_value(names::BEAT_FREQUENCY, Value::Float(frequency));
                self.settings.beat_frequency = frequency;
            }
            Action::RepetitionOscillator {
                period,
                align_to_beat,
            } => {
                let period = program_repetition_oscillator(
                    &mut ctx,
                    period,
                    align_to_beat,
                    self.device_traits,
                )?;
                ctx.store
                    .set_value(names::INTERNAL_TRIGGER_PERIOD, Value::Float(period));
                self.settings.internal_trigger_period = period;
            }
            Action::SampleClock(rate) => clocks::change_sample_clock(&mut ctx, rate)?,
            Action::SampleRateDivisor(divisor) => {
                ctx.device
                    .set_int(&ctx.nodes.sample_rate_divisor(), i64::from(divisor))?;
            }
            Action::ReferenceClock(clock) => clocks::change_reference_clock(&mut ctx, clock)?,
            Action::ConfigureMarker {
                channel,
                marker,
                start,
                duration,
            } => {
                let dirty = self
                    .tracker
                    .configure_marker(channel, marker, start, duration);
                self.dirty.extend(&dirty);
            }
        }
        Ok(())
    }

    /// Bring the device up to date with the waveforms held by the store.
    pub fn commit(&mut self) -> Result<CommitReport> {
        self.commit_at(chrono::Local::now().naive_local())
    }

    /// [`Self::commit`] with an explicit timestamp for the program comment.
    pub fn commit_at(&mut self, timestamp: NaiveDateTime) -> Result<CommitReport> {
        let mut report = CommitReport::default();
        let waveforms = self.fetch_waveforms()?;
        let dirty = self.tracker.commit(waveforms);
        if !dirty.is_empty() {
            // Buffer length and channel count enter the play time.
            self.repetition_check_pending = true;
        }
        self.dirty.extend(&dirty);

        if self.repetition_check_pending && self.settings.run_mode == RunMode::Internal {
            report.relaxed_period = self.check_repetition_rate()?;
        }

        if !self.dirty.is_empty() || self.program_pending {
            report.regenerated = self.dirty;
            self.upload_program(timestamp)?;
            report.compiled = true;
            report.pairs_written = self.write_memory()?;
            self.io.device.set_sequencer_enabled(true)?;
        } else if self.tracker.has_pending_writes() {
            report.pairs_written = self.write_memory()?;
        }
        hdawg_log::diagnostic!("Commit: {:?}", report);
        Ok(report)
    }

    fn fetch_waveforms(&self) -> Result<Vec<Vec<f64>>> {
        let store = &self.io.store;
        let vector = |name: &str| {
            store
                .get_value(name)
                .and_then(|value| value.as_vector().map(<[f64]>::to_vec))
        };
        (0..self.io.config.channels)
            .map(|channel| match vector(&names::waveform_blueprint(channel)) {
                Some(blueprint) if !blueprint.is_empty() => {
                    assemble_blueprint(&blueprint, |primitive| {
                        vector(&names::waveform_primitive(primitive))
                    })
                }
                _ => Ok(vector(&names::channel_waveform(channel)).unwrap_or_default()),
            })
            .collect()
    }

    /// Returns the relaxed period when the policy replaced the requested one.
    fn check_repetition_rate(&mut self) -> Result<Option<f64>> {
        let request = self
            .settings
            .repetition_request(self.tracker.buffer_length(), self.tracker.highest_active_channel());
        let check = check_repetition(
            &request,
            self.settings.repetition_policy(),
            self.device_traits,
        )?;
        let mut ctx = self.io.context();
        if let Some(period) = check.relaxed_period {
            let period = if self.settings.use_oscillator_delay {
                program_repetition_oscillator(
                    &mut ctx,
                    period,
                    self.settings.minimise_jitter,
                    self.device_traits,
                )?
            } else {
                period
            };
            ctx.info(&format!(
                "The internal trigger period was increased to {period} s, the shortest \
                period the current program can keep up with."
            ));
            ctx.store
                .set_value(names::INTERNAL_TRIGGER_PERIOD, Value::Float(period));
            self.settings.internal_trigger_period = period;
        }
        if check.ignored_violation {
            ctx.warn(&format!(
                "Warning: the requested internal trigger period of {} s is shorter than the \
                program takes to play. The minimum period is {} s.",
                request.requested_period,
                request.requested_period - check.verified_delay
            ));
        }
        if check.verified_delay != self.verified_delay {
            self.verified_delay = check.verified_delay;
            self.dirty.insert(Region::Repetition);
        }
        self.repetition_check_pending = false;
        Ok(check.relaxed_period.map(|_| self.settings.internal_trigger_period))
    }

    /// Synthesize the dirty regions, then compile and upload the program.
    fn upload_program(&mut self, timestamp: NaiveDateTime) -> Result<()> {
        self.io.device.set_sequencer_enabled(false)?;
        let outcome = self.synthesizer.synthesize(
            &self.dirty,
            &self.settings.program_settings(self.verified_delay),
            &self.tracker.layout(),
            timestamp,
        )?;
        self.dirty.clear();
        self.program_pending = true;

        let mut ctx = self.io.context();
        if let Some(clamp) = outcome.trigger_out_delay_clamp {
            self.settings.trigger_out_delay = 0.0;
            // The play time was checked against the requested delay.
            self.repetition_check_pending = true;
            ctx.store
                .set_value(names::TRIGGER_OUT_DELAY, Value::Float(0.0));
            if clamp.warn {
                ctx.warn(&format!(
                    "Warning: the trigger out delay of {} s is shorter than the device can \
                    represent and was set to 0.",
                    clamp.requested
                ));
            }
        }
        if let Some(write) = outcome.user_register {
            ctx.device
                .set_double(&ctx.nodes.user_register(write.index), write.value)?;
        }
        UploadSession::new(ctx.config.compile_timeout()).run(&mut ctx, &outcome.program, &self.stop)?;
        self.program_pending = false;
        self.last_program = Some(outcome.program);
        // The upload cleared the waveform memory.
        self.tracker.mark_loaded_changed();
        Ok(())
    }

    fn write_memory(&mut self) -> Result<usize> {
        let settings = &self.settings;
        write_waveforms(
            &mut self.io.context(),
            &mut self.tracker,
            self.device_traits,
            |channel| settings.channel_scale(channel),
        )
    }
}
