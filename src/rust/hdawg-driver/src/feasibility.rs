// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Whether a requested internal repetition period leaves room for playback,
//! and how the repetition oscillator is programmed when it times the repetitions.

use hdawg_common::device_traits::DeviceTraits;
use hdawg_common::types::{RepetitionPolicy, TriggerOutput};
use seqc_program::Samples;

use crate::context::DeviceContext;
use crate::device::{BEAT_OSCILLATOR, REPETITION_OSCILLATOR};
use crate::{Error, Result};

/// Inputs of one repetition check. Times in seconds, rates in Sa/s.
#[derive(Debug, Clone, PartialEq)]
pub struct RepetitionRequest {
    pub requested_period: f64,
    pub trigger_output: TriggerOutput,
    pub sample_rate: f64,
    pub buffer_length: Samples,
    pub highest_active_channel: usize,
    pub trigger_out_delay: f64,
    pub trigger_out_delay_calibration: f64,
    pub internal_period_calibration: f64,
}

/// Outcome of a repetition check that did not halt.
#[derive(Debug, Clone, PartialEq)]
pub struct RepetitionCheck {
    /// Time left for the delay before the loop end. Negative when the period is too short.
    pub verified_delay: f64,
    /// New period to report back when the policy relaxed the request.
    pub relaxed_period: Option<f64>,
    /// The period is too short and was kept anyway.
    pub ignored_violation: bool,
}

/// Sequencer cycles spent waiting for the trigger-out delay before the finish pulse.
pub fn trigger_out_wait_cycles(request: &RepetitionRequest, traits: &DeviceTraits) -> u64 {
    if request.trigger_out_delay <= 0.0 || !request.trigger_output.emits_finish_pulse() {
        return 0;
    }
    let clock = traits.sequencer_clock(request.sample_rate);
    let cycles =
        ((request.trigger_out_delay - request.trigger_out_delay_calibration) * clock).round();
    cycles.max(0.0) as u64
}

/// Time left for the inter-repetition delay once the auxiliary code and playback are accounted for.
pub fn verified_delay(request: &RepetitionRequest, traits: &DeviceTraits) -> f64 {
    let clock = traits.sequencer_clock(request.sample_rate);
    let auxiliary_cycles = trigger_out_wait_cycles(request, traits)
        + u64::from(request.trigger_output.overhead_cycles(traits));
    let auxiliary_time = auxiliary_cycles as f64 / clock;
    let play_time = request.buffer_length as f64 / request.sample_rate
        + f64::from(traits.play_wave_cycles_per_channel) * request.highest_active_channel as f64
            / clock;
    request.requested_period - auxiliary_time - play_time - request.internal_period_calibration
}

/// Check the request and apply `policy` when the period is too short.
pub fn check_repetition(
    request: &RepetitionRequest,
    policy: RepetitionPolicy,
    traits: &DeviceTraits,
) -> Result<RepetitionCheck> {
    let verified_delay = verified_delay(request, traits);
    hdawg_log::diagnostic!(
        "Repetition check: requested {} s, verified delay {} s",
        request.requested_period,
        verified_delay
    );
    if verified_delay >= 0.0 {
        return Ok(RepetitionCheck {
            verified_delay,
            relaxed_period: None,
            ignored_violation: false,
        });
    }
    let minimum_period = request.requested_period - verified_delay;
    match policy {
        RepetitionPolicy::Halt => Err(Error::RepetitionRateInfeasible { minimum_period }),
        RepetitionPolicy::Relax => Ok(RepetitionCheck {
            // The relaxed period leaves exactly no time for the delay.
            verified_delay: 0.0,
            relaxed_period: Some(minimum_period),
            ignored_violation: false,
        }),
        RepetitionPolicy::Warn => Ok(RepetitionCheck {
            verified_delay,
            relaxed_period: None,
            ignored_violation: true,
        }),
    }
}

/// Keep the period representable by the oscillator, preserving its sign.
pub fn clamp_oscillator_period(period: f64, traits: &DeviceTraits) -> f64 {
    let min_period = traits.min_oscillator_period();
    if period >= 0.0 {
        period.max(min_period)
    } else {
        period.min(-min_period)
    }
}

/// Snap `period` to a whole multiple of the beat period.
///
/// Periods longer than one beat go to the nearest multiple, shorter ones to
/// exactly one beat. A zero beat frequency leaves the period untouched.
pub fn quantize_to_beat(period: f64, beat_frequency: f64) -> f64 {
    if beat_frequency == 0.0 {
        return period;
    }
    let beat_period = (1.0 / beat_frequency).abs();
    if period % beat_period == 0.0 {
        return period;
    }
    if period > beat_period {
        (period / beat_period).round() * beat_period
    } else {
        beat_period
    }
}

/// Program the repetition oscillator for `period` and return the period it actually runs at.
///
/// With `align_to_beat` the period is first quantized to the beat oscillator.
/// The frequency read back after a sync is authoritative, as the oscillator
/// resolution rarely hits the requested value exactly.
pub fn program_repetition_oscillator(
    ctx: &mut DeviceContext<'_>,
    period: f64,
    align_to_beat: bool,
    traits: &DeviceTraits,
) -> Result<f64> {
    let mut period = clamp_oscillator_period(period, traits);
    if align_to_beat {
        let beat_frequency = ctx
            .device
            .get_double(&ctx.nodes.oscillator_frequency(BEAT_OSCILLATOR))?;
        period = quantize_to_beat(period, beat_frequency);
    }
    let path = ctx.nodes.oscillator_frequency(REPETITION_OSCILLATOR);
    ctx.device.set_double(&path, (1.0 / period).abs())?;
    ctx.device.sync()?;
    let frequency = ctx.device.get_double(&path)?;
    if frequency == 0.0 {
        return Err(Error::ClockChange(
            "The repetition oscillator reads back a frequency of 0 Hz.".to_string(),
        ));
    }
    let effective = 1.0 / frequency;
    hdawg_log::diagnostic!(
        "Repetition oscillator: requested period {} s, effective {} s",
        period,
        effective
    );
    Ok(effective)
}
