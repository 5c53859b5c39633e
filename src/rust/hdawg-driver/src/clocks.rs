// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Clock, oscillator and channel grouping changes that need confirmation from the device.

use hdawg_common::device_traits::DeviceTraits;
use hdawg_common::types::ReferenceClock;

use crate::context::DeviceContext;
use crate::device::{BEAT_OSCILLATOR, GROUPING_1X8, GROUPING_4X2};
use crate::{Error, Result};

const SAMPLE_CLOCK_READY: i64 = 0;
const SAMPLE_CLOCK_FAILED: i64 = 1;

/// Oscillator features need the 4x2 grouping. Otherwise 1x8 is used, written
/// only when the device is not already there.
pub fn set_channel_grouping(ctx: &mut DeviceContext<'_>, oscillators_in_use: bool) -> Result<()> {
    let path = ctx.nodes.channel_grouping();
    if oscillators_in_use {
        ctx.device.set_int(&path, GROUPING_4X2)?;
    } else if ctx.device.get_int(&path)? != GROUPING_1X8 {
        ctx.device.set_int(&path, GROUPING_1X8)?;
    }
    Ok(())
}

/// Program the beat oscillator to `|frequency| / d` for the first divisor
/// `d` the oscillator accepts exactly, and return the frequency in use.
///
/// When no divisor works the previous frequency is restored.
pub fn program_beat_oscillator(
    ctx: &mut DeviceContext<'_>,
    frequency: f64,
    traits: &DeviceTraits,
) -> Result<f64> {
    let path = ctx.nodes.oscillator_frequency(BEAT_OSCILLATOR);
    let previous = ctx.device.get_double(&path)?;
    for divisor in traits.beat_oscillator_divisors {
        let divided = frequency.abs() / f64::from(*divisor);
        if divided >= traits.max_beat_oscillator_frequency {
            continue;
        }
        ctx.device.set_double(&path, divided)?;
        ctx.device.sync()?;
        if ctx.device.get_double(&path)? == divided {
            hdawg_log::debug!("Beat oscillator at {} Hz (divisor {})", divided, divisor);
            return Ok(divided);
        }
    }
    ctx.device.set_double(&path, previous)?;
    Err(Error::ClockChange(format!(
        "Could not set the beat frequency to {frequency} Hz: no divided frequency is \
        representable by the oscillator."
    )))
}

/// Change the sample clock and wait until the device reports it locked.
pub fn change_sample_clock(ctx: &mut DeviceContext<'_>, rate: f64) -> Result<()> {
    ctx.device
        .set_double(&ctx.nodes.sample_clock_frequency(), rate)?;
    let poll = ctx.config.clock_change_poll();
    let mut remaining = ctx.config.clock_change_budget();
    ctx.sleeper.sleep(poll);
    loop {
        match ctx.device.get_int(&ctx.nodes.sample_clock_status())? {
            SAMPLE_CLOCK_READY => return Ok(()),
            SAMPLE_CLOCK_FAILED => {
                return Err(Error::ClockChange(
                    "Failed to set 'Output sample rate' due to some unknown device error."
                        .to_string(),
                ));
            }
            _ => {}
        }
        if remaining.is_zero() {
            return Err(Error::ClockChange(
                "Failed to set 'Output sample rate' due to command timeout.".to_string(),
            ));
        }
        ctx.sleeper.sleep(poll);
        remaining = remaining.saturating_sub(poll);
    }
}

/// Switch the reference clock source and check that the device followed.
///
/// The device falls back to the internal clock when it cannot lock, so a
/// failed change is only detected by reading the source back.
pub fn change_reference_clock(ctx: &mut DeviceContext<'_>, clock: ReferenceClock) -> Result<()> {
    let path = ctx.nodes.reference_clock_source();
    let requested = clock.node_value();
    if ctx.device.get_int(&path)? == requested {
        return Ok(());
    }
    ctx.device.set_int(&path, requested)?;
    ctx.sleeper.sleep(ctx.config.reference_clock_settle());
    if ctx.device.get_int(&path)? == requested {
        return Ok(());
    }
    match clock {
        ReferenceClock::External if ctx.config.halt_on_external_clock_failure => {
            Err(Error::ClockChange(
                "Halted: Could not lock the reference clock to an external signal.".to_string(),
            ))
        }
        ReferenceClock::External => {
            ctx.warn("Warning: Could not lock the reference clock to an external signal.");
            Ok(())
        }
        ReferenceClock::Internal | ReferenceClock::Zsync => {
            ctx.warn("Warning: Could not unlock the reference clock from the external signal.");
            Ok(())
        }
    }
}
