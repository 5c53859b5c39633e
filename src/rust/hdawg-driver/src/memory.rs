// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Packing of channel pairs into native waveform words and their transfer
//! into waveform memory.

use std::ops::Range;
use std::time::Duration;

use hdawg_common::device_traits::DeviceTraits;

use crate::config::CrashRecovery;
use crate::context::DeviceContext;
use crate::tracker::{ChannelState, WaveformTracker};
use crate::{Error, Result};

fn to_word(sample: f64, traits: &DeviceTraits) -> u16 {
    ((sample * traits.full_scale) as i16) as u16
}

/// Channels of the AWG core starting at `first`, cut off after the last
/// active channel.
fn pair_members(
    first: usize,
    highest_active_channel: usize,
    traits: &DeviceTraits,
) -> Range<usize> {
    let end = first + usize::from(traits.channels_per_core);
    first..end.min(highest_active_channel)
}

fn scaled_samples(
    state: &ChannelState,
    channel: usize,
    scale: f64,
    buffer_length: usize,
) -> Result<Vec<f64>> {
    let mut samples = Vec::with_capacity(buffer_length);
    for sample in state.waveform() {
        let scaled = sample / scale;
        if scaled.abs() > 1.0 {
            let peak = state
                .waveform()
                .iter()
                .fold(0.0_f64, |peak, sample| peak.max(sample.abs()));
            return Err(Error::ScaleViolation {
                channel: channel + 1,
                peak,
            });
        }
        samples.push(scaled);
    }
    samples.resize(buffer_length, 0.0);
    Ok(samples)
}

/// Marker word at `sample`: bit `2 * slot + marker` is high while that marker is.
fn marker_word(states: &[&ChannelState], sample: usize) -> u16 {
    let mut word = 0;
    for (slot, state) in states.iter().enumerate() {
        for (marker, config) in state.markers().iter().enumerate() {
            if config.is_high(sample) {
                word |= 1 << (2 * slot + marker);
            }
        }
    }
    word
}

/// Native words of the pair starting at channel `first`.
///
/// Samples are divided by the channel's output scale and zero-padded to the
/// buffer length. A marker word follows each sample group when a member of
/// the pair carries markers.
pub fn pack_pair(
    tracker: &WaveformTracker,
    first: usize,
    traits: &DeviceTraits,
    scale: impl Fn(usize) -> f64,
) -> Result<Vec<u16>> {
    let buffer_length = tracker.buffer_length() as usize;
    let mut states = vec![];
    let mut channels = vec![];
    let members = pair_members(first, tracker.highest_active_channel(), traits);
    for (channel, state) in members.filter_map(|c| tracker.channel(c).map(|state| (c, state))) {
        channels.push(scaled_samples(state, channel, scale(channel), buffer_length)?);
        states.push(state);
    }
    let with_markers = states.iter().any(|state| state.has_markers());
    let group = states.len() + usize::from(with_markers);
    let mut words = Vec::with_capacity(buffer_length * group);
    for sample in 0..buffer_length {
        words.extend(channels.iter().map(|samples| to_word(samples[sample], traits)));
        if with_markers {
            words.push(marker_word(&states, sample));
        }
    }
    Ok(words)
}

/// Write every pair with a changed member and clear the changed flags of
/// the pairs written. Returns the number of pairs written.
pub fn write_waveforms(
    ctx: &mut DeviceContext<'_>,
    tracker: &mut WaveformTracker,
    traits: &DeviceTraits,
    scale: impl Fn(usize) -> f64,
) -> Result<usize> {
    let highest = tracker.highest_active_channel();
    let per_core = usize::from(traits.channels_per_core);
    let mut written = 0;
    for first in (0..highest).step_by(per_core) {
        let members = pair_members(first, highest, traits);
        let changed = members
            .clone()
            .any(|channel| tracker.channel(channel).is_some_and(ChannelState::changed));
        if !changed {
            continue;
        }
        let words = pack_pair(tracker, first, traits, &scale)?;
        let path = ctx.nodes.waveform(first / per_core);
        write_vector(ctx, &path, &words)?;
        ctx.device.set_int(&ctx.nodes.awg_enable(), 1)?;
        for channel in members {
            tracker.clear_changed(channel);
        }
        hdawg_log::debug!("Wrote {} words to {}", words.len(), path);
        written += 1;
    }
    Ok(written)
}

/// Write with the configured retries, then apply the crash recovery policy.
fn write_vector(ctx: &mut DeviceContext<'_>, path: &str, words: &[u16]) -> Result<()> {
    let attempts = ctx.config.vector_write_attempts.max(1);
    for attempt in 1..=attempts {
        match ctx.device.set_vector(path, words) {
            Ok(()) => return Ok(()),
            Err(err) => {
                ctx.warn(&format!(
                    "Waveform upload to {path} failed (attempt {attempt} of {attempts}): {err}"
                ));
                if attempt < attempts {
                    ctx.sleeper.sleep(ctx.config.vector_write_backoff());
                }
            }
        }
    }
    let nodes = ctx.nodes;
    let crashed = || Error::DeviceCrashed {
        device: nodes.device().to_string(),
    };
    match ctx.config.crash_recovery {
        CrashRecovery::Fail => Err(crashed()),
        CrashRecovery::Reconnect { wait_s } => {
            let wait = Duration::try_from_secs_f64(wait_s).map_err(|_| {
                Error::Configuration(format!("Invalid crash recovery wait of {wait_s} s."))
            })?;
            ctx.warn(&format!(
                "The device does not respond. Reconnecting in {wait_s} s."
            ));
            ctx.sleeper.sleep(wait);
            ctx.device.reconnect()?;
            ctx.device.set_vector(path, words).map_err(|_| crashed())
        }
    }
}
