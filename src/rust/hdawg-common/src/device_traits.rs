// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

/// Device specific constants used for sequencer program generation,
/// repetition timing and waveform upload.
#[derive(Debug)]
pub struct DeviceTraits {
    pub max_channels: u16,
    pub channels_per_core: u16,
    /// Divisor between the sample clock and the sequencer operation clock.
    pub sequencer_clock_divisor: u16,
    /// Sequencer cycles needed to fetch a user register before `wait()`.
    pub user_register_fetch_cycles: u16,
    /// Sequencer cycles spent per `setTrigger()` call.
    pub set_trigger_cycles: u16,
    /// Sequencer cycles spent per declared channel in `playWave()`.
    pub play_wave_cycles_per_channel: u16,
    /// Output range when the DAC is bypassed ("direct output").
    pub bypass_output_range: f64,
    /// Largest value representable by a waveform sample word.
    pub full_scale: f64,
    pub max_oscillator_frequency: f64,
    /// Upper limit for the beat oscillator after frequency division.
    pub max_beat_oscillator_frequency: f64,
    pub beat_oscillator_divisors: &'static [u32],
}

impl DeviceTraits {
    /// Sample rate after applying the `2^divisor` rate reduction.
    pub fn sample_rate(&self, base_rate: f64, divisor_exponent: u32) -> f64 {
        base_rate / f64::from(2u32.pow(divisor_exponent))
    }

    pub fn sequencer_clock(&self, sample_rate: f64) -> f64 {
        sample_rate / f64::from(self.sequencer_clock_divisor)
    }

    /// Shortest period the repetition oscillator can represent.
    pub fn min_oscillator_period(&self) -> f64 {
        1.0 / self.max_oscillator_frequency
    }
}

pub const HDAWG_TRAITS: DeviceTraits = DeviceTraits {
    max_channels: 16,
    channels_per_core: 2,
    sequencer_clock_divisor: 8,
    user_register_fetch_cycles: 3,
    set_trigger_cycles: 1,
    play_wave_cycles_per_channel: 2,
    bypass_output_range: 0.8,
    full_scale: 32767.0,
    max_oscillator_frequency: 1.2e9,
    max_beat_oscillator_frequency: 299e6,
    beat_oscillator_divisors: &[2, 4, 8, 16, 32],
};
