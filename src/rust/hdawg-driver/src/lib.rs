// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

pub mod clocks;
pub mod config;
pub mod context;
pub mod device;
pub mod feasibility;
pub mod memory;
pub mod session;
pub mod settings;
pub mod sleep;
pub mod store;
#[cfg(test)]
mod testing;
pub mod tracker;
pub mod upload;

use std::time::Duration;

pub use config::{CacheOverflowPolicy, CrashRecovery, DriverConfig, SanitizationChange};
pub use device::{DeviceApi, DeviceError, Nodes};
pub use session::{AwgSession, CommitReport};
pub use settings::{Setting, SequencerSettings};
pub use store::{ParameterStore, Severity, Value};
pub use upload::{UploadSession, UploadStage};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A mode switch or setting received a value it cannot represent.
    #[error("{0}")]
    Configuration(String),

    #[error(
        "Instrument halted: the sequencer program requires more time to play than the \
        requested internal repetition rate. With the current settings, the requested trigger \
        period must be increased to {minimum_period} s minimum. Should the settings change, \
        this minimum value may increase."
    )]
    RepetitionRateInfeasible { minimum_period: f64 },

    #[error("The {stage} process timed out after {elapsed:?}.")]
    Timeout { stage: UploadStage, elapsed: Duration },

    #[error("The measurement was halted unexpectedly.")]
    Stopped,

    #[error("Compilation failed: {0}")]
    CompilerFailed(String),

    #[error("Upload to the instrument failed at {:.2}%.", .progress * 100.0)]
    UploadFailed { progress: f64 },

    #[error("Unknown upload status {status} reported by instrument at {:.2}%.", .progress * 100.0)]
    UnknownUploadStatus { status: i64, progress: f64 },

    #[error(
        "Halted. The HDAWG was tasked to play a value on channel {channel} larger than the \
        channel's range. The absolute value of the maximum was {peak} V."
    )]
    ScaleViolation { channel: usize, peak: f64 },

    #[error(
        "The sequencer ran out of cache space ({:.2}%). Disable 'Halt on cache overflow' \
        or reduce waveform lengths to continue.", .utilisation * 100.0
    )]
    CacheOverflow { utilisation: f64 },

    #[error(
        "HDAWG '{device}' has crashed; the device does not respond to any calls from the PC. \
        Consider restarting the device using the front button."
    )]
    DeviceCrashed { device: String },

    #[error("{0}")]
    ClockChange(String),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Program(#[from] seqc_program::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl From<hdawg_common::Error> for Error {
    fn from(err: hdawg_common::Error) -> Self {
        match err {
            hdawg_common::Error::UnknownOption { .. } => Error::Configuration(err.to_string()),
            hdawg_common::Error::Anyhow(err) => Error::Anyhow(err),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
