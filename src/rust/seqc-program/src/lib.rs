// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

pub mod region;
pub mod seqc_generator;
pub mod seqc_statements;
pub mod synthesizer;
pub mod template;

pub use region::{Region, RegionSet};
pub use synthesizer::{
    ChannelLayout, PlaybackLayout, ProgramSettings, ProgramSynthesizer, SynthesisOutcome,
    TriggerOutDelayClamp, UserRegisterWrite,
};
pub use template::{PLACEHOLDER, ProgramTemplate, Slot};

pub type Samples = u64;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The rendered program still contains a placeholder. Only a synthesis
    /// defect can produce this.
    #[error(
        "The sequencer program has not been generated properly ('{placeholder}' left in {slots:?}). \
        This is an internal error, please report it.\n\nThe generated program was:\n{program}"
    )]
    LeftoverPlaceholder {
        placeholder: &'static str,
        slots: Vec<&'static str>,
        program: String,
    },

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
