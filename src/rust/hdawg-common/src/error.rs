// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A mode switch received a value outside its option list.
    #[error("Unknown option '{value}' for '{setting}'. There is likely an error in the instrument definition.")]
    UnknownOption { setting: &'static str, value: String },

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
