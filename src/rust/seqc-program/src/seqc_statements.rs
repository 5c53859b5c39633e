// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use crate::Samples;

/// Name of the shared marker waveform summed into marker-carrying channels.
pub const MARKER_WAVE: &str = "w_m";

// an enum to represent the argument kinds used in the generated program
#[derive(Debug, Clone, PartialEq)]
pub enum SeqCVariant {
    Integer(i64),
    /// Trigger and marker bit patterns, rendered as `0b` literals.
    Bits { value: u8, width: u8 },
    /// An identifier or nested expression, emitted verbatim.
    Expression(String),
}

impl fmt::Display for SeqCVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeqCVariant::Integer(i) => write!(f, "{i}"),
            SeqCVariant::Bits { value, width } => {
                write!(f, "0b{value:0width$b}", width = *width as usize)
            }
            SeqCVariant::Expression(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<SeqCVariant>,
}

impl fmt::Display for FunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args = self
            .args
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<String>>()
            .join(", ");
        write!(f, "{}({});", self.name, args)
    }
}

/// Name of the waveform variable bound to a 0-based channel index.
pub fn wave_name(channel: usize) -> String {
    format!("w{}", channel + 1)
}

#[derive(Debug, Clone, PartialEq)]
pub enum SeqCStatement {
    Comment {
        text: String,
    },
    BlankLine,
    MarkerDeclaration {
        length: Samples,
    },
    ZeroWaveDeclaration {
        channel: usize,
        length: Samples,
        with_marker: bool,
        unused: bool,
    },
    /// One or more calls sharing a single line.
    FunctionCalls {
        calls: Vec<FunctionCall>,
    },
    PlayWave {
        channels: Vec<usize>,
    },
}
