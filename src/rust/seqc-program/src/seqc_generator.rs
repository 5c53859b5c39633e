// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use crate::Samples;
use crate::seqc_statements::{FunctionCall, MARKER_WAVE, SeqCStatement, SeqCVariant, wave_name};

const LOOP_BODY_INDENT: &str = "\t";

fn gen_zero_wave_declaration(
    channel: usize,
    length: Samples,
    with_marker: bool,
    unused: bool,
) -> String {
    let marker = if with_marker {
        format!(" + {MARKER_WAVE}")
    } else {
        String::new()
    };
    let comment = if unused { " // Unused." } else { "" };
    format!(
        "wave {} = zeros({length}){marker};{comment}\n",
        wave_name(channel)
    )
}

fn build_play_wave_arguments(channels: &[usize]) -> String {
    channels
        .iter()
        .map(|&channel| format!("{}, {}", channel + 1, wave_name(channel)))
        .collect::<Vec<String>>()
        .join(", ")
}

/// Collects the statements of one program fragment and renders them as
/// sequencer source text.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SeqCGenerator {
    statements: Vec<SeqCStatement>,
    /// Prefix every code line with a tab, as statements inside the main loop are.
    loop_body: bool,
}

impl SeqCGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A generator for statements placed inside the repetition loop.
    pub fn loop_body() -> Self {
        Self {
            statements: Vec::new(),
            loop_body: true,
        }
    }

    pub fn add_comment<S: Into<String>>(&mut self, comment: S) {
        self.statements.push(SeqCStatement::Comment {
            text: comment.into(),
        });
    }

    pub fn add_blank_line(&mut self) {
        self.statements.push(SeqCStatement::BlankLine);
    }

    pub fn add_marker_declaration(&mut self, length: Samples) {
        self.statements
            .push(SeqCStatement::MarkerDeclaration { length });
    }

    pub fn add_zero_wave_declaration(
        &mut self,
        channel: usize,
        length: Samples,
        with_marker: bool,
        unused: bool,
    ) {
        self.statements.push(SeqCStatement::ZeroWaveDeclaration {
            channel,
            length,
            with_marker,
            unused,
        });
    }

    pub fn add_function_call<S: Into<String>>(&mut self, name: S, args: Vec<SeqCVariant>) {
        self.add_function_calls(vec![FunctionCall {
            name: name.into(),
            args,
        }]);
    }

    /// Emit several calls on one line, separated by a space.
    pub fn add_function_calls(&mut self, calls: Vec<FunctionCall>) {
        self.statements.push(SeqCStatement::FunctionCalls { calls });
    }

    pub fn add_play_wave(&mut self, channels: Vec<usize>) {
        self.statements.push(SeqCStatement::PlayWave { channels });
    }

    pub fn generate_seq_c(&self) -> String {
        self.statements
            .iter()
            .map(|statement| self.emit_statement(statement))
            .collect()
    }

    fn emit_statement(&self, statement: &SeqCStatement) -> String {
        let indent = if self.loop_body { LOOP_BODY_INDENT } else { "" };
        match statement {
            SeqCStatement::Comment { text } => format!("{indent}// {text}\n"),
            SeqCStatement::BlankLine => "\n".to_string(),
            SeqCStatement::MarkerDeclaration { length } => {
                format!("wave {MARKER_WAVE} = marker({length}, 1);\n")
            }
            SeqCStatement::ZeroWaveDeclaration {
                channel,
                length,
                with_marker,
                unused,
            } => gen_zero_wave_declaration(*channel, *length, *with_marker, *unused),
            SeqCStatement::FunctionCalls { calls } => {
                let calls = calls
                    .iter()
                    .map(|call| call.to_string())
                    .collect::<Vec<String>>()
                    .join(" ");
                format!("{indent}{calls}\n")
            }
            SeqCStatement::PlayWave { channels } => {
                format!("{indent}playWave({});\n", build_play_wave_arguments(channels))
            }
        }
    }
}
