// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use indexmap::IndexMap;

use crate::region::Region;
use crate::{Error, Result};

/// Marker for a slot that has not been filled since the template was created.
pub const PLACEHOLDER: &str = "&";

/// Named fragments of the sequencer program, in program order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    WaveformDeclaration,
    WhileLoopStart,
    WaitForInitialTrigger,
    SynchroniseToBeatingFrequency,
    StartTriggerPulse,
    Playwave,
    Waitwave,
    DelayBeforeEndTrigger,
    EndTriggerPulse,
    DelayBeforeLoopEnd,
    WaitForTriggerToRepeat,
    WhileLoopEnd,
    Timestamp,
}

impl Slot {
    pub const ALL: [Slot; 13] = [
        Slot::WaveformDeclaration,
        Slot::WhileLoopStart,
        Slot::WaitForInitialTrigger,
        Slot::SynchroniseToBeatingFrequency,
        Slot::StartTriggerPulse,
        Slot::Playwave,
        Slot::Waitwave,
        Slot::DelayBeforeEndTrigger,
        Slot::EndTriggerPulse,
        Slot::DelayBeforeLoopEnd,
        Slot::WaitForTriggerToRepeat,
        Slot::WhileLoopEnd,
        Slot::Timestamp,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Slot::WaveformDeclaration => "WAVEFORM_DECLARATION",
            Slot::WhileLoopStart => "WHILE_LOOP_START",
            Slot::WaitForInitialTrigger => "WAIT_FOR_INITIAL_TRIGGER",
            Slot::SynchroniseToBeatingFrequency => "SYNCHRONISE_TO_BEATING_FREQUENCY",
            Slot::StartTriggerPulse => "START_TRIGGER_PULSE",
            Slot::Playwave => "PLAYWAVE",
            Slot::Waitwave => "WAITWAVE",
            Slot::DelayBeforeEndTrigger => "DELAY_BEFORE_END_TRIGGER",
            Slot::EndTriggerPulse => "END_TRIGGER_PULSE",
            Slot::DelayBeforeLoopEnd => "DELAY_BEFORE_LOOP_END",
            Slot::WaitForTriggerToRepeat => "WAIT_FOR_TRIGGER_TO_REPEAT",
            Slot::WhileLoopEnd => "WHILE_LOOP_END",
            Slot::Timestamp => "TIMESTAMP",
        }
    }

    /// The region owning this slot. The timestamp is rewritten on every synthesis.
    pub fn region(&self) -> Option<Region> {
        match self {
            Slot::WaveformDeclaration | Slot::Playwave | Slot::Waitwave => Some(Region::Playback),
            Slot::WhileLoopStart | Slot::WhileLoopEnd => Some(Region::Loop),
            Slot::WaitForInitialTrigger
            | Slot::DelayBeforeLoopEnd
            | Slot::WaitForTriggerToRepeat => Some(Region::Repetition),
            Slot::SynchroniseToBeatingFrequency => Some(Region::Synchronisation),
            Slot::StartTriggerPulse | Slot::EndTriggerPulse => Some(Region::TriggerOutput),
            Slot::DelayBeforeEndTrigger => Some(Region::TriggerOutDelay),
            Slot::Timestamp => None,
        }
    }
}

/// The thirteen program slots and their current text. Slots keep their text
/// across syntheses until their region is regenerated.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramTemplate {
    slots: IndexMap<Slot, String>,
}

impl Default for ProgramTemplate {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramTemplate {
    pub fn new() -> Self {
        Self {
            slots: Slot::ALL
                .iter()
                .map(|slot| (*slot, PLACEHOLDER.to_string()))
                .collect(),
        }
    }

    pub fn get(&self, slot: Slot) -> &str {
        self.slots.get(&slot).map(String::as_str).unwrap_or(PLACEHOLDER)
    }

    pub fn set<S: Into<String>>(&mut self, slot: Slot, text: S) {
        self.slots.insert(slot, text.into());
    }

    /// Put the placeholder back into every slot owned by `region`, so that a
    /// slot its generator skips is caught by [`Self::render`].
    pub fn invalidate(&mut self, region: Region) {
        for (slot, text) in self.slots.iter_mut() {
            if slot.region() == Some(region) {
                *text = PLACEHOLDER.to_string();
            }
        }
    }

    /// Concatenate the slots in program order.
    ///
    /// Fails if the placeholder still occurs anywhere in the result, which
    /// means some slot was never filled.
    pub fn render(&self) -> Result<String> {
        let program: String = self.slots.values().map(String::as_str).collect();
        if program.contains(PLACEHOLDER) {
            let slots = self
                .slots
                .iter()
                .filter(|(_, text)| text.contains(PLACEHOLDER))
                .map(|(slot, _)| slot.name())
                .collect();
            return Err(Error::LeftoverPlaceholder {
                placeholder: PLACEHOLDER,
                slots,
                program,
            });
        }
        Ok(program)
    }
}
