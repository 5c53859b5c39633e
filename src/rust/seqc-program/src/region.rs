// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use bitvec::prelude::*;

pub const REGION_COUNT: usize = 6;

/// Independently regenerated parts of the sequencer program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Region {
    /// Marker and waveform declarations plus playback.
    Playback = 0,
    /// The infinite repetition loop.
    Loop = 1,
    /// How a repetition is started and spaced.
    Repetition = 2,
    /// Alignment to the beat oscillator.
    Synchronisation = 3,
    /// Trigger pulses around playback.
    TriggerOutput = 4,
    /// Delay in front of the finishing trigger pulse.
    TriggerOutDelay = 5,
}

impl Region {
    pub const ALL: [Region; REGION_COUNT] = [
        Region::Playback,
        Region::Loop,
        Region::Repetition,
        Region::Synchronisation,
        Region::TriggerOutput,
        Region::TriggerOutDelay,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region {}", self.index())
    }
}

/// Set of regions that need regeneration.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct RegionSet {
    bits: BitArr!(for REGION_COUNT, in u8, Lsb0),
}

impl RegionSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        let mut set = Self::empty();
        set.bits[..REGION_COUNT].fill(true);
        set
    }

    pub fn insert(&mut self, region: Region) {
        self.bits.set(region.index(), true);
    }

    pub fn remove(&mut self, region: Region) {
        self.bits.set(region.index(), false);
    }

    pub fn contains(&self, region: Region) -> bool {
        self.bits[region.index()]
    }

    pub fn extend(&mut self, other: &RegionSet) {
        for index in other.bits[..REGION_COUNT].iter_ones() {
            self.bits.set(index, true);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bits[..REGION_COUNT].not_any()
    }

    pub fn clear(&mut self) {
        self.bits[..REGION_COUNT].fill(false);
    }

    pub fn iter(&self) -> impl Iterator<Item = Region> + '_ {
        self.bits[..REGION_COUNT]
            .iter_ones()
            .filter_map(Region::from_index)
    }
}

impl FromIterator<Region> for RegionSet {
    fn from_iter<I: IntoIterator<Item = Region>>(iter: I) -> Self {
        let mut set = Self::empty();
        for region in iter {
            set.insert(region);
        }
        set
    }
}

impl<const N: usize> From<[Region; N]> for RegionSet {
    fn from(regions: [Region; N]) -> Self {
        regions.into_iter().collect()
    }
}

impl fmt::Debug for RegionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.iter().map(|region| region.index()))
            .finish()
    }
}
