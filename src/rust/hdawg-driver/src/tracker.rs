// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Per-channel waveform and marker state, diffed on every commit to decide
//! which program regions are stale and which channels need a memory write.

use seqc_program::{ChannelLayout, PlaybackLayout, Region, RegionSet, Samples};

use crate::{Error, Result};

pub const MARKERS_PER_CHANNEL: usize = 2;

/// One marker output of a channel, in samples. A non-positive duration disables it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkerConfig {
    pub start: i64,
    pub duration: i64,
}

impl MarkerConfig {
    pub fn is_active(&self) -> bool {
        self.duration > 0
    }

    /// Whether the marker is high at `sample`, i.e. `sample` is in `[start, start + duration)`.
    pub fn is_high(&self, sample: usize) -> bool {
        let sample = sample as i64;
        self.is_active() && sample >= self.start && sample < self.start + self.duration
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelState {
    waveform: Vec<f64>,
    /// Waveform memory of this channel is out of date.
    changed: bool,
    markers: [MarkerConfig; MARKERS_PER_CHANNEL],
}

impl ChannelState {
    pub fn waveform(&self) -> &[f64] {
        &self.waveform
    }

    pub fn is_loaded(&self) -> bool {
        !self.waveform.is_empty()
    }

    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn markers(&self) -> &[MarkerConfig; MARKERS_PER_CHANNEL] {
        &self.markers
    }

    pub fn has_markers(&self) -> bool {
        self.markers.iter().any(MarkerConfig::is_active)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaveformTracker {
    channels: Vec<ChannelState>,
    buffer_length: Samples,
    highest_active_channel: usize,
    any_markers: bool,
}

impl WaveformTracker {
    pub fn new(channels: usize) -> Self {
        Self {
            channels: vec![ChannelState::default(); channels],
            buffer_length: 0,
            highest_active_channel: 0,
            any_markers: false,
        }
    }

    pub fn channels(&self) -> &[ChannelState] {
        &self.channels
    }

    pub fn channel(&self, channel: usize) -> Option<&ChannelState> {
        self.channels.get(channel)
    }

    pub fn buffer_length(&self) -> Samples {
        self.buffer_length
    }

    /// 1-based index of the last loaded channel, 0 if no channel is loaded.
    pub fn highest_active_channel(&self) -> usize {
        self.highest_active_channel
    }

    pub fn any_markers(&self) -> bool {
        self.any_markers
    }

    /// Take the waveforms intended for this cycle, one per channel.
    ///
    /// Missing trailing entries count as empty. Returns the regions that must
    /// be regenerated: only a changed buffer length or a channel becoming
    /// empty or non-empty touches the declarations.
    pub fn commit(&mut self, waveforms: Vec<Vec<f64>>) -> RegionSet {
        let mut dirty = RegionSet::empty();
        let mut waveforms = waveforms.into_iter();
        for state in self.channels.iter_mut() {
            let waveform = waveforms.next().unwrap_or_default();
            if waveform == state.waveform {
                continue;
            }
            if waveform.is_empty() {
                // Nothing left to write, only the declaration goes away.
                state.waveform.clear();
                dirty.insert(Region::Playback);
            } else {
                if state.waveform.is_empty() {
                    dirty.insert(Region::Playback);
                }
                state.waveform = waveform;
                state.changed = true;
            }
        }
        self.highest_active_channel = self
            .channels
            .iter()
            .rposition(ChannelState::is_loaded)
            .map_or(0, |index| index + 1);
        let buffer_length = self
            .channels
            .iter()
            .map(|state| state.waveform.len() as Samples)
            .max()
            .unwrap_or(0);
        if buffer_length != self.buffer_length {
            self.buffer_length = buffer_length;
            dirty.insert(Region::Playback);
        }
        hdawg_log::diagnostic!(
            "Waveform commit: buffer length {}, highest active channel {}, dirty {:?}",
            self.buffer_length,
            self.highest_active_channel,
            dirty
        );
        dirty
    }

    /// Set start and duration, in samples, of one marker of a channel.
    ///
    /// The range is not checked against the buffer, which may still be resized
    /// before the next write.
    pub fn configure_marker(
        &mut self,
        channel: usize,
        marker: usize,
        start: i64,
        duration: i64,
    ) -> RegionSet {
        let mut dirty = RegionSet::empty();
        let config = MarkerConfig { start, duration };
        let Some(state) = self.channels.get_mut(channel) else {
            hdawg_log::warn!("Ignoring marker of non-existent channel {}", channel);
            return dirty;
        };
        let Some(slot) = state.markers.get_mut(marker) else {
            hdawg_log::warn!("Ignoring non-existent marker {} of channel {}", marker, channel);
            return dirty;
        };
        if *slot != config {
            *slot = config;
            state.changed = true;
        }
        let any_markers = self.channels.iter().any(ChannelState::has_markers);
        if any_markers != self.any_markers {
            self.any_markers = any_markers;
            dirty.insert(Region::Playback);
        }
        dirty
    }

    /// Flag every loaded channel for a memory write. Recompiling clears the waveform memory.
    pub fn mark_loaded_changed(&mut self) {
        for state in self.channels.iter_mut().filter(|state| state.is_loaded()) {
            state.changed = true;
        }
    }

    pub fn clear_changed(&mut self, channel: usize) {
        if let Some(state) = self.channels.get_mut(channel) {
            state.changed = false;
        }
    }

    /// Whether any declared channel waits for a memory write.
    pub fn has_pending_writes(&self) -> bool {
        self.channels[..self.highest_active_channel]
            .iter()
            .any(ChannelState::changed)
    }

    pub fn layout(&self) -> PlaybackLayout {
        PlaybackLayout {
            buffer_length: self.buffer_length,
            highest_active_channel: self.highest_active_channel,
            channels: self
                .channels
                .iter()
                .map(|state| ChannelLayout {
                    loaded: state.is_loaded(),
                    has_markers: state.has_markers(),
                })
                .collect(),
        }
    }
}

/// Build a waveform from a blueprint `[gap, primitive, gap, primitive, ...]`.
///
/// Each pair inserts `gap` zero samples followed by the samples of the
/// 0-based `primitive`.
pub fn assemble_blueprint<F>(blueprint: &[f64], mut primitive: F) -> Result<Vec<f64>>
where
    F: FnMut(usize) -> Option<Vec<f64>>,
{
    if !blueprint.len().is_multiple_of(2) {
        return Err(Error::Configuration(format!(
            "A waveform blueprint must hold pairs of gap and primitive, got {} entries.",
            blueprint.len()
        )));
    }
    let as_index = |value: f64, what: &str| {
        if value >= 0.0 && value.fract() == 0.0 {
            Ok(value as usize)
        } else {
            Err(Error::Configuration(format!(
                "Invalid {what} '{value}' in waveform blueprint."
            )))
        }
    };
    let mut waveform = Vec::new();
    for entry in blueprint.chunks_exact(2) {
        let gap = as_index(entry[0], "gap")?;
        let id = as_index(entry[1], "primitive")?;
        let samples = primitive(id).ok_or_else(|| {
            Error::Configuration(format!(
                "Waveform primitive {} referenced by a blueprint does not exist.",
                id + 1
            ))
        })?;
        waveform.resize(waveform.len() + gap, 0.0);
        waveform.extend(samples);
    }
    Ok(waveform)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn playback() -> RegionSet {
        RegionSet::from([Region::Playback])
    }

    #[test]
    fn test_empty_commit() {
        let mut tracker = WaveformTracker::new(2);
        let dirty = tracker.commit(vec![vec![], vec![]]);
        assert!(dirty.is_empty());
        assert_eq!(tracker.highest_active_channel(), 0);
        assert_eq!(tracker.buffer_length(), 0);
        assert!(!tracker.has_pending_writes());
    }

    #[test]
    fn test_addition_content_change_and_removal() {
        let mut tracker = WaveformTracker::new(2);
        let dirty = tracker.commit(vec![vec![0.1, 0.2, 0.3], vec![]]);
        assert_eq!(dirty, playback());
        assert_eq!(tracker.highest_active_channel(), 1);
        assert_eq!(tracker.buffer_length(), 3);
        assert!(tracker.channel(0).unwrap().changed());

        tracker.clear_changed(0);
        // Same length, new content: memory write only.
        let dirty = tracker.commit(vec![vec![0.3, 0.2, 0.1], vec![]]);
        assert!(dirty.is_empty());
        assert!(tracker.channel(0).unwrap().changed());

        tracker.clear_changed(0);
        let dirty = tracker.commit(vec![vec![], vec![]]);
        assert_eq!(dirty, playback());
        assert!(!tracker.channel(0).unwrap().changed());
        assert_eq!(tracker.buffer_length(), 0);
    }

    #[test]
    fn test_unchanged_commit_is_clean() {
        let mut tracker = WaveformTracker::new(3);
        tracker.commit(vec![vec![0.0; 4], vec![], vec![1.0; 2]]);
        assert_eq!(tracker.highest_active_channel(), 3);
        for channel in 0..3 {
            tracker.clear_changed(channel);
        }
        assert!(tracker.commit(vec![vec![0.0; 4], vec![], vec![1.0; 2]]).is_empty());
        assert!(!tracker.has_pending_writes());
    }

    #[test]
    fn test_buffer_length_change() {
        let mut tracker = WaveformTracker::new(2);
        tracker.commit(vec![vec![0.0; 4], vec![0.5; 2]]);
        let dirty = tracker.commit(vec![vec![0.0; 4], vec![0.5; 8]]);
        assert_eq!(dirty, playback());
        assert_eq!(tracker.buffer_length(), 8);
    }

    #[test]
    fn test_marker_flips_playback_only_on_global_transition() {
        let mut tracker = WaveformTracker::new(2);
        tracker.commit(vec![vec![0.0; 8], vec![0.0; 8]]);
        tracker.clear_changed(0);
        tracker.clear_changed(1);

        assert_eq!(tracker.configure_marker(0, 0, 2, 3), playback());
        assert!(tracker.any_markers());
        assert!(tracker.channel(0).unwrap().changed());
        assert!(!tracker.channel(1).unwrap().changed());

        // Still some markers present.
        assert!(tracker.configure_marker(1, 1, 0, 1).is_empty());
        assert!(tracker.configure_marker(0, 0, 4, 3).is_empty());
        assert!(tracker.configure_marker(0, 0, 0, 0).is_empty());

        assert_eq!(tracker.configure_marker(1, 1, 0, 0), playback());
        assert!(!tracker.any_markers());
    }

    #[test]
    fn test_unchanged_marker_keeps_flag() {
        let mut tracker = WaveformTracker::new(1);
        tracker.configure_marker(0, 1, 1, 1);
        tracker.clear_changed(0);
        tracker.configure_marker(0, 1, 1, 1);
        assert!(!tracker.channel(0).unwrap().changed());
        assert!(tracker.configure_marker(4, 0, 1, 1).is_empty());
    }

    #[test]
    fn test_mark_loaded_changed() {
        let mut tracker = WaveformTracker::new(3);
        tracker.commit(vec![vec![1.0], vec![], vec![1.0]]);
        for channel in 0..3 {
            tracker.clear_changed(channel);
        }
        tracker.mark_loaded_changed();
        let changed: Vec<bool> = tracker.channels().iter().map(ChannelState::changed).collect();
        assert_eq!(changed, vec![true, false, true]);
    }

    #[test]
    fn test_layout() {
        let mut tracker = WaveformTracker::new(2);
        tracker.commit(vec![vec![0.1, 0.2, 0.3], vec![]]);
        tracker.configure_marker(1, 0, 0, 1);
        let layout = tracker.layout();
        assert_eq!(layout.buffer_length, 3);
        assert_eq!(layout.highest_active_channel, 1);
        assert_eq!(
            layout.channels,
            vec![
                ChannelLayout {
                    loaded: true,
                    has_markers: false
                },
                ChannelLayout {
                    loaded: false,
                    has_markers: true
                }
            ]
        );
    }

    #[test]
    fn test_marker_is_high() {
        let marker = MarkerConfig {
            start: 2,
            duration: 3,
        };
        let track: Vec<bool> = (0..6).map(|s| marker.is_high(s)).collect();
        assert_eq!(track, vec![false, false, true, true, true, false]);
        assert!(!MarkerConfig { start: 0, duration: 0 }.is_high(0));
    }

    #[test]
    fn test_assemble_blueprint() {
        let primitives = [vec![0.313, 0.13, 0.313, 0.13], vec![3.13, 31.3, 0.0, 0.0, 0.3]];
        let waveform =
            assemble_blueprint(&[3.0, 0.0, 2.0, 1.0], |id| primitives.get(id).cloned()).unwrap();
        assert_eq!(
            waveform,
            vec![
                0.0, 0.0, 0.0, 0.313, 0.13, 0.313, 0.13, 0.0, 0.0, 3.13, 31.3, 0.0, 0.0, 0.3
            ]
        );
        assert!(assemble_blueprint(&[], |_| None).unwrap().is_empty());
    }

    #[test]
    fn test_assemble_blueprint_errors() {
        assert!(matches!(
            assemble_blueprint(&[1.0], |_| Some(vec![])),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            assemble_blueprint(&[1.0, 5.0], |_| None),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            assemble_blueprint(&[-1.0, 0.0], |_| Some(vec![])),
            Err(Error::Configuration(_))
        ));
    }

    fn waveform_strategy() -> impl Strategy<Value = Vec<f64>> {
        prop_oneof![
            Just(vec![]),
            prop::collection::vec(-1.0f64..1.0, 1..6),
        ]
    }

    proptest! {
        #[test]
        fn test_highest_active_channel(
            cycles in prop::collection::vec(prop::collection::vec(waveform_strategy(), 4), 1..6)
        ) {
            let mut tracker = WaveformTracker::new(4);
            for waveforms in cycles {
                let expected = waveforms
                    .iter()
                    .rposition(|w| !w.is_empty())
                    .map_or(0, |i| i + 1);
                tracker.commit(waveforms);
                prop_assert_eq!(tracker.highest_active_channel(), expected);
            }
        }

        #[test]
        fn test_playback_dirty_iff_layout_changed(
            cycles in prop::collection::vec(prop::collection::vec(waveform_strategy(), 3), 1..6)
        ) {
            let mut tracker = WaveformTracker::new(3);
            for waveforms in cycles {
                let before: Vec<bool> = tracker.channels().iter().map(ChannelState::is_loaded).collect();
                let previous_length = tracker.buffer_length();
                let dirty = tracker.commit(waveforms);
                let after: Vec<bool> = tracker.channels().iter().map(ChannelState::is_loaded).collect();
                let expected = before != after || previous_length != tracker.buffer_length();
                prop_assert_eq!(dirty.contains(Region::Playback), expected);
            }
        }
    }
}
