//! Song-level data model: the master tempo track and the live playback
//! state carried across callbacks. The render loop itself (which needs
//! track playback and the MIDI merger) lives in `cbx-engine::songplayback`;
//! this module only owns the data the spec assigns to `MasterTrack` and
//! `SongPlayback`.

use crate::time::{TempoMap, TempoMapItem};

/// Ordered list of tempo-map items; derives a [`TempoMap`] on demand.
#[derive(Debug, Clone, Default)]
pub struct MasterTrack {
    items: Vec<TempoMapItem>,
}

impl MasterTrack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: TempoMapItem) {
        self.items.push(item);
    }

    pub fn items(&self) -> &[TempoMapItem] {
        &self.items
    }

    pub fn build_tempo_map(&self, sample_rate: u32) -> TempoMap {
        TempoMap::new(&self.items, sample_rate)
    }
}

/// Playback state ∈ {stop, rolling}, per spec §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stop,
    Rolling,
}

impl Default for PlaybackState {
    fn default() -> Self {
        PlaybackState::Stop
    }
}

/// Live position/loop state for a song playback snapshot. The
/// `TempoMap` and per-track `TrackPlayback`s this snapshot owns live in
/// `cbx-engine::songplayback::SongPlayback`, which embeds this struct.
#[derive(Debug, Clone)]
pub struct SongPosition {
    pub state: PlaybackState,
    pub song_pos_samples: u64,
    pub song_pos_ppqn: u64,
    /// Floor below which events are suppressed, preventing re-triggering an
    /// event exactly at a seek boundary.
    pub min_time_ppqn: u64,
    pub loop_start_ppqn: u64,
    pub loop_end_ppqn: u64,
}

impl Default for SongPosition {
    fn default() -> Self {
        Self {
            state: PlaybackState::Stop,
            song_pos_samples: 0,
            song_pos_ppqn: 0,
            min_time_ppqn: 0,
            loop_start_ppqn: 0,
            loop_end_ppqn: 0,
        }
    }
}

impl SongPosition {
    /// Whether looping is enabled, per spec: `loop_start < loop_end`.
    pub fn loop_enabled(&self) -> bool {
        self.loop_start_ppqn < self.loop_end_ppqn
    }
}
