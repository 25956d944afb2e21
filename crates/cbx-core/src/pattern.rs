//! Pattern and track data model (spec §3: `MidiPattern`, `Track`/`TrackItem`)
//! plus the per-track active-notes bitmap used to synthesise note-offs on
//! stop/seek.

use crate::midi::MidiEventData;
use crate::time::PPQN;

/// A single MIDI event inside a pattern, timestamped in PPQN.
#[derive(Debug, Clone)]
pub struct PatternEvent {
    pub time_ppqn: u32,
    pub data: MidiEventData,
}

/// A sorted array of MIDI events plus a loop length.
///
/// Invariant: `events[i].time_ppqn <= events[i+1].time_ppqn` for all `i`.
#[derive(Debug, Clone, Default)]
pub struct MidiPattern {
    events: Vec<PatternEvent>,
    /// Loop length in PPQN; `None` means one-shot (no loop).
    pub loop_end: Option<u32>,
}

impl MidiPattern {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct a pattern already known to be sorted; asserts the
    /// invariant rather than re-sorting, since callers (SFZ/pattern-text
    /// loaders, the metronome constructor) build events in order already.
    pub fn from_sorted_events(events: Vec<PatternEvent>, loop_end: Option<u32>) -> Self {
        debug_assert!(events.windows(2).all(|w| w[0].time_ppqn <= w[1].time_ppqn));
        Self { events, loop_end }
    }

    pub fn push_sorted(&mut self, time_ppqn: u32, data: MidiEventData) {
        debug_assert!(self.events.last().map(|e| e.time_ppqn <= time_ppqn).unwrap_or(true));
        self.events.push(PatternEvent { time_ppqn, data });
    }

    pub fn events(&self) -> &[PatternEvent] {
        &self.events
    }

    /// Index of the first event with `time_ppqn >= from`.
    pub fn seek_index(&self, from: u32) -> usize {
        self.events.partition_point(|e| e.time_ppqn < from)
    }

    /// A canned metronome click pattern: note-on/off pairs at every beat
    /// (PPQN multiples of [`PPQN`]) across `beats_per_bar` beats, with the
    /// note-off one tick after the note-on. This one-tick-long note is an
    /// audible artefact in the original implementation (spec §9 design
    /// notes); it's preserved intentionally, not a bug here.
    pub fn metronome(beats_per_bar: u32) -> Self {
        let mut events = Vec::new();
        for beat in 0..beats_per_bar {
            let t = beat * PPQN;
            events.push(PatternEvent {
                time_ppqn: t,
                data: MidiEventData::new(0, &[0x99, 37, 100]),
            });
            events.push(PatternEvent {
                time_ppqn: t + 1,
                data: MidiEventData::new(0, &[0x89, 37, 0]),
            });
        }
        Self {
            events,
            loop_end: Some(beats_per_bar * PPQN),
        }
    }
}

/// One placement of a pattern on a track's timeline.
#[derive(Debug, Clone)]
pub struct TrackItem {
    /// Pattern to play.
    pub pattern: MidiPattern,
    /// Start time on the track, in PPQN.
    pub start_ppqn: u32,
    /// Offset into the pattern's own PPQN timeline at which playback begins.
    pub pattern_offset_ppqn: u32,
    /// Length of this placement, in PPQN.
    pub length_ppqn: u32,
}

impl TrackItem {
    pub fn end_ppqn(&self) -> u32 {
        self.start_ppqn + self.length_ppqn
    }
}

/// A time-ordered list of pattern placements.
#[derive(Debug, Clone, Default)]
pub struct Track {
    items: Vec<TrackItem>,
}

impl Track {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_item(&mut self, item: TrackItem) {
        self.items.push(item);
        self.items.sort_by_key(|i| i.start_ppqn);
    }

    pub fn items(&self) -> &[TrackItem] {
        &self.items
    }

    /// Resolve overlaps into a `TrackPlayback`: iterate items in ascending
    /// start order and keep a `safe` floor equal to the end of the last kept
    /// item. A later item fully inside `safe` is dropped entirely; one that
    /// starts before `safe` but ends after it is clipped — its start is
    /// pulled forward to `safe` and its pattern offset is advanced by the
    /// same amount, so playback resumes mid-pattern rather than restarting.
    /// Earlier items always win (spec §4.4 / §9 open question, preserved).
    pub fn resolve_playback(&self) -> TrackPlayback {
        let mut kept: Vec<TrackItem> = Vec::new();
        let mut safe: u32 = 0;
        for item in &self.items {
            if item.start_ppqn < safe {
                if item.end_ppqn() <= safe {
                    continue; // fully contained: skip entirely
                }
                let shift = safe - item.start_ppqn;
                let clipped = TrackItem {
                    pattern: item.pattern.clone(),
                    start_ppqn: safe,
                    pattern_offset_ppqn: item.pattern_offset_ppqn + shift,
                    length_ppqn: item.length_ppqn - shift,
                };
                safe = clipped.end_ppqn();
                kept.push(clipped);
            } else {
                safe = item.end_ppqn();
                kept.push(item.clone());
            }
        }
        TrackPlayback { items: kept }
    }
}

/// The overlap-resolved, playback-ready form of a [`Track`].
#[derive(Debug, Clone)]
pub struct TrackPlayback {
    items: Vec<TrackItem>,
}

impl TrackPlayback {
    pub fn items(&self) -> &[TrackItem] {
        &self.items
    }

    /// Index of the item active at or immediately after `ppqn`.
    pub fn item_index_for_ppqn(&self, ppqn: u32) -> usize {
        self.items.partition_point(|i| i.end_ppqn() <= ppqn)
    }
}

/// 16-channel × 128-bit bitmap of notes a track's playback has started and
/// that therefore need a matching note-off synthesised on stop or seek.
#[derive(Debug, Clone)]
pub struct ActiveNotes {
    bits: [u128; 16],
}

impl Default for ActiveNotes {
    fn default() -> Self {
        Self { bits: [0u128; 16] }
    }
}

impl ActiveNotes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, channel: u8, note: u8) {
        self.bits[(channel & 0x0F) as usize] |= 1u128 << (note & 0x7F);
    }

    pub fn clear_note(&mut self, channel: u8, note: u8) {
        self.bits[(channel & 0x0F) as usize] &= !(1u128 << (note & 0x7F));
    }

    pub fn clear_all(&mut self) {
        self.bits = [0u128; 16];
    }

    pub fn is_set(&self, channel: u8, note: u8) -> bool {
        self.bits[(channel & 0x0F) as usize] & (1u128 << (note & 0x7F)) != 0
    }

    /// All (channel, note) pairs currently marked, for release-on-stop.
    pub fn iter_set(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        (0u8..16).flat_map(move |ch| {
            let bits = self.bits[ch as usize];
            (0u8..128).filter(move |&note| bits & (1u128 << note) != 0).map(move |note| (ch, note))
        })
    }

    /// Track an incoming event: note-on sets the bit, note-off (including
    /// velocity-0 note-on) clears it. Poly-aftertouch and other messages are
    /// ignored for tracking purposes, per spec.
    pub fn observe(&mut self, data: &MidiEventData) {
        if data.is_note_on() {
            if let Some(ch) = data.channel() {
                self.set(ch, data.bytes()[1]);
            }
        } else if data.is_note_off() {
            if let Some(ch) = data.channel() {
                self.clear_note(ch, data.bytes()[1]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(start: u32, offset: u32, len: u32) -> TrackItem {
        TrackItem {
            pattern: MidiPattern::new(),
            start_ppqn: start,
            pattern_offset_ppqn: offset,
            length_ppqn: len,
        }
    }

    #[test]
    fn fully_contained_later_item_is_dropped() {
        let mut track = Track::new();
        track.add_item(item(0, 0, 100));
        track.add_item(item(10, 0, 20)); // fully inside [0,100)
        let pb = track.resolve_playback();
        assert_eq!(pb.items().len(), 1);
        assert_eq!(pb.items()[0].start_ppqn, 0);
    }

    #[test]
    fn overlapping_later_item_is_clipped_not_dropped() {
        let mut track = Track::new();
        track.add_item(item(0, 0, 50));
        track.add_item(item(30, 5, 50)); // overlaps [0,50) by 20 ticks
        let pb = track.resolve_playback();
        assert_eq!(pb.items().len(), 2);
        let second = &pb.items()[1];
        assert_eq!(second.start_ppqn, 50);
        assert_eq!(second.pattern_offset_ppqn, 5 + 20);
        assert_eq!(second.length_ppqn, 50 - 20);
    }

    #[test]
    fn active_notes_tracks_on_off_and_velocity_zero() {
        let mut active = ActiveNotes::new();
        active.observe(&MidiEventData::new(0, &[0x90, 64, 100]));
        assert!(active.is_set(0, 64));
        active.observe(&MidiEventData::new(0, &[0x90, 64, 0]));
        assert!(!active.is_set(0, 64));
    }

    #[test]
    fn metronome_pattern_is_sorted_and_emits_tick_plus_one_offs() {
        let pat = MidiPattern::metronome(4);
        let times: Vec<u32> = pat.events().iter().map(|e| e.time_ppqn).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(pat.events()[1].time_ppqn, 1);
        assert_eq!(pat.events()[1].data.status() & 0xF0, 0x80);
    }
}
