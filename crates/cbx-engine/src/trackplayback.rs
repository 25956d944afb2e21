//! Per-track pattern playback (spec §4.4): walks a [`TrackPlayback`]'s
//! resolved items, turning each placed [`MidiPattern`]'s PPQN-timestamped
//! events into sample-accurate MIDI for the render window the song clock
//! asks for, including the item's own pattern loop tiling.
//!
//! A pattern placed with a loop plays its first cycle starting mid-pattern
//! at `pattern_offset_ppqn`; once it wraps past `loop_end`, every following
//! cycle replays the whole pattern from its own time zero, for as long as
//! the item's `length_ppqn` window stays open. Seeking (and stopping)
//! emits note-offs for any note this cursor has started but not yet
//! closed, via the same [`ActiveNotes`] bitmap the data model defines.

use cbx_core::midi::MidiBuffer;
use cbx_core::pattern::{ActiveNotes, TrackItem, TrackPlayback};
use cbx_core::time::TempoMap;

/// Resolves `item`'s loop tiling to find the global-PPQN position of
/// `event_time_ppqn` within `repeat_index`'s cycle, or `None` if that event
/// doesn't occur in this repeat (either because this is the first, partial
/// cycle and the event falls before `pattern_offset_ppqn`, or because the
/// pattern has no loop and `repeat_index > 0`).
fn global_ppqn_for(item: &TrackItem, repeat_index: u32, event_time_ppqn: u32) -> Option<u64> {
    if repeat_index == 0 {
        if event_time_ppqn < item.pattern_offset_ppqn {
            return None;
        }
        Some(item.start_ppqn as u64 + (event_time_ppqn - item.pattern_offset_ppqn) as u64)
    } else {
        let loop_len = item.pattern.loop_end?;
        if loop_len == 0 {
            return None;
        }
        let first_cycle_len = loop_len.saturating_sub(item.pattern_offset_ppqn) as u64;
        Some(item.start_ppqn as u64 + first_cycle_len + (repeat_index as u64 - 1) * loop_len as u64 + event_time_ppqn as u64)
    }
}

/// Finds the `(repeat_index, event_index)` of the first event at or after
/// `ppqn` within `item`. Used by `seek`; a control-rate operation, so the
/// straightforward per-repeat scan (bounded by the item's own length) is
/// preferred over inverting the loop-tiling formula.
fn locate(item: &TrackItem, ppqn: u64) -> (u32, usize) {
    let events = item.pattern.events();
    let mut repeat = 0u32;
    loop {
        for (i, ev) in events.iter().enumerate() {
            if let Some(g) = global_ppqn_for(item, repeat, ev.time_ppqn) {
                if g >= ppqn {
                    return (repeat, i);
                }
            }
        }
        match global_ppqn_for(item, repeat + 1, 0) {
            Some(next_start) if next_start < item.end_ppqn() as u64 => repeat += 1,
            _ => return (repeat, events.len()),
        }
    }
}

/// A live cursor over one track's resolved, overlap-free [`TrackPlayback`].
pub struct TrackPlaybackCursor {
    playback: TrackPlayback,
    item_index: usize,
    repeat_index: u32,
    event_index: usize,
    /// Suppression floor: events at or before this PPQN are never re-emitted,
    /// set by `seek` to avoid re-triggering whatever sits exactly on a seek
    /// boundary (spec §4.3/§4.5 `min_time_ppqn`). `None` before the first
    /// seek, when nothing needs suppressing.
    min_time_ppqn: Option<u64>,
    pub active_notes: ActiveNotes,
}

impl TrackPlaybackCursor {
    pub fn new(playback: TrackPlayback) -> Self {
        Self {
            playback,
            item_index: 0,
            repeat_index: 0,
            event_index: 0,
            min_time_ppqn: None,
            active_notes: ActiveNotes::new(),
        }
    }

    /// Renders every event in `[self's cursor position, end_ppqn)` into
    /// `output`, timestamped as a sample offset relative to
    /// `window_start_sample` via `tempo_map`, plus `output_base_offset`
    /// (nonzero when the caller has already written earlier sub-windows of
    /// the same output buffer ahead of this one — e.g. a song-loop seam
    /// falling inside one render call, where `window_start_sample` resets
    /// to the new loop position but the output buffer's own time axis
    /// keeps counting up from the call's start). Advances the cursor past
    /// everything it emits.
    pub fn render(
        &mut self,
        end_ppqn: u64,
        tempo_map: &TempoMap,
        window_start_sample: u64,
        output_base_offset: u64,
        output: &mut MidiBuffer,
    ) {
        loop {
            let Some(item) = self.playback.items().get(self.item_index).cloned() else { break };
            if end_ppqn <= item.start_ppqn as u64 {
                break;
            }
            let events = item.pattern.events();
            if self.event_index >= events.len() {
                if !self.advance_repeat_or_item(&item) {
                    break;
                }
                continue;
            }
            let ev = &events[self.event_index];
            let Some(global) = global_ppqn_for(&item, self.repeat_index, ev.time_ppqn) else {
                self.event_index += 1;
                continue;
            };
            if global >= item.end_ppqn() as u64 {
                if !self.advance_repeat_or_item(&item) {
                    break;
                }
                continue;
            }
            if global >= end_ppqn {
                break;
            }
            if self.min_time_ppqn.map_or(true, |floor| global >= floor) {
                let abs_sample = tempo_map.ppqn_to_samples(global);
                let rel_sample = abs_sample.saturating_sub(window_start_sample) + output_base_offset;
                if rel_sample <= u32::MAX as u64 {
                    output.write_event(rel_sample as u32, ev.data.bytes());
                    self.active_notes.observe(&ev.data);
                }
            }
            self.event_index += 1;
        }
    }

    /// Moves to the next loop repeat of `item`'s pattern, or to the next
    /// item if this one has no more repeats. Returns `false` once there's
    /// nothing left to advance to.
    fn advance_repeat_or_item(&mut self, item: &TrackItem) -> bool {
        match global_ppqn_for(item, self.repeat_index + 1, 0) {
            Some(next_start) if next_start < item.end_ppqn() as u64 => {
                self.repeat_index += 1;
                self.event_index = 0;
                true
            }
            _ => {
                self.item_index += 1;
                self.repeat_index = 0;
                self.event_index = 0;
                self.item_index < self.playback.items().len()
            }
        }
    }

    /// Repositions the cursor to `ppqn`, synthesising note-offs (into
    /// `output`) for every note this cursor has started but not closed —
    /// so a seek or loop-back never leaves a stuck note (spec §3
    /// `ActiveNotes`).
    pub fn seek(&mut self, ppqn: u64, output: &mut MidiBuffer) {
        self.emit_pending_offs(output);
        self.min_time_ppqn = Some(ppqn);

        self.item_index = self.playback.items().partition_point(|i| i.end_ppqn() as u64 <= ppqn);
        if let Some(item) = self.playback.items().get(self.item_index).cloned() {
            let (repeat, idx) = locate(&item, ppqn);
            self.repeat_index = repeat;
            self.event_index = idx;
        } else {
            self.repeat_index = 0;
            self.event_index = 0;
        }
    }

    /// Emits note-offs for everything still sounding, without repositioning
    /// the cursor — used on song stop (spec §4.5). Returns `false` if the
    /// output buffer filled up before every note-off was written; the
    /// still-active notes stay marked so the caller can retry on the next
    /// block (the same cost-0-retry convention `cbx_rt::RtCommand` uses).
    pub fn flush_active_notes(&mut self, output: &mut MidiBuffer) -> bool {
        self.emit_pending_offs(output)
    }

    fn emit_pending_offs(&mut self, output: &mut MidiBuffer) -> bool {
        let pending: Vec<(u8, u8)> = self.active_notes.iter_set().collect();
        for (channel, note) in pending {
            if output.write_event(0, &[0x80 | channel, note, 0]) {
                self.active_notes.clear_note(channel, note);
            } else {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbx_core::midi::MidiEventData;
    use cbx_core::pattern::{MidiPattern, PatternEvent, Track};
    use cbx_core::time::TempoMapItem;

    fn one_shot_pattern() -> MidiPattern {
        MidiPattern::from_sorted_events(
            vec![
                PatternEvent { time_ppqn: 0, data: MidiEventData::new(0, &[0x90, 60, 100]) },
                PatternEvent { time_ppqn: 24, data: MidiEventData::new(0, &[0x80, 60, 0]) },
            ],
            None,
        )
    }

    fn looping_pattern() -> MidiPattern {
        MidiPattern::from_sorted_events(
            vec![PatternEvent { time_ppqn: 0, data: MidiEventData::new(0, &[0x99, 37, 100]) }],
            Some(48),
        )
    }

    fn tempo_map() -> TempoMap {
        TempoMap::new(&[TempoMapItem::new(u32::MAX, 120.0)], 48_000)
    }

    #[test]
    fn one_shot_item_emits_both_events_once() {
        let mut track = Track::new();
        track.add_item(TrackItem { pattern: one_shot_pattern(), start_ppqn: 0, pattern_offset_ppqn: 0, length_ppqn: 48 });
        let mut cursor = TrackPlaybackCursor::new(track.resolve_playback());
        let map = tempo_map();
        let mut out = MidiBuffer::new();
        cursor.render(48, &map, 0, 0, &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out.events()[0].bytes()[1], 60);
    }

    #[test]
    fn looping_item_tiles_the_pattern_across_the_window() {
        let mut track = Track::new();
        // Four bars of a 1-beat-long metronome-style click, tiled.
        track.add_item(TrackItem { pattern: looping_pattern(), start_ppqn: 0, pattern_offset_ppqn: 0, length_ppqn: 4 * 48 });
        let mut cursor = TrackPlaybackCursor::new(track.resolve_playback());
        let map = tempo_map();
        let mut out = MidiBuffer::new();
        cursor.render(4 * 48, &map, 0, 0, &mut out);
        assert_eq!(out.len(), 4, "expected one click per loop repeat across 4 bars");
    }

    #[test]
    fn seek_emits_note_off_for_unclosed_note() {
        let mut track = Track::new();
        track.add_item(TrackItem { pattern: one_shot_pattern(), start_ppqn: 0, pattern_offset_ppqn: 0, length_ppqn: 48 });
        let mut cursor = TrackPlaybackCursor::new(track.resolve_playback());
        let map = tempo_map();
        let mut out = MidiBuffer::new();
        cursor.render(12, &map, 0, 0, &mut out); // only the note-on at ppqn 0 falls before 12
        assert_eq!(out.len(), 1);
        assert!(cursor.active_notes.is_set(0, 60));

        let mut seek_out = MidiBuffer::new();
        cursor.seek(0, &mut seek_out);
        assert_eq!(seek_out.len(), 1);
        assert_eq!(seek_out.events()[0].bytes()[0] & 0xF0, 0x80);
        assert!(!cursor.active_notes.is_set(0, 60));
    }
}
