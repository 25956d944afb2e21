//! Song-level playback (spec §4.5): owns the [`TempoMap`] built from a
//! [`MasterTrack`], one [`TrackPlaybackCursor`] per track, and the live
//! [`SongPosition`]. Each render call advances every track in lockstep
//! over the same sample window and merges their output by event time, so
//! cross-track event ordering stays stable.
//!
//! A render call keeps consuming sub-windows — reseeking at every loop
//! seam it crosses — until the full requested frame count has been
//! produced (spec §4.5 step 6/7: "continue" at a loop boundary rather than
//! stopping the call short), matching the original's `while (rpos <
//! nsamples)` render loop. The per-track and merge-cursor scratch buffers
//! this needs are fields reused across calls rather than allocated per
//! callback (spec §5: the audio thread must not allocate).

use cbx_core::midi::MidiBuffer;
use cbx_core::pattern::Track;
use cbx_core::song::{MasterTrack, PlaybackState, SongPosition};
use cbx_core::time::TempoMap;

use crate::trackplayback::TrackPlaybackCursor;

pub struct SongPlayback {
    tempo_map: TempoMap,
    tracks: Vec<TrackPlaybackCursor>,
    position: SongPosition,
    /// Set by `stop` when a residual note-off flush didn't fully drain;
    /// `render` retries it before doing anything else.
    pending_stop_flush: bool,
    /// One scratch buffer per track, reused every render call instead of
    /// being allocated fresh each callback.
    per_track_scratch: Vec<MidiBuffer>,
    /// Read cursor per track for the k-way merge of `per_track_scratch`.
    merge_positions: Vec<usize>,
    /// Scratch buffer for the note-offs a loop-seam `seek` synthesises,
    /// reused instead of a fresh `MidiBuffer` per loop wrap.
    loop_seek_scratch: MidiBuffer,
}

impl SongPlayback {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            tempo_map: MasterTrack::new().build_tempo_map(sample_rate),
            tracks: Vec::new(),
            position: SongPosition::default(),
            pending_stop_flush: false,
            per_track_scratch: Vec::new(),
            merge_positions: Vec::new(),
            loop_seek_scratch: MidiBuffer::new(),
        }
    }

    pub fn set_master_track(&mut self, master: &MasterTrack, sample_rate: u32) {
        self.tempo_map = master.build_tempo_map(sample_rate);
    }

    pub fn add_track(&mut self, track: &Track) {
        self.tracks.push(TrackPlaybackCursor::new(track.resolve_playback()));
        self.per_track_scratch.push(MidiBuffer::new());
        self.merge_positions.push(0);
    }

    pub fn position(&self) -> &SongPosition {
        &self.position
    }

    pub fn tempo_map(&self) -> &TempoMap {
        &self.tempo_map
    }

    pub fn play(&mut self) {
        self.position.state = PlaybackState::Rolling;
    }

    /// Requests a stop: flushes every track's residual note-offs into
    /// `output` immediately. If the buffer fills before every note-off is
    /// written, playback state doesn't flip to `Stop` yet — `render` will
    /// retry the flush on the next call, mirroring `cbx_rt::RtCommand`'s
    /// zero-cost retry convention rather than dropping notes silently.
    pub fn stop(&mut self, output: &mut MidiBuffer) {
        let mut complete = true;
        for cursor in &mut self.tracks {
            if !cursor.flush_active_notes(output) {
                complete = false;
            }
        }
        if complete {
            self.position.state = PlaybackState::Stop;
            self.pending_stop_flush = false;
        } else {
            self.pending_stop_flush = true;
        }
    }

    pub fn set_loop(&mut self, loop_start_ppqn: u64, loop_end_ppqn: u64) {
        self.position.loop_start_ppqn = loop_start_ppqn;
        self.position.loop_end_ppqn = loop_end_ppqn;
    }

    /// Seeks every track to `ppqn`, synthesising note-offs for whatever was
    /// sounding at the old position into `output`.
    pub fn seek(&mut self, ppqn: u64, output: &mut MidiBuffer) {
        self.position.song_pos_ppqn = ppqn;
        self.position.song_pos_samples = self.tempo_map.ppqn_to_samples(ppqn);
        for cursor in &mut self.tracks {
            cursor.seek(ppqn, output);
        }
    }

    /// Renders one block's worth of song playback — `frames` samples —
    /// into `output`, with event times relative to the block's start.
    /// Returns the number of frames actually advanced; less than `frames`
    /// only when a pending stop-flush retry consumed this call instead
    /// (spec §4.5: "stop-state residual note-off emission... retried").
    pub fn render(&mut self, frames: u64, output: &mut MidiBuffer) -> u64 {
        if self.pending_stop_flush {
            let mut complete = true;
            for cursor in &mut self.tracks {
                if !cursor.flush_active_notes(output) {
                    complete = false;
                }
            }
            if complete {
                self.pending_stop_flush = false;
                self.position.state = PlaybackState::Stop;
            }
            return 0;
        }

        if self.position.state != PlaybackState::Rolling {
            return 0;
        }

        // Consume the whole requested window, reseeking at every loop seam
        // crossed along the way, rather than stopping the call short at the
        // first one (spec §4.5; mirrors the original's `while (rpos <
        // nsamples)` render loop).
        let block_start_sample = self.position.song_pos_samples;
        let mut total: u64 = 0;
        while total < frames {
            let window_start_sample = self.position.song_pos_samples;
            let window_end_sample = block_start_sample + frames;
            let window_end_ppqn = self.tempo_map.samples_to_ppqn(window_end_sample);

            let loop_enabled = self.position.loop_enabled();
            let render_end_ppqn =
                if loop_enabled { window_end_ppqn.min(self.position.loop_end_ppqn) } else { window_end_ppqn };

            for buf in &mut self.per_track_scratch {
                buf.clear();
            }
            for (cursor, buf) in self.tracks.iter_mut().zip(self.per_track_scratch.iter_mut()) {
                cursor.render(render_end_ppqn, &self.tempo_map, window_start_sample, total, buf);
            }

            for p in &mut self.merge_positions {
                *p = 0;
            }
            merge_per_track_into(&self.per_track_scratch, &mut self.merge_positions, output);

            let sub_rendered =
                self.tempo_map.ppqn_to_samples(render_end_ppqn).saturating_sub(window_start_sample).min(frames - total);
            self.position.song_pos_samples += sub_rendered;
            self.position.song_pos_ppqn = self.tempo_map.samples_to_ppqn(self.position.song_pos_samples);
            total += sub_rendered;

            // A loop of zero PPQN length (or any window that made no sample
            // progress) can't be resolved by reseeking and continuing — bail
            // rather than spin forever.
            if sub_rendered == 0 {
                break;
            }

            if loop_enabled && self.position.song_pos_ppqn >= self.position.loop_end_ppqn {
                self.loop_seek_scratch.clear();
                self.seek(self.position.loop_start_ppqn, &mut self.loop_seek_scratch);
                for ev in self.loop_seek_scratch.events() {
                    output.write_event((ev.time as u64 + total) as u32, ev.bytes());
                }
            }
        }

        total
    }
}

/// Merges `per_track`'s already-time-sorted buffers into `output` in
/// nondecreasing time order, without allocating a `Vec<&MidiBuffer>` — just
/// a scan over the per-track read cursors in `positions` each step.
fn merge_per_track_into(per_track: &[MidiBuffer], positions: &mut [usize], output: &mut MidiBuffer) {
    loop {
        let mut next: Option<usize> = None;
        for (i, buf) in per_track.iter().enumerate() {
            if positions[i] >= buf.len() {
                continue;
            }
            let t = buf.events()[positions[i]].time;
            if next.map_or(true, |n| t < per_track[n].events()[positions[n]].time) {
                next = Some(i);
            }
        }
        let Some(i) = next else { break };
        let ev = &per_track[i].events()[positions[i]];
        if !output.write_event(ev.time, ev.bytes()) {
            break;
        }
        positions[i] += 1;
    }
}
