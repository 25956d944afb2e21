//! PPQN tempo map and PPQN↔sample conversion.
//!
//! `PPQN` ticks per quarter note, fixed at build time. A `TempoMap` is a
//! piecewise-constant tempo schedule: each entry covers a span of PPQN time
//! at one (tempo, numerator, denominator) triple. Entries precompute their
//! cumulative `(time_ppqn, time_samples)` starting point so that conversion
//! in either direction only needs a binary search plus a linear
//! interpolation within the matched entry.

/// Ticks per quarter note. Tunable at build time per the spec; 48 here.
pub const PPQN: u32 = 48;

/// One entry in a [`TempoMap`]: a span of musical time at a fixed tempo.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoMapItem {
    /// Duration of this entry, in PPQN ticks.
    pub duration_ppqn: u32,
    /// Tempo in beats (quarter notes) per minute.
    pub tempo: f64,
    pub time_sig_numerator: u8,
    pub time_sig_denominator: u8,
}

impl TempoMapItem {
    pub fn new(duration_ppqn: u32, tempo: f64) -> Self {
        Self {
            duration_ppqn,
            tempo,
            time_sig_numerator: 4,
            time_sig_denominator: 4,
        }
    }

    fn samples_per_ppqn(&self, sample_rate: u32) -> f64 {
        // samples = ppqn * sample_rate * 60 / (tempo * PPQN)
        sample_rate as f64 * 60.0 / (self.tempo * PPQN as f64)
    }
}

#[derive(Debug, Clone, Copy)]
struct CumulativeEntry {
    start_ppqn: u64,
    start_samples: u64,
    item: TempoMapItem,
}

/// A piecewise-constant tempo schedule with precomputed cumulative offsets.
///
/// Invariant: `ppqn_to_samples(samples_to_ppqn(t)) == t` for every `t` within
/// the mapped range (exact because both directions walk the same cumulative
/// table and interpolate linearly within a single constant-tempo entry).
#[derive(Debug, Clone)]
pub struct TempoMap {
    sample_rate: u32,
    entries: Vec<CumulativeEntry>,
    /// Total PPQN length covered by `entries` (last entry's end).
    total_ppqn: u64,
}

impl TempoMap {
    /// Build a tempo map from an ordered list of items and a sample rate.
    /// An empty `items` list falls back to a single 120 BPM 4/4 entry
    /// spanning forever, matching the original's "always at least one tempo
    /// event" invariant.
    pub fn new(items: &[TempoMapItem], sample_rate: u32) -> Self {
        let mut entries = Vec::with_capacity(items.len().max(1));
        let mut start_ppqn = 0u64;
        let mut start_samples = 0u64;
        let source: &[TempoMapItem] = if items.is_empty() {
            &[TempoMapItem::new(u32::MAX, 120.0)]
        } else {
            items
        };
        for &item in source {
            entries.push(CumulativeEntry {
                start_ppqn,
                start_samples,
                item,
            });
            let span_samples = (item.duration_ppqn as f64 * item.samples_per_ppqn(sample_rate)).round() as u64;
            start_ppqn += item.duration_ppqn as u64;
            start_samples += span_samples;
        }
        Self {
            sample_rate,
            entries,
            total_ppqn: start_ppqn,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn total_ppqn(&self) -> u64 {
        self.total_ppqn
    }

    fn entry_for_ppqn(&self, ppqn: u64) -> &CumulativeEntry {
        match self
            .entries
            .binary_search_by_key(&ppqn, |e| e.start_ppqn)
        {
            Ok(i) => &self.entries[i],
            Err(0) => &self.entries[0],
            Err(i) => &self.entries[i - 1],
        }
    }

    fn entry_for_samples(&self, samples: u64) -> &CumulativeEntry {
        match self
            .entries
            .binary_search_by_key(&samples, |e| e.start_samples)
        {
            Ok(i) => &self.entries[i],
            Err(0) => &self.entries[0],
            Err(i) => &self.entries[i - 1],
        }
    }

    /// Convert a PPQN position to an absolute sample position.
    pub fn ppqn_to_samples(&self, ppqn: u64) -> u64 {
        if self.entries.is_empty() {
            return 0;
        }
        let e = self.entry_for_ppqn(ppqn);
        let delta_ppqn = ppqn.saturating_sub(e.start_ppqn);
        e.start_samples + (delta_ppqn as f64 * e.item.samples_per_ppqn(self.sample_rate)).round() as u64
    }

    /// Convert an absolute sample position to a PPQN position.
    pub fn samples_to_ppqn(&self, samples: u64) -> u64 {
        if self.entries.is_empty() {
            return 0;
        }
        let e = self.entry_for_samples(samples);
        let spp = e.item.samples_per_ppqn(self.sample_rate);
        let delta_samples = samples.saturating_sub(e.start_samples);
        e.start_ppqn + (delta_samples as f64 / spp).round() as u64
    }

    /// Tempo in effect at the given PPQN position.
    pub fn tempo_at_ppqn(&self, ppqn: u64) -> f64 {
        self.entry_for_ppqn(ppqn).item.tempo
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_entry_120bpm_roundtrips() {
        let map = TempoMap::new(&[TempoMapItem::new(u32::MAX, 120.0)], 48000);
        // One beat = 48 PPQN = 24000 samples at 120 BPM / 48kHz (spec scenario 1).
        assert_eq!(map.ppqn_to_samples(48), 24000);
        assert_eq!(map.samples_to_ppqn(24000), 48);
        for t in [0u64, 1, 47, 48, 96, 144, 1000] {
            let s = map.ppqn_to_samples(t);
            assert_eq!(map.samples_to_ppqn(s), t, "roundtrip failed for ppqn {t}");
        }
    }

    #[test]
    fn piecewise_tempo_changes_are_cumulative() {
        let items = [
            TempoMapItem::new(4 * PPQN, 120.0),
            TempoMapItem::new(4 * PPQN, 60.0),
        ];
        let map = TempoMap::new(&items, 48000);
        let first_bar_end = map.ppqn_to_samples((4 * PPQN) as u64);
        assert_eq!(first_bar_end, 4 * 24000);
        // Second bar is half the tempo -> twice the samples per tick.
        let second_bar_end = map.ppqn_to_samples((8 * PPQN) as u64);
        assert_eq!(second_bar_end - first_bar_end, 8 * 24000);
    }
}
