//! Pattern text format (spec §6): config-driven drum/melodic patterns.
//!
//! `[drumpattern:X]`/`[pattern:X]` sections each describe one named
//! [`MidiPattern`], built from one or more numbered voice lines
//! (`trackN_trigger` + `trackN_note` for drum voices, `trackN_notes` for a
//! melodic line). `[drumtrack:X]`/`[track:X]` sections then compose named
//! patterns end-to-end onto a [`Track`], each reference optionally
//! transposed by `+semitones` or `=targetnote`.

use std::collections::HashMap;

use cbx_core::midi::MidiEventData;
use cbx_core::pattern::{MidiPattern, PatternEvent, Track, TrackItem};
use cbx_core::time::PPQN;
use rand::Rng;

use crate::sfz::note_name_to_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionKind {
    DrumPattern,
    Pattern,
    DrumTrack,
    TrackSection,
}

struct Section {
    kind: SectionKind,
    name: String,
    lines: Vec<(String, String)>,
}

fn parse_header(line: &str) -> Option<(SectionKind, String)> {
    let inner = line.strip_prefix('[')?.strip_suffix(']')?;
    let (kind_str, name) = inner.split_once(':')?;
    let kind = match kind_str {
        "drumpattern" => SectionKind::DrumPattern,
        "pattern" => SectionKind::Pattern,
        "drumtrack" => SectionKind::DrumTrack,
        "track" => SectionKind::TrackSection,
        _ => return None,
    };
    Some((kind, name.to_string()))
}

fn parse_sections(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current: Option<Section> = None;
    for raw_line in text.lines() {
        let line = raw_line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        if let Some((kind, name)) = parse_header(line) {
            if let Some(done) = current.take() {
                sections.push(done);
            }
            current = Some(Section { kind, name, lines: Vec::new() });
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if let Some(section) = current.as_mut() {
                section.lines.push((key.trim().to_string(), value.trim().to_string()));
            }
        }
    }
    if let Some(done) = current.take() {
        sections.push(done);
    }
    sections
}

fn get<'a>(lines: &'a [(String, String)], key: &str) -> Option<&'a str> {
    lines.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

fn numbered_values<'a>(lines: &'a [(String, String)], prefix: &str, suffix: &str) -> Vec<(u32, &'a str)> {
    let mut out = Vec::new();
    for (k, v) in lines {
        if let Some(rest) = k.strip_prefix(prefix) {
            if let Some(n) = rest.strip_suffix(suffix) {
                if let Ok(index) = n.parse::<u32>() {
                    out.push((index, v.as_str()));
                }
            }
        }
    }
    out.sort_by_key(|(i, _)| *i);
    out
}

/// Velocity for trigger chars `1`-`9`, per spec §6 ("`1`-`9` as velocity
/// levels (x 127/9)").
fn trigger_velocity(digit: u32) -> u8 {
    ((digit * 127) / 9).min(127) as u8
}

fn subdivision_ticks(resolution: u32) -> u32 {
    (PPQN / resolution.max(1)).max(1)
}

/// Builds the note-on/off pair list for one drum voice line, applying
/// swing to off-beat (odd-indexed) subdivisions and expanding `F`
/// (flam: one grace note 1/4 beat before, lightly humanised) and `D`
/// (drag: two grace notes at 1/8-beat spacing before the main hit).
fn render_trigger(
    trigger: &str,
    note: u8,
    channel: u8,
    resolution: u32,
    swing_ticks: i32,
    rng: &mut impl Rng,
) -> Vec<PatternEvent> {
    let step = subdivision_ticks(resolution);
    let mut events = Vec::new();
    for (i, ch) in trigger.chars().enumerate() {
        let base_tick = i as u32 * step;
        let swung = if i % 2 == 1 { (base_tick as i64 + swing_ticks as i64).max(0) as u32 } else { base_tick };

        let mut push_note = |time_ppqn: u32, velocity: u8, gate_ticks: u32| {
            if velocity == 0 {
                return;
            }
            events.push(PatternEvent { time_ppqn, data: MidiEventData::new(0, &[0x90 | channel, note, velocity]) });
            events.push(PatternEvent {
                time_ppqn: time_ppqn + gate_ticks.max(1),
                data: MidiEventData::new(0, &[0x80 | channel, note, 0]),
            });
        };

        match ch {
            '.' => {}
            '1'..='9' => {
                let digit = ch.to_digit(10).unwrap();
                push_note(swung, trigger_velocity(digit), step / 2);
            }
            'F' => {
                let humanize = rng.gen_range(-2i32..=2);
                let grace_tick = (swung as i32 - step as i32 / 4 + humanize).max(0) as u32;
                push_note(grace_tick, 70, step / 8);
                push_note(swung, 100, step / 2);
            }
            'D' => {
                let spacing = step / 8;
                push_note(swung.saturating_sub(2 * spacing), 60, spacing / 2);
                push_note(swung.saturating_sub(spacing), 70, spacing / 2);
                push_note(swung, 100, step / 2);
            }
            other => log::warn!("pattern text: ignoring unrecognised trigger char '{other}'"),
        }
    }
    events
}

/// Builds the note-on/off pairs for a melodic line: comma-separated note
/// names, `.` (or an empty slot) for a rest, swing applied to odd-indexed
/// notes the same as a drum trigger line.
fn render_melodic(notes: &str, channel: u8, resolution: u32, swing_ticks: i32) -> Vec<PatternEvent> {
    let step = subdivision_ticks(resolution);
    let mut events = Vec::new();
    for (i, token) in notes.split(',').map(str::trim).enumerate() {
        if token.is_empty() || token == "." {
            continue;
        }
        let Some(key) = note_name_to_key(token) else {
            log::warn!("pattern text: ignoring unrecognised note name '{token}'");
            continue;
        };
        let base_tick = i as u32 * step;
        let time_ppqn = if i % 2 == 1 { (base_tick as i64 + swing_ticks as i64).max(0) as u32 } else { base_tick };
        events.push(PatternEvent { time_ppqn, data: MidiEventData::new(0, &[0x90 | channel, key, 100]) });
        events.push(PatternEvent { time_ppqn: time_ppqn + step.max(1) / 2, data: MidiEventData::new(0, &[0x80 | channel, key, 0]) });
    }
    events
}

fn build_pattern(section: &Section, rng: &mut impl Rng) -> MidiPattern {
    let beats: u32 = get(&section.lines, "beats").and_then(|v| v.parse().ok()).unwrap_or(1);
    let channel: u8 = get(&section.lines, "channel").and_then(|v| v.parse().ok()).unwrap_or(9);
    let default_resolution: u32 = get(&section.lines, "resolution").and_then(|v| v.parse().ok()).unwrap_or(4);
    let default_swing: i32 = get(&section.lines, "swing").and_then(|v| v.parse().ok()).unwrap_or(0);

    let mut events = Vec::new();

    for (index, trigger) in numbered_values(&section.lines, "track", "_trigger") {
        let note: u8 = get(&section.lines, &format!("track{index}_note")).and_then(|v| v.parse().ok()).unwrap_or(note_for_index(index));
        let resolution: u32 = get(&section.lines, &format!("track{index}_res")).and_then(|v| v.parse().ok()).unwrap_or(default_resolution);
        let swing: i32 = get(&section.lines, &format!("track{index}_swing")).and_then(|v| v.parse().ok()).unwrap_or(default_swing);
        events.extend(render_trigger(trigger, note, channel, resolution, swing, rng));
    }

    for (index, notes) in numbered_values(&section.lines, "track", "_notes") {
        let resolution: u32 = get(&section.lines, &format!("track{index}_res")).and_then(|v| v.parse().ok()).unwrap_or(default_resolution);
        let swing: i32 = get(&section.lines, &format!("track{index}_swing")).and_then(|v| v.parse().ok()).unwrap_or(default_swing);
        events.extend(render_melodic(notes, channel, resolution, swing));
    }

    events.sort_by_key(|e| e.time_ppqn);
    MidiPattern::from_sorted_events(events, Some(beats * PPQN))
}

/// Fallback note numbers for common drum-voice slots when `trackN_note`
/// is omitted, in General-MIDI-drum-map order (kick, snare, closed hat,
/// open hat, ...).
fn note_for_index(index: u32) -> u8 {
    const DEFAULTS: [u8; 4] = [36, 38, 42, 46];
    DEFAULTS.get(index as usize).copied().unwrap_or(36)
}

/// Parses `+N`/`=notename` off a pattern reference (spec §6: "compose
/// patterns with `+semitones` or `=targetnote` transposition"), returning
/// the bare pattern name and the semitone delta to apply (`0` if no
/// modifier, or if `=targetnote` couldn't be resolved against the
/// pattern's own reference note).
fn split_transpose<'a>(reference: &'a str, patterns: &HashMap<String, (MidiPattern, Option<u8>)>) -> (&'a str, i32) {
    if let Some((name, rest)) = reference.split_once('+') {
        if let Ok(semitones) = rest.parse::<i32>() {
            return (name, semitones);
        }
    }
    if let Some((name, target)) = reference.split_once('=') {
        if let Some(target_key) = note_name_to_key(target).or_else(|| target.parse().ok()) {
            if let Some((_, Some(base))) = patterns.get(name) {
                return (name, target_key as i32 - *base as i32);
            }
            log::warn!("pattern text: '=targetnote' transposition on '{name}' needs a single-note reference pattern; ignoring");
            return (name, 0);
        }
    }
    (reference, 0)
}

fn transpose_pattern(pattern: &MidiPattern, semitones: i32) -> MidiPattern {
    if semitones == 0 {
        return pattern.clone();
    }
    let events = pattern
        .events()
        .iter()
        .map(|e| {
            let bytes = e.data.bytes();
            let mut out = bytes.to_vec();
            if out.len() >= 2 && matches!(out[0] & 0xF0, 0x80 | 0x90) {
                out[1] = (out[1] as i32 + semitones).clamp(0, 127) as u8;
            }
            PatternEvent { time_ppqn: e.time_ppqn, data: MidiEventData::new(0, &out) }
        })
        .collect();
    MidiPattern::from_sorted_events(events, pattern.loop_end)
}

/// The single note a pattern's events all share, if they share one — used
/// to resolve `=targetnote` transposition for monophonic/single-voice
/// patterns. `None` if the pattern has zero or more than one distinct
/// note.
fn single_note(pattern: &MidiPattern) -> Option<u8> {
    let mut notes = pattern.events().iter().filter_map(|e| e.data.bytes().get(1).copied());
    let first = notes.next()?;
    if notes.all(|n| n == first) {
        Some(first)
    } else {
        None
    }
}

/// The result of loading one pattern-text document: named patterns plus
/// named tracks built by composing them.
pub struct PatternLibrary {
    pub patterns: HashMap<String, MidiPattern>,
    pub tracks: HashMap<String, Track>,
}

/// Parses `text` into a [`PatternLibrary`]. Pattern sections are resolved
/// before track sections regardless of file order, so a track can
/// reference a pattern defined later in the document.
pub fn load_pattern_text(text: &str, rng: &mut impl Rng) -> PatternLibrary {
    let sections = parse_sections(text);

    let mut patterns_with_base: HashMap<String, (MidiPattern, Option<u8>)> = HashMap::new();
    for section in &sections {
        if matches!(section.kind, SectionKind::DrumPattern | SectionKind::Pattern) {
            let pattern = build_pattern(section, rng);
            let base = single_note(&pattern);
            patterns_with_base.insert(section.name.clone(), (pattern, base));
        }
    }

    let mut tracks = HashMap::new();
    for section in &sections {
        if !matches!(section.kind, SectionKind::DrumTrack | SectionKind::TrackSection) {
            continue;
        }
        let mut track = Track::new();
        let mut cursor_ppqn: u32 = 0;
        for (_, reference) in numbered_values(&section.lines, "track", "") {
            let (name, semitones) = split_transpose(reference, &patterns_with_base);
            let Some((pattern, _)) = patterns_with_base.get(name) else {
                log::warn!("pattern text: track section '{}' references unknown pattern '{name}'", section.name);
                continue;
            };
            let transposed = transpose_pattern(pattern, semitones);
            let length_ppqn = transposed.loop_end.unwrap_or(PPQN);
            track.add_item(TrackItem { pattern: transposed, start_ppqn: cursor_ppqn, pattern_offset_ppqn: 0, length_ppqn });
            cursor_ppqn += length_ppqn;
        }
        tracks.insert(section.name.clone(), track);
    }

    PatternLibrary { patterns: patterns_with_base.into_iter().map(|(k, (p, _))| (k, p)).collect(), tracks }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(1)
    }

    #[test]
    fn drum_pattern_trigger_produces_hits_at_each_step() {
        let text = "[drumpattern:kick]\nbeats=1\nresolution=4\ntrack0_note=36\ntrack0_trigger=9..9\n";
        let mut r = rng();
        let lib = load_pattern_text(text, &mut r);
        let pattern = lib.patterns.get("kick").unwrap();
        // Two hits (step 0 and step 3), each a note-on/off pair.
        assert_eq!(pattern.events().len(), 4);
        assert_eq!(pattern.events()[0].data.bytes()[1], 36);
    }

    #[test]
    fn melodic_pattern_resolves_note_names() {
        let text = "[pattern:bass]\nbeats=1\nresolution=2\ntrack0_notes=c3,e3\n";
        let mut r = rng();
        let lib = load_pattern_text(text, &mut r);
        let pattern = lib.patterns.get("bass").unwrap();
        assert_eq!(pattern.events().len(), 4);
        assert_eq!(pattern.events()[0].data.bytes()[1], 48); // c3
    }

    #[test]
    fn track_section_composes_patterns_sequentially_with_transpose() {
        let text = "\
[drumpattern:kick]
beats=1
resolution=4
track0_note=36
track0_trigger=9...

[drumtrack:main]
track0=kick
track1=kick+2
";
        let mut r = rng();
        let lib = load_pattern_text(text, &mut r);
        let track = lib.tracks.get("main").unwrap();
        let playback = track.resolve_playback();
        assert_eq!(playback.items().len(), 2);
        assert_eq!(playback.items()[1].start_ppqn, PPQN);
        // track1's kick is transposed up two semitones -> note 38.
        assert_eq!(playback.items()[1].pattern.events()[0].data.bytes()[1], 38);
    }
}
