//! SFZ instrument format (subset) loader (spec §6): `<group>`/`<region>`
//! sections of `key=value` pairs, regions inheriting unset fields from
//! their enclosing group, resolved through the wave bank into a
//! [`SamplerProgram`] of finalized [`SamplerLayer`]s.
//!
//! Unrecognised keys are warned about and ignored, matching the spec's
//! stated recovery policy rather than aborting the whole load over one
//! unsupported opcode.

use std::path::Path;

use cbx_audio::wavebank::WaveBank;
use cbx_core::error::{CbxError, CbxResult};
use cbx_dsp::biquad::FilterType;

use crate::sampler::layer::{EnvParams, LayerBuilder, LfoParams, LoopMode, SwitchCondition};
use crate::sampler::program::SamplerProgram;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Group,
    Region,
}

struct ParsedSection {
    kind: Section,
    builder: LayerBuilder,
}

/// Splits SFZ text into `<group>`/`<region>` sections, each carrying its
/// own accumulated `key=value` pairs. SFZ allows pairs to span multiple
/// lines and comments starting with `//`; both are handled by
/// tokenising the whole file as whitespace-separated `key=value` words
/// after stripping comments, the way real SFZ parsers do.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for line in text.lines() {
        let line = line.split("//").next().unwrap_or("");
        for word in line.split_whitespace() {
            tokens.push(word.to_string());
        }
    }
    tokens
}

fn parse_sections(text: &str) -> Vec<ParsedSection> {
    let mut sections = Vec::new();
    let mut current: Option<ParsedSection> = None;

    for token in tokenize(text) {
        if token.eq_ignore_ascii_case("<group>") {
            if let Some(done) = current.take() {
                sections.push(done);
            }
            current = Some(ParsedSection { kind: Section::Group, builder: LayerBuilder::default() });
        } else if token.eq_ignore_ascii_case("<region>") {
            if let Some(done) = current.take() {
                sections.push(done);
            }
            current = Some(ParsedSection { kind: Section::Region, builder: LayerBuilder::default() });
        } else if let Some((key, value)) = token.split_once('=') {
            if let Some(section) = current.as_mut() {
                apply_opcode(&mut section.builder, key, value);
            }
        }
    }
    if let Some(done) = current.take() {
        sections.push(done);
    }
    sections
}

fn parse_loop_mode(value: &str) -> Option<LoopMode> {
    match value {
        "no_loop" => Some(LoopMode::NoLoop),
        "one_shot" => Some(LoopMode::OneShot),
        "loop_continuous" => Some(LoopMode::LoopContinuous),
        "loop_sustain" => Some(LoopMode::LoopSustain),
        _ => None,
    }
}

fn parse_filter_type(value: &str) -> Option<FilterType> {
    match value {
        "lpf_2p" => Some(FilterType::Lowpass),
        "hpf_2p" => Some(FilterType::Highpass),
        "bpf_2p" => Some(FilterType::Bandpass),
        _ => None,
    }
}

fn apply_opcode(b: &mut LayerBuilder, key: &str, value: &str) {
    let f = || value.parse::<f64>().ok();
    let i = || value.parse::<i64>().ok();
    let u = || value.parse::<u8>().ok();

    match key {
        "sample" => b.sample_path = Some(value.to_string()),
        "lokey" => b.lokey = u().or_else(|| note_name_to_key(value)),
        "hikey" => b.hikey = u().or_else(|| note_name_to_key(value)),
        "key" => {
            let k = u().or_else(|| note_name_to_key(value));
            b.lokey = k;
            b.hikey = k;
            b.root_key = k;
        }
        "lovel" => b.lovel = u(),
        "hivel" => b.hivel = u(),
        "pitch_keycenter" => b.root_key = u().or_else(|| note_name_to_key(value)),
        "pitch_keytrack" => b.key_scaling_cents = f(),
        "transpose" => b.transpose_semitones = i().map(|v| v as i32),
        "tune" => b.tune_cents = f(),
        "volume" => b.gain_db = f(),
        "pan" => b.pan_percent = f(),
        "offset" => b.offset = i().map(|v| v.max(0) as u64),
        "loop_start" => b.loop_start = i(),
        "loop_end" => b.loop_end = i(),
        "loop_mode" => b.loop_mode = parse_loop_mode(value),
        "cutoff" => b.cutoff_hz = f(),
        "resonance" => b.resonance_q = f(),
        "fil_type" => b.filter_type = parse_filter_type(value),
        "fil_veltrack" => b.fil_veltrack = f(),
        "group" => b.exclusive_group = i().map(|v| v as i32),
        "off_by" => b.off_by = i().map(|v| v as i32),
        "effect1" => b.effect1_send = f().map(|v| v / 100.0),
        "effect2" => b.effect2_send = f().map(|v| v / 100.0),
        "effect1bus" => b.effect1_bus = u(),
        "effect2bus" => b.effect2_bus = u(),
        "velcurve_quadratic" => b.velcurve_quadratic = value.parse::<i32>().ok().map(|v| v != 0),
        "sw_down" => b.switch_conditions.push(SwitchCondition::Down(u().unwrap_or(0))),
        "sw_up" => b.switch_conditions.push(SwitchCondition::Up(u().unwrap_or(0))),
        "sw_last" => b.switch_conditions.push(SwitchCondition::Last(u().unwrap_or(0))),
        "sw_previous" => b.switch_conditions.push(SwitchCondition::Previous(u().unwrap_or(0))),
        "sw_lokey" => b.sw_lokey = u(),
        "sw_hikey" => b.sw_hikey = u(),
        _ if key.starts_with("amp_velcurve_") => {
            if let Some(vel) = key.trim_start_matches("amp_velcurve_").parse::<u8>().ok() {
                if let Some(level) = f() {
                    b.velcurve_points.push((vel, level));
                }
            }
        }
        _ if key.starts_with("ampeg_") => apply_eg(&mut b.amp_env, key.trim_start_matches("ampeg_"), value),
        _ if key.starts_with("fileg_") => apply_eg(&mut b.filter_env, key.trim_start_matches("fileg_"), value),
        _ if key.starts_with("pitcheg_") => apply_eg(&mut b.pitch_env, key.trim_start_matches("pitcheg_"), value),
        _ if key.starts_with("amplfo_") => apply_lfo(&mut b.amp_lfo, key.trim_start_matches("amplfo_"), value),
        _ if key.starts_with("fillfo_") => apply_lfo(&mut b.filter_lfo, key.trim_start_matches("fillfo_"), value),
        _ if key.starts_with("pitchlfo_") => apply_lfo(&mut b.pitch_lfo, key.trim_start_matches("pitchlfo_"), value),
        other => log::warn!("sfz: ignoring unrecognised opcode {other}={value}"),
    }
}

fn apply_eg(slot: &mut Option<EnvParams>, field: &str, value: &str) {
    let mut params = slot.unwrap_or_default();
    let Ok(v) = value.parse::<f64>() else { return };
    match field {
        "start" => params.start = v / 100.0,
        "delay" => params.delay = v,
        "attack" => params.attack = v,
        "hold" => params.hold = v,
        "decay" => params.decay = v,
        "sustain" => params.sustain = v / 100.0,
        "release" => params.release = v,
        "depth" => params.depth = v,
        _ => return,
    }
    *slot = Some(params);
}

fn apply_lfo(slot: &mut Option<LfoParams>, field: &str, value: &str) {
    let mut params = slot.unwrap_or_default();
    let Ok(v) = value.parse::<f64>() else { return };
    match field {
        "freq" => params.freq = v,
        "delay" => params.delay = v,
        "fade" => params.fade = v,
        "depth" => params.depth = v,
        _ => return,
    }
    *slot = Some(params);
}

/// Minimal note-name parser (`c4` == 60) for `key`/`lokey`/`hikey`/
/// `pitch_keycenter` values given as names rather than MIDI numbers.
/// Shared with `crate::patterntext`'s melodic note lists.
pub(crate) fn note_name_to_key(value: &str) -> Option<u8> {
    let bytes = value.as_bytes();
    if bytes.is_empty() {
        return None;
    }
    let base = match bytes[0].to_ascii_lowercase() {
        b'c' => 0,
        b'd' => 2,
        b'e' => 4,
        b'f' => 5,
        b'g' => 7,
        b'a' => 9,
        b'b' => 11,
        _ => return None,
    };
    let mut idx = 1;
    let mut accidental = 0i32;
    if let Some(&b) = bytes.get(idx) {
        if b == b'#' {
            accidental = 1;
            idx += 1;
        } else if b.to_ascii_lowercase() == b'b' {
            accidental = -1;
            idx += 1;
        }
    }
    let octave: i32 = std::str::from_utf8(&bytes[idx..]).ok()?.parse().ok()?;
    let key = (octave + 1) * 12 + base + accidental;
    u8::try_from(key).ok()
}

/// Loads an SFZ file into a [`SamplerProgram`], resolving `sample=` paths
/// through `bank` relative to the SFZ file's own directory (spec's usual
/// convention for sample references).
pub fn load_sfz(path: &Path, prog_no: u32, bank: &mut WaveBank) -> CbxResult<SamplerProgram> {
    let text = std::fs::read_to_string(path).map_err(CbxError::Io)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

    let sections = parse_sections(&text);
    let mut program = SamplerProgram::new(prog_no, path.file_stem().and_then(|s| s.to_str()).unwrap_or("program"));
    let mut current_group = LayerBuilder::default();

    for section in sections {
        match section.kind {
            Section::Group => current_group = section.builder,
            Section::Region => {
                let merged = section.builder.merged_over(&current_group);
                let Some(sample) = merged.sample_path.as_ref() else {
                    log::warn!("sfz: region with no sample= opcode, skipping");
                    continue;
                };
                let sample_path = base_dir.join(sample);
                let waveform = bank.get_waveform(&sample_path)?;
                program.layers.push(std::sync::Arc::new(merged.finalize(waveform, bank_sample_rate())));
            }
        }
    }
    Ok(program)
}

/// The sample rate layer finalisation uses to precompute envelope/LFO
/// shapes. Fixed rather than threaded through every call site because
/// every shipped build runs at one rate (spec §5 config surface);
/// `cbx-engine::config::EngineConfig` is the source of truth for it.
fn bank_sample_rate() -> f64 {
    crate::config::EngineConfig::default().sample_rate as f64
}
