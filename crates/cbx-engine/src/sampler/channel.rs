//! [`SamplerChannel`] (spec §3): per-MIDI-channel runtime state — pitch
//! bend, 14-bit controller values, sustain/sostenuto, the current program,
//! and the keyswitch tracking `SamplerLayer::switch_conditions` reads.

use std::sync::Arc;

use super::program::SamplerProgram;

/// 14-bit controller value, as a 7-bit MIDI value shifted left by 7 (spec
/// §3: "volume/pan/expression/modulation (7-bit shifted to 14-bit
/// internal)"). `8192` is centered for bipolar uses (pan).
pub const CONTROLLER_MAX: i32 = 127 << 7;
pub const CONTROLLER_CENTER: i32 = 64 << 7;

#[derive(Debug, Clone)]
pub struct SamplerChannel {
    pub program: Option<Arc<SamplerProgram>>,

    /// Precomputed multiplicative pitch-bend factor (spec §4.6: "Pitch
    /// bend is stored as a precomputed multiplicative factor"), recomputed
    /// whenever the raw 14-bit value or the range changes.
    pitch_bend_factor: f64,
    pitch_bend_value14: i32,
    pub pitch_bend_range_semitones: f64,

    pub volume: i32,
    pub pan: i32,
    pub expression: i32,
    pub modulation: i32,

    pub sustain: bool,
    pub sostenuto: bool,

    /// CC 74/71 offsets, in cents / a `2^(cc/64)` ratio respectively, per
    /// spec §4.6.
    pub cutoff_cc_offset_cents: f64,
    pub resonance_cc_offset: f64,

    keys_held: [bool; 128],
    pub last_switch: Option<u8>,
    pub previous_switch: Option<u8>,
}

impl Default for SamplerChannel {
    fn default() -> Self {
        Self {
            program: None,
            pitch_bend_factor: 1.0,
            pitch_bend_value14: 8192,
            pitch_bend_range_semitones: 2.0,
            volume: CONTROLLER_MAX,
            pan: CONTROLLER_CENTER,
            expression: CONTROLLER_MAX,
            modulation: 0,
            sustain: false,
            sostenuto: false,
            cutoff_cc_offset_cents: 0.0,
            resonance_cc_offset: 0.0,
            keys_held: [false; 128],
            last_switch: None,
            previous_switch: None,
        }
    }
}

impl SamplerChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pitch_bend_factor(&self) -> f64 {
        self.pitch_bend_factor
    }

    /// Recomputes the cached pitch-bend factor from a raw 14-bit value
    /// (`0..16383`, center `8192`): `2^((value14 - 8192) * range / (1200 *
    /// 8192))` per spec §4.6.
    pub fn set_pitch_bend14(&mut self, value14: i32) {
        self.pitch_bend_value14 = value14;
        self.recompute_pitch_bend();
    }

    pub fn set_pitch_bend_range(&mut self, semitones: f64) {
        self.pitch_bend_range_semitones = semitones;
        self.recompute_pitch_bend();
    }

    fn recompute_pitch_bend(&mut self) {
        let cents_range = self.pitch_bend_range_semitones * 100.0;
        let normalized = (self.pitch_bend_value14 - 8192) as f64 / 8192.0;
        self.pitch_bend_factor = 2f64.powf(normalized * cents_range / 1200.0);
    }

    pub fn is_key_held(&self, note: u8) -> bool {
        self.keys_held[(note & 0x7F) as usize]
    }

    pub fn press_key(&mut self, note: u8) {
        self.keys_held[(note & 0x7F) as usize] = true;
    }

    pub fn release_key(&mut self, note: u8) {
        self.keys_held[(note & 0x7F) as usize] = false;
    }

    /// Records `note` as the most recently struck keyswitch, per spec §6
    /// `sw_last`/`sw_previous` semantics.
    pub fn note_switch(&mut self, note: u8) {
        self.previous_switch = self.last_switch;
        self.last_switch = Some(note);
    }

    /// Resets CC-derived state to SFZ/GM defaults (spec §4.6: "CC 121 →
    /// reset controllers to defaults"). Program selection and pitch-bend
    /// range are untouched — those aren't "controllers" in the GM sense.
    pub fn reset_controllers(&mut self) {
        self.volume = CONTROLLER_MAX;
        self.pan = CONTROLLER_CENTER;
        self.expression = CONTROLLER_MAX;
        self.modulation = 0;
        self.sustain = false;
        self.sostenuto = false;
        self.cutoff_cc_offset_cents = 0.0;
        self.resonance_cc_offset = 0.0;
        self.set_pitch_bend14(8192);
    }
}
