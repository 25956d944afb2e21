//! SFZ-style region/group descriptor (spec §3 `SamplerLayer`) and the
//! builder that lets a `<region>` inherit unset fields from its enclosing
//! `<group>` before being finalized into an immutable, voice-ready layer.
//!
//! The SFZ loader (`crate::sfz`) is the only thing that constructs
//! [`LayerBuilder`]s; everything downstream (voice allocation, per-block
//! DSP) only ever sees a finalized [`SamplerLayer`], whose envelope/LFO
//! shapes are already precomputed for a fixed sample rate (spec §9: "Layer
//! finalisation builds an immutable `EnvelopeShape`").

use std::sync::Arc;

use cbx_core::waveform::WaveformHandle;
use cbx_dsp::biquad::FilterType;
use cbx_dsp::envelope::EnvelopeShape;
use cbx_dsp::lfo::LfoShape;
use cbx_dsp::velcurve::{Velcurve, VelcurveMode};

/// `loop_mode` per spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    NoLoop,
    OneShot,
    LoopContinuous,
    LoopSustain,
}

/// One entry in a layer's note-init function list (spec §4.6: "a tagged
/// closure `(kind_id, integer_variant, float_param)`"). Applied, in order,
/// once per voice trigger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NifKind {
    /// Adds a uniform random offset in `[-amount, +amount]` cents to pitch.
    RandomPitchCents,
    /// Adds a uniform random offset in `[-amount, +amount]` linear gain.
    RandomAmp,
    /// Adds a uniform random offset in `[-amount, +amount]` cents to the
    /// filter cutoff.
    RandomFilterCents,
    /// Scales pitch by `amount` cents per unit of (velocity/127).
    VelocityToPitchCents,
    /// Scales filter cutoff by `amount` cents per unit of (velocity/127).
    VelocityToFilterCents,
    /// Scales the amp envelope's decay stage length by `amount` (as a
    /// multiplier per unit of velocity/127 away from 1.0).
    VelocityToAmpDecay,
    /// Adds `amount` seconds of amp-envelope delay per (cc_value/127),
    /// reading `variant` as the CC number.
    CcToAmpDelay,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nif {
    pub kind: NifKind,
    pub variant: i32,
    pub amount: f64,
}

/// Modulation-matrix source per spec §3 ("fixed modulation matrix (list of
/// (source, optional source2, dest, amount, flags))").
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModSource {
    AmpLfo,
    FilterLfo,
    PitchLfo,
    AmpEnv,
    FilterEnv,
    PitchEnv,
    Velocity,
    Channel(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModDest {
    Amp,
    Pan,
    Cutoff,
    Resonance,
    Pitch,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModRoute {
    pub source: ModSource,
    pub source2: Option<ModSource>,
    pub dest: ModDest,
    pub amount: f64,
}

/// One `sw_down`/`sw_up`/`sw_last`/`sw_previous` keyswitch gate. All
/// conditions present on a layer must hold for it to be eligible on a
/// given note-on (spec §4.6: "whose sw_down/sw_up/sw_last/sw_previous
/// conditions hold").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchCondition {
    Down(u8),
    Up(u8),
    Last(u8),
    Previous(u8),
}

/// Second-denominated DAHDSR parameters as read from SFZ text, before
/// being converted to an `EnvelopeShape` at a concrete sample rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvParams {
    pub start: f64,
    pub delay: f64,
    pub attack: f64,
    pub hold: f64,
    pub decay: f64,
    /// `0..=1`, already divided by 100 if parsed from a percentage.
    pub sustain: f64,
    pub release: f64,
    pub depth: f64,
}

impl Default for EnvParams {
    fn default() -> Self {
        Self { start: 0.0, delay: 0.0, attack: 0.0, hold: 0.0, decay: 0.0, sustain: 1.0, release: 0.0, depth: 0.0 }
    }
}

impl EnvParams {
    fn to_shape(self, sample_rate: f64) -> EnvelopeShape {
        EnvelopeShape::from_seconds(self.start, self.delay, self.attack, self.hold, self.decay, self.sustain, self.release, sample_rate)
    }
}

/// Second-denominated LFO parameters, pre-conversion.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LfoParams {
    pub freq: f64,
    pub delay: f64,
    pub fade: f64,
    pub depth: f64,
}

/// An immutable, fully resolved SFZ region — the result of merging a
/// `<region>`'s explicit keys over its enclosing `<group>`'s and
/// precomputing every sample-rate-dependent shape. Cheap to clone (one
/// `Arc<Waveform>` plus small `Vec`s); voices hold a clone.
#[derive(Debug, Clone)]
pub struct SamplerLayer {
    pub waveform: WaveformHandle,

    pub lokey: u8,
    pub hikey: u8,
    pub lovel: u8,
    pub hivel: u8,
    pub root_key: u8,
    /// Cents of detune.
    pub tune_cents: f64,
    pub transpose_semitones: i32,
    /// Cents per semitone of key distance from `root_key` (SFZ
    /// `pitch_keytrack`, default 100 = standard equal temperament).
    pub key_scaling_cents: f64,

    /// `-1` (modeled as `None`) means no loop, per spec's sentinel.
    pub loop_start: Option<u64>,
    pub loop_end: u64,
    pub sample_start: u64,
    pub sample_end: u64,
    pub loop_mode: LoopMode,

    pub amp_env: EnvelopeShape,
    pub filter_env: EnvelopeShape,
    pub pitch_env: EnvelopeShape,
    pub fileg_depth_cents: f64,
    pub pitcheg_depth_cents: f64,

    pub amp_lfo: LfoShape,
    pub filter_lfo: LfoShape,
    pub pitch_lfo: LfoShape,
    pub fillfo_depth_cents: f64,
    pub pitchlfo_depth_cents: f64,

    pub filter_type: FilterType,
    pub cutoff_hz: f64,
    pub resonance_q: f64,
    pub fil_veltrack: f64,

    pub mod_matrix: Vec<ModRoute>,
    pub nifs: Vec<Nif>,

    pub exclusive_group: Option<i32>,
    pub off_by: Option<i32>,

    pub velcurve: Velcurve,
    pub gain: f64,
    pub pan: f64,

    pub effect1_send: f64,
    pub effect2_send: f64,
    pub effect1_bus: u8,
    pub effect2_bus: u8,

    pub switch_conditions: Vec<SwitchCondition>,
    pub sw_lokey: Option<u8>,
    pub sw_hikey: Option<u8>,
}

impl SamplerLayer {
    pub fn matches_key_vel(&self, note: u8, velocity: u8) -> bool {
        note >= self.lokey && note <= self.hikey && velocity >= self.lovel && velocity <= self.hivel
    }

    pub fn is_keyswitch(&self, note: u8) -> bool {
        match (self.sw_lokey, self.sw_hikey) {
            (Some(lo), Some(hi)) => note >= lo && note <= hi,
            _ => false,
        }
    }
}

/// A partially specified layer, as accumulated from SFZ `key=value` pairs
/// inside one `<group>` or `<region>` block. `None` means "not set in this
/// block"; [`LayerBuilder::merged_over`] fills those from a parent.
#[derive(Debug, Clone, Default)]
pub struct LayerBuilder {
    pub sample_path: Option<String>,
    pub lokey: Option<u8>,
    pub hikey: Option<u8>,
    pub lovel: Option<u8>,
    pub hivel: Option<u8>,
    pub root_key: Option<u8>,
    pub tune_cents: Option<f64>,
    pub transpose_semitones: Option<i32>,
    pub key_scaling_cents: Option<f64>,

    pub offset: Option<u64>,
    pub loop_start: Option<i64>,
    pub loop_end: Option<i64>,
    pub loop_mode: Option<LoopMode>,

    pub amp_env: Option<EnvParams>,
    pub filter_env: Option<EnvParams>,
    pub pitch_env: Option<EnvParams>,

    pub amp_lfo: Option<LfoParams>,
    pub filter_lfo: Option<LfoParams>,
    pub pitch_lfo: Option<LfoParams>,

    pub filter_type: Option<FilterType>,
    pub cutoff_hz: Option<f64>,
    pub resonance_q: Option<f64>,
    pub fil_veltrack: Option<f64>,

    pub mod_matrix: Vec<ModRoute>,
    pub nifs: Vec<Nif>,

    pub exclusive_group: Option<i32>,
    pub off_by: Option<i32>,

    pub velcurve_points: Vec<(u8, f64)>,
    pub velcurve_quadratic: Option<bool>,
    pub gain_db: Option<f64>,
    pub pan_percent: Option<f64>,

    pub effect1_send: Option<f64>,
    pub effect2_send: Option<f64>,
    pub effect1_bus: Option<u8>,
    pub effect2_bus: Option<u8>,

    pub switch_conditions: Vec<SwitchCondition>,
    pub sw_lokey: Option<u8>,
    pub sw_hikey: Option<u8>,
}

fn first<T: Copy>(a: Option<T>, b: Option<T>) -> Option<T> {
    a.or(b)
}

impl LayerBuilder {
    /// Build a region's effective settings by taking every field this
    /// block set explicitly and falling back to `group`'s for the rest
    /// (spec §3: "a region layer may have a parent group layer; unset
    /// fields take the parent's value").
    pub fn merged_over(&self, group: &LayerBuilder) -> LayerBuilder {
        LayerBuilder {
            sample_path: self.sample_path.clone().or_else(|| group.sample_path.clone()),
            lokey: first(self.lokey, group.lokey),
            hikey: first(self.hikey, group.hikey),
            lovel: first(self.lovel, group.lovel),
            hivel: first(self.hivel, group.hivel),
            root_key: first(self.root_key, group.root_key),
            tune_cents: first(self.tune_cents, group.tune_cents),
            transpose_semitones: first(self.transpose_semitones, group.transpose_semitones),
            key_scaling_cents: first(self.key_scaling_cents, group.key_scaling_cents),
            offset: first(self.offset, group.offset),
            loop_start: first(self.loop_start, group.loop_start),
            loop_end: first(self.loop_end, group.loop_end),
            loop_mode: first(self.loop_mode, group.loop_mode),
            amp_env: first(self.amp_env, group.amp_env),
            filter_env: first(self.filter_env, group.filter_env),
            pitch_env: first(self.pitch_env, group.pitch_env),
            amp_lfo: first(self.amp_lfo, group.amp_lfo),
            filter_lfo: first(self.filter_lfo, group.filter_lfo),
            pitch_lfo: first(self.pitch_lfo, group.pitch_lfo),
            filter_type: first(self.filter_type, group.filter_type),
            cutoff_hz: first(self.cutoff_hz, group.cutoff_hz),
            resonance_q: first(self.resonance_q, group.resonance_q),
            fil_veltrack: first(self.fil_veltrack, group.fil_veltrack),
            mod_matrix: if self.mod_matrix.is_empty() { group.mod_matrix.clone() } else { self.mod_matrix.clone() },
            nifs: if self.nifs.is_empty() { group.nifs.clone() } else { self.nifs.clone() },
            exclusive_group: first(self.exclusive_group, group.exclusive_group),
            off_by: first(self.off_by, group.off_by),
            velcurve_points: if self.velcurve_points.is_empty() { group.velcurve_points.clone() } else { self.velcurve_points.clone() },
            velcurve_quadratic: first(self.velcurve_quadratic, group.velcurve_quadratic),
            gain_db: first(self.gain_db, group.gain_db),
            pan_percent: first(self.pan_percent, group.pan_percent),
            effect1_send: first(self.effect1_send, group.effect1_send),
            effect2_send: first(self.effect2_send, group.effect2_send),
            effect1_bus: first(self.effect1_bus, group.effect1_bus),
            effect2_bus: first(self.effect2_bus, group.effect2_bus),
            switch_conditions: if self.switch_conditions.is_empty() { group.switch_conditions.clone() } else { self.switch_conditions.clone() },
            sw_lokey: first(self.sw_lokey, group.sw_lokey),
            sw_hikey: first(self.sw_hikey, group.sw_hikey),
        }
    }

    /// Resolve into an immutable [`SamplerLayer`], precomputing every
    /// sample-rate-dependent shape. `waveform` is the already-decoded
    /// sample this region points at (resolved by the SFZ loader via the
    /// wave bank, using `sample_path`).
    pub fn finalize(&self, waveform: WaveformHandle, sample_rate: f64) -> SamplerLayer {
        let root_key = self.root_key.unwrap_or(60);
        let sample_end = waveform.frames.saturating_sub(1);
        let loop_end = self.loop_end.filter(|&v| v >= 0).map(|v| v as u64).unwrap_or(sample_end);
        let loop_start = match self.loop_start {
            Some(v) if v >= 0 => Some(v as u64),
            _ => None,
        };
        let loop_mode = self.loop_mode.unwrap_or(LoopMode::NoLoop);
        let velcurve = if self.velcurve_points.is_empty() {
            Velcurve::default_linear()
        } else {
            let mode = if self.velcurve_quadratic.unwrap_or(false) { VelcurveMode::Quadratic } else { VelcurveMode::Linear };
            Velcurve::from_points(&self.velcurve_points, mode)
        };

        SamplerLayer {
            waveform,
            lokey: self.lokey.unwrap_or(0),
            hikey: self.hikey.unwrap_or(127),
            lovel: self.lovel.unwrap_or(0),
            hivel: self.hivel.unwrap_or(127),
            root_key,
            tune_cents: self.tune_cents.unwrap_or(0.0),
            transpose_semitones: self.transpose_semitones.unwrap_or(0),
            key_scaling_cents: self.key_scaling_cents.unwrap_or(100.0),
            loop_start: if matches!(loop_mode, LoopMode::NoLoop | LoopMode::OneShot) { None } else { loop_start.or(Some(0)) },
            loop_end,
            sample_start: self.offset.unwrap_or(0),
            sample_end,
            loop_mode,
            amp_env: self.amp_env.unwrap_or_default().to_shape(sample_rate),
            filter_env: self.filter_env.map(|e| e.to_shape(sample_rate)).unwrap_or_else(EnvelopeShape::instant_on),
            pitch_env: self.pitch_env.map(|e| e.to_shape(sample_rate)).unwrap_or_else(EnvelopeShape::instant_on),
            fileg_depth_cents: self.filter_env.map(|e| e.depth).unwrap_or(0.0),
            pitcheg_depth_cents: self.pitch_env.map(|e| e.depth).unwrap_or(0.0),
            amp_lfo: self.amp_lfo.map(lfo_params_to_shape(sample_rate)).unwrap_or_else(LfoShape::silent),
            filter_lfo: self.filter_lfo.map(lfo_params_to_shape(sample_rate)).unwrap_or_else(LfoShape::silent),
            pitch_lfo: self.pitch_lfo.map(lfo_params_to_shape(sample_rate)).unwrap_or_else(LfoShape::silent),
            fillfo_depth_cents: self.filter_lfo.map(|l| l.depth).unwrap_or(0.0),
            pitchlfo_depth_cents: self.pitch_lfo.map(|l| l.depth).unwrap_or(0.0),
            filter_type: self.filter_type.unwrap_or(FilterType::Lowpass),
            cutoff_hz: self.cutoff_hz.unwrap_or(0.0),
            resonance_q: self.resonance_q.unwrap_or(0.707),
            fil_veltrack: self.fil_veltrack.unwrap_or(0.0),
            mod_matrix: self.mod_matrix.clone(),
            nifs: self.nifs.clone(),
            exclusive_group: self.exclusive_group,
            off_by: self.off_by,
            velcurve,
            gain: db_to_gain(self.gain_db.unwrap_or(0.0)),
            pan: (self.pan_percent.unwrap_or(0.0) / 100.0).clamp(-1.0, 1.0),
            effect1_send: self.effect1_send.unwrap_or(0.0),
            effect2_send: self.effect2_send.unwrap_or(0.0),
            effect1_bus: self.effect1_bus.unwrap_or(0),
            effect2_bus: self.effect2_bus.unwrap_or(0),
            switch_conditions: self.switch_conditions.clone(),
            sw_lokey: self.sw_lokey,
            sw_hikey: self.sw_hikey,
        }
    }
}

fn lfo_params_to_shape(sample_rate: f64) -> impl Fn(LfoParams) -> LfoShape {
    move |p: LfoParams| LfoShape::from_seconds(p.freq, p.delay, p.fade, p.depth, sample_rate)
}

pub fn db_to_gain(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Reference to a layer shared between a program and the voices it spawns.
pub type LayerHandle = Arc<SamplerLayer>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use cbx_core::waveform::Waveform;

    fn waveform() -> WaveformHandle {
        Arc::new(Waveform::new(1, PathBuf::from("x.wav"), vec![0i16; 2000], 1, 48000))
    }

    #[test]
    fn region_inherits_unset_fields_from_group() {
        let mut group = LayerBuilder::default();
        group.cutoff_hz = Some(2000.0);
        group.gain_db = Some(-6.0);

        let mut region = LayerBuilder::default();
        region.lokey = Some(36);
        region.hikey = Some(36);

        let merged = region.merged_over(&group);
        assert_eq!(merged.cutoff_hz, Some(2000.0));
        assert_eq!(merged.lokey, Some(36));

        let layer = merged.finalize(waveform(), 48_000.0);
        assert_eq!(layer.cutoff_hz, 2000.0);
        assert!((layer.gain - db_to_gain(-6.0)).abs() < 1e-9);
    }

    #[test]
    fn region_override_wins_over_group() {
        let mut group = LayerBuilder::default();
        group.cutoff_hz = Some(2000.0);
        let mut region = LayerBuilder::default();
        region.cutoff_hz = Some(4000.0);
        let merged = region.merged_over(&group);
        assert_eq!(merged.cutoff_hz, Some(4000.0));
    }

    #[test]
    fn no_loop_mode_clears_loop_start_sentinel() {
        let mut builder = LayerBuilder::default();
        builder.loop_mode = Some(LoopMode::NoLoop);
        builder.loop_start = Some(100);
        let layer = builder.finalize(waveform(), 48_000.0);
        assert_eq!(layer.loop_start, None);
    }

    #[test]
    fn loop_continuous_defaults_start_to_zero_when_unset() {
        let mut builder = LayerBuilder::default();
        builder.loop_mode = Some(LoopMode::LoopContinuous);
        let layer = builder.finalize(waveform(), 48_000.0);
        assert_eq!(layer.loop_start, Some(0));
    }
}
