//! cbx-dsp: per-sample building blocks for the sampler voice pipeline —
//! biquad filter, DAHDSR envelope, LFO, interpolation, velocity curve,
//! and gain ramping. No knowledge of voices, MIDI, or the command queue
//! lives here; `cbx-engine` composes these into a voice.

pub mod biquad;
pub mod envelope;
pub mod interp;
pub mod lfo;
pub mod smoothing;
pub mod velcurve;

pub use biquad::{BiquadCoeffs, BiquadFilter, FilterType};
pub use envelope::{EnvelopeGenerator, EnvelopeShape, EnvelopeStage};
pub use lfo::{Lfo, LfoShape};
pub use smoothing::GainRamp;
pub use velcurve::{Velcurve, VelcurveMode};
