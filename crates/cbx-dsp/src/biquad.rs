//! RBJ cookbook biquad filter, scalar transposed-direct-form-II.
//!
//! The reference this is grounded on computes coefficients in `f64` and
//! runs the per-sample state update on a `std::simd` lane group (one lane
//! per voice) to get four voices' worth of filtering per instruction. That
//! requires a nightly toolchain. Here every voice owns one [`BiquadFilter`]
//! and processes scalar `f64` samples instead — slower per-voice, but it
//! builds on stable and the per-voice state is what spec's "biquad filter
//! state (L and R)" already calls for.

use std::f64::consts::PI;

/// The filter shapes the sampler's per-layer `fil_type` can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    Lowpass,
    Highpass,
    Bandpass,
    /// Peaking EQ — not reachable from `fil_type` but used by aux/insert
    /// chains that want a parametric bump/cut rather than a cutoff.
    Peaking,
}

/// Normalized biquad coefficients, `a0` already divided out.
#[derive(Debug, Clone, Copy)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoeffs {
    /// Identity (bypass) coefficients — used before the first `set_params`
    /// call and whenever `cutoff <= 0`.
    pub const fn identity() -> Self {
        Self { b0: 1.0, b1: 0.0, b2: 0.0, a1: 0.0, a2: 0.0 }
    }

    /// Design a biquad for `filter_type` at `cutoff_hz` with resonance `q`,
    /// sampled at `sample_rate`. `q` is clamped away from zero to avoid a
    /// divide-by-zero in the cookbook formulas; `gain_db` is only consulted
    /// for [`FilterType::Peaking`].
    pub fn design(filter_type: FilterType, cutoff_hz: f64, q: f64, gain_db: f64, sample_rate: f64) -> Self {
        if cutoff_hz <= 0.0 || sample_rate <= 0.0 {
            return Self::identity();
        }
        let q = q.max(1e-4);
        let nyquist = sample_rate * 0.5;
        let freq = cutoff_hz.min(nyquist * 0.999);
        let omega = 2.0 * PI * freq / sample_rate;
        let sin_w = omega.sin();
        let cos_w = omega.cos();
        let alpha = sin_w / (2.0 * q);

        let (b0, b1, b2, a0, a1, a2) = match filter_type {
            FilterType::Lowpass => {
                let b1 = 1.0 - cos_w;
                let b0 = b1 / 2.0;
                let b2 = b0;
                let a0 = 1.0 + alpha;
                let a1 = -2.0 * cos_w;
                let a2 = 1.0 - alpha;
                (b0, b1, b2, a0, a1, a2)
            }
            FilterType::Highpass => {
                let b0 = (1.0 + cos_w) / 2.0;
                let b1 = -(1.0 + cos_w);
                let b2 = b0;
                let a0 = 1.0 + alpha;
                let a1 = -2.0 * cos_w;
                let a2 = 1.0 - alpha;
                (b0, b1, b2, a0, a1, a2)
            }
            FilterType::Bandpass => {
                // Constant 0 dB peak gain variant.
                let b0 = alpha;
                let b1 = 0.0;
                let b2 = -alpha;
                let a0 = 1.0 + alpha;
                let a1 = -2.0 * cos_w;
                let a2 = 1.0 - alpha;
                (b0, b1, b2, a0, a1, a2)
            }
            FilterType::Peaking => {
                let a = 10f64.powf(gain_db / 40.0);
                let b0 = 1.0 + alpha * a;
                let b1 = -2.0 * cos_w;
                let b2 = 1.0 - alpha * a;
                let a0 = 1.0 + alpha / a;
                let a1 = -2.0 * cos_w;
                let a2 = 1.0 - alpha / a;
                (b0, b1, b2, a0, a1, a2)
            }
        };

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        Self::identity()
    }
}

/// One channel's worth of biquad filter state. The sampler voice owns two
/// (left, right) so stereo-widened layers don't cross-pollinate history.
#[derive(Debug, Clone, Copy, Default)]
pub struct BiquadFilter {
    coeffs: BiquadCoeffs,
    z1: f64,
    z2: f64,
}

impl BiquadFilter {
    pub fn new() -> Self {
        Self { coeffs: BiquadCoeffs::identity(), z1: 0.0, z2: 0.0 }
    }

    pub fn set_coeffs(&mut self, coeffs: BiquadCoeffs) {
        self.coeffs = coeffs;
    }

    pub fn coeffs(&self) -> BiquadCoeffs {
        self.coeffs
    }

    /// Clears filter history without touching the coefficients — used on
    /// voice (re)start so a reused voice slot doesn't ring with the
    /// previous note's tail.
    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }

    #[inline]
    pub fn process_sample(&mut self, input: f64) -> f64 {
        let output = self.coeffs.b0 * input + self.z1;
        self.z1 = self.coeffs.b1 * input - self.coeffs.a1 * output + self.z2;
        self.z2 = self.coeffs.b2 * input - self.coeffs.a2 * output;
        output
    }

    pub fn process_block(&mut self, buffer: &mut [f64]) {
        for sample in buffer.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn identity_coeffs_pass_signal_through() {
        let mut f = BiquadFilter::new();
        assert_relative_eq!(f.process_sample(0.5), 0.5);
        assert_relative_eq!(f.process_sample(-0.25), -0.25);
    }

    #[test]
    fn lowpass_attenuates_nyquist_tone() {
        let sr = 48_000.0;
        let coeffs = BiquadCoeffs::design(FilterType::Lowpass, 1_000.0, 0.707, 0.0, sr);
        let mut f = BiquadFilter::new();
        f.set_coeffs(coeffs);

        // Drive with a signal at (near) Nyquist; a 1kHz lowpass should
        // suppress it hard relative to unity gain.
        let n = 4096;
        let mut peak = 0.0f64;
        for i in 0..n {
            let t = i as f64;
            let x = if i % 2 == 0 { 1.0 } else { -1.0 };
            let y = f.process_sample(x);
            let _ = t;
            peak = peak.max(y.abs());
        }
        assert!(peak < 0.2, "expected strong attenuation near Nyquist, got peak {peak}");
    }

    #[test]
    fn highpass_passes_nyquist_tone() {
        let sr = 48_000.0;
        let coeffs = BiquadCoeffs::design(FilterType::Highpass, 1_000.0, 0.707, 0.0, sr);
        let mut f = BiquadFilter::new();
        f.set_coeffs(coeffs);

        let n = 256;
        let mut peak = 0.0f64;
        for i in 32..n {
            let x = if i % 2 == 0 { 1.0 } else { -1.0 };
            let y = f.process_sample(x);
            peak = peak.max(y.abs());
        }
        assert!(peak > 0.7, "expected near-unity pass near Nyquist, got peak {peak}");
    }

    #[test]
    fn reset_clears_history_not_coeffs() {
        let mut f = BiquadFilter::new();
        f.set_coeffs(BiquadCoeffs::design(FilterType::Lowpass, 500.0, 1.0, 0.0, 48_000.0));
        f.process_sample(1.0);
        f.process_sample(1.0);
        let coeffs_before = f.coeffs();
        f.reset();
        assert_eq!(f.z1, 0.0);
        assert_eq!(f.z2, 0.0);
        assert_eq!(f.coeffs().b0, coeffs_before.b0);
    }

    #[test]
    fn non_positive_cutoff_is_bypass() {
        let coeffs = BiquadCoeffs::design(FilterType::Lowpass, 0.0, 0.7, 0.0, 48_000.0);
        assert_relative_eq!(coeffs.b0, 1.0);
        assert_relative_eq!(coeffs.b1, 0.0);
        assert_relative_eq!(coeffs.a1, 0.0);
    }
}
