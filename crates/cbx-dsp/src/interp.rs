//! Sample interpolation: 4-tap cubic Lagrange, with a 2-tap linear
//! fallback for layers/voices that opt out of the extra taps.

/// 4-tap cubic Lagrange interpolation: `x0..x3` straddle the sample at
/// `t == 0` (`x1`) through `t == 1` (`x2`); `x0`/`x3` are the taps either
/// side used to shape the curve.
#[inline]
pub fn cubic_lagrange(x0: f64, x1: f64, x2: f64, x3: f64, t: f64) -> f64 {
    let c0 = -t * (t - 1.0) * (t - 2.0);
    let c1 = 3.0 * (t + 1.0) * (t - 1.0) * (t - 2.0);
    let c2 = -3.0 * (t + 1.0) * t * (t - 2.0);
    let c3 = (t + 1.0) * t * (t - 1.0);
    (c0 * x0 + c1 * x1 + c2 * x2 + c3 * x3) / 6.0
}

/// 2-tap linear interpolation, the fallback when cubic taps aren't
/// available (e.g. right at the start of a non-looped sample).
#[inline]
pub fn linear(x1: f64, x2: f64, t: f64) -> f64 {
    (1.0 - t) * x1 + t * x2
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn cubic_matches_endpoints() {
        assert_relative_eq!(cubic_lagrange(0.0, 1.0, 2.0, 3.0, 0.0), 1.0, epsilon = 1e-9);
        assert_relative_eq!(cubic_lagrange(0.0, 1.0, 2.0, 3.0, 1.0), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn cubic_is_exact_for_linear_ramp() {
        // A perfectly linear sequence of taps should interpolate linearly
        // at any t, since a cubic fit to collinear points is the line itself.
        for i in 0..=10 {
            let t = i as f64 / 10.0;
            let got = cubic_lagrange(-1.0, 0.0, 1.0, 2.0, t);
            assert_relative_eq!(got, t, epsilon = 1e-9);
        }
    }

    #[test]
    fn linear_matches_endpoints() {
        assert_relative_eq!(linear(1.0, 3.0, 0.0), 1.0);
        assert_relative_eq!(linear(1.0, 3.0, 1.0), 3.0);
        assert_relative_eq!(linear(1.0, 3.0, 0.5), 2.0);
    }
}
