//! 128-entry velocity→gain curve. A layer's explicit `amp_velcurve_NN`
//! keys give a handful of (velocity, gain) points; the rest of the table
//! is filled by interpolating between them, linearly or quadratically.

pub const VELOCITY_STEPS: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VelcurveMode {
    Linear,
    Quadratic,
}

/// A fully resolved 0..128 velocity→gain table, precomputed once at
/// program load so note-on just indexes it.
#[derive(Debug, Clone)]
pub struct Velcurve {
    table: [f64; VELOCITY_STEPS],
}

impl Velcurve {
    /// The SFZ default: linear ramp from 0 at velocity 0 to 1 at velocity 127.
    pub fn default_linear() -> Self {
        Self::from_points(&[(0, 0.0), (127, 1.0)], VelcurveMode::Linear)
    }

    /// Build the table from explicit `(velocity, gain)` points (as given
    /// by `amp_velcurve_NN=value` keys), sorted by velocity. Points
    /// outside `0..=127` are clamped; if no point gives velocity 0 or
    /// 127, the first/last explicit point's gain extends flat to the
    /// table edges.
    pub fn from_points(points: &[(u8, f64)], mode: VelcurveMode) -> Self {
        let mut pts: Vec<(u8, f64)> = points.to_vec();
        pts.sort_by_key(|(v, _)| *v);
        pts.dedup_by_key(|(v, _)| *v);

        let mut table = [0.0f64; VELOCITY_STEPS];
        if pts.is_empty() {
            return Self::default_linear();
        }

        for vel in 0..VELOCITY_STEPS {
            let vel_u8 = vel as u8;
            table[vel] = match pts.binary_search_by_key(&vel_u8, |(v, _)| *v) {
                Ok(idx) => pts[idx].1,
                Err(0) => pts[0].1,
                Err(idx) if idx >= pts.len() => pts[pts.len() - 1].1,
                Err(idx) => {
                    let (v_lo, g_lo) = pts[idx - 1];
                    let (v_hi, g_hi) = pts[idx];
                    let span = (v_hi - v_lo) as f64;
                    let t = if span > 0.0 { (vel_u8 - v_lo) as f64 / span } else { 0.0 };
                    let t = match mode {
                        VelcurveMode::Linear => t,
                        VelcurveMode::Quadratic => t * t,
                    };
                    g_lo + t * (g_hi - g_lo)
                }
            };
        }
        Self { table }
    }

    #[inline]
    pub fn gain(&self, velocity: u8) -> f64 {
        self.table[(velocity as usize).min(VELOCITY_STEPS - 1)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn default_linear_spans_zero_to_one() {
        let vc = Velcurve::default_linear();
        assert_relative_eq!(vc.gain(0), 0.0, epsilon = 1e-9);
        assert_relative_eq!(vc.gain(127), 1.0, epsilon = 1e-9);
        assert_relative_eq!(vc.gain(64), 64.0 / 127.0, epsilon = 1e-3);
    }

    #[test]
    fn explicit_points_are_exact() {
        let vc = Velcurve::from_points(&[(0, 0.1), (63, 0.5), (127, 1.0)], VelcurveMode::Linear);
        assert_relative_eq!(vc.gain(0), 0.1);
        assert_relative_eq!(vc.gain(63), 0.5);
        assert_relative_eq!(vc.gain(127), 1.0);
    }

    #[test]
    fn quadratic_mode_curves_toward_the_upper_point() {
        let linear = Velcurve::from_points(&[(0, 0.0), (127, 1.0)], VelcurveMode::Linear);
        let quad = Velcurve::from_points(&[(0, 0.0), (127, 1.0)], VelcurveMode::Quadratic);
        assert!(quad.gain(32) < linear.gain(32));
    }

    #[test]
    fn missing_edge_points_extend_flat() {
        let vc = Velcurve::from_points(&[(40, 0.2), (80, 0.8)], VelcurveMode::Linear);
        assert_relative_eq!(vc.gain(0), 0.2);
        assert_relative_eq!(vc.gain(127), 0.8);
    }
}
