//! Linear per-block ramps — used for voice left/right gain, which must
//! move smoothly from the previous block's value to this block's target
//! rather than stepping (stepping produces an audible click).

/// Linearly interpolated ramp across a fixed number of steps, advanced
/// one step at a time. Each voice keeps one per channel (left, right).
#[derive(Debug, Clone, Copy, Default)]
pub struct GainRamp {
    current: f32,
    target: f32,
    step: f32,
    steps_remaining: u32,
}

impl GainRamp {
    pub fn new(initial: f32) -> Self {
        Self { current: initial, target: initial, step: 0.0, steps_remaining: 0 }
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    /// Start a new ramp from the current value to `target` over
    /// `block_size` steps (spec's BLOCK_SIZE — the ramp completes exactly
    /// at the block boundary so `last_gain` lines up with the new target).
    pub fn set_target(&mut self, target: f32, block_size: u32) {
        self.target = target;
        if block_size == 0 {
            self.current = target;
            self.steps_remaining = 0;
            self.step = 0.0;
            return;
        }
        self.steps_remaining = block_size;
        self.step = (target - self.current) / block_size as f32;
    }

    /// Advance one sample's worth, returning the new current value.
    #[inline]
    pub fn advance(&mut self) -> f32 {
        if self.steps_remaining > 0 {
            self.current += self.step;
            self.steps_remaining -= 1;
            if self.steps_remaining == 0 {
                self.current = self.target;
            }
        }
        self.current
    }

    /// Snap immediately to a value with no ramp — used on voice (re)start.
    pub fn reset_to(&mut self, value: f32) {
        self.current = value;
        self.target = value;
        self.steps_remaining = 0;
        self.step = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn ramps_linearly_and_lands_exactly_on_target() {
        let mut ramp = GainRamp::new(0.0);
        ramp.set_target(1.0, 16);
        let mut last = 0.0;
        for _ in 0..16 {
            last = ramp.advance();
        }
        assert_relative_eq!(last, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn zero_block_size_snaps_immediately() {
        let mut ramp = GainRamp::new(0.2);
        ramp.set_target(0.9, 0);
        assert_relative_eq!(ramp.current(), 0.9);
    }

    #[test]
    fn reset_to_clears_any_in_flight_ramp() {
        let mut ramp = GainRamp::new(0.0);
        ramp.set_target(1.0, 16);
        ramp.advance();
        ramp.reset_to(0.5);
        assert_relative_eq!(ramp.current(), 0.5);
        assert_relative_eq!(ramp.advance(), 0.5);
    }
}
