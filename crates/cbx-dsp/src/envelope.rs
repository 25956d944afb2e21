//! DAHDSR envelope: delay, attack, hold, decay, sustain, release, with an
//! explicit start level. [`EnvelopeShape`] is the per-layer, sample-rate
//! derived description computed once at program load; [`EnvelopeGenerator`]
//! is the per-voice stage machine that walks it every block.
//!
//! The stage machine itself follows the attack/decay/sustain/release
//! generator pattern used elsewhere in the DSP corpus, extended with the
//! delay and hold stages and a configurable start level that DAHDSR adds.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeStage {
    Idle,
    Delay,
    Attack,
    Hold,
    Decay,
    Sustain,
    Release,
}

/// Per-layer envelope description, already converted to sample counts for
/// a fixed sample rate. Built once by the layer finaliser; shared (by
/// value, it's small) across every voice that triggers the layer.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeShape {
    pub start_value: f64,
    pub delay_samples: u64,
    pub attack_samples: u64,
    pub hold_samples: u64,
    pub decay_samples: u64,
    pub sustain_value: f64,
    pub release_samples: u64,
}

impl EnvelopeShape {
    /// Build from SFZ-style second-denominated parameters plus the rate
    /// voices will actually run at. `sustain_value` is already `0..=1`;
    /// the rest are durations in seconds.
    pub fn from_seconds(
        start_value: f64,
        delay: f64,
        attack: f64,
        hold: f64,
        decay: f64,
        sustain_value: f64,
        release: f64,
        sample_rate: f64,
    ) -> Self {
        let to_samples = |seconds: f64| -> u64 { (seconds.max(0.0) * sample_rate).round() as u64 };
        Self {
            start_value: start_value.clamp(0.0, 1.0),
            delay_samples: to_samples(delay),
            attack_samples: to_samples(attack).max(1),
            hold_samples: to_samples(hold),
            decay_samples: to_samples(decay).max(1),
            sustain_value: sustain_value.clamp(0.0, 1.0),
            release_samples: to_samples(release).max(1),
        }
    }

    /// A fixed, instantly-on envelope — used when a layer doesn't specify
    /// one (e.g. the filter envelope on a layer with no `fileg_` keys).
    pub fn instant_on() -> Self {
        Self {
            start_value: 1.0,
            delay_samples: 0,
            attack_samples: 1,
            hold_samples: 0,
            decay_samples: 1,
            sustain_value: 1.0,
            release_samples: 1,
        }
    }
}

/// Per-voice envelope state. Advances one sample (or a whole block, via
/// [`EnvelopeGenerator::advance_block`]) at a time, yielding a `0..=1`
/// (or occasionally >1 for a `start_value` above 1.0) level.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeGenerator {
    shape: EnvelopeShape,
    stage: EnvelopeStage,
    current_value: f64,
    stage_elapsed: u64,
    release_start_value: f64,
}

impl EnvelopeGenerator {
    pub fn new(shape: EnvelopeShape) -> Self {
        Self {
            shape,
            stage: EnvelopeStage::Idle,
            current_value: 0.0,
            stage_elapsed: 0,
            release_start_value: 0.0,
        }
    }

    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    pub fn value(&self) -> f64 {
        self.current_value
    }

    pub fn is_finished(&self) -> bool {
        self.stage == EnvelopeStage::Idle
    }

    /// Note-on: (re)starts the envelope from the shape's start level,
    /// running through delay → attack → hold → decay → sustain.
    pub fn trigger(&mut self) {
        self.current_value = self.shape.start_value;
        self.stage_elapsed = 0;
        self.stage = if self.shape.delay_samples > 0 {
            EnvelopeStage::Delay
        } else {
            EnvelopeStage::Attack
        };
    }

    /// Note-off: jumps straight to the release stage from whatever level
    /// the envelope currently holds — used both by ordinary note-off and
    /// by exclusive-group cutoff, which calls this directly.
    pub fn release(&mut self) {
        if self.stage != EnvelopeStage::Idle {
            self.release_start_value = self.current_value;
            self.stage_elapsed = 0;
            self.stage = EnvelopeStage::Release;
        }
    }

    /// Advance one sample, returning the new level.
    pub fn advance(&mut self) -> f64 {
        match self.stage {
            EnvelopeStage::Idle => {
                self.current_value = 0.0;
            }
            EnvelopeStage::Delay => {
                self.stage_elapsed += 1;
                if self.stage_elapsed >= self.shape.delay_samples {
                    self.stage = EnvelopeStage::Attack;
                    self.stage_elapsed = 0;
                }
            }
            EnvelopeStage::Attack => {
                self.stage_elapsed += 1;
                let t = self.stage_elapsed as f64 / self.shape.attack_samples as f64;
                if t >= 1.0 {
                    self.current_value = 1.0;
                    self.stage_elapsed = 0;
                    self.stage = if self.shape.hold_samples > 0 {
                        EnvelopeStage::Hold
                    } else {
                        EnvelopeStage::Decay
                    };
                } else {
                    self.current_value = self.shape.start_value + t * (1.0 - self.shape.start_value);
                }
            }
            EnvelopeStage::Hold => {
                self.current_value = 1.0;
                self.stage_elapsed += 1;
                if self.stage_elapsed >= self.shape.hold_samples {
                    self.stage = EnvelopeStage::Decay;
                    self.stage_elapsed = 0;
                }
            }
            EnvelopeStage::Decay => {
                self.stage_elapsed += 1;
                let t = self.stage_elapsed as f64 / self.shape.decay_samples as f64;
                if t >= 1.0 {
                    self.current_value = self.shape.sustain_value;
                    self.stage_elapsed = 0;
                    self.stage = EnvelopeStage::Sustain;
                } else {
                    self.current_value = 1.0 - t * (1.0 - self.shape.sustain_value);
                }
            }
            EnvelopeStage::Sustain => {
                self.current_value = self.shape.sustain_value;
            }
            EnvelopeStage::Release => {
                self.stage_elapsed += 1;
                let t = self.stage_elapsed as f64 / self.shape.release_samples as f64;
                if t >= 1.0 {
                    self.current_value = 0.0;
                    self.stage_elapsed = 0;
                    self.stage = EnvelopeStage::Idle;
                } else {
                    self.current_value = self.release_start_value * (1.0 - t);
                }
            }
        }
        self.current_value
    }

    /// Advances `frames` samples at once, returning only the final level —
    /// the per-voice DSP pipeline only needs the envelope value at block
    /// boundaries for ramping, not every intermediate sample.
    pub fn advance_block(&mut self, frames: u32) -> f64 {
        for _ in 0..frames {
            self.advance();
        }
        self.current_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn shape() -> EnvelopeShape {
        EnvelopeShape::from_seconds(0.0, 0.01, 0.05, 0.02, 0.1, 0.6, 0.2, 1000.0)
    }

    #[test]
    fn walks_through_every_stage_on_trigger_then_release() {
        let mut env = EnvelopeGenerator::new(shape());
        env.trigger();
        assert_eq!(env.stage(), EnvelopeStage::Delay);

        let mut seen = vec![env.stage()];
        for _ in 0..2000 {
            env.advance();
            if seen.last() != Some(&env.stage()) {
                seen.push(env.stage());
            }
            if env.stage() == EnvelopeStage::Sustain {
                break;
            }
        }
        assert_eq!(
            seen,
            vec![
                EnvelopeStage::Delay,
                EnvelopeStage::Attack,
                EnvelopeStage::Hold,
                EnvelopeStage::Decay,
                EnvelopeStage::Sustain,
            ]
        );
        assert_relative_eq!(env.value(), 0.6, epsilon = 0.01);

        env.release();
        assert_eq!(env.stage(), EnvelopeStage::Release);
        for _ in 0..1000 {
            env.advance();
        }
        assert_eq!(env.stage(), EnvelopeStage::Idle);
        assert_eq!(env.value(), 0.0);
    }

    #[test]
    fn release_during_attack_ramps_from_current_level_not_full_scale() {
        let mut env = EnvelopeGenerator::new(shape());
        env.trigger();
        // Drive past the delay stage into attack.
        while env.stage() != EnvelopeStage::Attack {
            env.advance();
        }
        env.advance();
        let level_at_release = env.value();
        env.release();
        assert_eq!(env.stage(), EnvelopeStage::Release);
        let first_release_sample = env.advance();
        assert!(first_release_sample <= level_at_release);
    }

    #[test]
    fn no_delay_skips_straight_to_attack() {
        let shape = EnvelopeShape::from_seconds(0.0, 0.0, 0.05, 0.0, 0.1, 0.5, 0.1, 1000.0);
        let mut env = EnvelopeGenerator::new(shape);
        env.trigger();
        assert_eq!(env.stage(), EnvelopeStage::Attack);
    }

    #[test]
    fn instant_on_reaches_full_scale_in_one_sample() {
        let mut env = EnvelopeGenerator::new(EnvelopeShape::instant_on());
        env.trigger();
        let v = env.advance();
        assert_relative_eq!(v, 1.0, epsilon = 1e-9);
    }
}
