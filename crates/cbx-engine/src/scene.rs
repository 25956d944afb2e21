//! The scene graph (spec §3, §4.2, §4.9): a scene owns instrument module
//! slots and routes a per-callback MIDI buffer to each of them. Aux-bus
//! effect chains are part of the same `ModuleSlot` machinery but aren't
//! wired into a dedicated send graph here — the spec's own Non-goals
//! exclude concrete effect implementations, and one scene-wide mix bus is
//! enough to exercise the routing contract an effect chain would plug
//! into.

use cbx_core::midi::MidiEventData;

use crate::module::ModuleSlot;

/// One instrument slot inside a scene: a module plus the scene-relative
/// output channel pair it sums into.
pub struct SceneInstrument {
    pub name: String,
    pub slot: ModuleSlot,
}

impl SceneInstrument {
    pub fn new(name: impl Into<String>, slot: ModuleSlot) -> Self {
        Self { name: name.into(), slot }
    }
}

/// A scene: an ordered list of instruments, each fed the scene's merged
/// MIDI input and summed into the scene's stereo output (spec §4.2 step
/// 5: "scene sums instrument outputs").
#[derive(Default)]
pub struct Scene {
    instruments: Vec<SceneInstrument>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_instrument(&mut self, instrument: SceneInstrument) {
        self.instruments.push(instrument);
    }

    pub fn instruments(&self) -> &[SceneInstrument] {
        &self.instruments
    }

    pub fn instrument_mut(&mut self, index: usize) -> Option<&mut SceneInstrument> {
        self.instruments.get_mut(index)
    }

    /// Feeds `events` to every instrument and renders `frames` of stereo
    /// output, summed into `out_l`/`out_r`. Instruments with more than two
    /// output channels only have their first two summed; this scene
    /// doesn't model a wider bus.
    pub fn process(&mut self, events: &[MidiEventData], frames: usize, out_l: &mut [f32], out_r: &mut [f32]) {
        debug_assert_eq!(out_l.len(), frames);
        debug_assert_eq!(out_r.len(), frames);
        for instrument in &mut self.instruments {
            let mut l = vec![0.0f32; frames];
            let mut r = vec![0.0f32; frames];
            {
                let inputs: [&[f32]; 0] = [];
                let mut outputs: Vec<&mut [f32]> = vec![&mut l, &mut r];
                instrument.slot.process(events, &inputs, &mut outputs, frames);
            }
            for i in 0..frames {
                out_l[i] += l[i];
                out_r[i] += r[i];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::BLOCK_SIZE;
    use crate::sampler::SamplerModule;

    #[test]
    fn empty_scene_produces_silence() {
        let mut scene = Scene::new();
        let mut l = vec![0.0f32; BLOCK_SIZE];
        let mut r = vec![0.0f32; BLOCK_SIZE];
        scene.process(&[], BLOCK_SIZE, &mut l, &mut r);
        assert!(l.iter().all(|&v| v == 0.0));
        assert!(r.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn sums_two_instruments_into_one_output() {
        let mut scene = Scene::new();
        scene.add_instrument(SceneInstrument::new(
            "a",
            ModuleSlot::new(Box::new(SamplerModule::new("a", 4))),
        ));
        scene.add_instrument(SceneInstrument::new(
            "b",
            ModuleSlot::new(Box::new(SamplerModule::new("b", 4))),
        ));
        assert_eq!(scene.instruments().len(), 2);
        let mut l = vec![0.0f32; BLOCK_SIZE];
        let mut r = vec![0.0f32; BLOCK_SIZE];
        scene.process(&[], BLOCK_SIZE, &mut l, &mut r);
        assert!(l.iter().all(|&v| v == 0.0));
    }
}
