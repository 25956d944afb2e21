//! The module contract (spec §4.9): the plugin-style interface every audio
//! node in a scene — sampler, master effect, aux-bus effect — implements.
//!
//! Processing happens in fixed [`BLOCK_SIZE`]-frame subchunks so per-block
//! DSP (envelope steps, filter coefficient recomputation, gain ramps) has a
//! stable, small granularity regardless of the host's actual callback
//! size; the engine and scene are responsible for splitting an `N`-frame
//! callback into `BLOCK_SIZE` pieces before calling `process_block`.

use cbx_core::midi::MidiEventData;

/// Fixed DSP subchunk size, per spec §2/§4.6.
pub const BLOCK_SIZE: usize = 16;

/// A plugin-style audio node: a sampler instrument, a master effect, or an
/// aux-bus effect chain link. `input_count`/`output_count` describe the
/// node's bus width; `process_event` delivers one MIDI message at a time
/// ahead of the block it falls in, and `process_block` renders exactly
/// [`BLOCK_SIZE`] frames.
pub trait Module: Send {
    fn input_count(&self) -> usize;
    fn output_count(&self) -> usize;

    /// Raw MIDI event delivery, called once per event in time order before
    /// the `process_block` that covers it.
    fn process_event(&mut self, _data: &[u8]) {}

    /// Render exactly [`BLOCK_SIZE`] frames. `inputs`/`outputs` are
    /// per-channel sample slices, each `BLOCK_SIZE` long. Implementations
    /// add into `outputs` rather than overwrite, so multiple modules can
    /// share an output bus (spec §4.2: "scene sums instrument outputs").
    fn process_block(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]]);

    /// Cached sample rate, set once via [`Module::set_sample_rate`].
    fn sample_rate(&self) -> f64;
    fn set_sample_rate(&mut self, sample_rate: f64);

    /// Instance name (as distinct from `engine_name`, the kind of module
    /// this instance is — e.g. `"sampler"`, `"reverb"`, or `""` for a bypassed
    /// slot per spec §4.9).
    fn instance_name(&self) -> &str;
    fn engine_name(&self) -> &str;
}

/// A module slot that can be empty (engine name `""`, pass-through) or
/// hold one boxed [`Module`]. The control thread replaces the boxed value
/// wholesale via an RT swap command (see `cbx_rt::SwapCommand`); the audio
/// thread only ever reads through this slot, never constructs or destroys
/// a module itself.
#[derive(Default)]
pub struct ModuleSlot {
    module: Option<Box<dyn Module>>,
}

impl ModuleSlot {
    pub fn empty() -> Self {
        Self { module: None }
    }

    pub fn new(module: Box<dyn Module>) -> Self {
        Self { module: Some(module) }
    }

    pub fn is_bypassed(&self) -> bool {
        self.module.is_none()
    }

    pub fn engine_name(&self) -> &str {
        self.module.as_deref().map(Module::engine_name).unwrap_or("")
    }

    pub fn get(&self) -> Option<&dyn Module> {
        self.module.as_deref()
    }

    pub fn get_mut(&mut self) -> Option<&mut Box<dyn Module>> {
        self.module.as_mut()
    }

    /// Replaces the held module, returning the old one so the caller's RT
    /// command cleanup can drop it off the audio thread.
    pub fn replace(&mut self, module: Option<Box<dyn Module>>) -> Option<Box<dyn Module>> {
        std::mem::replace(&mut self.module, module)
    }

    /// Feeds one block's worth of MIDI events into the held module (or
    /// does nothing if the slot is bypassed), then renders `frames` via
    /// repeated [`BLOCK_SIZE`] subchunks.
    pub fn process(&mut self, events: &[MidiEventData], inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize) {
        let Some(module) = self.module.as_mut() else { return };
        for ev in events {
            module.process_event(ev.bytes());
        }
        let mut offset = 0;
        while offset < frames {
            let chunk = BLOCK_SIZE.min(frames - offset);
            if chunk < BLOCK_SIZE {
                // Partial trailing chunk: render into a zero-padded scratch
                // block so every module can assume exactly BLOCK_SIZE frames.
                let in_scratch: Vec<Vec<f32>> = inputs.iter().map(|b| pad_block(&b[offset..offset + chunk])).collect();
                let in_refs: Vec<&[f32]> = in_scratch.iter().map(|v| v.as_slice()).collect();
                let mut out_scratch: Vec<Vec<f32>> = outputs.iter().map(|_| vec![0.0f32; BLOCK_SIZE]).collect();
                {
                    let mut out_refs: Vec<&mut [f32]> = out_scratch.iter_mut().map(|v| v.as_mut_slice()).collect();
                    module.process_block(&in_refs, &mut out_refs);
                }
                for (out, scratch) in outputs.iter_mut().zip(out_scratch.iter()) {
                    for i in 0..chunk {
                        out[offset + i] += scratch[i];
                    }
                }
            } else {
                let in_refs: Vec<&[f32]> = inputs.iter().map(|b| &b[offset..offset + BLOCK_SIZE]).collect();
                let mut out_refs: Vec<&mut [f32]> =
                    outputs.iter_mut().map(|b| &mut b[offset..offset + BLOCK_SIZE]).collect();
                module.process_block(&in_refs, &mut out_refs);
            }
            offset += chunk;
        }
    }
}

fn pad_block(slice: &[f32]) -> Vec<f32> {
    let mut v = vec![0.0f32; BLOCK_SIZE];
    v[..slice.len()].copy_from_slice(slice);
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    struct GainModule {
        gain: f32,
        sample_rate: f64,
    }

    impl Module for GainModule {
        fn input_count(&self) -> usize {
            1
        }
        fn output_count(&self) -> usize {
            1
        }
        fn process_block(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]]) {
            for i in 0..outputs[0].len() {
                outputs[0][i] += inputs[0][i] * self.gain;
            }
        }
        fn sample_rate(&self) -> f64 {
            self.sample_rate
        }
        fn set_sample_rate(&mut self, sample_rate: f64) {
            self.sample_rate = sample_rate;
        }
        fn instance_name(&self) -> &str {
            "gain"
        }
        fn engine_name(&self) -> &str {
            "gain"
        }
    }

    #[test]
    fn empty_slot_leaves_output_untouched() {
        let mut slot = ModuleSlot::empty();
        assert!(slot.is_bypassed());
        let input = vec![1.0f32; BLOCK_SIZE];
        let mut output = vec![0.0f32; BLOCK_SIZE];
        {
            let inputs: Vec<&[f32]> = vec![&input];
            let mut outputs: Vec<&mut [f32]> = vec![&mut output];
            slot.process(&[], &inputs, &mut outputs, BLOCK_SIZE);
        }
        assert!(output.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn handles_non_multiple_of_block_size_with_zero_padding() {
        let mut slot = ModuleSlot::new(Box::new(GainModule { gain: 2.0, sample_rate: 48_000.0 }));
        let frames = BLOCK_SIZE + 5;
        let input = vec![1.0f32; frames];
        let mut output = vec![0.0f32; frames];
        {
            let inputs: Vec<&[f32]> = vec![&input];
            let mut outputs: Vec<&mut [f32]> = vec![&mut output];
            slot.process(&[], &inputs, &mut outputs, frames);
        }
        assert!(output.iter().all(|&v| (v - 2.0).abs() < 1e-6));
    }

    #[test]
    fn replace_returns_previous_module() {
        let mut slot = ModuleSlot::new(Box::new(GainModule { gain: 1.0, sample_rate: 48_000.0 }));
        let old = slot.replace(Some(Box::new(GainModule { gain: 3.0, sample_rate: 48_000.0 })));
        assert!(old.is_some());
        assert_eq!(slot.engine_name(), "gain");
    }
}
