//! The sampler instrument (spec §4.6): a polyphonic [`Module`] wrapping a
//! fixed-size [`SamplerVoice`] pool, per-channel controller state, and the
//! SFZ-style program model. This is where MIDI note-on/off, controller
//! changes and program changes turn into voice triggers, exclusive-group
//! cutoffs, and the per-block render that drives each voice's DSP chain.

pub mod channel;
pub mod layer;
pub mod program;
pub mod voice;

use std::sync::Arc;

use cbx_audio::prefetch::PrefetchStack;
use cbx_core::midi::{cc, status};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::MAX_RELEASED_GROUPS;
use crate::module::Module;
pub use channel::SamplerChannel;
use layer::{LayerHandle, LoopMode, SamplerLayer, SwitchCondition};
pub use program::SamplerProgram;
use voice::{SamplerVoice, VoicePrefetch};

/// Below this many frames a layer's waveform is always played straight out
/// of the in-memory decode; above it, a voice acquires a
/// [`PrefetchPipe`](cbx_audio::prefetch::PrefetchPipe) instead (spec §4.7).
/// ~1.36s at 48kHz — long enough that short one-shots and typical
/// multisamples never touch the prefetch stack at all.
pub const DEFAULT_PRELOAD_FRAMES: u64 = 65_536;

/// The polyphonic sampler instrument: 16 [`SamplerChannel`]s, a fixed voice
/// pool, and the loaded [`SamplerProgram`]s channels can select between.
pub struct SamplerModule {
    channels: [SamplerChannel; 16],
    voices: Vec<SamplerVoice>,
    programs: Vec<Arc<SamplerProgram>>,
    rng: ChaCha8Rng,
    sample_rate: f64,
    prefetch: Option<Arc<PrefetchStack>>,
    preload_threshold: u64,
    instance_name: String,
}

impl SamplerModule {
    pub fn new(instance_name: impl Into<String>, max_voices: usize) -> Self {
        Self {
            channels: std::array::from_fn(|_| SamplerChannel::new()),
            voices: (0..max_voices).map(|_| SamplerVoice::default()).collect(),
            programs: Vec::new(),
            rng: ChaCha8Rng::seed_from_u64(0x63_62_78_00),
            sample_rate: 48_000.0,
            prefetch: None,
            preload_threshold: DEFAULT_PRELOAD_FRAMES,
            instance_name: instance_name.into(),
        }
    }

    /// Wires a shared [`PrefetchStack`] in, enabling disk streaming for
    /// layers whose waveform exceeds `preload_threshold` frames. Without
    /// this, every layer plays straight out of the in-memory decode
    /// regardless of length.
    pub fn with_prefetch(mut self, stack: Arc<PrefetchStack>) -> Self {
        self.prefetch = Some(stack);
        self
    }

    pub fn load_program(&mut self, program: SamplerProgram) {
        self.programs.push(Arc::new(program));
    }

    pub fn active_voice_count(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    pub fn channel(&self, index: u8) -> &SamplerChannel {
        &self.channels[(index & 0x0F) as usize]
    }

    /// Direct note-on entry point (bypasses MIDI byte parsing) — used by
    /// the song/track playback path and tests. `velocity == 0` is treated
    /// as a note-off per spec §6's normalisation rule.
    pub fn note_on(&mut self, ch: u8, note: u8, velocity: u8) {
        if velocity == 0 {
            self.note_off(ch, note);
            return;
        }
        let idx = (ch & 0x0F) as usize;
        self.channels[idx].press_key(note);

        let Some(program) = self.channels[idx].program.clone() else { return };

        if let Some((lo, hi)) = program.keyswitch_range() {
            if note >= lo && note <= hi {
                self.channels[idx].note_switch(note);
                return;
            }
        }

        let channel_snapshot = self.channels[idx].clone();
        let matched: Vec<LayerHandle> = program
            .layers
            .iter()
            .filter(|layer| layer.matches_key_vel(note, velocity) && switch_ok(layer, &channel_snapshot))
            .cloned()
            .collect();
        if matched.is_empty() {
            return;
        }

        let mut released_groups = [-1i32; MAX_RELEASED_GROUPS];
        let mut released_count = 0usize;
        let mut triggered_any = false;

        for layer in matched {
            let prefetch = acquire_prefetch(self.prefetch.as_ref(), self.preload_threshold, &layer);
            let Some(slot) = self.voices.iter_mut().find(|v| !v.is_active()) else {
                log::debug!("sampler voice pool exhausted, dropping note {note} on channel {ch}");
                continue;
            };
            slot.trigger(layer.clone(), ch, note, velocity, self.sample_rate, &mut self.rng, prefetch);
            triggered_any = true;

            if let Some(group) = layer.exclusive_group {
                if released_count < MAX_RELEASED_GROUPS && !released_groups[..released_count].contains(&group) {
                    released_groups[released_count] = group;
                    released_count += 1;
                }
            }
        }

        // Exclusive-group cutoff (spec §4.6): any other active voice whose
        // off_by matches a group this note-on just triggered, and whose
        // note differs, jumps straight to release.
        if triggered_any && released_count > 0 {
            let groups = &released_groups[..released_count];
            for voice in self.voices.iter_mut() {
                if voice.is_active() && voice.note != note {
                    if let Some(off_by) = voice.exclusive_off_by {
                        if groups.contains(&off_by) {
                            voice.force_release();
                        }
                    }
                }
            }
        }
    }

    /// Direct note-off entry point, honoring sustain/sostenuto holds via
    /// each matching voice's own `note_off` (spec §4.6).
    pub fn note_off(&mut self, ch: u8, note: u8) {
        let idx = (ch & 0x0F) as usize;
        self.channels[idx].release_key(note);
        let channel = self.channels[idx].clone();
        for voice in self.voices.iter_mut() {
            if voice.is_active() && voice.channel_index == ch && voice.note == note && !voice.released {
                voice.note_off(&channel);
            }
        }
    }

    fn control_change(&mut self, ch: u8, controller: u8, value: u8) {
        let idx = (ch & 0x0F) as usize;
        let value14 = (value as i32) << 7;
        match controller {
            cc::MOD_WHEEL => self.channels[idx].modulation = value14,
            cc::VOLUME => self.channels[idx].volume = value14,
            cc::PAN => self.channels[idx].pan = value14,
            cc::EXPRESSION => self.channels[idx].expression = value14,
            cc::SUSTAIN => {
                let held = value >= 64;
                let was_held = self.channels[idx].sustain;
                self.channels[idx].sustain = held;
                if was_held && !held {
                    for voice in self.voices.iter_mut() {
                        if voice.channel_index == ch && voice.released_with_sustain {
                            voice.force_release();
                        }
                    }
                }
            }
            cc::SOSTENUTO => {
                let pressed = value >= 64;
                let was_pressed = self.channels[idx].sostenuto;
                self.channels[idx].sostenuto = pressed;
                if pressed && !was_pressed {
                    let channel = &self.channels[idx];
                    for voice in self.voices.iter_mut() {
                        if voice.channel_index == ch && voice.is_active() && !voice.released && channel.is_key_held(voice.note) {
                            voice.captured_sostenuto = true;
                        }
                    }
                } else if !pressed && was_pressed {
                    for voice in self.voices.iter_mut() {
                        if voice.channel_index == ch && voice.released_with_sostenuto {
                            voice.force_release();
                        }
                    }
                }
            }
            cc::RESONANCE => self.channels[idx].resonance_cc_offset = value as f64,
            // Centered at CC 64 so the GM default (no CC sent) is neutral;
            // the exact cents-per-step scale isn't pinned by spec, chosen
            // here as 10 cents/step (~1270 cents across the full range).
            cc::CUTOFF => self.channels[idx].cutoff_cc_offset_cents = (value as f64 - 64.0) * 10.0,
            cc::ALL_SOUND_OFF | cc::ALL_NOTES_OFF => {
                for voice in self.voices.iter_mut() {
                    if voice.channel_index == ch && voice.is_active() {
                        voice.force_release();
                    }
                }
            }
            cc::RESET_ALL_CONTROLLERS => self.channels[idx].reset_controllers(),
            _ => {}
        }
    }

    fn program_change(&mut self, ch: u8, prog_no: u8) {
        let idx = (ch & 0x0F) as usize;
        if let Some(p) = self.programs.iter().find(|p| p.prog_no == prog_no as u32) {
            self.channels[idx].program = Some(p.clone());
        } else if let Some(p0) = self.programs.iter().find(|p| p.prog_no == 0) {
            log::warn!("sampler: program {prog_no} not found on channel {ch}, falling back to program 0");
            self.channels[idx].program = Some(p0.clone());
        } else {
            log::warn!("sampler: program {prog_no} not found on channel {ch} and no program 0 is loaded");
        }
    }
}

fn switch_ok(layer: &SamplerLayer, channel: &SamplerChannel) -> bool {
    layer.switch_conditions.iter().all(|c| match *c {
        SwitchCondition::Down(k) => channel.is_key_held(k),
        SwitchCondition::Up(k) => !channel.is_key_held(k),
        SwitchCondition::Last(k) => channel.last_switch == Some(k),
        SwitchCondition::Previous(k) => channel.previous_switch == Some(k),
    })
}

fn acquire_prefetch(stack: Option<&Arc<PrefetchStack>>, preload_threshold: u64, layer: &SamplerLayer) -> Option<VoicePrefetch> {
    let stack = stack?;
    if layer.waveform.frames <= preload_threshold {
        return None;
    }
    let (file_loop_start, file_loop_end) = match layer.loop_mode {
        LoopMode::NoLoop | LoopMode::OneShot => (-1, -1),
        _ => (layer.loop_start.map(|s| s as i64).unwrap_or(0), layer.loop_end as i64),
    };
    let pipe = stack.pop(layer.waveform.path.clone(), preload_threshold, file_loop_start, file_loop_end)?;
    Some(VoicePrefetch { pipe, preload_frames: preload_threshold })
}

impl Module for SamplerModule {
    fn input_count(&self) -> usize {
        0
    }

    fn output_count(&self) -> usize {
        2
    }

    fn process_event(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let status_byte = data[0];
        let ch = status_byte & 0x0F;
        match status_byte & 0xF0 {
            status::NOTE_ON if data.len() >= 3 => {
                if data[2] == 0 {
                    self.note_off(ch, data[1]);
                } else {
                    self.note_on(ch, data[1], data[2]);
                }
            }
            status::NOTE_OFF if data.len() >= 3 => self.note_off(ch, data[1]),
            status::CONTROL_CHANGE if data.len() >= 3 => self.control_change(ch, data[1], data[2]),
            status::PROGRAM_CHANGE if data.len() >= 2 => self.program_change(ch, data[1]),
            status::PITCH_BEND if data.len() >= 3 => {
                let value14 = (data[1] as i32) | ((data[2] as i32) << 7);
                self.channels[ch as usize].set_pitch_bend14(value14);
            }
            _ => {}
        }
    }

    fn process_block(&mut self, _inputs: &[&[f32]], outputs: &mut [&mut [f32]]) {
        debug_assert!(outputs.len() >= 2);
        let sample_rate = self.sample_rate;
        let SamplerModule { voices, channels, prefetch, .. } = self;
        let (first, rest) = outputs.split_at_mut(1);
        let out_l: &mut [f32] = &mut *first[0];
        let out_r: &mut [f32] = &mut *rest[0];

        for voice in voices.iter_mut() {
            if !voice.is_active() {
                continue;
            }
            let channel = &channels[(voice.channel_index & 0x0F) as usize];
            let still_active = voice.process_block(channel, sample_rate, &mut *out_l, &mut *out_r);
            if !still_active {
                if let Some(vp) = voice.take_prefetch() {
                    if let Some(stack) = prefetch.as_ref() {
                        stack.push(&vp.pipe);
                    }
                }
            }
        }
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }

    fn instance_name(&self) -> &str {
        &self.instance_name
    }

    fn engine_name(&self) -> &str {
        "sampler"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::BLOCK_SIZE;
    use crate::sampler::layer::LayerBuilder;
    use cbx_core::waveform::Waveform;
    use std::path::PathBuf;

    fn click_layer(lokey: u8, hikey: u8, exclusive_group: Option<i32>, off_by: Option<i32>) -> LayerHandle {
        let wf = Arc::new(Waveform::new(1, PathBuf::from("x.wav"), vec![i16::MAX / 2; 4000], 1, 48_000));
        let mut b = LayerBuilder::default();
        b.lokey = Some(lokey);
        b.hikey = Some(hikey);
        b.exclusive_group = exclusive_group;
        b.off_by = off_by;
        Arc::new(b.finalize(wf, 48_000.0))
    }

    fn sampler_with_program(layers: Vec<LayerHandle>) -> SamplerModule {
        let mut sampler = SamplerModule::new("test", 32);
        let mut program = SamplerProgram::new(0, "p");
        program.layers = layers;
        sampler.load_program(program);
        sampler.process_event(&[0xC0, 0]); // program change -> program 0, channel 0
        sampler
    }

    #[test]
    fn note_on_allocates_a_voice_from_the_pool() {
        let mut sampler = sampler_with_program(vec![click_layer(0, 127, None, None)]);
        assert_eq!(sampler.active_voice_count(), 0);
        sampler.process_event(&[0x90, 60, 100]);
        assert_eq!(sampler.active_voice_count(), 1);
    }

    #[test]
    fn note_off_releases_a_note_with_no_loop_immediately() {
        let mut sampler = sampler_with_program(vec![click_layer(0, 127, None, None)]);
        sampler.process_event(&[0x90, 60, 100]);
        sampler.process_event(&[0x80, 60, 0]);
        // Released voice keeps rendering its tail until the envelope ends,
        // so it's still counted active right after note-off.
        assert_eq!(sampler.active_voice_count(), 1);
    }

    #[test]
    fn exclusive_group_releases_the_other_note_in_the_group() {
        // Spec §8 scenario 3: two regions sharing group=1/off_by=1 on
        // different notes; triggering the second releases the first.
        let mut sampler = sampler_with_program(vec![
            click_layer(35, 35, Some(1), Some(1)),
            click_layer(36, 36, Some(1), Some(1)),
        ]);
        sampler.process_event(&[0x90, 35, 100]);
        sampler.process_event(&[0x90, 36, 100]);

        let released = sampler.voices.iter().any(|v| v.is_active() && v.note == 35 && v.released);
        assert!(released, "note 35's voice should have been released by the exclusive group cutoff");
        let still_sounding_36 = sampler.voices.iter().any(|v| v.is_active() && v.note == 36 && !v.released);
        assert!(still_sounding_36);
    }

    #[test]
    fn sustain_pedal_holds_note_off_until_pedal_release() {
        let mut sampler = sampler_with_program(vec![click_layer(0, 127, None, None)]);
        sampler.process_event(&[0xB0, cc::SUSTAIN, 127]); // pedal down
        sampler.process_event(&[0x90, 60, 100]);
        sampler.process_event(&[0x80, 60, 0]);
        let voice = sampler.voices.iter().find(|v| v.is_active() && v.note == 60).unwrap();
        assert!(voice.released_with_sustain);
        assert!(!voice.released);

        sampler.process_event(&[0xB0, cc::SUSTAIN, 0]); // pedal up
        let voice = sampler.voices.iter().find(|v| v.note == 60 && v.is_active()).unwrap();
        assert!(voice.released);
    }

    #[test]
    fn program_change_to_unknown_program_falls_back_to_program_zero() {
        let mut sampler = sampler_with_program(vec![click_layer(0, 127, None, None)]);
        sampler.process_event(&[0xC0, 5]); // unknown program 5
        assert_eq!(sampler.channels[0].program.as_ref().unwrap().prog_no, 0);
    }

    #[test]
    fn process_block_renders_without_touching_input_buffers() {
        let mut sampler = sampler_with_program(vec![click_layer(0, 127, None, None)]);
        sampler.process_event(&[0x90, 60, 100]);
        let mut l = vec![0.0f32; BLOCK_SIZE];
        let mut r = vec![0.0f32; BLOCK_SIZE];
        {
            let mut outputs: Vec<&mut [f32]> = vec![&mut l, &mut r];
            sampler.process_block(&[], &mut outputs);
        }
        assert!(l.iter().any(|&v| v != 0.0) || r.iter().any(|&v| v != 0.0));
    }
}
