//! The top-level per-callback orchestrator (spec §4.2): owns the scene,
//! the master clock's song playback, the RT command queue's audio-thread
//! end, and the aux/app-sink MIDI buffers a control thread uses to talk
//! to a running engine.

use cbx_core::midi::{merge, MidiBuffer, MidiEventData};

use crate::scene::Scene;
use crate::songplayback::SongPlayback;

/// Which of the two app-sink buffers the audio thread is currently
/// writing into; the control thread reads the other one (spec §3: "two
/// double-buffered app-sink MIDI buffers for control-thread consumption").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AppSinkSide {
    A,
    B,
}

impl AppSinkSide {
    fn flipped(self) -> Self {
        match self {
            AppSinkSide::A => AppSinkSide::B,
            AppSinkSide::B => AppSinkSide::A,
        }
    }
}

/// Owns everything the audio thread touches once per callback except the
/// RT command queue's audio-side handle itself: a `RtCommandProcessor<Engine>`
/// needs `&mut Engine` to drain into, so it can't also live inside the
/// `Engine` it mutates — the caller (the audio backend's callback closure,
/// wired up by `cbx-cli`) owns both side by side and calls
/// [`Engine::drain_rt_commands`] before [`Engine::process`] each callback.
pub struct Engine {
    sample_rate: u32,
    input_channels: u16,
    output_channels: u16,
    scene: Scene,
    song: SongPlayback,
    aux_midi: MidiBuffer,
    song_midi: MidiBuffer,
    external_midi: MidiBuffer,
    merged_midi: MidiBuffer,
    app_sink: [MidiBuffer; 2],
    app_sink_write_side: AppSinkSide,
    backend_attached: bool,
}

impl Engine {
    pub fn new(sample_rate: u32, input_channels: u16, output_channels: u16) -> Self {
        Self {
            sample_rate,
            input_channels,
            output_channels,
            scene: Scene::new(),
            song: SongPlayback::new(sample_rate),
            aux_midi: MidiBuffer::new(),
            song_midi: MidiBuffer::new(),
            external_midi: MidiBuffer::new(),
            merged_midi: MidiBuffer::new(),
            app_sink: [MidiBuffer::new(), MidiBuffer::new()],
            app_sink_write_side: AppSinkSide::A,
            backend_attached: false,
        }
    }

    /// Drains the RT command queue against `self` (spec §4.2 step 3).
    /// Takes the processor by reference rather than owning it, since a
    /// processor generic over `Ctx = Engine` can't be stored inside the
    /// `Engine` it drains into.
    pub fn drain_rt_commands(&mut self, rt: &mut cbx_rt::RtCommandProcessor<Engine>) {
        rt.process(self, cbx_rt::MAX_COST_PER_CALL);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn song_mut(&mut self) -> &mut SongPlayback {
        &mut self.song
    }

    /// Events the control thread wants delivered to the scene this
    /// callback (spec §3: "aux MIDI buffer used by control thread to
    /// inject events"). Not RT-safe to call from the audio thread itself.
    pub fn aux_buffer_mut(&mut self) -> &mut MidiBuffer {
        &mut self.aux_midi
    }

    /// The app-sink buffer the control thread may currently read — the
    /// one the audio thread isn't writing into this callback.
    pub fn app_sink(&self) -> &MidiBuffer {
        &self.app_sink[self.app_sink_write_side.flipped() as usize]
    }

    pub fn set_backend_attached(&mut self, attached: bool) {
        self.backend_attached = attached;
    }

    /// Runs one callback's worth of processing for `frames` samples of
    /// external input, writing `frames` samples of interleaved stereo
    /// output. Mirrors spec §4.2's per-callback steps, minus RT-queue
    /// drain (step 3), which the caller runs separately via
    /// [`Engine::drain_rt_commands`] before calling this.
    pub fn process(&mut self, external_input: &[MidiEventData], frames: usize, out_l: &mut [f32], out_r: &mut [f32]) {
        self.aux_midi.clear();
        self.song_midi.clear();
        self.external_midi.clear();
        for ev in external_input {
            self.external_midi.write_event(ev.time, ev.bytes());
        }

        let write_side = self.app_sink_write_side as usize;
        for ev in self.external_midi.events() {
            self.app_sink[write_side].write_event(ev.time, ev.bytes());
        }
        self.app_sink_write_side = self.app_sink_write_side.flipped();
        self.app_sink[self.app_sink_write_side as usize].clear();

        let song_rendered = self.song.render(frames as u64, &mut self.song_midi);
        // Song playback always advances by the full callback window (or not
        // at all, mid stop-flush); anything else means the loop-seam
        // accounting in `SongPlayback::render` under- or over-advanced the
        // clock relative to what this callback actually asked for.
        debug_assert!(song_rendered == 0 || song_rendered == frames as u64);

        let refs = [&self.external_midi, &self.song_midi, &self.aux_midi];
        let mut positions = [0usize; 3];
        self.merged_midi.clear();
        merge(&mut self.merged_midi, &refs, &mut positions);

        self.scene.process(self.merged_midi.events(), frames, out_l, out_r);
    }

    /// Renders `frames` of silence-in/stereo-out offline, with no RT queue
    /// involvement (spec §4.1: "offline mode ... submissions execute
    /// inline"). Refused while a real backend is attached (spec §4.2:
    /// "refused while an audio backend is attached").
    pub fn render_offline(&mut self, frames: usize) -> Result<(Vec<f32>, Vec<f32>), cbx_core::error::CbxError> {
        if self.backend_attached {
            return Err(cbx_core::error::CbxError::Command(
                "offline render is refused while an audio backend is attached".to_string(),
            ));
        }
        let mut out_l = vec![0.0f32; frames];
        let mut out_r = vec![0.0f32; frames];
        self.process(&[], frames, &mut out_l, &mut out_r);
        Ok((out_l, out_r))
    }

    pub fn input_channels(&self) -> u16 {
        self.input_channels
    }

    pub fn output_channels(&self) -> u16 {
        self.output_channels
    }
}
