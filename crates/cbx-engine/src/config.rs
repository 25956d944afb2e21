//! Minimal, explicit engine configuration (SPEC_FULL §5). Full
//! configuration-file parsing is out of scope; this is the plain struct
//! `Engine::new` takes, with defaults matching the spec's stated
//! constants.

/// `MAX_SAMPLER_VOICES` from spec §4.6.
pub const MAX_SAMPLER_VOICES: usize = 128;
/// `MAX_RELEASED_GROUPS` from spec §9 design notes — the exclusive-group
/// cutoff collects at most this many distinct groups per note-on. Exposed
/// as a named, documented constant rather than a config-file knob (config
/// file parsing is out of scope; see DESIGN.md for the open-question
/// decision).
pub const MAX_RELEASED_GROUPS: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub buffer_size: usize,
    pub input_channels: u16,
    pub output_channels: u16,
    pub max_sampler_voices: usize,
    pub rt_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            buffer_size: 256,
            input_channels: 2,
            output_channels: 2,
            max_sampler_voices: MAX_SAMPLER_VOICES,
            rt_queue_capacity: cbx_rt::DEFAULT_QUEUE_CAPACITY,
        }
    }
}
