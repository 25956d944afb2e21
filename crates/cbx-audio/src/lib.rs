//! cbx-audio: the wave bank (§4.8), the prefetch pipe stack (§4.7), and
//! the abstract audio backend contract plus a `cpal`-backed implementation.
//! Nothing here knows about MIDI, voices, or the scene graph — `cbx-engine`
//! wires these into the sampler and the per-callback render loop.

pub mod backend;
pub mod prefetch;
pub mod wavebank;

pub use backend::{AudioBackend, AudioCallback, AudioConfig, CpalBackend, NullBackend};
pub use prefetch::{PipeState, PrefetchPipe, PrefetchStack, PrefetchWorker, MIN_PREFETCH_FRAMES};
pub use wavebank::{decode_wav, WaveBank};
