//! cbx-engine: the Engine/Scene/Module contract (spec §4.2, §4.9), the
//! sampler (§4.6), track/song playback (§4.4, §4.5), the SFZ and
//! pattern-text loaders (§6), and the `CommandTarget` seam (§6).
//!
//! Everything here runs against the lock-free primitives `cbx-rt` provides
//! and the data model `cbx-core` owns; this crate is where they're wired
//! into a runnable audio/MIDI engine.

pub mod command;
pub mod config;
pub mod engine;
pub mod module;
pub mod patterntext;
pub mod sampler;
pub mod scene;
pub mod sfz;
pub mod songplayback;
pub mod trackplayback;

pub use config::{EngineConfig, MAX_RELEASED_GROUPS, MAX_SAMPLER_VOICES};
pub use engine::Engine;
pub use module::{Module, ModuleSlot, BLOCK_SIZE};
pub use sampler::SamplerModule;
pub use scene::Scene;
pub use songplayback::SongPlayback;
