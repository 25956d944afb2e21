//! cbx-rt: the real-time command queue and the swap-pointer primitive
//! built on top of it. Everything here is generic over the audio-thread
//! state it mutates (`Ctx`); `cbx-engine` supplies the concrete type.

pub mod queue;
pub mod swap;

pub use queue::{channel, RtCommand, RtCommandProcessor, RtCommandSender, DEFAULT_QUEUE_CAPACITY, MAX_COST_PER_CALL};
pub use swap::SwapCommand;
