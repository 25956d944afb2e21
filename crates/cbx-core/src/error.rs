//! Shared error taxonomy for the engine.
//!
//! Mirrors the recovery policy in the spec: config/format errors are
//! reported to the caller and abort the command; resource exhaustion
//! (`Resource`) is logged and continued rather than aborting anything — the
//! voice pool / MIDI buffer / RT queue call sites construct it for
//! diagnostics (e.g. a rate-limited `log::warn!`) but essentially never
//! propagate it up as a command failure; device errors trigger a fallback
//! to silence until the caller re-scans.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CbxError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("format error: {0}")]
    Format(String),

    #[error("resource exhausted: {0}")]
    Resource(String),

    #[error("command error: {0}")]
    Command(String),

    #[error("device error: {0}")]
    Device(String),
}

pub type CbxResult<T> = Result<T, CbxError>;
