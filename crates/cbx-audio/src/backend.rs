//! The abstract audio I/O contract (spec §1: "concrete audio backends ...
//! beyond the abstract I/O contract they must satisfy" is out of scope,
//! but the contract itself, plus one concrete implementation to prove it's
//! satisfiable, is ambient infrastructure every runnable build needs).
//!
//! [`AudioCallback`] is what the engine hands the backend: given an input
//! buffer of `frames * channels` interleaved samples, fill the output
//! buffer of the same shape. The backend owns device selection, stream
//! lifecycle, and buffer-size negotiation; it does not know anything about
//! MIDI, the scene graph, or the RT command queue — that's `cbx-engine`'s
//! job, wired in by the caller's closure.

use cbx_core::error::{CbxError, CbxResult};

/// What the backend calls once per block. `input`/`output` are interleaved
/// `f32`, `frames * channels` samples long. Must not allocate or block —
/// it runs on whatever thread the backend's own callback runs on (spec
/// §5: "Audio thread ... Must not allocate, not block").
pub type AudioCallback = Box<dyn FnMut(&[f32], &mut [f32]) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub buffer_size: u32,
    pub input_channels: u16,
    pub output_channels: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            buffer_size: 256,
            input_channels: 2,
            output_channels: 2,
        }
    }
}

/// The abstract audio backend contract. A pro-audio client callback and a
/// direct USB isochronous driver both exist in the original system and
/// both satisfy this same shape (spec §1); only the `cpal` one is built
/// here.
pub trait AudioBackend {
    fn config(&self) -> AudioConfig;
    fn start(&mut self) -> CbxResult<()>;
    fn stop(&mut self) -> CbxResult<()>;
    fn is_running(&self) -> bool;
}

mod cpal_backend {
    use super::*;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, Stream, StreamConfig};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct CallbackState {
        callback: Mutex<AudioCallback>,
        running: AtomicBool,
        channels: usize,
        /// Scratch input buffer reused across callbacks; this backend has
        /// no real input device wired up yet, so it's always filled with
        /// silence, but it must not be allocated fresh per callback (spec
        /// §5: the audio thread must not allocate).
        input_scratch: Mutex<Vec<f32>>,
    }

    /// A `cpal`-backed [`AudioBackend`]: opens the host's default output
    /// device (and, if `config.input_channels > 0`, default input device)
    /// and drives `callback` from `cpal`'s own audio thread.
    pub struct CpalBackend {
        _stream: Stream,
        state: Arc<CallbackState>,
        config: AudioConfig,
    }

    impl CpalBackend {
        pub fn new(config: AudioConfig, callback: AudioCallback) -> CbxResult<Self> {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| CbxError::Device("no default output device".to_string()))?;

            let supported = device
                .default_output_config()
                .map_err(|e| CbxError::Device(format!("no output config available: {e}")))?;
            let sample_format = supported.sample_format();
            let channels = config.output_channels.max(1) as usize;
            let stream_config = StreamConfig {
                channels: channels as u16,
                sample_rate: cpal::SampleRate(config.sample_rate),
                buffer_size: cpal::BufferSize::Fixed(config.buffer_size),
            };

            let state = Arc::new(CallbackState {
                callback: Mutex::new(callback),
                running: AtomicBool::new(false),
                channels,
                input_scratch: Mutex::new(vec![0.0f32; config.buffer_size as usize * channels]),
            });

            let stream = build_output_stream(&device, &stream_config, sample_format, state.clone())?;

            Ok(Self { _stream: stream, state, config })
        }
    }

    fn build_output_stream(
        device: &cpal::Device,
        config: &StreamConfig,
        sample_format: SampleFormat,
        state: Arc<CallbackState>,
    ) -> CbxResult<Stream> {
        let err_fn = |e| log::warn!("audio stream error: {e}");
        let channels = state.channels;

        let stream = match sample_format {
            SampleFormat::F32 => device.build_output_stream(
                config,
                move |data: &mut [f32], _| run_callback(data, channels, &state),
                err_fn,
                None,
            ),
            other => {
                return Err(CbxError::Device(format!("unsupported sample format {other:?}")));
            }
        }
        .map_err(|e| CbxError::Device(format!("failed to build output stream: {e}")))?;

        Ok(stream)
    }

    fn run_callback(output: &mut [f32], channels: usize, state: &CallbackState) {
        if !state.running.load(Ordering::Acquire) {
            output.fill(0.0);
            return;
        }
        let frames = output.len() / channels.max(1);
        let mut input = state.input_scratch.lock();
        input.resize(frames * channels, 0.0);
        input.fill(0.0);
        let mut cb = state.callback.lock();
        (cb)(&input, output);
    }

    impl AudioBackend for CpalBackend {
        fn config(&self) -> AudioConfig {
            self.config
        }

        fn start(&mut self) -> CbxResult<()> {
            self._stream.play().map_err(|e| CbxError::Device(format!("failed to start stream: {e}")))?;
            self.state.running.store(true, Ordering::Release);
            Ok(())
        }

        fn stop(&mut self) -> CbxResult<()> {
            self._stream.pause().map_err(|e| CbxError::Device(format!("failed to stop stream: {e}")))?;
            self.state.running.store(false, Ordering::Release);
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.state.running.load(Ordering::Acquire)
        }
    }
}

pub use cpal_backend::CpalBackend;

/// A no-op backend used by tests and the offline-render path: never
/// starts a real stream, just records whether `start`/`stop` were called.
/// Mirrors spec §4.1's "offline mode" bypass, where there is no audio
/// thread to hand commands to at all.
pub struct NullBackend {
    config: AudioConfig,
    running: bool,
}

impl NullBackend {
    pub fn new(config: AudioConfig) -> Self {
        Self { config, running: false }
    }
}

impl AudioBackend for NullBackend {
    fn config(&self) -> AudioConfig {
        self.config
    }

    fn start(&mut self) -> CbxResult<()> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> CbxResult<()> {
        self.running = false;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_backend_tracks_running_state_without_a_real_stream() {
        let mut backend = NullBackend::new(AudioConfig::default());
        assert!(!backend.is_running());
        backend.start().unwrap();
        assert!(backend.is_running());
        backend.stop().unwrap();
        assert!(!backend.is_running());
    }
}
