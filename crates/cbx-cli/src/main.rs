//! `cbx`: the thin host binary that wires a `cpal` audio backend to the
//! engine, as described in SPEC_FULL §2 — not a feature of the engine
//! itself, just the runnable demonstration that the abstract audio I/O
//! contract (spec §1) is actually satisfiable.
//!
//! The real OSC-style command dispatch tree and scripting bridge (spec
//! §6) stay external collaborators; this binary only exposes the handful
//! of things spec §6 says a host must: the process exit codes (0 clean
//! shutdown, 1 init failure, 2 backend unavailable) and enough CLI
//! surface to load an SFZ program onto channel 0 and either stream live
//! audio or render a fixed number of frames offline.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use cbx_audio::backend::{AudioBackend, AudioConfig, CpalBackend};
use cbx_audio::wavebank::WaveBank;
use cbx_engine::scene::SceneInstrument;
use cbx_engine::{Engine, EngineConfig, ModuleSlot, SamplerModule};

/// A modular software musical instrument: sample-based synthesis, MIDI
/// sequencing against a tempo map, and audio I/O.
#[derive(Parser, Debug)]
#[command(name = "cbx", version, about)]
struct Cli {
    /// SFZ instrument file to load onto the sampler's single instrument slot.
    #[arg(long)]
    sfz: Option<PathBuf>,

    /// Sample rate in Hz.
    #[arg(long, default_value_t = 48_000)]
    sample_rate: u32,

    /// Audio callback buffer size in frames.
    #[arg(long, default_value_t = 256)]
    buffer_size: u32,

    /// Render this many frames offline instead of opening a live audio
    /// device, and print a short summary. Per spec §4.2, offline render
    /// is only valid when no backend is attached, which is exactly what
    /// this flag does.
    #[arg(long)]
    render_frames: Option<usize>,

    /// How long to stream live audio before exiting (seconds). Ignored
    /// in `--render-frames` mode.
    #[arg(long, default_value_t = 5)]
    seconds: u64,
}

fn run(cli: Cli) -> Result<(), ExitCode> {
    let config = EngineConfig {
        sample_rate: cli.sample_rate,
        buffer_size: cli.buffer_size as usize,
        ..EngineConfig::default()
    };

    let mut engine = Engine::new(config.sample_rate, 0, config.output_channels);
    let mut bank = WaveBank::new();

    if let Some(sfz_path) = &cli.sfz {
        let program = cbx_engine::sfz::load_sfz(sfz_path, 0, &mut bank).map_err(|e| {
            log::error!("failed to load SFZ program {}: {e}", sfz_path.display());
            ExitCode::from(1)
        })?;
        let mut sampler = SamplerModule::new("sampler", config.max_sampler_voices);
        sampler.load_program(program);
        engine
            .scene_mut()
            .add_instrument(SceneInstrument::new("sampler", ModuleSlot::new(Box::new(sampler))));
        log::info!("loaded SFZ program from {}", sfz_path.display());
    } else {
        log::info!("no --sfz given; running with an empty scene (silence)");
    }

    if let Some(frames) = cli.render_frames {
        engine.set_backend_attached(false);
        let (l, r) = engine.render_offline(frames).map_err(|e| {
            log::error!("offline render failed: {e}");
            ExitCode::from(1)
        })?;
        let peak = l.iter().chain(r.iter()).fold(0.0f32, |acc, &v| acc.max(v.abs()));
        log::info!("rendered {frames} frames offline, peak amplitude {peak:.6}");
        return Ok(());
    }

    let audio_config = AudioConfig {
        sample_rate: config.sample_rate,
        buffer_size: config.buffer_size as u32,
        input_channels: 0,
        output_channels: config.output_channels,
    };

    let callback_engine = std::sync::Arc::new(parking_lot::Mutex::new(engine));
    let process_engine = callback_engine.clone();
    let channels = audio_config.output_channels.max(1) as usize;
    let max_frames = audio_config.buffer_size as usize;
    let mut l_scratch = vec![0.0f32; max_frames];
    let mut r_scratch = vec![0.0f32; max_frames];

    let callback = Box::new(move |_input: &[f32], output: &mut [f32]| {
        let frames = (output.len() / channels.max(1)).min(max_frames);
        let l = &mut l_scratch[..frames];
        let r = &mut r_scratch[..frames];
        let mut engine = process_engine.lock();
        engine.process(&[], frames, l, r);
        for i in 0..frames {
            let base = i * channels;
            output[base] = l[i];
            if channels > 1 {
                output[base + 1] = r[i];
            }
        }
    });

    callback_engine.lock().set_backend_attached(true);

    let mut backend: Box<dyn AudioBackend> = match CpalBackend::new(audio_config, callback) {
        Ok(backend) => Box::new(backend),
        Err(e) => {
            log::error!("no audio backend available: {e}");
            return Err(ExitCode::from(2));
        }
    };

    backend.start().map_err(|e| {
        log::error!("failed to start audio backend: {e}");
        ExitCode::from(2)
    })?;

    log::info!("streaming audio for {} seconds; ctrl-c to stop early", cli.seconds);
    std::thread::sleep(Duration::from_secs(cli.seconds));

    backend.stop().ok();
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::from(0),
        Err(code) => code,
    }
}
