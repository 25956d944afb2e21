//! The RT command queue: the one sanctioned path for a non-realtime
//! control thread to mutate structures the audio thread owns.
//!
//! A command is a `{prepare, execute, cleanup}` triple. `prepare` runs on
//! the control thread and can abort the whole thing before it ever
//! reaches the audio thread. `execute` runs on the audio thread, inside
//! the callback, and returns a cost — `0` means "not done yet, try me
//! again next callback" (used by commands that have to wait for the
//! audio thread to make progress on something else first); any nonzero
//! value is added to a per-callback budget so one callback can't be
//! monopolized by a pile of queued commands. `cleanup` runs back on the
//! control thread once `execute` has returned something other than `0`,
//! and is where displaced state (the old value of whatever got swapped
//! out) actually gets dropped.
//!
//! Two queues do the round trip: `exec` (control → audio) and `cleanup`
//! (audio → control), both bounded SPSC ring buffers. A command that
//! can't fit in `exec` makes the submitting call busy-wait rather than
//! block or allocate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::warn;
use rtrb::{PopError, PushError, RingBuffer};

/// Matches the original engine's queue depth and per-callback cost
/// budget; see `procmain.h` in the reference implementation.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const MAX_COST_PER_CALL: u32 = 100;

/// A unit of work that crosses from the control thread to the audio
/// thread and back. `Ctx` is whatever audio-thread-owned state the
/// command needs to touch — in practice `cbx_engine::Engine`.
pub trait RtCommand<Ctx>: Send {
    /// Runs on the control thread before the command is ever queued.
    /// Returning `true` aborts submission entirely (no execute, no
    /// cleanup) — used to validate arguments against control-thread-only
    /// state before bothering the audio thread.
    fn prepare(&mut self) -> bool {
        false
    }

    /// Runs on the audio thread. `0` means "call me again next
    /// callback"; the command stays at the head of the queue and nothing
    /// behind it runs in the meantime.
    fn execute(&mut self, ctx: &mut Ctx) -> u32;

    /// Runs on the control thread once `execute` has completed. This is
    /// where anything `execute` displaced (an old `Arc`, a replaced
    /// buffer) gets dropped off the audio thread.
    fn cleanup(self: Box<Self>) {}
}

struct QueuedCommand<Ctx> {
    cmd: Box<dyn RtCommand<Ctx>>,
    is_async: bool,
    token: u64,
}

/// Control-thread handle: submits commands and drains their results.
pub struct RtCommandSender<Ctx> {
    exec_tx: rtrb::Producer<QueuedCommand<Ctx>>,
    cleanup_rx: rtrb::Consumer<QueuedCommand<Ctx>>,
    next_token: AtomicU64,
}

/// Audio-thread handle: called once per callback to drain queued
/// commands against the live `Ctx`.
pub struct RtCommandProcessor<Ctx> {
    exec_rx: rtrb::Consumer<QueuedCommand<Ctx>>,
    cleanup_tx: rtrb::Producer<QueuedCommand<Ctx>>,
    /// A command that returned cost `0` last callback and must be
    /// retried before anything else in the queue runs. Rather than
    /// peeking the ring buffer in place (which would need a `&mut`
    /// borrow into it while simultaneously reading), an in-progress
    /// command is popped out and held here until it completes.
    pending: Option<QueuedCommand<Ctx>>,
}

/// Builds a connected sender/processor pair, `capacity` entries deep.
pub fn channel<Ctx>(capacity: usize) -> (RtCommandSender<Ctx>, RtCommandProcessor<Ctx>) {
    let (exec_tx, exec_rx) = RingBuffer::new(capacity);
    let (cleanup_tx, cleanup_rx) = RingBuffer::new(capacity * 2);
    (
        RtCommandSender { exec_tx, cleanup_rx, next_token: AtomicU64::new(1) },
        RtCommandProcessor { exec_rx, cleanup_tx, pending: None },
    )
}

impl<Ctx> RtCommandSender<Ctx> {
    fn wait_push(&mut self, mut item: QueuedCommand<Ctx>) {
        let mut stalled_iters = 0u32;
        loop {
            match self.exec_tx.push(item) {
                Ok(()) => return,
                Err(PushError::Full(returned)) => {
                    item = returned;
                    std::thread::sleep(Duration::from_millis(1));
                    stalled_iters += 1;
                    if stalled_iters >= 1000 {
                        warn!("rt command queue full, still waiting for space");
                        stalled_iters = 0;
                    }
                }
            }
        }
    }

    /// Submits `cmd` and blocks (busy-waiting) until the audio thread
    /// has executed and this call has run its cleanup. Use for commands
    /// whose caller needs the swap to be visibly complete before
    /// returning — e.g. song replacement, where the caller immediately
    /// destroys the displaced song.
    pub fn execute_sync(&mut self, mut cmd: Box<dyn RtCommand<Ctx>>) {
        if cmd.prepare() {
            return;
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.wait_push(QueuedCommand { cmd, is_async: false, token });

        loop {
            match self.cleanup_rx.pop() {
                Ok(done) => {
                    let is_ours = done.token == token;
                    done.cmd.cleanup();
                    if is_ours {
                        return;
                    }
                    // Not the command we're waiting on — it's a
                    // previously submitted async command whose cleanup
                    // just hadn't been drained yet. We ran its cleanup
                    // above; keep waiting for ours.
                }
                Err(PopError::Empty) => std::thread::sleep(Duration::from_millis(10)),
            }
        }
    }

    /// Submits `cmd` without waiting for it to complete. Its cleanup
    /// will run on a subsequent `execute_sync` call or the next
    /// `drain_cleanup` — whichever comes first.
    pub fn execute_async(&mut self, mut cmd: Box<dyn RtCommand<Ctx>>) {
        if cmd.prepare() {
            return;
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.wait_push(QueuedCommand { cmd, is_async: true, token });
    }

    /// Runs cleanup for every completed command currently sitting in the
    /// cleanup queue, without waiting on any particular one. A control
    /// thread with an event loop should call this periodically so async
    /// commands' displaced state doesn't pile up.
    pub fn drain_cleanup(&mut self) {
        while let Ok(done) = self.cleanup_rx.pop() {
            done.cmd.cleanup();
        }
    }

    /// Runs `cmd` to completion inline, with no audio thread involved —
    /// the offline/no-RT-thread bypass. The caller must own `ctx`
    /// itself, since there's no separate thread to hand it to.
    pub fn execute_inline(ctx: &mut Ctx, mut cmd: Box<dyn RtCommand<Ctx>>) {
        if cmd.prepare() {
            return;
        }
        let cost = cmd.execute(ctx);
        if cost == 0 {
            warn!("inline rt command did not complete in a single call; there is no audio thread to retry it");
        }
        cmd.cleanup();
    }
}

impl<Ctx> RtCommandProcessor<Ctx> {
    /// Drains queued commands against `ctx` until either the queue is
    /// empty or `max_cost` has been spent this callback. Returns the
    /// cost actually spent.
    pub fn process(&mut self, ctx: &mut Ctx, max_cost: u32) -> u32 {
        let mut spent = 0u32;
        loop {
            if self.pending.is_none() {
                match self.exec_rx.pop() {
                    Ok(queued) => self.pending = Some(queued),
                    Err(PopError::Empty) => break,
                }
            }
            if spent >= max_cost {
                break;
            }

            let queued = self.pending.as_mut().expect("checked above");
            let cost = queued.cmd.execute(ctx);
            if cost == 0 {
                // Not done — leave it pending and stop for this callback.
                break;
            }
            spent += cost;

            let queued = self.pending.take().expect("checked above");
            // Sync commands always need their matching cleanup posted so
            // the waiting sender can find it; async commands are posted
            // too, so `drain_cleanup`/a later sync call reclaims them.
            let _ = self.cleanup_tx.push(queued);
        }
        spent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(i64);

    struct AddCommand {
        amount: i64,
        applied: parking_lot::Mutex<Option<i64>>,
    }

    impl RtCommand<Counter> for AddCommand {
        fn execute(&mut self, ctx: &mut Counter) -> u32 {
            ctx.0 += self.amount;
            *self.applied.lock() = Some(ctx.0);
            1
        }
    }

    #[test]
    fn sync_command_completes_before_returning() {
        let (mut sender, mut processor) = channel::<Counter>(8);

        let applied = std::sync::Arc::new(parking_lot::Mutex::new(None));
        struct ArcAddCommand {
            amount: i64,
            applied: std::sync::Arc<parking_lot::Mutex<Option<i64>>>,
        }
        impl RtCommand<Counter> for ArcAddCommand {
            fn execute(&mut self, ctx: &mut Counter) -> u32 {
                ctx.0 += self.amount;
                *self.applied.lock() = Some(ctx.0);
                1
            }
        }

        let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let stop_audio = stop.clone();
        let audio_thread = std::thread::spawn(move || {
            let mut ctx = Counter(0);
            while !stop_audio.load(Ordering::Relaxed) {
                processor.process(&mut ctx, MAX_COST_PER_CALL);
                std::thread::sleep(Duration::from_millis(1));
            }
            ctx
        });

        sender.execute_sync(Box::new(ArcAddCommand { amount: 5, applied: applied.clone() }));
        assert_eq!(*applied.lock(), Some(5));

        stop.store(true, Ordering::Relaxed);
        let ctx = audio_thread.join().unwrap();
        assert_eq!(ctx.0, 5);
    }

    #[test]
    fn command_returning_zero_cost_is_retried_next_call() {
        let (mut sender, mut processor) = channel::<Counter>(8);
        let mut ctx = Counter(0);

        struct SlowCommand {
            calls: std::sync::Arc<std::sync::atomic::AtomicU32>,
        }
        impl RtCommand<Counter> for SlowCommand {
            fn execute(&mut self, ctx: &mut Counter) -> u32 {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    return 0;
                }
                ctx.0 = 42;
                1
            }
        }

        let calls = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        sender.execute_async(Box::new(SlowCommand { calls: calls.clone() }));

        let spent_first = processor.process(&mut ctx, MAX_COST_PER_CALL);
        assert_eq!(spent_first, 0);
        assert_eq!(ctx.0, 0);

        let spent_second = processor.process(&mut ctx, MAX_COST_PER_CALL);
        assert_eq!(spent_second, 1);
        assert_eq!(ctx.0, 42);
    }

    #[test]
    fn inline_execution_needs_no_processor() {
        let mut ctx = Counter(10);
        let cmd = Box::new(AddCommand { amount: 7, applied: parking_lot::Mutex::new(None) });
        RtCommandSender::execute_inline(&mut ctx, cmd);
        assert_eq!(ctx.0, 17);
    }

    #[test]
    fn max_cost_per_call_bounds_a_single_callback() {
        let (mut sender, mut processor) = channel::<Counter>(64);
        let mut ctx = Counter(0);

        for _ in 0..10 {
            sender.execute_async(Box::new(AddCommand { amount: 1, applied: parking_lot::Mutex::new(None) }));
        }
        // Budget of 3 "cost units", each command costs 1 -> only 3 run.
        let spent = processor.process(&mut ctx, 3);
        assert_eq!(spent, 3);
        assert_eq!(ctx.0, 3);
    }
}
