//! The swap-pointer primitive: the one shape nearly every structural
//! mutation in the engine takes. A new value is built entirely on the
//! control thread, handed to the audio thread as an [`RtCommand`], and
//! the value it displaces comes back to the control thread to be
//! dropped — the audio thread never runs a destructor.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::queue::RtCommand;

/// A handle to the slot a [`SwapCommand`] will replace. Typically a
/// closure borrowing a field off `Ctx`, e.g. `|engine: &mut Engine| &mut
/// engine.scene`.
pub type Accessor<T, Ctx> = Box<dyn FnMut(&mut Ctx) -> &mut T + Send>;

/// Swaps `new_value` into the slot `accessor` points at, handing the
/// previous value back through the returned [`Arc<Mutex<Option<T>>>`]
/// once the command has run. The lock is only ever touched from the
/// command's `execute` (brief, O(1)) and by the control thread reading
/// the result afterwards — never from the per-sample render path.
pub struct SwapCommand<T, Ctx> {
    new_value: Option<T>,
    result: Arc<Mutex<Option<T>>>,
    accessor: Accessor<T, Ctx>,
}

impl<T, Ctx> SwapCommand<T, Ctx>
where
    T: Send + 'static,
    Ctx: 'static,
{
    pub fn new(
        new_value: T,
        accessor: impl FnMut(&mut Ctx) -> &mut T + Send + 'static,
    ) -> (Box<dyn RtCommand<Ctx>>, Arc<Mutex<Option<T>>>) {
        let result = Arc::new(Mutex::new(None));
        let cmd = Self { new_value: Some(new_value), result: result.clone(), accessor: Box::new(accessor) };
        (Box::new(cmd), result)
    }
}

impl<T, Ctx> RtCommand<Ctx> for SwapCommand<T, Ctx>
where
    T: Send + 'static,
{
    fn execute(&mut self, ctx: &mut Ctx) -> u32 {
        let slot = (self.accessor)(ctx);
        let new = self.new_value.take().expect("SwapCommand executed more than once");
        let old = std::mem::replace(slot, new);
        *self.result.lock() = Some(old);
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{channel, MAX_COST_PER_CALL};

    struct Holder {
        value: String,
    }

    #[test]
    fn swap_replaces_slot_and_returns_old_value() {
        let (mut sender, mut processor) = channel::<Holder>(4);
        let (cmd, result) = SwapCommand::new("new".to_string(), |h: &mut Holder| &mut h.value);

        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let stop_audio = stop.clone();
        let audio = std::thread::spawn(move || {
            let mut ctx = Holder { value: "old".to_string() };
            while !stop_audio.load(std::sync::atomic::Ordering::Relaxed) {
                processor.process(&mut ctx, MAX_COST_PER_CALL);
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            ctx
        });

        sender.execute_sync(cmd);
        assert_eq!(*result.lock(), Some("old".to_string()));

        stop.store(true, std::sync::atomic::Ordering::Relaxed);
        let ctx = audio.join().unwrap();
        assert_eq!(ctx.value, "new");
    }
}
