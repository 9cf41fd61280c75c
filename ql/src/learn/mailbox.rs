use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Train,
    Quit,
}

/// Single-slot message box between the driving thread and an agent thread.
///
/// Holds at most one pending [Command]; a write replaces an unread one (last writer wins).
#[derive(Default)]
pub struct Mailbox {
    message: Mutex<Option<Command>>,
    signal: Condvar,
}

impl Mailbox {
    pub fn new() -> Self { Self::default() }

    pub fn write(
        &self,
        command: Command,
    ) {
        let mut message = self.message.lock().unwrap_or_else(PoisonError::into_inner);
        *message = Some(command);
        self.signal.notify_all();
    }

    /// Blocks until a message is available and takes it out of the box
    pub fn wait_read(&self) -> Command {
        let mut message = self.message.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(command) = message.take() {
                return command;
            }
            message = self.signal.wait(message).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Shared "continue processing" flag, checked by the agent at every environment step and episode boundary.
#[derive(Clone, Default, Debug)]
pub struct ProcessingFlag(Arc<AtomicBool>);

impl ProcessingFlag {
    pub fn start(&self) { self.0.store(true, Ordering::SeqCst) }

    pub fn stop(&self) { self.0.store(false, Ordering::SeqCst) }

    pub fn should_continue(&self) -> bool { self.0.load(Ordering::SeqCst) }
}
