// Exactly-once initialization latch shared by every subsystem init.

use std::sync::Mutex;

/// Guards a subsystem's init routine so that repeated calls are no-ops.
/// Concurrent callers are serialized: one runs `init`, the rest wait and
/// then see the outcome.
#[derive(Debug, Default)]
pub struct InitLatch {
    done: Mutex<bool>,
}

impl InitLatch {
    pub const fn new() -> Self {
        Self {
            done: Mutex::new(false),
        }
    }

    /// Run `init` if the latch has not fired yet. Returns `Ok(true)` when
    /// the routine ran, `Ok(false)` when it was skipped. A failed init
    /// leaves the latch open so the caller may retry.
    pub fn run<E>(&self, init: impl FnOnce() -> Result<(), E>) -> Result<bool, E> {
        let mut done = self.done.lock().unwrap_or_else(|e| e.into_inner());
        if *done {
            return Ok(false);
        }
        init()?;
        *done = true;
        Ok(true)
    }

    pub fn is_set(&self) -> bool {
        *self.done.lock().unwrap_or_else(|e| e.into_inner())
    }
}
