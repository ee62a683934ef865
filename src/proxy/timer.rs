//! Single-outstanding cancellable timer.
//!
//! A `Timer` lives inside its owner's locked state. Scheduling cancels the
//! previous timer of the same slot. When the sleep elapses the callback gets
//! the generation it was armed with and must `claim` it under the owner's
//! lock; a superseded or cancelled firing fails the claim and does nothing.

use std::time::Duration;

use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub(crate) struct Timer {
    generation: u64,
    armed: Option<AbortHandle>,
}

impl Timer {
    /// Arm the slot, cancelling whatever was armed before.
    pub(crate) fn schedule<F>(&mut self, delay: Duration, shutdown: &CancellationToken, on_fire: F)
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;
        let shutdown = shutdown.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {}
                () = tokio::time::sleep(delay) => on_fire(generation),
            }
        });
        self.armed = Some(task.abort_handle());
    }

    /// Cancel the armed timer. Returns true if one was armed.
    pub(crate) fn cancel(&mut self) -> bool {
        match self.armed.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Claim a firing of `generation`, disarming the slot.
    pub(crate) fn claim(&mut self, generation: u64) -> bool {
        if self.armed.is_some() && self.generation == generation {
            self.armed = None;
            true
        } else {
            false
        }
    }
}
