//! Scheduling point between a worker's select and claim steps.
//!
//! This is where the unlocked race lives: whatever other tasks run here see
//! the same head item. Tests swap in `Lockstep` to force the overlap.
//!
//! Workers also report when they park on the semaphore and when they give up
//! without selecting, so a forcing strategy can tell a worker that is still
//! on its way to the select step from one that cannot get there.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;

#[async_trait]
pub trait Interleave: Send + Sync {
    /// Called after the head item was read and before it is claimed.
    async fn after_select(&self);

    /// The worker is about to wait for a semaphore permit.
    fn parked(&self) {}

    /// The worker holds the permit it was waiting for.
    fn unparked(&self) {}

    /// The worker found nothing to select and will not reach `after_select`.
    fn skipped(&self) {}
}

/// Cooperative yield: lets every other runnable task take a step.
#[derive(Debug, Default, Clone, Copy)]
pub struct YieldNow;

#[async_trait]
impl Interleave for YieldNow {
    async fn after_select(&self) {
        tokio::task::yield_now().await;
    }
}

/// No suspension. Select and claim run back to back.
#[derive(Debug, Default, Clone, Copy)]
pub struct Uninterrupted;

#[async_trait]
impl Interleave for Uninterrupted {
    async fn after_select(&self) {}
}

#[derive(Debug)]
struct Gate {
    /// Workers that may still reach `after_select` without waiting on anyone.
    running: usize,
    /// Bumped each time `running` drops to zero.
    opened: u64,
}

/// Holds a worker after select until no other worker can make progress
/// towards its own select step.
///
/// Unlocked workers all select before any of them claims. A locked worker
/// waits at the gate until the others are parked on the semaphore, so the
/// same forcing applies to both variants.
///
/// `workers` must equal the number of workers sharing this instance.
#[derive(Debug)]
pub struct Lockstep {
    gate: Mutex<Gate>,
    opened: Notify,
}

impl Lockstep {
    pub fn new(workers: usize) -> Self {
        Self {
            gate: Mutex::new(Gate {
                running: workers,
                opened: 0,
            }),
            opened: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Gate> {
        match self.gate.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Lockstep mutex poisoned - recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Take one worker out of the running count. Returns the gate generation
    /// the caller must see change before passing.
    fn settle(&self) -> u64 {
        let mut gate = self.lock();
        let ticket = gate.opened;
        gate.running = gate.running.saturating_sub(1);
        if gate.running == 0 {
            gate.opened += 1;
            drop(gate);
            tracing::trace!("Lockstep gate opened");
            self.opened.notify_waiters();
        }
        ticket
    }

    fn is_open_since(&self, ticket: u64) -> bool {
        self.lock().opened != ticket
    }
}

#[async_trait]
impl Interleave for Lockstep {
    async fn after_select(&self) {
        let ticket = self.settle();
        loop {
            let opened = self.opened.notified();
            tokio::pin!(opened);
            opened.as_mut().enable();
            if self.is_open_since(ticket) {
                return;
            }
            opened.await;
        }
    }

    fn parked(&self) {
        self.settle();
    }

    fn unparked(&self) {
        self.lock().running += 1;
    }

    fn skipped(&self) {
        self.settle();
    }
}
