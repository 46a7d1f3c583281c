//! FIFO semaphore with direct permit hand-off.
//!
//! Waiters queue in arrival order. Release hands the permit straight to the
//! oldest live waiter instead of returning it to the counter, so a task that
//! arrives later can never slip in between release and wake-up.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SemaphoreError {
    #[error("semaphore needs at least one permit")]
    NoPermits,
    #[error("semaphore closed while waiting for a permit")]
    Closed,
}

struct SemaphoreState {
    permits: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// Counting semaphore. With one permit it is a mutex.
pub struct Semaphore {
    state: Mutex<SemaphoreState>,
    capacity: usize,
}

impl Semaphore {
    pub fn new(permits: usize) -> Result<Self, SemaphoreError> {
        if permits == 0 {
            return Err(SemaphoreError::NoPermits);
        }
        Ok(Self::with_permits(permits))
    }

    /// Binary semaphore.
    pub fn mutex() -> Self {
        Self::with_permits(1)
    }

    fn with_permits(permits: usize) -> Self {
        Self {
            state: Mutex::new(SemaphoreState {
                permits,
                waiters: VecDeque::new(),
            }),
            capacity: permits,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SemaphoreState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Semaphore mutex poisoned - recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available_permits(&self) -> usize {
        self.lock().permits
    }

    /// Number of tasks still waiting for a permit.
    pub fn queued(&self) -> usize {
        self.lock().waiters.iter().filter(|w| !w.is_closed()).count()
    }

    /// Take a permit without waiting. Never overtakes queued waiters: the
    /// counter is only non-zero while the queue is empty.
    pub fn try_acquire(self: &Arc<Self>) -> Option<Permit> {
        let mut state = self.lock();
        if state.permits == 0 {
            return None;
        }
        state.permits -= 1;
        Some(Permit::new(self))
    }

    /// Take a permit, suspending behind earlier waiters if none is free.
    pub async fn acquire(self: &Arc<Self>) -> Result<Permit, SemaphoreError> {
        let rx = {
            let mut state = self.lock();
            if state.permits > 0 {
                state.permits -= 1;
                return Ok(Permit::new(self));
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };

        tracing::trace!("Waiting for permit");
        let mut waiter = Waiter {
            semaphore: self,
            rx,
            armed: true,
        };
        (&mut waiter.rx)
            .await
            .map_err(|_| SemaphoreError::Closed)?;
        waiter.armed = false;
        Ok(Permit::new(self))
    }

    /// Run `fut` while holding a permit. The permit is released on every
    /// exit path, including unwinding.
    pub async fn run_exclusive<F, T>(self: &Arc<Self>, fut: F) -> Result<T, SemaphoreError>
    where
        F: Future<Output = T>,
    {
        let permit = self.acquire().await?;
        let out = fut.await;
        permit.release();
        Ok(out)
    }

    fn release(&self) {
        let mut state = self.lock();
        while let Some(waiter) = state.waiters.pop_front() {
            // A closed receiver means that acquire was abandoned; try the next one.
            if waiter.send(()).is_ok() {
                tracing::trace!("Permit handed off");
                return;
            }
        }
        state.permits += 1;
        debug_assert!(state.permits <= self.capacity, "permit released twice");
    }
}

/// Queued acquire. If dropped after being granted but before observing the
/// grant, the permit is passed on.
struct Waiter<'a> {
    semaphore: &'a Semaphore,
    rx: oneshot::Receiver<()>,
    armed: bool,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.rx.close();
        if self.rx.try_recv().is_ok() {
            self.semaphore.release();
        }
    }
}

/// One acquired permit. Released exactly once: on `release()` or on drop.
#[must_use = "dropping a permit releases it immediately"]
pub struct Permit {
    semaphore: Arc<Semaphore>,
}

impl Permit {
    fn new(semaphore: &Arc<Semaphore>) -> Self {
        Self {
            semaphore: Arc::clone(semaphore),
        }
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit")
            .field("capacity", &self.semaphore.capacity)
            .finish()
    }
}
