//! Semaphore permits for serializing access to the store.
//!
//! A `Permit` is a one-shot capability:
//! - `Semaphore::acquire()` → `Permit` (suspends while none are free)
//! - `Permit::release(self)` or drop → permit returns to the semaphore
//! - releasing twice: NOT POSSIBLE (`release` consumes the permit)

mod semaphore;

pub use semaphore::{Permit, Semaphore, SemaphoreError};
