//! saga-lock: fork/join workers competing for items in a shared store.
//!
//! The unlocked variant reproduces the select-then-claim race; the locked
//! variant serializes it behind a FIFO semaphore.

mod action;
mod item;

pub mod interleave;
pub mod orchestrator;
pub mod permit;
pub mod report;
pub mod scheduler;
pub mod store;
pub mod worker;

pub use action::{Action, RemovePolicy, reduce};
pub use item::{Inventory, Item};
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorError};
pub use permit::{Permit, Semaphore, SemaphoreError};
pub use report::{RaceAudit, Report, TaskOutcome};
pub use scheduler::{Scheduler, TaskError, TaskHandle, TaskId, TaskStatus};
pub use store::{Store, StoreError, Subscription};
pub use worker::{Variant, WorkerError, pop_item, pop_item_with_lock};
