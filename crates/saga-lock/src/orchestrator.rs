//! Orchestrator - forks the workers, joins them, collects the report.
//!
//! Flow:
//! 1. Build the store from the configured items
//! 2. Fork N workers of the selected variant
//! 3. Join all handles (failures never cut siblings short)
//! 4. Collect each handle's result in fork order

use std::sync::Arc;

use crate::action::RemovePolicy;
use crate::interleave::{Interleave, YieldNow};
use crate::item::{Inventory, Item};
use crate::permit::Semaphore;
use crate::report::{Report, TaskOutcome};
use crate::scheduler::Scheduler;
use crate::store::{Store, StoreError};
use crate::worker::{Variant, WorkerContext, run_worker};

pub const DEFAULT_ITEMS: [&str; 3] = ["a", "b", "c"];
pub const DEFAULT_WORKERS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("invalid initial inventory: {0}")]
    Inventory(#[from] StoreError),
    #[error("at least one worker is required")]
    NoWorkers,
}

pub struct OrchestratorConfig {
    pub items: Vec<Item>,
    pub workers: usize,
    pub variant: Variant,
    pub remove_policy: RemovePolicy,
    pub interleave: Arc<dyn Interleave>,
}

impl OrchestratorConfig {
    pub fn new(variant: Variant) -> Self {
        Self {
            items: DEFAULT_ITEMS.iter().copied().map(Item::from).collect(),
            workers: DEFAULT_WORKERS,
            variant,
            remove_policy: RemovePolicy::default(),
            interleave: Arc::new(YieldNow),
        }
    }

    pub fn with_items<I, T>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Item>,
    {
        self.items = items.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn with_variant(mut self, variant: Variant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_remove_policy(mut self, policy: RemovePolicy) -> Self {
        self.remove_policy = policy;
        self
    }

    pub fn with_interleave(mut self, interleave: Arc<dyn Interleave>) -> Self {
        self.interleave = interleave;
        self
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::new(Variant::default())
    }
}

pub struct Orchestrator {
    variant: Variant,
    workers: usize,
    initial: Inventory,
    ctx: WorkerContext,
    scheduler: Scheduler,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Result<Self, OrchestratorError> {
        if config.workers == 0 {
            return Err(OrchestratorError::NoWorkers);
        }
        let initial = Inventory::new(config.items)?;
        let store = Arc::new(Store::new(initial.clone(), config.remove_policy));

        Ok(Self {
            variant: config.variant,
            workers: config.workers,
            initial,
            ctx: WorkerContext {
                store,
                semaphore: Arc::new(Semaphore::mutex()),
                interleave: config.interleave,
            },
            scheduler: Scheduler::new(),
        })
    }

    /// The shared store, for subscribing observers before `run`.
    pub fn store(&self) -> &Arc<Store> {
        &self.ctx.store
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Fork every worker, join them all, and report in fork order.
    pub async fn run(&self) -> Report {
        tracing::info!(
            variant = %self.variant,
            policy = ?self.ctx.store.policy(),
            workers = self.workers,
            items = self.initial.len(),
            "Forking workers"
        );

        let handles: Vec<_> = (0..self.workers)
            .map(|i| {
                let (variant, ctx) = (self.variant, self.ctx.clone());
                self.scheduler
                    .fork(format!("worker-{i}"), move || run_worker(variant, ctx))
            })
            .collect();

        self.scheduler.join(&handles).await;

        let results: Vec<TaskOutcome> = handles
            .iter()
            .map(|handle| TaskOutcome {
                task: handle.id(),
                name: handle.name().to_string(),
                result: handle.result(),
            })
            .collect();

        let report = Report::new(
            self.variant,
            self.initial.clone(),
            results,
            self.ctx.store.get(),
        );

        tracing::info!(
            claimed = report.claimed().len(),
            exhausted = report.exhausted(),
            remaining = report.final_state.len(),
            "All workers joined"
        );
        if !report.audit.is_clean() {
            tracing::warn!(
                duplicates = ?report.audit.duplicates,
                vanished = ?report.audit.vanished,
                "Race detected"
            );
        }
        report
    }
}
