//! Results of one orchestrated run.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

use crate::item::{Inventory, Item};
use crate::scheduler::{TaskError, TaskId};
use crate::worker::{Variant, WorkerError};

/// One worker's result, in fork order.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub task: TaskId,
    pub name: String,
    pub result: Result<Item, TaskError<WorkerError>>,
}

impl TaskOutcome {
    pub fn item(&self) -> Option<&Item> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&TaskError<WorkerError>> {
        self.result.as_ref().err()
    }

    /// Failed only because the inventory was empty.
    pub fn is_exhausted(&self) -> bool {
        self.error()
            .and_then(TaskError::task_error)
            .is_some_and(WorkerError::is_exhaustion)
    }
}

impl Serialize for TaskOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Repr<'a> {
            task: TaskId,
            name: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            item: Option<&'a Item>,
            #[serde(skip_serializing_if = "Option::is_none")]
            error: Option<String>,
        }

        Repr {
            task: self.task,
            name: &self.name,
            item: self.item(),
            error: self.error().map(ToString::to_string),
        }
        .serialize(serializer)
    }
}

/// Symptoms of unsynchronized access. Always clean for the locked variant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RaceAudit {
    /// Items returned by more than one worker.
    pub duplicates: Vec<Item>,
    /// Items that left the store without any worker returning them.
    pub vanished: Vec<Item>,
}

impl RaceAudit {
    pub fn is_clean(&self) -> bool {
        self.duplicates.is_empty() && self.vanished.is_empty()
    }

    fn compute(initial: &Inventory, results: &[TaskOutcome], final_state: &Inventory) -> Self {
        let mut counts: BTreeMap<&Item, usize> = BTreeMap::new();
        for item in results.iter().filter_map(TaskOutcome::item) {
            *counts.entry(item).or_default() += 1;
        }

        let duplicates = counts
            .iter()
            .filter(|(_, n)| **n > 1)
            .map(|(item, _)| (*item).clone())
            .collect();
        let vanished = initial
            .items()
            .iter()
            .filter(|item| !final_state.contains(item) && !counts.contains_key(item))
            .cloned()
            .collect();

        Self {
            duplicates,
            vanished,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub variant: Variant,
    pub initial: Inventory,
    pub results: Vec<TaskOutcome>,
    pub final_state: Inventory,
    pub audit: RaceAudit,
}

impl Report {
    pub fn new(
        variant: Variant,
        initial: Inventory,
        results: Vec<TaskOutcome>,
        final_state: Inventory,
    ) -> Self {
        let audit = RaceAudit::compute(&initial, &results, &final_state);
        Self {
            variant,
            initial,
            results,
            final_state,
            audit,
        }
    }

    /// Items returned by successful workers, in fork order.
    pub fn claimed(&self) -> Vec<Item> {
        self.results
            .iter()
            .filter_map(TaskOutcome::item)
            .cloned()
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskError<WorkerError>> {
        self.results.iter().filter_map(TaskOutcome::error)
    }

    /// Number of workers that found the inventory empty.
    pub fn exhausted(&self) -> usize {
        self.results.iter().filter(|r| r.is_exhausted()).count()
    }

    /// Failures other than exhaustion: panics, rejected claims, semaphore errors.
    pub fn unexpected_failures(&self) -> impl Iterator<Item = &TaskError<WorkerError>> {
        self.results
            .iter()
            .filter(|r| !r.is_exhausted())
            .filter_map(TaskOutcome::error)
    }

    /// Every worker's item, or the first failure in fork order.
    pub fn into_items(self) -> Result<Vec<Item>, TaskError<WorkerError>> {
        self.results.into_iter().map(|r| r.result).collect()
    }
}
