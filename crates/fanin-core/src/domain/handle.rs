//! Task handle: the weight a running task holds against its job.

use serde::{Deserialize, Serialize};

use super::ids::JobId;
use super::weight::Weight;

/// Ephemeral token owned by one executing task.
///
/// Returned by attach, surrendered by value to detach. Not `Clone`: the only way to
/// surrender it twice is to smuggle a copy through serialization, which the tracker
/// rejects with `WeightUnderflow`.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    job_id: JobId,
    weight: Weight,
    spawned_children: u64,
}

impl TaskHandle {
    pub(crate) fn new(job_id: JobId, weight: Weight) -> Self {
        Self {
            job_id,
            weight,
            spawned_children: 0,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn weight(&self) -> Weight {
        self.weight
    }

    pub fn spawned_children(&self) -> u64 {
        self.spawned_children
    }

    /// Record one child about to be started; returns the job id to hand to it.
    pub fn spawn_child(&mut self) -> JobId {
        self.spawned_children = self.spawned_children.saturating_add(1);
        self.job_id
    }

    /// Record `n` children started at once.
    pub fn add_children(&mut self, n: u64) {
        self.spawned_children = self.spawned_children.saturating_add(n);
    }
}
