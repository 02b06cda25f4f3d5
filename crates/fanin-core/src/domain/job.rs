//! Job record and completion arithmetic.
//!
//! Design: the record is the single source of truth for one job.
//! - State transitions are pure methods; the tracker runs them inside a store transaction.
//! - A transition that fails leaves the record untouched, so the aborted transaction
//!   never has anything partial to commit.

use serde::{Deserialize, Serialize};

use super::errors::TrackerError;
use super::handle::TaskHandle;
use super::ids::JobId;
use super::weight::{ActiveWeight, Weight};

/// Exponent issued to the root task.
pub const ROOT_EXPONENT: u32 = 1;

/// Persisted completion state of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,

    /// Epoch seconds, set at creation.
    pub start_date: i64,

    /// Epoch seconds, set exactly once when completion is detected.
    pub end_date: Option<i64>,

    /// Tasks ever registered, including the root.
    pub total_tasks: u64,

    /// Tasks that have detached.
    pub ended_tasks: u64,

    /// Highest exponent issued so far.
    pub weight_exponent: u32,

    /// Sum of the weights of tasks that attached but did not detach yet.
    pub active_weight: ActiveWeight,
}

impl JobRecord {
    /// Fresh record for a root task, plus the root's weight.
    pub fn new_root(job_id: JobId, now: i64) -> (Self, Weight) {
        let weight = Weight::from_exponent(ROOT_EXPONENT);
        let record = Self {
            job_id,
            start_date: now,
            end_date: None,
            total_tasks: 1,
            ended_tasks: 0,
            weight_exponent: ROOT_EXPONENT,
            active_weight: ActiveWeight::from(weight),
        };
        (record, weight)
    }

    pub fn is_complete(&self) -> bool {
        self.end_date.is_some()
    }

    /// Issue the next weight to a child task.
    pub fn attach_child(&mut self) -> Result<Weight, TrackerError> {
        if self.is_complete() {
            return Err(TrackerError::JobAlreadyComplete(self.job_id));
        }
        self.weight_exponent += 1;
        let weight = Weight::from_exponent(self.weight_exponent);
        self.active_weight.add(weight);
        Ok(weight)
    }

    /// Fold a finished task into the record.
    ///
    /// `ended_tasks` may transiently exceed `total_tasks`: a child can detach before its
    /// parent reports the fan-out that produced it. Only the weight decides completion.
    ///
    /// Counters are computed before anything is touched; a handle whose child count would
    /// overflow them is rejected as `CorruptHandle`.
    pub fn detach(&mut self, handle: &TaskHandle, now: i64) -> Result<JobStatus, TrackerError> {
        let weight = handle.weight();
        let corrupt = || TrackerError::CorruptHandle {
            job_id: self.job_id,
            spawned_children: handle.spawned_children(),
        };
        let total_tasks = self
            .total_tasks
            .checked_add(handle.spawned_children())
            .ok_or_else(corrupt)?;
        let ended_tasks = self.ended_tasks.checked_add(1).ok_or_else(corrupt)?;
        self.active_weight
            .release(weight)
            .map_err(|_| TrackerError::WeightUnderflow {
                job_id: self.job_id,
                weight,
            })?;
        self.total_tasks = total_tasks;
        self.ended_tasks = ended_tasks;

        if self.active_weight.is_zero() {
            if self.ended_tasks == self.total_tasks {
                self.end_date = Some(now);
            } else {
                // 子は publish 済みだがまだ attach していない
                tracing::debug!(
                    job_id = %self.job_id,
                    total_tasks = self.total_tasks,
                    ended_tasks = self.ended_tasks,
                    "no weight outstanding; children reported but not yet attached"
                );
            }
        }
        Ok(self.status())
    }

    pub fn status(&self) -> JobStatus {
        JobStatus {
            job_id: self.job_id,
            total_tasks: self.total_tasks,
            ended_tasks: self.ended_tasks,
            is_complete: self.is_complete(),
        }
    }
}

/// Job status returned by detach and status reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub total_tasks: u64,
    pub ended_tasks: u64,
    pub is_complete: bool,
}
