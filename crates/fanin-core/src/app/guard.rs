//! TaskGuard - attach/detach のスコープ管理
//!
//! タスクが `finish()` を呼ばずに終わった（早期 return、panic）場合でも、
//! Drop で detach を tokio ランタイムに投げて重みが漏れないようにします。
//! ランタイム外で drop された場合は detach できないので error ログだけ残す
//! （そのジョブは完了しなくなる）。

use tracing::{error, warn};

use super::tracker::Tracker;
use crate::domain::{JobId, JobStatus, TaskHandle, TrackerError, Weight};

/// TaskGuard は attach 済みの TaskHandle を包む RAII ガード
pub struct TaskGuard {
    tracker: Tracker,
    job_id: JobId,
    weight: Weight,
    handle: Option<TaskHandle>,
}

impl TaskGuard {
    pub(crate) fn new(tracker: Tracker, handle: TaskHandle) -> Self {
        Self {
            tracker,
            job_id: handle.job_id(),
            weight: handle.weight(),
            handle: Some(handle),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn weight(&self) -> Weight {
        self.weight
    }

    /// 子タスクを 1 つ起動することを記録し、子に渡す job id を返す
    pub fn spawn_child(&mut self) -> JobId {
        if let Some(handle) = self.handle.as_mut() {
            handle.spawn_child();
        }
        self.job_id
    }

    pub fn spawned_children(&self) -> u64 {
        self.handle
            .as_ref()
            .map_or(0, TaskHandle::spawned_children)
    }

    /// detach してジョブのステータスを返す
    pub async fn finish(mut self) -> Result<JobStatus, TrackerError> {
        // handle を取り出すのは finish と Drop だけで、どちらも self を消費する
        let Some(handle) = self.handle.take() else {
            unreachable!("task guard for job {} finished twice", self.job_id);
        };
        self.tracker.detach(handle).await
    }
}

impl std::fmt::Debug for TaskGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGuard")
            .field("job_id", &self.job_id)
            .field("weight", &self.weight)
            .field("spawned_children", &self.spawned_children())
            .finish()
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let job_id = self.job_id;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!(job_id = %job_id, weight = %self.weight, "task guard dropped without finish; detaching in background");
                let tracker = self.tracker.clone();
                runtime.spawn(async move {
                    if let Err(err) = tracker.detach(handle).await {
                        error!(job_id = %job_id, error = %err, "background detach failed");
                    }
                });
            }
            Err(_) => {
                error!(
                    job_id = %job_id,
                    weight = %self.weight,
                    "task guard dropped outside a tokio runtime; weight leaked and the job cannot complete"
                );
            }
        }
    }
}
