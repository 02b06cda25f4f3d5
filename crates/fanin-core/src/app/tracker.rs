//! Tracker - ジョブ完了検出の本体
//!
//! タスクは開始時に attach して重み（TaskHandle）を受け取り、終了時に detach で返却します。
//! 全ての更新は JobRecord 1 件に対する 1 トランザクションの read-modify-write です。
//!
//! # 操作
//! - `attach_root()`: 新しいジョブを作り、root タスクとして attach
//! - `attach_child(job_id)`: 既存ジョブに子タスクとして attach
//! - `detach(handle)`: 終了を報告し、ジョブが完了したかを返す
//!
//! # 完了判定
//! `active_weight == 0 && ended_tasks == total_tasks` への遷移は 1 トランザクション内で
//! 起こるので、完了を観測する detach はジョブごとに高々 1 回。

use std::ops::AsyncFnOnce;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::config::TrackerConfig;
use super::guard::TaskGuard;
use super::retry::RetryPolicy;
use crate::domain::{JobId, JobRecord, JobStatus, TaskHandle, TrackerError};
use crate::ports::{Clock, IdGenerator, JobStore, StoreError};

/// Tracker はプロセス内で共有する完了トラッカー
///
/// `Arc` を内包しているので clone は安価。タスクコードへは値として渡す。
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<Inner>,
}

struct Inner {
    namespace: String,
    retry: RetryPolicy,
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("namespace", &self.inner.namespace)
            .field("retry", &self.inner.retry)
            .finish_non_exhaustive()
    }
}

impl Tracker {
    pub(crate) fn new(
        config: TrackerConfig,
        store: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                namespace: config.namespace,
                retry: config.retry,
                store,
                clock,
                ids,
            }),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    /// 新しいジョブを作成し、root タスクの handle を返す
    ///
    /// 生成した id が既に存在した場合は上書きせず `DuplicateJob` を返す。
    pub async fn attach_root(&self) -> Result<TaskHandle, TrackerError> {
        let job_id = self.inner.ids.generate_job_id();
        let clock = &self.inner.clock;
        let weight = self
            .transact(job_id, |existing| match existing {
                Some(_) => Err(TrackerError::DuplicateJob(job_id)),
                None => Ok(JobRecord::new_root(job_id, clock.epoch_seconds())),
            })
            .await?;
        info!(job_id = %job_id, "job started");
        Ok(TaskHandle::new(job_id, weight))
    }

    /// 既存ジョブに子タスクとして attach する
    pub async fn attach_child(&self, job_id: JobId) -> Result<TaskHandle, TrackerError> {
        let weight = self
            .transact(job_id, |existing| {
                let mut record = existing.ok_or(TrackerError::JobNotFound(job_id))?;
                let weight = record.attach_child()?;
                Ok((record, weight))
            })
            .await?;
        debug!(job_id = %job_id, exponent = weight.exponent(), "task attached");
        Ok(TaskHandle::new(job_id, weight))
    }

    /// タスクの終了を報告する
    ///
    /// handle は消費される。失敗した場合でもストアのレコードは変更されない。
    pub async fn detach(&self, handle: TaskHandle) -> Result<JobStatus, TrackerError> {
        let job_id = handle.job_id();
        let clock = &self.inner.clock;
        let status = self
            .transact(job_id, |existing| {
                let mut record = existing.ok_or(TrackerError::JobNotFound(job_id))?;
                let status = record.detach(&handle, clock.epoch_seconds())?;
                Ok((record, status))
            })
            .await?;
        if status.is_complete {
            info!(
                job_id = %job_id,
                total_tasks = status.total_tasks,
                "job complete"
            );
        } else {
            debug!(
                job_id = %job_id,
                exponent = handle.weight().exponent(),
                spawned_children = handle.spawned_children(),
                ended_tasks = status.ended_tasks,
                total_tasks = status.total_tasks,
                "task detached"
            );
        }
        Ok(status)
    }

    /// 現在のステータス（読み取りのみ）
    pub async fn status(&self, job_id: JobId) -> Result<JobStatus, TrackerError> {
        Ok(self.record(job_id).await?.status())
    }

    /// 現在の JobRecord（読み取りのみ。end_date のポーリング用）
    pub async fn record(&self, job_id: JobId) -> Result<JobRecord, TrackerError> {
        self.inner
            .store
            .get(&self.inner.namespace, job_id)
            .await?
            .ok_or(TrackerError::JobNotFound(job_id))
    }

    /// attach して TaskGuard を返す（`job_id` が None なら新しいジョブの root）
    pub async fn enter(&self, job_id: Option<JobId>) -> Result<TaskGuard, TrackerError> {
        let handle = match job_id {
            None => self.attach_root().await?,
            Some(job_id) => self.attach_child(job_id).await?,
        };
        Ok(TaskGuard::new(self.clone(), handle))
    }

    /// attach → body → detach をまとめて行う
    ///
    /// body の結果（エラーを含む）に関係なく detach される。
    ///
    /// # 使用例
    /// ```ignore
    /// let (out, status) = tracker
    ///     .run(Some(job_id), async |task| {
    ///         let child_job = task.spawn_child();
    ///         publish(child_job).await
    ///     })
    ///     .await?;
    /// ```
    pub async fn run<T>(
        &self,
        job_id: Option<JobId>,
        body: impl AsyncFnOnce(&mut TaskGuard) -> T,
    ) -> Result<(T, JobStatus), TrackerError> {
        let mut guard = self.enter(job_id).await?;
        let out = body(&mut guard).await;
        let status = guard.finish().await?;
        Ok((out, status))
    }

    /// 1 レコードに対する read-modify-write をトランザクションで実行する
    ///
    /// `mutate` は現在のレコード（なければ None）を受け取り、書き戻すレコードと戻り値を返す。
    /// `mutate` がエラーを返したらトランザクションは捨てられ、そのエラーがそのまま返る。
    /// ストアの一時的な失敗だけが RetryPolicy に従ってやり直される。
    async fn transact<T, F>(&self, job_id: JobId, mut mutate: F) -> Result<T, TrackerError>
    where
        F: FnMut(Option<JobRecord>) -> Result<(JobRecord, T), TrackerError> + Send,
        T: Send,
    {
        let retry = &self.inner.retry;
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.attempt(job_id, &mut mutate).await {
                Ok(result) => return result,
                Err(err) if err.is_transient() && retry.should_retry(attempts) => {
                    let delay = retry.jittered_delay(attempts);
                    warn!(
                        job_id = %job_id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transaction failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_transient() => {
                    return Err(TrackerError::TransactionFailed {
                        job_id,
                        attempts,
                        source: err,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// 1 回分の試行。外側の Err はストアの失敗、内側の Err は意味的な失敗。
    async fn attempt<T, F>(
        &self,
        job_id: JobId,
        mutate: &mut F,
    ) -> Result<Result<T, TrackerError>, StoreError>
    where
        F: FnMut(Option<JobRecord>) -> Result<(JobRecord, T), TrackerError> + Send,
        T: Send,
    {
        let mut tx = self.inner.store.begin(&self.inner.namespace).await?;
        let current = tx.get(job_id).await?;
        let (record, out) = match mutate(current) {
            Ok(updated) => updated,
            // tx は drop されて rollback
            Err(err) => return Ok(Err(err)),
        };
        tx.put(record);
        tx.commit().await?;
        Ok(Ok(out))
    }
}
