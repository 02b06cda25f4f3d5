//! Errors - エラー型と分類
//!
//! # 分類
//! - Transient: 一時的なエラー（リトライ推奨）
//! - Permanent: 恒久的なエラー（リトライ無意味）
//! - Infrastructure: インフラエラー（ストア障害・壊れたドキュメント）

use thiserror::Error;

use super::ids::JobId;
use super::weight::Weight;
use crate::ports::StoreError;

/// ErrorKind は実行エラーの運用上の分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// TrackerError は Tracker の操作エラー
///
/// 意味的なエラー（JobNotFound など）は Tracker 内でリトライしない。
/// ストアの一時的な失敗だけがリトライされ、使い切ると TransactionFailed になる。
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("job {0} already exists")]
    DuplicateJob(JobId),

    #[error("weight {weight} is not outstanding for job {job_id} (double detach or corrupted handle)")]
    WeightUnderflow { job_id: JobId, weight: Weight },

    #[error("handle for job {job_id} reports {spawned_children} children, which overflows the task counters")]
    CorruptHandle { job_id: JobId, spawned_children: u64 },

    #[error("job {0} is already complete")]
    JobAlreadyComplete(JobId),

    #[error("transaction on job {job_id} failed after {attempts} attempts")]
    TransactionFailed {
        job_id: JobId,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TrackerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            // id を作り直せば成功する
            TrackerError::DuplicateJob(_) => ErrorKind::Transient,
            TrackerError::JobNotFound(_)
            | TrackerError::WeightUnderflow { .. }
            | TrackerError::CorruptHandle { .. }
            | TrackerError::JobAlreadyComplete(_) => ErrorKind::Permanent,
            TrackerError::TransactionFailed { .. } | TrackerError::Store(_) => {
                ErrorKind::Infrastructure
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}
