//! JobStore port - トランザクション付きカウンタストア
//!
//! JobRecord の正本（source of truth）。Tracker が必要とするのは次の 3 つだけです。
//! - `get`: 1 レコードの読み取り
//! - `put`: レコード全体の上書き
//! - トランザクション: 中の読み書きが全て commit されるか、全て捨てられるか
//!
//! # 設計原則
//! - 1 トランザクション = 1 レコードの read-modify-write（レコードをまたぐ更新はしない）
//! - commit 前に drop されたトランザクションは rollback 扱い
//! - 読んだレコードが commit までに他者に更新されていたら `StoreError::Conflict`
//!   （楽観ロック。Tracker 側がバックオフ付きでやり直す）
//!
//! # 実装
//! - **InMemoryJobStore**: 開発・テスト用（`impls::inmem_store`）
//! - 本番用（Datastore / PostgreSQL など）は別クレートに置く想定

use async_trait::async_trait;

use crate::domain::{CodecError, JobId, JobRecord};

/// StoreError はストア層のエラー
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("transaction conflict")]
    Conflict,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl StoreError {
    /// やり直せば成功しうるか
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Conflict | StoreError::Unavailable(_))
    }
}

/// JobStore は namespace ごとに JobRecord を保持する
#[async_trait]
pub trait JobStore: Send + Sync {
    /// トランザクションを開始
    async fn begin(&self, namespace: &str) -> Result<Box<dyn JobTransaction>, StoreError>;

    /// トランザクション外の読み取り（ステータスのポーリング用）
    async fn get(&self, namespace: &str, job_id: JobId) -> Result<Option<JobRecord>, StoreError>;
}

/// JobTransaction は 1 つのトランザクション文脈
///
/// `commit` は `self` を消費するので、commit 済みのトランザクションは再利用できない。
#[async_trait]
pub trait JobTransaction: Send {
    async fn get(&mut self, job_id: JobId) -> Result<Option<JobRecord>, StoreError>;

    /// 書き込みはバッファされ、commit 時にまとめて反映される
    fn put(&mut self, record: JobRecord);

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
