//! InMemoryJobStore - 開発・テスト用のトランザクション付きストア
//!
//! # 実装詳細
//! - `(namespace, JobId)` ごとにエンコード済みドキュメントとバージョンを保持
//! - トランザクションは読んだキーのバージョンを覚えておき、commit 時に比較する
//!   （楽観ロック。1 つでも変わっていれば `StoreError::Conflict`）
//! - 書き込みは commit までバッファされるので、drop すれば rollback になる
//! - `fail_next_commits(n)` で commit 失敗を注入できる（リトライのテスト用）

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{JobId, JobRecord, codec};
use crate::ports::{JobStore, JobTransaction, StoreError};

type Key = (String, JobId);

/// 保存されたドキュメント
#[derive(Debug, Clone)]
struct Versioned {
    version: u64,
    document: Vec<u8>,
}

#[derive(Debug, Default)]
struct Shared {
    documents: Mutex<HashMap<Key, Versioned>>,
    injected_failures: AtomicU32,
}

/// InMemoryJobStore は開発用の JobStore
///
/// # 使用例
/// ```ignore
/// let store = Arc::new(InMemoryJobStore::new());
/// let tracker = TrackerBuilder::new(config).store(store.clone()).build()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryJobStore {
    shared: Arc<Shared>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 次の `n` 回の commit を `Conflict` で失敗させる
    pub fn fail_next_commits(&self, n: u32) {
        self.shared.injected_failures.store(n, Ordering::SeqCst);
    }

    /// namespace 内のレコード数
    pub async fn len(&self, namespace: &str) -> usize {
        let documents = self.shared.documents.lock().await;
        documents.keys().filter(|(ns, _)| ns == namespace).count()
    }

    /// 保存されている生のドキュメント
    pub async fn raw_document(&self, namespace: &str, job_id: JobId) -> Option<Vec<u8>> {
        let documents = self.shared.documents.lock().await;
        documents
            .get(&(namespace.to_string(), job_id))
            .map(|v| v.document.clone())
    }

    /// 生のドキュメントを直接書き込む（壊れたデータのテスト用）
    pub async fn put_raw_document(&self, namespace: &str, job_id: JobId, document: Vec<u8>) {
        let mut documents = self.shared.documents.lock().await;
        let key = (namespace.to_string(), job_id);
        let version = documents.get(&key).map_or(0, |v| v.version) + 1;
        documents.insert(key, Versioned { version, document });
    }

    fn take_injected_failure(&self) -> bool {
        self.shared
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn begin(&self, namespace: &str) -> Result<Box<dyn JobTransaction>, StoreError> {
        Ok(Box::new(InMemoryTransaction {
            store: self.clone(),
            namespace: namespace.to_string(),
            reads: HashMap::new(),
            writes: HashMap::new(),
        }))
    }

    async fn get(&self, namespace: &str, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
        let documents = self.shared.documents.lock().await;
        documents
            .get(&(namespace.to_string(), job_id))
            .map(|v| codec::decode(&v.document))
            .transpose()
            .map_err(StoreError::from)
    }
}

struct InMemoryTransaction {
    store: InMemoryJobStore,
    namespace: String,

    /// 読んだ時点のバージョン（None = 存在しなかった）
    reads: HashMap<JobId, Option<u64>>,

    writes: HashMap<JobId, JobRecord>,
}

#[async_trait]
impl JobTransaction for InMemoryTransaction {
    async fn get(&mut self, job_id: JobId) -> Result<Option<JobRecord>, StoreError> {
        if let Some(record) = self.writes.get(&job_id) {
            return Ok(Some(record.clone()));
        }
        let documents = self.store.shared.documents.lock().await;
        let stored = documents.get(&(self.namespace.clone(), job_id));
        self.reads
            .entry(job_id)
            .or_insert_with(|| stored.map(|v| v.version));
        Ok(stored.map(|v| codec::decode(&v.document)).transpose()?)
    }

    fn put(&mut self, record: JobRecord) {
        self.writes.insert(record.job_id, record);
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        if self.store.take_injected_failure() {
            return Err(StoreError::Conflict);
        }

        // エンコードはロックの外で済ませる
        let mut encoded = Vec::with_capacity(self.writes.len());
        for (job_id, record) in &self.writes {
            encoded.push((*job_id, codec::encode(record)?));
        }

        let mut documents = self.store.shared.documents.lock().await;
        for (job_id, read_version) in &self.reads {
            let current = documents
                .get(&(self.namespace.clone(), *job_id))
                .map(|v| v.version);
            if current != *read_version {
                return Err(StoreError::Conflict);
            }
        }
        for (job_id, document) in encoded {
            let key = (self.namespace.clone(), job_id);
            let version = documents.get(&key).map_or(0, |v| v.version) + 1;
            documents.insert(key, Versioned { version, document });
        }
        Ok(())
    }
}
