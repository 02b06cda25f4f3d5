//! TrackerBuilder - Tracker の構築とワイヤリング
//!
//! # Fail-fast 設計
//! - 設定は build() 時に検証する（ConfigError）
//! - ストアは必須。未設定なら BuildError::MissingStore
//! - Clock / IdGenerator は省略するとシステム時刻と ULID を使う

use std::sync::Arc;

use super::config::{ConfigError, TrackerConfig};
use super::tracker::Tracker;
use crate::ports::{Clock, IdGenerator, JobStore, SystemClock, UlidGenerator};

/// TrackerBuilder は Tracker を構築
///
/// # 使用例
/// ```ignore
/// let tracker = TrackerBuilder::new(TrackerConfig::new("faas_job"))
///     .store(InMemoryJobStore::new())
///     .build()?;
/// ```
pub struct TrackerBuilder {
    config: TrackerConfig,
    store: Option<Arc<dyn JobStore>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

/// BuildError は Tracker 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid tracker config: {0}")]
    Config(#[from] ConfigError),

    #[error("no job store configured")]
    MissingStore,
}

impl TrackerBuilder {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            store: None,
            clock: None,
            ids: None,
        }
    }

    pub fn store<S: JobStore + 'static>(mut self, store: S) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn id_generator<G: IdGenerator + 'static>(mut self, ids: G) -> Self {
        self.ids = Some(Arc::new(ids));
        self
    }

    pub fn build(self) -> Result<Tracker, BuildError> {
        self.config.validate()?;
        let store = self.store.ok_or(BuildError::MissingStore)?;
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        // ULID のタイムスタンプは start_date と同じ時計から取る
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));
        Ok(Tracker::new(self.config, store, clock, ids))
    }
}
