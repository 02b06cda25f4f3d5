//! TrackerConfig - Tracker の設定
//!
//! 環境変数を遅延参照するのではなく、構築時に明示的な値として渡して検証します。
//! 不正な設定は `TrackerBuilder::build()` の時点で `ConfigError` になる（Fail-fast）。

use super::retry::RetryPolicy;

/// Tracker の設定
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    /// JobRecord を置く論理コレクション名（エンティティ名）
    pub namespace: String,

    /// ストアのトランザクションが一時的に失敗したときのリトライ方針
    pub retry: RetryPolicy,
}

/// ConfigError は設定の検証エラー
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("namespace must not be empty")]
    EmptyNamespace,

    #[error("namespace '{0}' must not contain whitespace")]
    InvalidNamespace(String),

    #[error("retry.max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("retry.multiplier must be a finite value >= 1.0, got {0}")]
    InvalidMultiplier(f64),

    #[error("retry.base_delay must not exceed retry.max_delay")]
    DelayOutOfRange,
}

impl TrackerConfig {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.is_empty() {
            return Err(ConfigError::EmptyNamespace);
        }
        if self.namespace.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidNamespace(self.namespace.clone()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier(self.retry.multiplier));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(ConfigError::DelayOutOfRange);
        }
        Ok(())
    }
}
