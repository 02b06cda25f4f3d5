//! App - アプリケーション層
//!
//! ports を組み合わせて完了検出のロジックを実装します。
//!
//! # 主要コンポーネント
//! - **TrackerBuilder**: 設定の検証とワイヤリング
//! - **Tracker**: attach / detach / status
//! - **TaskGuard**: attach から detach までのスコープ
//! - **RetryPolicy**: ストアの一時的な失敗に対するバックオフ

pub mod builder;
pub mod config;
pub mod guard;
pub mod retry;
pub mod tracker;

pub use self::builder::{BuildError, TrackerBuilder};
pub use self::config::{ConfigError, TrackerConfig};
pub use self::guard::TaskGuard;
pub use self::retry::RetryPolicy;
pub use self::tracker::Tracker;
