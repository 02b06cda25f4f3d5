//! fanin-core
//!
//! Completion detection for dynamically expanding trees of tasks.
//!
//! 中央のスケジューラーを持たず、各タスクが共有ストア上の JobRecord を
//! アトミックに更新するだけで「ジョブ全体の完了」をちょうど 1 回検出します。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（JobId, Weight, JobRecord, TaskHandle, errors）
//! - **ports**: 抽象化レイヤー（JobStore, Clock, IdGenerator）
//! - **app**: Tracker / TaskGuard / 設定
//! - **impls**: 実装（InMemoryJobStore など開発用）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{TaskGuard, Tracker, TrackerBuilder, TrackerConfig};
pub use domain::{JobId, JobRecord, JobStatus, TaskHandle, TrackerError};
