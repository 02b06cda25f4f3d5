//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryJobStore**: 楽観ロック付きのインメモリ JobStore
//!
//! 本番用のストア（Datastore など）は別クレートに配置する想定です。

pub mod inmem_store;

pub use self::inmem_store::InMemoryJobStore;
