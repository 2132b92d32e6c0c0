//! # fcsim
//!
//! 分散射撃管制テストハーネスのノード中核ロジック。
//!
//! - `models::target`: 目標レジストリ（活性判定と期限切れ掃除）
//! - `models::coordinator`: 射撃指令の状態機械（command_idごとに同時実行1件）
//! - `models::turret`: 最短経路・速度制限付きの砲塔旋回制御
//! - `models::simulator`: 等速直線運動する模擬目標の生成
//! - `node`: 上記をまとめて周期タスクを動かすノード
//! - `payload`: トランスポート層向けのJSON変換

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod node;
pub mod notify;
pub mod payload;

pub use config::NodeConfig;
pub use error::{ConfigError, CoreError, CoreResult, NotifyError};
pub use node::{FireControlNode, NodeHandle, NodeStatus};
