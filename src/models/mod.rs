// 基本的なデータ型と数学ユーティリティ
pub mod common;

// 実効装置・通知先のインターフェース（trait）定義
pub mod traits;

// 射撃指令と状態機械
pub mod fire_command;
pub mod events;

// 目標レジストリ・砲塔・射撃指令コーディネータ
pub mod target;
pub mod turret;
pub mod coordinator;

// 模擬目標の生成
pub mod simulator;

// 便利な re-export
pub use common::*;
pub use traits::*;
pub use fire_command::{AckCode, AckResult, AimSolution, FireCommand, FireRequest, FireState, SimulatedEffector};
pub use events::{EventLog, FireEvent, FireEventKind, Notification};
pub use target::{BatchReport, RejectedItem, Target, TargetRegistry, TargetSnapshot, TargetUpdate};
pub use turret::{TurretMotionController, TurretState, TurretStatus};
pub use coordinator::{CoordinatorConfig, FireCommandCoordinator};
pub use simulator::{SimulatedTarget, SimulatorConfig, TargetSimulator};
