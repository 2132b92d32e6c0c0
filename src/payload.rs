//! # Payload モジュール
//!
//! 外部トランスポート（HTTPなど）とコア操作の間のJSON変換を提供します。
//!
//! JSONの解析失敗や必須フィールドの欠落は、すべて`CoreError::InvalidInput`として
//! 値で返します。トランスポート層はその値をそのまま応答コードへ対応付けます。
//!
//! | 要求 | 本文 | 呼び出すコア操作 |
//! |------|------|------------------|
//! | 目標更新 | 単一オブジェクトまたは配列 | `TargetRegistry::upsert_batch` |
//! | 射撃指令 | `{command_id, target_id, ...}` | `FireCommandCoordinator::submit_ack` |
//! | 方位指令 | `{azimuth_command}` または `{target_azimuth}` | `TurretMotionController::set_target` |

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, CoreResult};
use crate::models::{
    coordinator::FireCommandCoordinator,
    fire_command::{AckResult, FireRequest},
    target::{BatchReport, RejectedItem, TargetRegistry, TargetUpdate},
    turret::{TurretMotionController, TurretStatus},
};

fn invalid(context: &str, err: impl std::fmt::Display) -> CoreError {
    CoreError::InvalidInput(format!("{}: {}", context, err))
}

/// 目標更新の本文を解析
///
/// 配列の場合、解析できない要素は`Err`として位置を保ったまま返します。
pub fn parse_target_updates(body: &str) -> CoreResult<Vec<CoreResult<TargetUpdate>>> {
    let value: Value = serde_json::from_str(body).map_err(|e| invalid("JSON解析エラー", e))?;

    let items = match value {
        Value::Array(items) => items,
        single @ Value::Object(_) => vec![single],
        other => return Err(invalid("目標更新はオブジェクトまたは配列が必要です", other)),
    };

    Ok(items
        .into_iter()
        .map(|item| serde_json::from_value::<TargetUpdate>(item).map_err(|e| invalid("目標更新の形式エラー", e)))
        .collect())
}

/// 目標更新の本文を解析してレジストリへ適用
///
/// 解析できない要素とレジストリが拒否した要素の両方を、元の位置で報告します。
pub fn ingest_targets(registry: &TargetRegistry, body: &str) -> CoreResult<BatchReport> {
    let parsed = parse_target_updates(body)?;

    let mut rejected = Vec::new();
    let mut positions = Vec::new();
    let mut updates = Vec::new();
    for (index, item) in parsed.into_iter().enumerate() {
        match item {
            Ok(update) => {
                positions.push(index);
                updates.push(update);
            }
            Err(e) => rejected.push(RejectedItem {
                index,
                id: None,
                reason: e.to_string(),
            }),
        }
    }

    let mut report = registry.upsert_batch(updates);
    for item in &mut report.rejected {
        item.index = positions[item.index];
    }
    report.rejected.extend(rejected);
    report.rejected.sort_by_key(|item| item.index);
    Ok(report)
}

/// 射撃指令の本文を解析
pub fn parse_fire_request(body: &str) -> CoreResult<FireRequest> {
    serde_json::from_str(body).map_err(|e| invalid("射撃指令の形式エラー", e))
}

/// 射撃指令の本文を解析してコーディネータへ渡す
///
/// 解析失敗もINVALID_COMMANDのAckResultとして返します。
pub fn handle_fire_request(coordinator: &FireCommandCoordinator, body: &str) -> AckResult {
    match parse_fire_request(body) {
        Ok(request) => coordinator.submit_ack(request),
        Err(e) => AckResult::rejected("", &e),
    }
}

/// 方位指令
///
/// `azimuth_command`と`target_azimuth`の両方がある場合は`azimuth_command`を優先します。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AzimuthCommand {
    #[serde(default)]
    pub azimuth_command: Option<f64>,
    #[serde(default)]
    pub target_azimuth: Option<f64>,
    #[serde(default)]
    pub rotation_speed: Option<f64>,
}

impl AzimuthCommand {
    pub fn azimuth(&self) -> CoreResult<f64> {
        self.azimuth_command
            .or(self.target_azimuth)
            .ok_or_else(|| CoreError::InvalidInput("azimuth_command/target_azimuthがありません".to_string()))
    }

    /// 砲塔へ適用（速度の指定があれば先に反映）
    pub fn apply(&self, turret: &TurretMotionController) -> CoreResult<()> {
        let azimuth = self.azimuth()?;
        if let Some(speed) = self.rotation_speed {
            turret.set_speed(speed)?;
        }
        turret.set_target(azimuth)
    }
}

pub fn parse_azimuth_command(body: &str) -> CoreResult<AzimuthCommand> {
    serde_json::from_str(body).map_err(|e| invalid("方位指令の形式エラー", e))
}

/// 方位指令への応答
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AzimuthAck {
    pub status: &'static str,
}

/// 方位指令の本文を解析して砲塔へ適用
pub fn handle_azimuth_command(turret: &TurretMotionController, body: &str) -> CoreResult<AzimuthAck> {
    parse_azimuth_command(body)?.apply(turret)?;
    Ok(AzimuthAck { status: "OK" })
}

/// 整数方位の状態応答（上位管制の受信形式）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AzimuthStatus {
    pub current_azimuth: u16,
}

impl AzimuthStatus {
    pub fn of(turret: &TurretMotionController) -> Self {
        Self { current_azimuth: turret.reported_azimuth() }
    }
}

/// 応答オブジェクトをJSON文字列へ
pub fn to_json<T: Serialize>(value: &T) -> CoreResult<String> {
    serde_json::to_string(value).map_err(|e| CoreError::Execution(format!("JSON生成エラー: {}", e)))
}

/// 砲塔の詳細状態をJSONへ
pub fn turret_status_json(turret: &TurretMotionController) -> CoreResult<String> {
    to_json::<TurretStatus>(&turret.get_status())
}
