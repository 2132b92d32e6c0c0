use std::fmt;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{CoreError, CoreResult};
use crate::models::{
    common::{NedPosition, unix_now},
    traits::IEffector,
};

/// 射撃指令の状態
///
/// `IDLE → ARMED → FIRING → COMPLETED` の順にのみ進み、
/// 終端状態以外からは `ERROR` へ遷移できます。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FireState {
    Idle,
    Armed,
    Firing,
    Completed,
    Error,
}

impl FireState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FireState::Idle => "IDLE",
            FireState::Armed => "ARMED",
            FireState::Firing => "FIRING",
            FireState::Completed => "COMPLETED",
            FireState::Error => "ERROR",
        }
    }

    /// 終端状態（COMPLETED / ERROR）かどうか
    pub fn is_terminal(&self) -> bool {
        matches!(self, FireState::Completed | FireState::Error)
    }

    /// 指定状態への遷移が許可されているか
    pub fn can_transition_to(&self, next: FireState) -> bool {
        match (*self, next) {
            (current, _) if current.is_terminal() => false,
            (_, FireState::Error) => true,
            (FireState::Idle, FireState::Armed)
            | (FireState::Armed, FireState::Firing)
            | (FireState::Firing, FireState::Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for FireState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ACK/NACKコード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AckCode {
    Success,
    InvalidCommand,
    Busy,
    Error,
}

impl AckCode {
    /// 数値コード（SUCCESS=0, INVALID_COMMAND=1, BUSY=2, ERROR=3）
    pub fn code(&self) -> u8 {
        match self {
            AckCode::Success => 0,
            AckCode::InvalidCommand => 1,
            AckCode::Busy => 2,
            AckCode::Error => 3,
        }
    }

    pub fn is_success(&self) -> bool {
        *self == AckCode::Success
    }
}

/// 射撃指令の要求
///
/// 照準パラメータ（azimuth / elevation / range_m）は省略可能で、
/// 省略された値は目標レジストリから解決されます。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FireRequest {
    #[serde(default)]
    pub command_id: String,
    #[serde(default)]
    pub target_id: String,
    #[serde(default)]
    pub weapon_type: Option<String>,
    #[serde(default)]
    pub azimuth: Option<f64>,
    #[serde(default)]
    pub elevation: Option<f64>,
    #[serde(default)]
    pub range_m: Option<f64>,
}

impl FireRequest {
    pub fn new(command_id: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self {
            command_id: command_id.into(),
            target_id: target_id.into(),
            ..Default::default()
        }
    }

    pub fn with_weapon(mut self, weapon_type: impl Into<String>) -> Self {
        self.weapon_type = Some(weapon_type.into());
        self
    }

    pub fn with_aim(mut self, azimuth: f64, elevation: f64, range_m: f64) -> Self {
        self.azimuth = Some(azimuth);
        self.elevation = Some(elevation);
        self.range_m = Some(range_m);
        self
    }

    /// 照準パラメータがすべて指定されているか
    pub fn has_full_aim(&self) -> bool {
        self.azimuth.is_some() && self.elevation.is_some() && self.range_m.is_some()
    }

    /// 必須フィールドと数値の検証
    pub fn validate(&self) -> CoreResult<()> {
        if self.command_id.trim().is_empty() {
            return Err(CoreError::InvalidCommand("command_idがありません".to_string()));
        }
        if self.target_id.trim().is_empty() {
            return Err(CoreError::InvalidCommand("target_idがありません".to_string()));
        }
        for (name, value) in [
            ("azimuth", self.azimuth),
            ("elevation", self.elevation),
            ("range_m", self.range_m),
        ] {
            if value.is_some_and(|v| !v.is_finite()) {
                return Err(CoreError::InvalidCommand(format!("{}が有限値ではありません", name)));
            }
        }
        Ok(())
    }
}

/// 受理時点で確定した照準値
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct AimSolution {
    pub azimuth: f64,
    pub elevation: f64,
    pub range_m: f64,
}

impl AimSolution {
    /// 自ノード原点から見たNED位置への照準を計算
    pub fn from_position(position: &NedPosition) -> Self {
        Self {
            azimuth: position.bearing_deg(),
            elevation: position.elevation_deg(),
            range_m: position.slant_range(),
        }
    }
}

/// 射撃指令
///
/// 照準値は受理時点のスナップショットで、実行中に再計算されることはありません。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FireCommand {
    pub command_id: String,
    pub target_id: String,
    pub weapon_type: String,
    pub azimuth: f64,
    pub elevation: f64,
    pub range_m: f64,
    pub state: FireState,
    pub created_time: f64,
    pub started_time: Option<f64>,
    pub completed_time: Option<f64>,
    pub error_msg: Option<String>,
}

impl FireCommand {
    pub fn new(command_id: String, target_id: String, weapon_type: String, aim: AimSolution) -> Self {
        Self {
            command_id,
            target_id,
            weapon_type,
            azimuth: aim.azimuth,
            elevation: aim.elevation,
            range_m: aim.range_m,
            state: FireState::Idle,
            created_time: unix_now(),
            started_time: None,
            completed_time: None,
            error_msg: None,
        }
    }

    /// 状態遷移（時刻の記録を含む）
    pub fn transition(&mut self, next: FireState) -> CoreResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(CoreError::InvalidTransition { from: self.state, to: next });
        }

        self.state = next;
        match next {
            FireState::Firing => self.started_time = Some(unix_now()),
            FireState::Completed | FireState::Error => self.completed_time = Some(unix_now()),
            _ => {}
        }
        Ok(())
    }

    /// ERROR状態で終了させる。既に終端状態なら何もしない
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.state.is_terminal() {
            return;
        }
        self.error_msg = Some(message.into());
        // 非終端状態からERRORへの遷移は常に許可される
        let _ = self.transition(FireState::Error);
    }

    /// FIRINGからの経過時間（秒）
    pub fn firing_elapsed(&self) -> Option<f64> {
        match (self.started_time, self.completed_time) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

/// Submitに対する応答
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AckResult {
    pub ack_code: AckCode,
    pub command_id: String,
    pub state: Option<FireState>,
    pub message: String,
}

impl AckResult {
    pub fn accepted(command: &FireCommand) -> Self {
        Self {
            ack_code: AckCode::Success,
            command_id: command.command_id.clone(),
            state: Some(command.state),
            message: format!("{} {}", command.command_id, command.state),
        }
    }

    pub fn rejected(command_id: &str, error: &CoreError) -> Self {
        Self {
            ack_code: error.ack_code(),
            command_id: command_id.to_string(),
            state: None,
            message: error.to_string(),
        }
    }
}

/// 常に成功するシミュレーション用エフェクタ
#[derive(Debug, Clone)]
pub struct SimulatedEffector {
    pub name: String,
}

impl SimulatedEffector {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for SimulatedEffector {
    fn default() -> Self {
        Self::new("simulated")
    }
}

impl IEffector for SimulatedEffector {
    fn discharge(&self, command: &FireCommand) -> Result<(), String> {
        info!(
            "[{}] 射撃: {} (目標={}, 武器={}, 方位={:.1}°, 仰角={:.1}°, 射程={:.1}m)",
            self.name,
            command.command_id,
            command.target_id,
            command.weapon_type,
            command.azimuth,
            command.elevation,
            command.range_m
        );
        Ok(())
    }

    fn get_name(&self) -> &str {
        &self.name
    }
}
