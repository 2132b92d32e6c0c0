use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{CoreError, CoreResult};
use crate::models::common::math_utils::{normalize_azimuth, round_to, shortest_arc};

/// 状態報告時の方位角の小数桁数
pub const DISPLAY_DECIMALS: i32 = 2;

/// 砲塔の内部状態（全精度）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurretState {
    /// 現在方位角（度, [0, 360)）
    pub current_azimuth: f64,
    /// 指令方位角（度, [0, 360)）
    pub target_azimuth: f64,
    /// 旋回速度（度/秒, 非負）
    pub rotation_speed: f64,
    /// 現在方位角が指令方位角と一致しているか
    pub at_target: bool,
}

impl TurretState {
    pub fn new(initial_azimuth: f64, rotation_speed: f64) -> Self {
        let azimuth = normalize_azimuth(initial_azimuth);
        Self {
            current_azimuth: azimuth,
            target_azimuth: azimuth,
            rotation_speed: rotation_speed.abs(),
            at_target: true,
        }
    }

    pub fn set_target(&mut self, azimuth_deg: f64) {
        self.target_azimuth = normalize_azimuth(azimuth_deg);
        self.at_target = self.current_azimuth == self.target_azimuth;
    }

    pub fn set_speed(&mut self, degrees_per_second: f64) {
        self.rotation_speed = degrees_per_second.abs();
    }

    /// 制御ループの1ステップ
    ///
    /// 最短経路で指令方位角へ向かって最大`rotation_speed * dt`だけ旋回します。
    /// 残り角度が1ステップ以内なら指令方位角にスナップします。
    pub fn update_position(&mut self, dt: f64) {
        if self.current_azimuth == self.target_azimuth {
            self.at_target = true;
            return;
        }

        let diff = shortest_arc(self.current_azimuth, self.target_azimuth);
        if diff == 0.0 {
            // 剰余演算後に一致した場合も到達扱い（境界での振動防止）
            self.current_azimuth = self.target_azimuth;
            self.at_target = true;
            return;
        }

        let step = self.rotation_speed * dt.max(0.0);
        if step <= 0.0 {
            // 旋回速度ゼロでは停止したまま。到達とはみなさない
            self.at_target = false;
            return;
        }

        if diff.abs() <= step {
            self.current_azimuth = self.target_azimuth;
            self.at_target = true;
        } else {
            self.current_azimuth = normalize_azimuth(self.current_azimuth + diff.signum() * step);
            self.at_target = false;
        }
    }

    /// 指令方位角までの最短角距離（度）
    pub fn remaining_angle(&self) -> f64 {
        shortest_arc(self.current_azimuth, self.target_azimuth).abs()
    }
}

/// 外部へ報告する砲塔状態（方位角は小数2桁に丸め）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurretStatus {
    pub current_azimuth: f64,
    pub target_azimuth: f64,
    pub at_target: bool,
    pub rotation_speed: f64,
}

impl From<&TurretState> for TurretStatus {
    fn from(state: &TurretState) -> Self {
        Self {
            current_azimuth: round_to(state.current_azimuth, DISPLAY_DECIMALS),
            target_azimuth: round_to(state.target_azimuth, DISPLAY_DECIMALS),
            at_target: state.at_target,
            rotation_speed: state.rotation_speed,
        }
    }
}

/// 砲塔旋回コントローラ
///
/// ノードごとに1つ存在し、制御ループと方位指令の両方から共有されます。
/// 状態は1つのロックで保護され、ティック同士が重なることはありません。
#[derive(Debug)]
pub struct TurretMotionController {
    id: String,
    state: Mutex<TurretState>,
}

impl TurretMotionController {
    pub fn new(id: impl Into<String>, initial_azimuth: f64, rotation_speed: f64) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(TurretState::new(initial_azimuth, rotation_speed)),
        }
    }

    pub fn get_id(&self) -> &str {
        &self.id
    }

    /// 指令方位角の設定（360度で正規化）
    pub fn set_target(&self, azimuth_deg: f64) -> CoreResult<()> {
        if !azimuth_deg.is_finite() {
            return Err(CoreError::InvalidInput(format!("方位角が有限値ではありません: {}", azimuth_deg)));
        }
        let mut state = self.state.lock();
        state.set_target(azimuth_deg);
        debug!("[{}] 指令方位角: {:.2}° (現在 {:.2}°)", self.id, state.target_azimuth, state.current_azimuth);
        Ok(())
    }

    /// 旋回速度の設定（絶対値を採用、ゼロも可）
    pub fn set_speed(&self, degrees_per_second: f64) -> CoreResult<()> {
        if !degrees_per_second.is_finite() {
            return Err(CoreError::InvalidInput(format!("旋回速度が有限値ではありません: {}", degrees_per_second)));
        }
        let mut state = self.state.lock();
        state.set_speed(degrees_per_second);
        debug!("[{}] 旋回速度: {:.2}°/s", self.id, state.rotation_speed);
        Ok(())
    }

    /// 制御ループの1ティック
    pub fn tick(&self, dt: f64) {
        let mut state = self.state.lock();
        state.update_position(dt);
        trace!(
            "[{}] tick dt={:.3}: {:.2}° -> {:.2}° (到達: {})",
            self.id, dt, state.current_azimuth, state.target_azimuth, state.at_target
        );
    }

    pub fn get_status(&self) -> TurretStatus {
        TurretStatus::from(&*self.state.lock())
    }

    /// 全精度の内部状態
    pub fn state(&self) -> TurretState {
        self.state.lock().clone()
    }

    /// 整数化した現在方位角（0..=359）
    pub fn reported_azimuth(&self) -> u16 {
        let current = self.state.lock().current_azimuth;
        (current.round() as i64).rem_euclid(360) as u16
    }

    pub fn is_at_target(&self) -> bool {
        self.state.lock().at_target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turret(current: f64, speed: f64) -> TurretMotionController {
        TurretMotionController::new("TUR-1", current, speed)
    }

    #[test]
    fn test_set_target_normalizes() {
        let t = turret(0.0, 10.0);
        t.set_target(-90.0).unwrap();
        assert_eq!(t.state().target_azimuth, 270.0);
        t.set_target(725.0).unwrap();
        assert_eq!(t.state().target_azimuth, 5.0);
        assert!(t.set_target(f64::NAN).is_err());
    }

    #[test]
    fn test_set_target_recomputes_at_target() {
        let t = turret(30.0, 10.0);
        t.set_target(40.0).unwrap();
        assert!(!t.is_at_target());
        t.set_target(390.0).unwrap();
        assert!(t.is_at_target());
    }

    #[test]
    fn test_wraps_forward_through_north() {
        let t = turret(350.0, 10.0);
        t.set_target(10.0).unwrap();

        t.tick(1.0);
        assert_eq!(t.state().current_azimuth, 0.0);
        assert!(!t.is_at_target());

        t.tick(1.0);
        assert_eq!(t.state().current_azimuth, 10.0);
        assert!(t.is_at_target());
    }

    #[test]
    fn test_wraps_backward_through_north() {
        let t = turret(10.0, 15.0);
        t.set_target(340.0).unwrap();
        t.tick(1.0);
        assert_eq!(t.state().current_azimuth, 355.0);
        t.tick(1.0);
        assert_eq!(t.state().current_azimuth, 340.0);
        assert!(t.is_at_target());
    }

    #[test]
    fn test_slew_350_to_90_takes_four_ticks() {
        let t = turret(350.0, 30.0);
        t.set_target(90.0).unwrap();

        let mut trace = Vec::new();
        for _ in 0..4 {
            t.tick(1.0);
            trace.push((t.state().current_azimuth, t.is_at_target()));
        }

        assert_eq!(
            trace,
            vec![(20.0, false), (50.0, false), (80.0, false), (90.0, true)]
        );
    }

    #[test]
    fn test_zero_speed_never_arrives() {
        let t = turret(100.0, 0.0);
        t.set_target(101.0).unwrap();
        for _ in 0..100 {
            t.tick(1.0);
        }
        let state = t.state();
        assert_eq!(state.current_azimuth, 100.0);
        assert!(!state.at_target);
    }

    #[test]
    fn test_speed_is_absolute() {
        let t = turret(0.0, 10.0);
        t.set_speed(-20.0).unwrap();
        assert_eq!(t.state().rotation_speed, 20.0);
    }

    #[test]
    fn test_negative_dt_does_not_move() {
        let t = turret(0.0, 10.0);
        t.set_target(50.0).unwrap();
        t.tick(-1.0);
        assert_eq!(t.state().current_azimuth, 0.0);
        assert!(!t.is_at_target());
    }

    #[test]
    fn test_status_rounds_but_state_keeps_precision() {
        let t = turret(0.0, 1.0);
        t.set_target(90.0).unwrap();
        t.tick(0.123456);

        assert_eq!(t.get_status().current_azimuth, 0.12);
        assert_eq!(t.state().current_azimuth, 0.123456);
    }

    #[test]
    fn test_reported_azimuth_is_integer_in_range() {
        let t = turret(359.6, 0.0);
        assert_eq!(t.reported_azimuth(), 0);
        let t = turret(44.4, 0.0);
        assert_eq!(t.reported_azimuth(), 44);
    }
}
