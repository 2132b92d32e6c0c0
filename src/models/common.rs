use std::ops::{Add, Mul, Sub};
use std::time::{SystemTime, UNIX_EPOCH};
use serde::{Deserialize, Serialize};

/// NED座標系での位置を表す構造体
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NedPosition {
    pub north: f64, // m
    pub east: f64,  // m
    pub down: f64,  // m (正は下向き)
}

impl NedPosition {
    pub fn new(north: f64, east: f64, down: f64) -> Self {
        Self { north, east, down }
    }

    /// 水平面（North-East）での原点からの距離
    pub fn horizontal_range(&self) -> f64 {
        (self.north.powi(2) + self.east.powi(2)).sqrt()
    }

    /// 原点からの直距離（スラントレンジ）
    pub fn slant_range(&self) -> f64 {
        (self.north.powi(2) + self.east.powi(2) + self.down.powi(2)).sqrt()
    }

    /// 北基準・時計回りの方位角（度, [0, 360)）
    pub fn bearing_deg(&self) -> f64 {
        math_utils::normalize_azimuth(self.east.atan2(self.north).to_degrees())
    }

    /// 水平面からの仰角（度）。downが負（上方）のとき正になる
    pub fn elevation_deg(&self) -> f64 {
        (-self.down).atan2(self.horizontal_range()).to_degrees()
    }

    /// 全成分が有限値かどうか
    pub fn is_finite(&self) -> bool {
        self.north.is_finite() && self.east.is_finite() && self.down.is_finite()
    }
}

impl Add for NedPosition {
    type Output = Self;

    fn add(self, other: Self) -> Self::Output {
        Self::new(self.north + other.north, self.east + other.east, self.down + other.down)
    }
}

impl Sub for NedPosition {
    type Output = Self;

    fn sub(self, other: Self) -> Self::Output {
        Self::new(self.north - other.north, self.east - other.east, self.down - other.down)
    }
}

/// NED座標系での速度を表す構造体
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NedVelocity {
    pub vn: f64, // m/s
    pub ve: f64, // m/s
    pub vd: f64, // m/s
}

impl NedVelocity {
    pub fn new(vn: f64, ve: f64, vd: f64) -> Self {
        Self { vn, ve, vd }
    }

    /// 速度ベクトルの大きさ
    pub fn magnitude(&self) -> f64 {
        (self.vn.powi(2) + self.ve.powi(2) + self.vd.powi(2)).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.vn.is_finite() && self.ve.is_finite() && self.vd.is_finite()
    }
}

// 速度×時間 = 変位
impl Mul<f64> for NedVelocity {
    type Output = NedPosition;

    fn mul(self, dt: f64) -> Self::Output {
        NedPosition::new(self.vn * dt, self.ve * dt, self.vd * dt)
    }
}

/// 現在のUNIX時刻（秒）
///
/// 外部へ報告するタイムスタンプ用。経過時間の計算には`Instant`を使用すること。
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// 数学ユーティリティ関数
pub mod math_utils {
    /// 角度を[0, 360)の範囲に正規化（負の値も含む）
    pub fn normalize_azimuth(angle_deg: f64) -> f64 {
        let normalized = angle_deg.rem_euclid(360.0);
        // 極小の負値でrem_euclidが360.0を返す場合がある
        if normalized >= 360.0 { 0.0 } else { normalized }
    }

    /// currentからtargetへの最短回転量（度, [-180, 180)）
    ///
    /// 正は時計回り（方位角増加方向）、負は反時計回り。
    pub fn shortest_arc(current_deg: f64, target_deg: f64) -> f64 {
        (target_deg - current_deg + 180.0).rem_euclid(360.0) - 180.0
    }

    /// 指定桁数で四捨五入
    pub fn round_to(value: f64, decimals: i32) -> f64 {
        let factor = 10f64.powi(decimals);
        (value * factor).round() / factor
    }
}

#[cfg(test)]
mod tests {
    use super::math_utils::*;
    use super::*;

    #[test]
    fn test_normalize_azimuth() {
        assert_eq!(normalize_azimuth(0.0), 0.0);
        assert_eq!(normalize_azimuth(360.0), 0.0);
        assert_eq!(normalize_azimuth(370.0), 10.0);
        assert_eq!(normalize_azimuth(-90.0), 270.0);
        assert_eq!(normalize_azimuth(-720.0), 0.0);
        assert!(normalize_azimuth(-1e-20) < 360.0);
    }

    #[test]
    fn test_shortest_arc_wraps_through_north() {
        assert_eq!(shortest_arc(350.0, 10.0), 20.0);
        assert_eq!(shortest_arc(10.0, 350.0), -20.0);
        assert_eq!(shortest_arc(350.0, 90.0), 100.0);
        assert_eq!(shortest_arc(45.0, 45.0), 0.0);
        assert_eq!(shortest_arc(0.0, 180.0), -180.0);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(12.345678, 2), 12.35);
        assert_eq!(round_to(-0.004, 2), -0.0);
    }

    #[test]
    fn test_bearing_and_elevation() {
        let east = NedPosition::new(0.0, 100.0, 0.0);
        assert!((east.bearing_deg() - 90.0).abs() < 1e-9);

        let west = NedPosition::new(0.0, -100.0, 0.0);
        assert!((west.bearing_deg() - 270.0).abs() < 1e-9);

        let above = NedPosition::new(100.0, 0.0, -100.0);
        assert!((above.elevation_deg() - 45.0).abs() < 1e-9);
        assert!((above.slant_range() - 100.0 * 2f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_velocity_displacement() {
        let v = NedVelocity::new(10.0, -5.0, 1.0);
        let p = NedPosition::new(100.0, 0.0, 0.0) + v * 2.0;
        assert_eq!(p, NedPosition::new(120.0, -10.0, 2.0));
    }
}
