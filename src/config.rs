use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::logging::{LogConfig, LogOutput, parse_log_level};
use crate::models::coordinator::CoordinatorConfig;
use crate::models::simulator::SimulatorConfig;

/// 秒数で指定する設定値の上限（約31年）
pub const MAX_SECONDS: f64 = 1.0e9;

/// 周期・しきい値の下限
const MIN_PERIOD: Duration = Duration::from_nanos(1);

/// 秒数の設定値を`Duration`へ変換して範囲を検証
fn seconds_field(name: &str, value: f64) -> Result<Duration, ConfigError> {
    if !(0.0..=MAX_SECONDS).contains(&value) {
        return Err(ConfigError::Validation(format!(
            "{} must be between 0 and {} seconds (got {})",
            name, MAX_SECONDS, value
        )));
    }
    Duration::try_from_secs_f64(value).map_err(|e| ConfigError::Validation(format!("{}: {}", name, e)))
}

/// 範囲外の値を丸めて`Duration`へ変換
fn clamp_seconds(value: f64, min: Duration) -> Duration {
    Duration::try_from_secs_f64(value.clamp(0.0, MAX_SECONDS))
        .unwrap_or(min)
        .max(min)
}

/// ノード情報
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeSection {
    pub name: String,
    pub description: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            name: "fcsim".to_string(),
            description: String::new(),
        }
    }
}

/// 目標レジストリ設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistrySection {
    /// これ以上更新のない目標は非活性・掃除対象
    pub inactivity_threshold_s: f64,
    /// 掃除タスクの周期
    pub sweep_interval_s: f64,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            inactivity_threshold_s: 5.0,
            sweep_interval_s: 1.0,
        }
    }
}

/// 射撃指令コーディネータ設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CoordinatorSection {
    pub firing_duration_ms: u64,
    pub cleanup_grace_s: f64,
    pub event_capacity: usize,
    pub default_weapon_type: String,
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            firing_duration_ms: 250,
            cleanup_grace_s: 1.0,
            event_capacity: 200,
            default_weapon_type: "CANNON".to_string(),
        }
    }
}

/// 砲塔設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TurretSection {
    pub initial_azimuth_deg: f64,
    pub rotation_speed_deg_s: f64,
    /// 制御ループの周期（秒）
    pub tick_s: f64,
}

impl Default for TurretSection {
    fn default() -> Self {
        Self {
            initial_azimuth_deg: 0.0,
            rotation_speed_deg_s: 25.0,
            tick_s: 1.0,
        }
    }
}

/// 外部通知設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NotifySection {
    pub timeout_ms: u64,
    pub channel_capacity: usize,
}

impl Default for NotifySection {
    fn default() -> Self {
        Self {
            timeout_ms: 1000,
            channel_capacity: 64,
        }
    }
}

/// 模擬目標生成設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulatorSection {
    pub enabled: bool,
    pub target_count: usize,
    /// レジストリへ投入する周期（秒）
    pub update_interval_s: f64,
    pub lifetime_s: f64,
    pub respawn: bool,
    pub seed: Option<u64>,
    pub id_prefix: String,
}

impl Default for SimulatorSection {
    fn default() -> Self {
        Self {
            enabled: false,
            target_count: 5,
            update_interval_s: 0.1,
            lifetime_s: 300.0,
            respawn: true,
            seed: None,
            id_prefix: "SIM".to_string(),
        }
    }
}

/// ログ設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub output: LogOutput,
    pub log_dir: String,
    pub file_prefix: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        let defaults = LogConfig::default();
        Self {
            level: defaults.level.to_string().to_lowercase(),
            output: defaults.output,
            log_dir: defaults.log_dir,
            file_prefix: defaults.file_prefix,
        }
    }
}

/// ノード全体の設定
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node: NodeSection,
    pub registry: RegistrySection,
    pub coordinator: CoordinatorSection,
    pub turret: TurretSection,
    pub notify: NotifySection,
    pub simulator: SimulatorSection,
    pub logging: LoggingSection,
}

impl NodeConfig {
    /// YAMLファイルから設定を読み込み
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;

        let config: NodeConfig = serde_yaml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;

        config.validate()?;

        Ok(config)
    }

    /// YAML文字列から設定を読み込み
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = serde_yaml::from_str(contents)
            .map_err(|e| ConfigError::Parse("<inline>".into(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// 設定の基本的な検証
    pub fn validate(&self) -> Result<(), ConfigError> {
        let periods = [
            ("registry.inactivity_threshold_s", self.registry.inactivity_threshold_s),
            ("registry.sweep_interval_s", self.registry.sweep_interval_s),
            ("turret.tick_s", self.turret.tick_s),
            ("simulator.update_interval_s", self.simulator.update_interval_s),
            ("simulator.lifetime_s", self.simulator.lifetime_s),
        ];
        for (name, value) in periods {
            if seconds_field(name, value)?.is_zero() {
                return Err(ConfigError::Validation(format!("{} must be positive", name)));
            }
        }

        seconds_field("coordinator.cleanup_grace_s", self.coordinator.cleanup_grace_s)?;

        if !self.turret.initial_azimuth_deg.is_finite() || !self.turret.rotation_speed_deg_s.is_finite() {
            return Err(ConfigError::Validation("turret values must be finite".to_string()));
        }

        if self.node.name.trim().is_empty() {
            return Err(ConfigError::Validation("node.name must not be empty".to_string()));
        }

        if self.coordinator.default_weapon_type.trim().is_empty() {
            return Err(ConfigError::Validation("coordinator.default_weapon_type must not be empty".to_string()));
        }

        if self.simulator.enabled && self.simulator.id_prefix.trim().is_empty() {
            return Err(ConfigError::Validation("simulator.id_prefix must not be empty".to_string()));
        }

        Ok(())
    }

    pub fn inactivity_threshold(&self) -> Duration {
        clamp_seconds(self.registry.inactivity_threshold_s, MIN_PERIOD)
    }

    pub fn sweep_interval(&self) -> Duration {
        clamp_seconds(self.registry.sweep_interval_s, MIN_PERIOD)
    }

    pub fn tick_interval(&self) -> Duration {
        clamp_seconds(self.turret.tick_s, MIN_PERIOD)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify.timeout_ms)
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            firing_duration: Duration::from_millis(self.coordinator.firing_duration_ms),
            cleanup_grace: clamp_seconds(self.coordinator.cleanup_grace_s, Duration::ZERO),
            event_capacity: self.coordinator.event_capacity,
            default_weapon_type: self.coordinator.default_weapon_type.clone(),
            notify_timeout: self.notify_timeout(),
        }
    }

    pub fn simulator_config(&self) -> SimulatorConfig {
        SimulatorConfig {
            target_count: self.simulator.target_count,
            update_interval: clamp_seconds(self.simulator.update_interval_s, MIN_PERIOD),
            lifetime: clamp_seconds(self.simulator.lifetime_s, MIN_PERIOD),
            respawn: self.simulator.respawn,
            seed: self.simulator.seed,
            id_prefix: self.simulator.id_prefix.clone(),
        }
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: parse_log_level(&self.logging.level),
            output: self.logging.output,
            log_dir: self.logging.log_dir.clone(),
            file_prefix: self.logging.file_prefix.clone(),
        }
    }

    /// 設定の概要を表示
    pub fn print_summary(&self) {
        println!("=== ノード情報 ===");
        println!("名前: {}", self.node.name);
        if !self.node.description.is_empty() {
            println!("説明: {}", self.node.description);
        }
        println!();

        println!("=== 目標レジストリ ===");
        println!("非活性しきい値: {:.1}秒", self.registry.inactivity_threshold_s);
        println!("掃除周期: {:.1}秒", self.registry.sweep_interval_s);
        println!();

        println!("=== 射撃指令 ===");
        println!("射撃保持時間: {}ミリ秒", self.coordinator.firing_duration_ms);
        println!("削除猶予: {:.1}秒", self.coordinator.cleanup_grace_s);
        println!("イベント保持数: {}", self.coordinator.event_capacity);
        println!("既定武器: {}", self.coordinator.default_weapon_type);
        println!();

        println!("=== 砲塔 ===");
        println!("初期方位角: {:.1}°", self.turret.initial_azimuth_deg);
        println!("旋回速度: {:.1}°/秒", self.turret.rotation_speed_deg_s);
        println!("制御周期: {:.3}秒", self.turret.tick_s);
        println!();

        println!("=== 通知 ===");
        println!("タイムアウト: {}ミリ秒", self.notify.timeout_ms);

        if self.simulator.enabled {
            println!();
            println!("=== 模擬目標 ===");
            println!("目標数: {}", self.simulator.target_count);
            println!("更新周期: {:.2}秒", self.simulator.update_interval_s);
            println!("寿命: {:.0}秒", self.simulator.lifetime_s);
            println!("補充: {}", if self.simulator.respawn { "あり" } else { "なし" });
        }
    }
}
