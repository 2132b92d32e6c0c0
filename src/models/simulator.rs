use std::time::Duration;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::models::common::{NedPosition, NedVelocity, unix_now};
use crate::models::target::TargetUpdate;

/// 生成位置の水平範囲（北・東とも±この値）
pub const SPAWN_HORIZONTAL_M: f64 = 500.0;
/// 生成位置の深さ範囲（下向き0〜この値）
pub const SPAWN_DEPTH_M: f64 = 500.0;
/// 水平速度の上限（北・東とも±この値）
pub const MAX_HORIZONTAL_SPEED: f64 = 20.0;
/// 鉛直速度の上限
pub const MAX_VERTICAL_SPEED: f64 = 5.0;

/// 模擬目標生成の設定
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// 同時に存在させる目標数
    pub target_count: usize,
    /// レジストリへ投入する周期
    pub update_interval: Duration,
    /// 生成からこの時間が経過した目標は消滅する
    pub lifetime: Duration,
    /// 消滅した目標を新しい目標で補充するか
    pub respawn: bool,
    /// 乱数シード（省略時はOSの乱数源）
    pub seed: Option<u64>,
    pub id_prefix: String,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            target_count: 5,
            update_interval: Duration::from_millis(100),
            lifetime: Duration::from_secs(300),
            respawn: true,
            seed: None,
            id_prefix: "SIM".to_string(),
        }
    }
}

/// 等速直線運動する模擬目標
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedTarget {
    pub id: String,
    pub position: NedPosition,
    pub velocity: NedVelocity,
    /// 生成からの経過時間（秒）
    pub age_s: f64,
}

impl SimulatedTarget {
    /// 生成範囲内のランダムな位置と速度で目標を作成
    pub fn random<R: Rng + ?Sized>(id: impl Into<String>, rng: &mut R) -> Self {
        let position = NedPosition::new(
            rng.gen_range(-SPAWN_HORIZONTAL_M..=SPAWN_HORIZONTAL_M),
            rng.gen_range(-SPAWN_HORIZONTAL_M..=SPAWN_HORIZONTAL_M),
            rng.gen_range(0.0..=SPAWN_DEPTH_M),
        );
        let velocity = NedVelocity::new(
            rng.gen_range(-MAX_HORIZONTAL_SPEED..=MAX_HORIZONTAL_SPEED),
            rng.gen_range(-MAX_HORIZONTAL_SPEED..=MAX_HORIZONTAL_SPEED),
            rng.gen_range(-MAX_VERTICAL_SPEED..=MAX_VERTICAL_SPEED),
        );

        Self {
            id: id.into(),
            position,
            velocity,
            age_s: 0.0,
        }
    }

    /// dt秒だけ等速直線運動させる
    pub fn advance(&mut self, dt: f64) {
        self.position = self.position + self.velocity * dt;
        self.age_s += dt;
    }

    pub fn to_update(&self) -> TargetUpdate {
        TargetUpdate {
            timestamp: Some(unix_now()),
            ..TargetUpdate::new(self.id.clone(), self.position, self.velocity)
        }
    }
}

/// 模擬目標群
///
/// ノードの周期タスクが`step()`を呼び、返された更新をレジストリへ一括投入します。
/// 消滅した目標はレジストリ側の非活性しきい値で自然に掃除されます。
pub struct TargetSimulator {
    config: SimulatorConfig,
    rng: StdRng,
    targets: Vec<SimulatedTarget>,
    spawned: usize,
}

impl TargetSimulator {
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut simulator = Self {
            config,
            rng,
            targets: Vec::new(),
            spawned: 0,
        };
        simulator.replenish();
        info!(
            "模擬目標生成: {}件 (寿命 {:.0}秒)",
            simulator.targets.len(),
            simulator.config.lifetime.as_secs_f64()
        );
        simulator
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn targets(&self) -> &[SimulatedTarget] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// 新しい目標を1件追加
    pub fn spawn(&mut self) -> &SimulatedTarget {
        self.spawned += 1;
        let id = format!("{}_T{:03}", self.config.id_prefix, self.spawned);
        let target = SimulatedTarget::random(id, &mut self.rng);
        debug!("模擬目標 {} 生成", target.id);
        self.targets.push(target);
        &self.targets[self.targets.len() - 1]
    }

    /// 全目標をdt秒進め、寿命切れを除いた目標の更新を返す
    ///
    /// 負・非有限のdtは0として扱います。
    pub fn step(&mut self, dt: f64) -> Vec<TargetUpdate> {
        let dt = if dt.is_finite() && dt > 0.0 { dt } else { 0.0 };
        let lifetime = self.config.lifetime.as_secs_f64();

        for target in &mut self.targets {
            target.advance(dt);
        }
        self.targets.retain(|target| {
            let alive = target.age_s < lifetime;
            if !alive {
                info!("模擬目標 {} が寿命 {:.0}秒で消滅", target.id, lifetime);
            }
            alive
        });
        if self.config.respawn {
            self.replenish();
        }

        self.targets.iter().map(SimulatedTarget::to_update).collect()
    }

    /// 全目標を即時に消滅させ、消滅数を返す
    pub fn kill_all(&mut self) -> usize {
        let removed = self.targets.len();
        self.targets.clear();
        if removed > 0 {
            info!("模擬目標を全消去: {}件", removed);
        }
        removed
    }

    fn replenish(&mut self) {
        while self.targets.len() < self.config.target_count {
            self.spawn();
        }
    }
}
