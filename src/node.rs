//! # Node モジュール
//!
//! 射撃管制ノード1台分の構成要素を束ね、周期タスクを管理します。
//!
//! ノードは目標レジストリ・砲塔旋回コントローラ・射撃指令コーディネータを1つずつ保持し、
//! `start()`で次の2つの周期タスクを起動します。
//!
//! 1. **制御ループ**: `tick_s`ごとに砲塔を1ステップ進め、整数方位角が変化したら通知する
//! 2. **掃除ループ**: `sweep_interval_s`ごとに非活性な目標を削除する
//!
//! `simulator.enabled`の場合は、模擬目標をレジストリへ投入する3つ目のタスクも起動します。
//!
//! いずれのタスクも`NodeHandle::shutdown()`で停止し、終了を待ち合わせます。
//! テストでは`step()`で制御ループ1回分を同期的に実行できます。

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::models::{
    coordinator::FireCommandCoordinator,
    events::Notification,
    simulator::TargetSimulator,
    target::TargetRegistry,
    traits::{IEffector, INotifier},
    turret::{TurretMotionController, TurretStatus},
};
use crate::notify::deliver;

/// ノードの状態概要
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStatus {
    pub service: String,
    /// 指令表に残っている射撃指令数（猶予期間中の終端指令を含む）
    pub active_commands: usize,
    /// レジストリ上の目標数（掃除前の非活性目標を含む）
    pub targets_count: usize,
    pub turret: TurretStatus,
}

/// 射撃管制ノード
pub struct FireControlNode {
    name: String,
    config: NodeConfig,
    registry: Arc<TargetRegistry>,
    turret: Arc<TurretMotionController>,
    coordinator: FireCommandCoordinator,
    notifier: Option<Arc<dyn INotifier>>,
    runtime: Handle,
}

impl FireControlNode {
    /// 設定からノードを構築（周期タスクはまだ起動しない）
    pub fn new(config: NodeConfig, runtime: Handle) -> Self {
        let name = config.node.name.clone();
        let registry = Arc::new(TargetRegistry::new(config.inactivity_threshold()));
        let turret = Arc::new(TurretMotionController::new(
            format!("{}-turret", name),
            config.turret.initial_azimuth_deg,
            config.turret.rotation_speed_deg_s,
        ));
        let coordinator = FireCommandCoordinator::new(config.coordinator_config(), runtime.clone())
            .with_registry(Arc::clone(&registry));

        Self {
            name,
            config,
            registry,
            turret,
            coordinator,
            notifier: None,
            runtime,
        }
    }

    /// 通知先を接続（射撃指令の状態通知と砲塔方位の通知の両方に使う）
    pub fn with_notifier(mut self, notifier: Arc<dyn INotifier>) -> Self {
        self.coordinator = self.coordinator.clone().with_notifier(Arc::clone(&notifier));
        self.notifier = Some(notifier);
        self
    }

    pub fn with_effector(mut self, effector: Arc<dyn IEffector>) -> Self {
        self.coordinator = self.coordinator.clone().with_effector(effector);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    pub fn turret(&self) -> &Arc<TurretMotionController> {
        &self.turret
    }

    pub fn coordinator(&self) -> &FireCommandCoordinator {
        &self.coordinator
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            service: self.name.clone(),
            active_commands: self.coordinator.active_count(),
            targets_count: self.registry.len(),
            turret: self.turret.get_status(),
        }
    }

    /// 制御ループ1回分を同期的に実行
    ///
    /// 砲塔を`dt`秒進め、期限切れの目標を削除します。戻り値は削除した目標数です。
    pub fn step(&self, dt: f64) -> usize {
        self.turret.tick(dt);
        self.registry.sweep_expired(Instant::now())
    }

    /// 周期タスクを起動
    pub fn start(&self) -> NodeHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            "ノード {} 起動: 制御周期 {:.3}秒, 掃除周期 {:.1}秒",
            self.name, self.config.turret.tick_s, self.config.registry.sweep_interval_s
        );

        let control = self.runtime.spawn(control_loop(
            Arc::clone(&self.turret),
            self.notifier.clone(),
            self.config.tick_interval(),
            self.config.notify_timeout(),
            shutdown_rx.clone(),
        ));
        let sweep = self.runtime.spawn(sweep_loop(
            Arc::clone(&self.registry),
            self.config.sweep_interval(),
            shutdown_rx.clone(),
        ));

        let mut tasks = vec![control, sweep];
        if self.config.simulator.enabled {
            let simulator = TargetSimulator::new(self.config.simulator_config());
            tasks.push(self.runtime.spawn(simulator_loop(
                simulator,
                Arc::clone(&self.registry),
                shutdown_rx,
            )));
        }

        NodeHandle {
            name: self.name.clone(),
            shutdown: shutdown_tx,
            tasks,
        }
    }
}

/// 起動中の周期タスクのハンドル
pub struct NodeHandle {
    name: String,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    /// 周期タスクを停止して終了を待つ
    pub async fn shutdown(self) {
        // 受信側がすでに終了していても問題ない
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("ノード {} のタスク終了エラー: {}", self.name, e);
            }
        }
        info!("ノード {} 停止", self.name);
    }
}

/// 砲塔の制御ループ
///
/// 整数方位角が前回の通知と異なるときだけ通知します。通知に失敗した場合は
/// 前回値を更新しないため、次のティックで再送されます。
async fn control_loop(
    turret: Arc<TurretMotionController>,
    notifier: Option<Arc<dyn INotifier>>,
    period: Duration,
    notify_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let dt = period.as_secs_f64();
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_pushed: Option<u16> = None;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }

        turret.tick(dt);

        let Some(notifier) = &notifier else {
            continue;
        };
        let azimuth = turret.reported_azimuth();
        if last_pushed == Some(azimuth) {
            continue;
        }

        let notification = Notification::TurretAzimuth { current_azimuth: azimuth };
        match deliver(notifier.as_ref(), notification, notify_timeout).await {
            Ok(()) => {
                debug!("[{}] 方位角通知: {}°", turret.get_id(), azimuth);
                last_pushed = Some(azimuth);
            }
            Err(e) => warn!("[{}] 方位角通知失敗 ({}): {}", turret.get_id(), notifier.get_name(), e),
        }
    }
    debug!("[{}] 制御ループ終了", turret.get_id());
}

/// 非活性目標の掃除ループ
async fn sweep_loop(registry: Arc<TargetRegistry>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }

        let removed = registry.sweep_expired(Instant::now());
        if removed > 0 {
            debug!("掃除: {}件の目標を削除 (残り{}件)", removed, registry.len());
        }
    }
    debug!("掃除ループ終了");
}

/// 模擬目標の投入ループ
async fn simulator_loop(
    mut simulator: TargetSimulator,
    registry: Arc<TargetRegistry>,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = simulator.config().update_interval;
    let dt = period.as_secs_f64();
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }

        let updates = simulator.step(dt);
        if updates.is_empty() {
            continue;
        }
        let report = registry.upsert_batch(updates);
        if !report.is_complete() {
            warn!("模擬目標の投入で{}件拒否", report.rejected.len());
        }
    }
    debug!("模擬目標ループ終了 (残り{}件)", simulator.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::common::{NedPosition, NedVelocity};
    use crate::models::target::TargetUpdate;
    use crate::notify::ChannelNotifier;

    fn config() -> NodeConfig {
        let mut config = NodeConfig::default();
        config.node.name = "TEST".to_string();
        config.registry.inactivity_threshold_s = 5.0;
        config.turret.initial_azimuth_deg = 350.0;
        config.turret.rotation_speed_deg_s = 30.0;
        config
    }

    fn update(id: &str) -> TargetUpdate {
        TargetUpdate::new(id, NedPosition::new(100.0, 0.0, 0.0), NedVelocity::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_advances_turret_and_sweeps() {
        let node = FireControlNode::new(config(), Handle::current());
        node.registry().upsert(update("T-1")).unwrap();
        node.turret().set_target(90.0).unwrap();

        assert_eq!(node.step(1.0), 0);
        assert_eq!(node.turret().state().current_azimuth, 20.0);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(node.step(1.0), 1);
        assert!(node.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_control_loop_pushes_azimuth_changes() {
        let (notifier, mut rx) = ChannelNotifier::new("mmc", 16);
        let node = FireControlNode::new(config(), Handle::current()).with_notifier(Arc::new(notifier));
        node.turret().set_target(90.0).unwrap();

        let handle = node.start();
        let mut pushed = Vec::new();
        for _ in 0..4 {
            match rx.recv().await {
                Some(Notification::TurretAzimuth { current_azimuth }) => pushed.push(current_azimuth),
                other => panic!("unexpected notification: {:?}", other),
            }
        }
        assert_eq!(pushed, vec![20, 50, 80, 90]);
        assert!(node.turret().is_at_target());

        // 到達後は方位角が変化しないため通知されない
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(rx.try_recv().is_err());

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_loop_removes_stale_targets() {
        let node = FireControlNode::new(config(), Handle::current());
        node.registry().upsert(update("T-1")).unwrap();
        let handle = node.start();

        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert_eq!(node.registry().len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(node.registry().is_empty());

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_ticking() {
        let node = FireControlNode::new(config(), Handle::current());
        node.turret().set_target(90.0).unwrap();
        let handle = node.start();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        handle.shutdown().await;
        let stopped_at = node.turret().state().current_azimuth;
        assert_eq!(stopped_at, 20.0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(node.turret().state().current_azimuth, stopped_at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_coordinator_resolves_aim_from_registry() {
        let node = FireControlNode::new(config(), Handle::current());
        node.registry()
            .upsert(TargetUpdate::new("T-1", NedPosition::new(0.0, 100.0, 0.0), NedVelocity::default()))
            .unwrap();

        let ack = node
            .coordinator()
            .submit(crate::models::fire_command::FireRequest::new("F-1", "T-1"))
            .unwrap();
        assert!(ack.ack_code.is_success());

        let command = node.coordinator().get_status("F-1").unwrap();
        assert!((command.azimuth - 90.0).abs() < 1e-9);
        assert!((command.range_m - 100.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_counts() {
        let node = FireControlNode::new(config(), Handle::current());
        node.registry().upsert(update("T-1")).unwrap();
        node.registry().upsert(update("T-2")).unwrap();
        node.coordinator()
            .submit(crate::models::fire_command::FireRequest::new("F-1", "T-1"))
            .unwrap();

        let status = node.status();
        assert_eq!(status.service, "TEST");
        assert_eq!(status.active_commands, 1);
        assert_eq!(status.targets_count, 2);
        assert_eq!(status.turret.current_azimuth, 350.0);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["service"], "TEST");
        assert_eq!(json["targets_count"], 2);

        // 射撃完了と削除猶予の経過後
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(node.status().active_commands, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulator_feeds_registry() {
        let mut config = config();
        config.simulator.enabled = true;
        config.simulator.target_count = 3;
        config.simulator.update_interval_s = 0.1;
        config.simulator.lifetime_s = 1.0;
        config.simulator.respawn = false;
        config.simulator.seed = Some(1);
        let node = FireControlNode::new(config, Handle::current());
        let handle = node.start();

        tokio::time::sleep(Duration::from_millis(150)).await;
        let first = node.registry().get_all();
        let ids: Vec<&str> = first.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["SIM_T001", "SIM_T002", "SIM_T003"]);

        tokio::time::sleep(Duration::from_millis(200)).await;
        for (id, before) in &first {
            let after = node.registry().get(id).unwrap();
            let expected = before.position + before.velocity * 0.2;
            assert!((after.position.north - expected.north).abs() < 1e-6);
            assert!((after.position.east - expected.east).abs() < 1e-6);
            assert!((after.position.down - expected.down).abs() < 1e-6);
        }

        // 寿命切れで投入が止まり、非活性しきい値の経過後に掃除される
        tokio::time::sleep(Duration::from_secs(8)).await;
        assert!(node.registry().is_empty());
        assert_eq!(node.status().targets_count, 0);

        handle.shutdown().await;
    }
}
