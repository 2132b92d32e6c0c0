use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::error::{CoreError, CoreResult};
use crate::models::{
    events::{EventLog, FireEvent, FireEventKind, Notification},
    fire_command::{AckResult, AimSolution, FireCommand, FireRequest, FireState, SimulatedEffector},
    target::TargetRegistry,
    traits::{IEffector, INotifier},
};
use crate::notify::spawn_notification;

/// コーディネータの設定
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// FIRING状態の保持時間
    pub firing_duration: Duration,
    /// 終端状態になってから指令表から削除するまでの猶予
    pub cleanup_grace: Duration,
    /// イベントリングバッファの容量
    pub event_capacity: usize,
    /// weapon_type省略時の武器種別
    pub default_weapon_type: String,
    /// 外部通知のタイムアウト
    pub notify_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            firing_duration: Duration::from_millis(250),
            cleanup_grace: Duration::from_secs(1),
            event_capacity: 200,
            default_weapon_type: "CANNON".to_string(),
            notify_timeout: Duration::from_secs(1),
        }
    }
}

/// 射撃指令コーディネータ
///
/// 指令を受理して即座にARMEDで応答し、実行は独立したタスクで進めます。
/// 同一`command_id`の指令は指令表に存在する間は1つしか受け付けません（二重射撃防止）。
///
/// 実行タスクは状態遷移と削除のときだけ指令表をロックし、
/// 射撃の保持時間中はロックを保持しません。
#[derive(Clone)]
pub struct FireCommandCoordinator {
    commands: Arc<Mutex<HashMap<String, FireCommand>>>,
    events: Arc<EventLog>,
    registry: Option<Arc<TargetRegistry>>,
    effector: Arc<dyn IEffector>,
    notifier: Option<Arc<dyn INotifier>>,
    config: CoordinatorConfig,
    runtime: Handle,
}

impl FireCommandCoordinator {
    /// # 引数
    ///
    /// * `config` - 保持時間・猶予・イベント容量などの設定
    /// * `runtime` - 実行タスクと通知タスクを起動するtokioランタイム
    pub fn new(config: CoordinatorConfig, runtime: Handle) -> Self {
        Self {
            commands: Arc::new(Mutex::new(HashMap::new())),
            events: Arc::new(EventLog::new(config.event_capacity)),
            registry: None,
            effector: Arc::new(SimulatedEffector::default()),
            notifier: None,
            config,
            runtime,
        }
    }

    /// 照準解決に使う目標レジストリを接続
    pub fn with_registry(mut self, registry: Arc<TargetRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_effector(mut self, effector: Arc<dyn IEffector>) -> Self {
        self.effector = effector;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn INotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// 射撃指令の受理
    ///
    /// 検証に通れば指令をARMEDで登録して実行タスクを起動し、完了を待たずに返ります。
    ///
    /// # エラー
    ///
    /// * `InvalidCommand` - command_id / target_idが空、または照準値が有限値でない
    /// * `Busy` - 同じcommand_idの指令が指令表に残っている
    pub fn submit(&self, request: FireRequest) -> CoreResult<AckResult> {
        request.validate()?;

        // レジストリのロックは指令表のロックと同時に保持しない
        let aim = self.resolve_aim(&request);
        let weapon_type = request
            .weapon_type
            .filter(|w| !w.trim().is_empty())
            .unwrap_or_else(|| self.config.default_weapon_type.clone());
        let command_id = request.command_id;

        let armed = {
            let mut commands = self.commands.lock();
            if commands.contains_key(&command_id) {
                debug!("指令 {} は処理中のため拒否", command_id);
                return Err(CoreError::Busy(command_id));
            }

            let mut command = FireCommand::new(command_id.clone(), request.target_id, weapon_type, aim);
            command.transition(FireState::Armed)?;
            commands.insert(command_id.clone(), command.clone());
            command
        };

        info!(
            "指令受理: {} (目標={}, 武器={}, 方位={:.1}°, 仰角={:.1}°, 射程={:.1}m)",
            armed.command_id, armed.target_id, armed.weapon_type, armed.azimuth, armed.elevation, armed.range_m
        );
        self.events.push(&command_id, FireEventKind::Accepted { payload: armed.clone() });
        self.notify(Notification::fire_status(&armed));

        let coordinator = self.clone();
        self.runtime.spawn(async move { coordinator.execute(command_id).await });

        Ok(AckResult::accepted(&armed))
    }

    /// 受理・拒否のどちらでもAckResultを返す（トランスポート向け）
    pub fn submit_ack(&self, request: FireRequest) -> AckResult {
        let command_id = request.command_id.clone();
        match self.submit(request) {
            Ok(ack) => ack,
            Err(e) => {
                warn!("指令拒否: {} ({})", command_id, e);
                AckResult::rejected(&command_id, &e)
            }
        }
    }

    /// 指令の状態。削除済み・未登録の指令は`NotFound`
    pub fn get_status(&self, command_id: &str) -> CoreResult<FireCommand> {
        self.commands
            .lock()
            .get(command_id)
            .cloned()
            .ok_or_else(|| CoreError::command_not_found(command_id))
    }

    /// 指令表に残っている指令数
    pub fn active_count(&self) -> usize {
        self.commands.lock().len()
    }

    pub fn events(&self) -> Vec<FireEvent> {
        self.events.snapshot()
    }

    pub fn events_since(&self, seq: u64) -> Vec<FireEvent> {
        self.events.since(seq)
    }

    pub fn event_log(&self) -> Arc<EventLog> {
        Arc::clone(&self.events)
    }

    /// 照準値の決定。明示された値を優先し、欠けた値を目標の推定位置から補う
    fn resolve_aim(&self, request: &FireRequest) -> AimSolution {
        let resolved = if request.has_full_aim() {
            None
        } else {
            self.registry
                .as_ref()
                .and_then(|registry| registry.get(&request.target_id).ok())
                .map(|target| AimSolution::from_position(&target.predicted_position()))
        };

        if resolved.is_none() && !request.has_full_aim() {
            debug!("目標 {} の位置が不明なため未指定の照準値は0とします", request.target_id);
        }

        let fallback = resolved.unwrap_or_default();
        AimSolution {
            azimuth: request.azimuth.unwrap_or(fallback.azimuth),
            elevation: request.elevation.unwrap_or(fallback.elevation),
            range_m: request.range_m.unwrap_or(fallback.range_m),
        }
    }

    /// 実行シーケンス（受理とは独立したタスク）
    ///
    /// どの経路でも終端状態のイベント・通知・猶予後の削除を通る。
    async fn execute(self, command_id: String) {
        let Some(current) = self.advance(&command_id, FireState::Firing) else {
            return;
        };

        let terminal = if current.state == FireState::Firing {
            debug!("指令 {} FIRING", command_id);
            tokio::time::sleep(self.config.firing_duration).await;

            let outcome = match catch_unwind(AssertUnwindSafe(|| self.effector.discharge(&current))) {
                Ok(result) => result,
                Err(_) => Err(format!("エフェクタ {} が異常終了しました", self.effector.get_name())),
            };
            match self.finish(&command_id, outcome) {
                Some(terminal) => terminal,
                None => return,
            }
        } else {
            current
        };

        let success = terminal.state == FireState::Completed;
        if success {
            info!(
                "指令完了: {} ({:.3}秒)",
                command_id,
                terminal.firing_elapsed().unwrap_or_default()
            );
        } else {
            warn!(
                "指令失敗: {} ({})",
                command_id,
                terminal.error_msg.as_deref().unwrap_or("不明")
            );
        }
        self.events.push(
            &command_id,
            FireEventKind::Completed { success, state: terminal.state },
        );
        self.notify(Notification::fire_status(&terminal));

        tokio::time::sleep(self.config.cleanup_grace).await;
        self.commands.lock().remove(&command_id);
        debug!("指令 {} を指令表から削除", command_id);
    }

    /// 指令を次の状態へ進める。遷移できない場合はERRORで終了させる
    ///
    /// 戻り値は遷移後の指令。指令表に存在しない場合のみ`None`
    fn advance(&self, command_id: &str, next: FireState) -> Option<FireCommand> {
        let mut commands = self.commands.lock();
        let command = commands.get_mut(command_id)?;
        if let Err(e) = command.transition(next) {
            warn!("指令 {}: {}", command_id, e);
            command.fail(e.to_string());
        }
        Some(command.clone())
    }

    /// エフェクタの結果から終端状態を確定
    fn finish(&self, command_id: &str, outcome: Result<(), String>) -> Option<FireCommand> {
        let mut commands = self.commands.lock();
        let command = commands.get_mut(command_id)?;
        match outcome {
            Ok(()) => {
                if let Err(e) = command.transition(FireState::Completed) {
                    command.fail(e.to_string());
                }
            }
            Err(reason) => command.fail(CoreError::Execution(reason).to_string()),
        }
        Some(command.clone())
    }

    fn notify(&self, notification: Notification) {
        if let Some(notifier) = &self.notifier {
            spawn_notification(
                &self.runtime,
                Arc::clone(notifier),
                notification,
                self.config.notify_timeout,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::common::{NedPosition, NedVelocity};
    use crate::models::target::TargetUpdate;
    use crate::notify::ChannelNotifier;

    struct JammedEffector;

    impl IEffector for JammedEffector {
        fn discharge(&self, _command: &FireCommand) -> Result<(), String> {
            Err("装填不良".to_string())
        }

        fn get_name(&self) -> &str {
            "jammed"
        }
    }

    struct PanickingEffector;

    impl IEffector for PanickingEffector {
        fn discharge(&self, _command: &FireCommand) -> Result<(), String> {
            panic!("effector fault")
        }

        fn get_name(&self) -> &str {
            "panicking"
        }
    }

    fn coordinator() -> FireCommandCoordinator {
        FireCommandCoordinator::new(CoordinatorConfig::default(), Handle::current())
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_returns_armed_immediately() {
        let c = coordinator();
        let ack = c
            .submit(FireRequest::new("F-1", "T-1").with_aim(45.0, 10.0, 2500.0))
            .unwrap();

        assert!(ack.ack_code.is_success());
        assert_eq!(ack.state, Some(FireState::Armed));
        assert_eq!(c.get_status("F-1").unwrap().state, FireState::Armed);
        assert_eq!(c.get_status("F-1").unwrap().weapon_type, "CANNON");
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_progresses_then_evicts() {
        let c = coordinator();
        c.submit(FireRequest::new("F-1", "T-1").with_aim(45.0, 10.0, 2500.0)).unwrap();

        advance(10).await;
        let firing = c.get_status("F-1").unwrap();
        assert_eq!(firing.state, FireState::Firing);
        assert!(firing.started_time.is_some());

        advance(300).await;
        let done = c.get_status("F-1").unwrap();
        assert_eq!(done.state, FireState::Completed);
        assert!(done.completed_time.is_some());
        assert_eq!(done.azimuth, 45.0);

        advance(1000).await;
        assert!(matches!(c.get_status("F-1"), Err(CoreError::NotFound { .. })));
        assert_eq!(c.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_id_is_busy_until_evicted() {
        let c = coordinator();
        c.submit(FireRequest::new("F-1", "T-1")).unwrap();

        let err = c.submit(FireRequest::new("F-1", "T-2")).unwrap_err();
        assert_eq!(err, CoreError::Busy("F-1".to_string()));

        advance(300).await;
        // 完了後も猶予期間中は拒否される
        assert!(matches!(c.submit(FireRequest::new("F-1", "T-2")), Err(CoreError::Busy(_))));

        advance(1000).await;
        assert!(c.submit(FireRequest::new("F-1", "T-2")).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_command_rejected_synchronously() {
        let c = coordinator();
        let ack = c.submit_ack(FireRequest::new("", "T-1"));
        assert_eq!(ack.ack_code.code(), 1);
        assert_eq!(ack.state, None);

        let ack = c.submit_ack(FireRequest::new("F-1", ""));
        assert_eq!(ack.ack_code.code(), 1);
        assert_eq!(c.active_count(), 0);
        assert!(c.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_effector_fault_ends_in_error() {
        let c = coordinator().with_effector(Arc::new(JammedEffector));
        c.submit(FireRequest::new("F-2", "T-1")).unwrap();

        advance(300).await;
        let status = c.get_status("F-2").unwrap();
        assert_eq!(status.state, FireState::Error);
        assert!(status.error_msg.unwrap().contains("装填不良"));
        assert!(status.completed_time.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_effector_panic_ends_in_error() {
        let c = coordinator().with_effector(Arc::new(PanickingEffector));
        c.submit(FireRequest::new("F-3", "T-1")).unwrap();

        advance(300).await;
        assert_eq!(c.get_status("F-3").unwrap().state, FireState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_record_accept_and_completion() {
        let c = coordinator().with_effector(Arc::new(JammedEffector));
        c.submit(FireRequest::new("F-1", "T-1")).unwrap();
        advance(300).await;

        let events = c.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].kind, FireEventKind::Accepted { .. }));
        assert_eq!(
            events[1].kind,
            FireEventKind::Completed { success: false, state: FireState::Error }
        );
        assert_eq!(c.events_since(events[0].seq).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aim_resolved_from_registry() {
        let registry = Arc::new(TargetRegistry::new(Duration::from_secs(5)));
        registry
            .upsert(TargetUpdate::new("T-1", NedPosition::new(0.0, 100.0, 0.0), NedVelocity::default()))
            .unwrap();
        let c = coordinator().with_registry(Arc::clone(&registry));

        let mut request = FireRequest::new("F-1", "T-1");
        request.elevation = Some(3.0);
        c.submit(request).unwrap();

        let status = c.get_status("F-1").unwrap();
        assert!((status.azimuth - 90.0).abs() < 1e-9);
        assert_eq!(status.elevation, 3.0);
        assert!((status.range_m - 100.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_target_aim_defaults_to_zero() {
        let registry = Arc::new(TargetRegistry::new(Duration::from_secs(5)));
        let c = coordinator().with_registry(registry);
        c.submit(FireRequest::new("F-1", "ghost")).unwrap();

        let status = c.get_status("F-1").unwrap();
        assert_eq!((status.azimuth, status.elevation, status.range_m), (0.0, 0.0, 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifications_for_arm_and_completion() {
        let (notifier, mut rx) = ChannelNotifier::new("test", 8);
        let c = coordinator().with_notifier(Arc::new(notifier));
        c.submit(FireRequest::new("F-1", "T-1")).unwrap();

        let first = rx.recv().await.unwrap();
        assert!(matches!(
            first,
            Notification::FireStatus { status: FireState::Armed, success: None, .. }
        ));

        let second = rx.recv().await.unwrap();
        assert!(matches!(
            second,
            Notification::FireStatus { status: FireState::Completed, success: Some(true), .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_firing_transition_still_evicts() {
        let c = coordinator();
        // IDLEのままの指令はFIRINGへ進めない
        let stuck = FireCommand::new("F-X".to_string(), "T-1".to_string(), "CANNON".to_string(), AimSolution::default());
        c.commands.lock().insert("F-X".to_string(), stuck);

        let task = tokio::spawn(c.clone().execute("F-X".to_string()));
        advance(10).await;

        let status = c.get_status("F-X").unwrap();
        assert_eq!(status.state, FireState::Error);
        assert!(status.error_msg.is_some());
        assert_eq!(
            c.events().last().map(|e| e.kind.clone()),
            Some(FireEventKind::Completed { success: false, state: FireState::Error })
        );

        task.await.unwrap();
        assert!(matches!(c.get_status("F-X"), Err(CoreError::NotFound { .. })));
        assert!(c.submit(FireRequest::new("F-X", "T-1")).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_executions_finish_independently() {
        let c = coordinator();
        for i in 0..5 {
            c.submit(FireRequest::new(format!("F-{}", i), "T-1")).unwrap();
        }
        assert_eq!(c.active_count(), 5);

        advance(300).await;
        for i in 0..5 {
            assert_eq!(c.get_status(&format!("F-{}", i)).unwrap().state, FireState::Completed);
        }
    }
}
