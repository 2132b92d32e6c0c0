use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};
use crate::models::common::{NedPosition, NedVelocity, unix_now};

/// 目標更新の入力
///
/// 外部トランスポートから受け取るペイロードそのものです。
/// 検証はレジストリへの登録時に行われます。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetUpdate {
    #[serde(default)]
    pub id: String,
    /// 送信側のタイムスタンプ（参考値。生存判定には使用しない）
    #[serde(default)]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub position: Option<NedPosition>,
    #[serde(default)]
    pub velocity: Option<NedVelocity>,
}

impl TargetUpdate {
    pub fn new(id: impl Into<String>, position: NedPosition, velocity: NedVelocity) -> Self {
        Self {
            id: id.into(),
            timestamp: None,
            position: Some(position),
            velocity: Some(velocity),
        }
    }

    /// 必須フィールドの検証。速度が省略された場合は静止目標として扱う
    pub fn validate(&self) -> CoreResult<(NedPosition, NedVelocity)> {
        if self.id.trim().is_empty() {
            return Err(CoreError::InvalidInput("ターゲットIDがありません".to_string()));
        }
        let position = self
            .position
            .ok_or_else(|| CoreError::InvalidInput(format!("ターゲット {} の位置がありません", self.id)))?;
        if !position.is_finite() {
            return Err(CoreError::InvalidInput(format!("ターゲット {} の位置が有限値ではありません", self.id)));
        }
        let velocity = self.velocity.unwrap_or_default();
        if !velocity.is_finite() {
            return Err(CoreError::InvalidInput(format!("ターゲット {} の速度が有限値ではありません", self.id)));
        }
        Ok((position, velocity))
    }
}

/// 追跡中の目標
#[derive(Debug, Clone)]
pub struct Target {
    /// ターゲットの一意識別子
    pub id: String,
    /// NED位置（m）
    pub position: NedPosition,
    /// NED速度（m/s）
    pub velocity: NedVelocity,
    /// 最終更新時刻（単調時計）
    pub last_update: Instant,
    /// 最終更新時刻（UNIX秒、外部報告用）
    pub updated_at: f64,
}

impl Target {
    /// 最終更新からの経過時間
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_update)
    }

    /// 生存判定（読み出し時に導出）
    pub fn is_active(&self, now: Instant, threshold: Duration) -> bool {
        self.age(now) < threshold
    }

    pub fn snapshot(&self, now: Instant, threshold: Duration) -> TargetSnapshot {
        TargetSnapshot {
            id: self.id.clone(),
            position: self.position,
            velocity: self.velocity,
            active: self.is_active(now, threshold),
            age_s: self.age(now).as_secs_f64(),
            timestamp: self.updated_at,
        }
    }
}

/// 外部へ返す目標のスナップショット
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetSnapshot {
    pub id: String,
    pub position: NedPosition,
    pub velocity: NedVelocity,
    pub active: bool,
    pub age_s: f64,
    pub timestamp: f64,
}

impl TargetSnapshot {
    /// 等速直線運動を仮定した、最終更新からdt秒後の位置
    pub fn extrapolate(&self, dt: f64) -> NedPosition {
        self.position + self.velocity * dt
    }

    /// スナップショット取得時点での推定位置
    pub fn predicted_position(&self) -> NedPosition {
        self.extrapolate(self.age_s)
    }
}

/// 一括更新で拒否された要素
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedItem {
    pub index: usize,
    pub id: Option<String>,
    pub reason: String,
}

/// 一括更新の結果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub applied: usize,
    pub rejected: Vec<RejectedItem>,
}

impl BatchReport {
    /// 全要素が適用されたか
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// 目標レジストリ
///
/// 既知の目標を保持し、更新の新しさから生存を判定し、古い目標を掃除します。
/// 内部のマップは専用のロックで保護され、ロックはマップ操作の間だけ保持されます。
#[derive(Debug)]
pub struct TargetRegistry {
    targets: Mutex<HashMap<String, Target>>,
    threshold: Duration,
}

impl TargetRegistry {
    /// # 引数
    ///
    /// * `threshold` - 非活性判定のしきい値。これ以上更新のない目標は掃除対象
    pub fn new(threshold: Duration) -> Self {
        Self {
            targets: Mutex::new(HashMap::new()),
            threshold,
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// 目標の登録または置き換え
    pub fn upsert(&self, update: TargetUpdate) -> CoreResult<()> {
        self.upsert_at(update, Instant::now())
    }

    /// 時刻を指定した登録（テスト・一括処理用）
    ///
    /// 既存の`last_update`より古い時刻が渡された場合、`last_update`は戻さない。
    pub fn upsert_at(&self, update: TargetUpdate, now: Instant) -> CoreResult<()> {
        let (position, velocity) = update.validate()?;
        let updated_at = unix_now();

        let mut targets = self.targets.lock();
        match targets.get_mut(&update.id) {
            Some(target) => {
                target.position = position;
                target.velocity = velocity;
                target.last_update = target.last_update.max(now);
                target.updated_at = updated_at;
            }
            None => {
                debug!("ターゲット登録: {}", update.id);
                targets.insert(
                    update.id.clone(),
                    Target {
                        id: update.id,
                        position,
                        velocity,
                        last_update: now,
                        updated_at,
                    },
                );
            }
        }
        Ok(())
    }

    /// 一括登録。不正な要素は記録して残りの処理を続ける
    pub fn upsert_batch(&self, updates: Vec<TargetUpdate>) -> BatchReport {
        self.upsert_batch_at(updates, Instant::now())
    }

    pub fn upsert_batch_at(&self, updates: Vec<TargetUpdate>, now: Instant) -> BatchReport {
        let mut report = BatchReport::default();

        for (index, update) in updates.into_iter().enumerate() {
            let id = (!update.id.is_empty()).then(|| update.id.clone());
            match self.upsert_at(update, now) {
                Ok(()) => report.applied += 1,
                Err(e) => {
                    debug!("一括更新の要素 {} を拒否: {}", index, e);
                    report.rejected.push(RejectedItem {
                        index,
                        id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        report
    }

    pub fn get(&self, id: &str) -> CoreResult<TargetSnapshot> {
        self.get_at(id, Instant::now())
    }

    pub fn get_at(&self, id: &str, now: Instant) -> CoreResult<TargetSnapshot> {
        self.targets
            .lock()
            .get(id)
            .map(|t| t.snapshot(now, self.threshold))
            .ok_or_else(|| CoreError::target_not_found(id))
    }

    /// 全目標のスナップショット（ID順）
    pub fn get_all(&self) -> BTreeMap<String, TargetSnapshot> {
        self.get_all_at(Instant::now())
    }

    pub fn get_all_at(&self, now: Instant) -> BTreeMap<String, TargetSnapshot> {
        self.targets
            .lock()
            .values()
            .map(|t| (t.id.clone(), t.snapshot(now, self.threshold)))
            .collect()
    }

    pub fn delete(&self, id: &str) -> CoreResult<()> {
        self.targets
            .lock()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CoreError::target_not_found(id))
    }

    /// しきい値以上更新のない目標を削除し、削除数を返す
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let threshold = self.threshold;
        let mut targets = self.targets.lock();
        let before = targets.len();
        targets.retain(|id, target| {
            let keep = target.is_active(now, threshold);
            if !keep {
                debug!("ターゲット {} を期限切れで削除 (経過 {:.1}秒)", id, target.age(now).as_secs_f64());
            }
            keep
        });
        before - targets.len()
    }

    /// 全目標を即時削除し、削除数を返す
    pub fn clear(&self) -> usize {
        let mut targets = self.targets.lock();
        let removed = targets.len();
        targets.clear();
        if removed > 0 {
            info!("全ターゲットを削除: {}件", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.targets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
