use std::collections::VecDeque;
use parking_lot::Mutex;
use serde::Serialize;

use crate::models::{
    common::unix_now,
    fire_command::{FireCommand, FireState},
};

/// コーディネータが記録するイベント
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FireEvent {
    /// 単調増加の通し番号（ポーリング側の差分取得用）
    pub seq: u64,
    pub timestamp: f64,
    pub command_id: String,
    #[serde(flatten)]
    pub kind: FireEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FireEventKind {
    /// 指令受理（ARMED）
    Accepted { payload: FireCommand },
    /// 実行終了（COMPLETED / ERROR）
    Completed { success: bool, state: FireState },
}

#[derive(Debug, Default)]
struct EventRing {
    events: VecDeque<FireEvent>,
    next_seq: u64,
    dropped: u64,
}

/// 直近N件のイベントを保持するリングバッファ
///
/// 容量を超えると古いイベントから黙って破棄されます。配送保証はありません。
#[derive(Debug)]
pub struct EventLog {
    capacity: usize,
    ring: Mutex<EventRing>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ring: Mutex::new(EventRing {
                events: VecDeque::with_capacity(capacity),
                next_seq: 1,
                dropped: 0,
            }),
        }
    }

    /// イベントを追加し、割り当てた通し番号を返す
    pub fn push(&self, command_id: &str, kind: FireEventKind) -> u64 {
        let mut ring = self.ring.lock();
        let seq = ring.next_seq;
        ring.next_seq += 1;

        if self.capacity == 0 {
            ring.dropped += 1;
            return seq;
        }

        while ring.events.len() >= self.capacity {
            ring.events.pop_front();
            ring.dropped += 1;
        }

        ring.events.push_back(FireEvent {
            seq,
            timestamp: unix_now(),
            command_id: command_id.to_string(),
            kind,
        });
        seq
    }

    /// 保持中の全イベント（古い順）
    pub fn snapshot(&self) -> Vec<FireEvent> {
        self.ring.lock().events.iter().cloned().collect()
    }

    /// 指定番号より新しいイベント（古い順）
    pub fn since(&self, seq: u64) -> Vec<FireEvent> {
        self.ring
            .lock()
            .events
            .iter()
            .filter(|e| e.seq > seq)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 容量超過で破棄されたイベント数
    pub fn dropped(&self) -> u64 {
        self.ring.lock().dropped
    }
}

/// 外部への状態通知
///
/// 既存の連携先が受け付けるJSON形状のまま直列化されます。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Notification {
    FireStatus {
        command_id: String,
        status: FireState,
        #[serde(skip_serializing_if = "Option::is_none")]
        success: Option<bool>,
        timestamp: f64,
    },
    TurretAzimuth {
        current_azimuth: u16,
    },
}

impl Notification {
    pub fn fire_status(command: &FireCommand) -> Self {
        let success = command
            .state
            .is_terminal()
            .then(|| command.state == FireState::Completed);
        Notification::FireStatus {
            command_id: command.command_id.clone(),
            status: command.state,
            success,
            timestamp: unix_now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(success: bool) -> FireEventKind {
        FireEventKind::Completed {
            success,
            state: if success { FireState::Completed } else { FireState::Error },
        }
    }

    #[test]
    fn test_overflow_discards_oldest() {
        let log = EventLog::new(3);
        for i in 0..5 {
            log.push(&format!("F-{}", i), completed(true));
        }

        let events = log.snapshot();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].command_id, "F-2");
        assert_eq!(events[2].command_id, "F-4");
        assert_eq!(log.dropped(), 2);
    }

    #[test]
    fn test_since_returns_newer_events_only() {
        let log = EventLog::new(10);
        let first = log.push("F-1", completed(true));
        log.push("F-2", completed(false));
        log.push("F-3", completed(true));

        let newer = log.since(first);
        assert_eq!(newer.len(), 2);
        assert_eq!(newer[0].command_id, "F-2");
        assert!(log.since(newer[1].seq).is_empty());
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let log = EventLog::new(0);
        log.push("F-1", completed(true));
        assert!(log.is_empty());
        assert_eq!(log.dropped(), 1);
    }

    #[test]
    fn test_event_json_shape() {
        let log = EventLog::new(1);
        log.push("F-9", completed(false));
        let json = serde_json::to_value(&log.snapshot()[0]).unwrap();
        assert_eq!(json["type"], "completed");
        assert_eq!(json["command_id"], "F-9");
        assert_eq!(json["state"], "ERROR");
        assert_eq!(json["success"], false);
    }

    #[test]
    fn test_notification_json_shape() {
        let json = serde_json::to_value(Notification::TurretAzimuth { current_azimuth: 90 }).unwrap();
        assert_eq!(json, serde_json::json!({ "current_azimuth": 90 }));

        let json = serde_json::to_value(Notification::FireStatus {
            command_id: "F-1".to_string(),
            status: FireState::Armed,
            success: None,
            timestamp: 1.0,
        })
        .unwrap();
        assert_eq!(json["status"], "ARMED");
        assert!(json.get("success").is_none());
    }
}
