//! # Notify モジュール
//!
//! 外部の連携先（上位管制ノードなど）への状態通知を提供します。
//!
//! 通知はすべてベストエフォートです。送信はタイムアウト付きで行い、
//! 失敗はログに記録して破棄します。状態遷移そのものを妨げることはありません。
//!
//! - `ChannelNotifier`: tokioのmpscチャネルへ送る（トランスポート層が受信側を読む）
//! - `LogNotifier`: JSONとしてログに出力するだけ

use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::NotifyError;
use crate::models::{
    events::Notification,
    traits::{INotifier, NotifyFuture},
};

/// チャネル経由の通知
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    name: String,
    sender: mpsc::Sender<Notification>,
}

impl ChannelNotifier {
    /// 通知器と受信側を作成
    ///
    /// チャネルが満杯の間は送信が待機し、呼び出し側のタイムアウトで打ち切られます。
    pub fn new(name: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { name: name.into(), sender }, receiver)
    }
}

impl INotifier for ChannelNotifier {
    fn notify(&self, notification: Notification) -> NotifyFuture {
        let sender = self.sender.clone();
        Box::pin(async move {
            sender
                .send(notification)
                .await
                .map_err(|_| NotifyError::Closed)
        })
    }

    fn get_name(&self) -> &str {
        &self.name
    }
}

/// ログ出力のみの通知
#[derive(Debug, Clone)]
pub struct LogNotifier {
    name: String,
}

impl LogNotifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl INotifier for LogNotifier {
    fn notify(&self, notification: Notification) -> NotifyFuture {
        let name = self.name.clone();
        Box::pin(async move {
            let body = serde_json::to_string(&notification)
                .map_err(|e| NotifyError::Rejected(e.to_string()))?;
            info!("[{}] 通知: {}", name, body);
            Ok(())
        })
    }

    fn get_name(&self) -> &str {
        &self.name
    }
}

/// タイムアウト付きで通知を1件送信
pub async fn deliver(
    notifier: &dyn INotifier,
    notification: Notification,
    timeout: Duration,
) -> Result<(), NotifyError> {
    match tokio::time::timeout(timeout, notifier.notify(notification)).await {
        Ok(result) => result,
        Err(_) => Err(NotifyError::Timeout(timeout.as_millis() as u64)),
    }
}

/// 通知を独立したタスクで送信する（結果は待たない）
pub fn spawn_notification(
    runtime: &Handle,
    notifier: Arc<dyn INotifier>,
    notification: Notification,
    timeout: Duration,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        match deliver(notifier.as_ref(), notification, timeout).await {
            Ok(()) => debug!("通知送信: {}", notifier.get_name()),
            Err(e) => warn!("通知失敗 ({}): {}", notifier.get_name(), e),
        }
    })
}
