use std::future::Future;
use std::pin::Pin;

use crate::error::NotifyError;
use crate::models::{events::Notification, fire_command::FireCommand};

/// 武器エフェクタのインターフェース
///
/// 射撃指令の保持時間が経過した後、コーディネータから1回だけ呼び出されます。
/// エラーを返すかパニックした場合、指令はERROR状態で終了します。
pub trait IEffector: Send + Sync {
    /// 射撃の実行
    fn discharge(&self, command: &FireCommand) -> Result<(), String>;

    /// エフェクタ名（ログ用）
    fn get_name(&self) -> &str;
}

/// 通知処理のFuture
pub type NotifyFuture = Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'static>>;

/// 外部への状態通知のインターフェース
///
/// 呼び出し側がタイムアウトを付けて待機し、失敗はログに記録して破棄します。
pub trait INotifier: Send + Sync {
    /// 通知の送信
    fn notify(&self, notification: Notification) -> NotifyFuture;

    /// 通知先の名前（ログ用）
    fn get_name(&self) -> &str;
}
