//! # Error モジュール
//!
//! 射撃管制ノードのエラー型を定義します。
//!
//! - [`CoreError`]: 目標レジストリ・射撃指令コーディネータの操作エラー
//! - [`ConfigError`]: 設定ファイルの読み込み・検証エラー
//! - [`NotifyError`]: 外部への状態通知の失敗（常に非致命的）

use std::path::PathBuf;
use thiserror::Error;

use crate::models::fire_command::{AckCode, FireState};

/// コア操作のエラー
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// 必須フィールドの欠落・不正な値（呼び出し側の誤り）
    #[error("無効な入力: {0}")]
    InvalidInput(String),

    /// 射撃指令の必須フィールド欠落
    #[error("無効な射撃指令: {0}")]
    InvalidCommand(String),

    /// 未知のIDへの参照
    #[error("{kind} '{id}' が見つかりません")]
    NotFound { kind: &'static str, id: String },

    /// 同一command_idの指令が実行中
    #[error("指令 '{0}' は処理中です")]
    Busy(String),

    /// 非同期実行中の内部障害
    #[error("実行エラー: {0}")]
    Execution(String),

    /// 状態遷移の順序違反
    #[error("不正な状態遷移: {from} -> {to}")]
    InvalidTransition { from: FireState, to: FireState },
}

impl CoreError {
    pub fn target_not_found(id: impl Into<String>) -> Self {
        CoreError::NotFound { kind: "ターゲット", id: id.into() }
    }

    pub fn command_not_found(id: impl Into<String>) -> Self {
        CoreError::NotFound { kind: "射撃指令", id: id.into() }
    }

    /// 外部トランスポート向けのACKコードへ変換
    pub fn ack_code(&self) -> AckCode {
        match self {
            CoreError::InvalidInput(_) | CoreError::InvalidCommand(_) => AckCode::InvalidCommand,
            CoreError::Busy(_) => AckCode::Busy,
            _ => AckCode::Error,
        }
    }
}

/// コア操作の結果型
pub type CoreResult<T> = Result<T, CoreError>;

/// 設定読み込みエラー
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("設定ファイルが見つかりません: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("ファイル読み込みエラー {}: {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("YAML解析エラー {}: {}", .0.display(), .1)]
    Parse(PathBuf, #[source] serde_yaml::Error),

    #[error("設定検証エラー: {0}")]
    Validation(String),
}

/// 状態通知の失敗
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotifyError {
    #[error("通知先が閉じられています")]
    Closed,

    #[error("通知がタイムアウトしました ({0} ms)")]
    Timeout(u64),

    #[error("通知が拒否されました: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_code_mapping() {
        assert_eq!(CoreError::InvalidCommand("x".into()).ack_code(), AckCode::InvalidCommand);
        assert_eq!(CoreError::InvalidInput("x".into()).ack_code(), AckCode::InvalidCommand);
        assert_eq!(CoreError::Busy("F-1".into()).ack_code(), AckCode::Busy);
        assert_eq!(CoreError::command_not_found("F-1").ack_code(), AckCode::Error);
        assert_eq!(CoreError::Execution("boom".into()).ack_code(), AckCode::Error);
    }

    #[test]
    fn test_not_found_message_names_id() {
        let err = CoreError::target_not_found("T-1");
        assert!(err.to_string().contains("T-1"));
    }
}
