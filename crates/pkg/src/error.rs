//! # PKG エラー型
//!
//! 起動処理と接続処理で共通のエラー型。
//! セッション内のエラーは [`ProtocolError`] をそのまま包む。

use aibe_core::{KeyFileError, ProtocolError};

/// PKGエラー型。
#[derive(Debug, thiserror::Error)]
pub enum PkgError {
    /// 環境変数の値が不正
    #[error("設定が不正です: {0}")]
    Config(String),
    /// マスター鍵ファイルの読み込み・復元に失敗
    #[error("マスター鍵を読み込めません: {0}")]
    MasterKey(#[from] KeyFileError),
    /// セッションがエラーで終了した
    #[error("セッションが異常終了しました: {0}")]
    Protocol(#[from] ProtocolError),
    /// 内部エラー（ブロッキングタスクの異常終了など）
    #[error("内部エラー: {0}")]
    Internal(String),
}
