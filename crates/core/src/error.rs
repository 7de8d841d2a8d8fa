//! # プロトコルエラー型
//!
//! ハンドシェイク・鍵発行・鍵要求で共通のエラー型。
//! 各バリアントはワイヤ上の [`Status`] に一対一で対応する。

use aibe_types::{FramingError, Status};

/// プロトコルエラー型。
///
/// エラー文字列に鍵素材を含めてはならない。
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// エンベロープのフレーミングが不正
    #[error("フレーミングエラー: {0}")]
    Framing(#[from] FramingError),
    /// エンベロープは正しいがボディが不正
    #[error("不正なメッセージ: {0}")]
    Malformed(String),
    /// 現在の状態では受け付けられないメッセージ
    #[error("プロトコル違反: {0}")]
    ProtocolViolation(String),
    /// Evidenceが拒否された（未証明）
    #[error("Attestationに失敗しました: {0}")]
    AttestationFailure(String),
    /// 認証付き復号・署名・鍵確認の失敗（改ざんの可能性）
    #[error("認証に失敗しました: {0}")]
    AuthFailure(String),
    /// 最終鍵の代数的検証に失敗
    #[error("鍵の整合性検証に失敗しました: {0}")]
    CryptoInconsistency(String),
    /// ピアが非ゼロのステータスで応答した
    #[error("ピアが拒否しました: {0}")]
    Rejected(Status),
    /// トランスポートI/Oエラー
    #[error("トランスポートエラー: {0}")]
    Transport(#[from] std::io::Error),
    /// ピアが接続を閉じた
    #[error("接続が閉じられました")]
    ConnectionClosed,
    /// 応答待ちがタイムアウトした
    #[error("応答待ちがタイムアウトしました")]
    Timeout,
    /// 内部エラー
    #[error("内部エラー: {0}")]
    Internal(String),
}

impl ProtocolError {
    /// ピアへの拒否応答に載せるステータス。
    pub fn status(&self) -> Status {
        match self {
            ProtocolError::Framing(_) | ProtocolError::Malformed(_) => Status::MALFORMED,
            ProtocolError::ProtocolViolation(_) => Status::PROTOCOL_VIOLATION,
            ProtocolError::AttestationFailure(_) => Status::ATTESTATION_REJECTED,
            ProtocolError::AuthFailure(_) => Status::AUTH_FAILURE,
            ProtocolError::CryptoInconsistency(_) => Status::CRYPTO_INCONSISTENCY,
            ProtocolError::Rejected(status) => *status,
            ProtocolError::Transport(_)
            | ProtocolError::ConnectionClosed
            | ProtocolError::Timeout
            | ProtocolError::Internal(_) => Status::INTERNAL,
        }
    }

    /// セッションを終了させるエラーか。
    ///
    /// `CryptoInconsistency`（およびピアからのその通知）は鍵発行の1回分だけを
    /// 失敗させ、セッションは次のラウンドに使える。
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ProtocolError::CryptoInconsistency(_)
                | ProtocolError::Rejected(Status::CRYPTO_INCONSISTENCY)
        )
    }
}

impl From<aibe_crypto::CryptoError> for ProtocolError {
    fn from(e: aibe_crypto::CryptoError) -> Self {
        use aibe_crypto::CryptoError;
        match e {
            CryptoError::DecryptError
            | CryptoError::SignatureVerifyError
            | CryptoError::MacVerifyError
            | CryptoError::EcdhError => ProtocolError::AuthFailure(e.to_string()),
            CryptoError::HkdfError(_) | CryptoError::EncryptError => {
                ProtocolError::Internal(e.to_string())
            }
        }
    }
}
