//! # A-IBE PKG Core
//!
//! Attestation付きブラインド鍵発行プロトコルのコアを実装する。
//!
//! ## 処理フロー
//! 1. SESSION_INIT / CHALLENGE / EVIDENCE / ATTEST_RESULT でエンクレーブを検証し、
//!    方向別セッション鍵を確立する（[`server`], [`client`]）
//! 2. 以降のKEYGENボディはセッション鍵で封印する（[`channel`]）
//! 3. KEYGENの3ラウンドでクライアントが最終鍵を得る（[`keygen`]）
//! 4. KEYREQは証明を検証してステータスを返す（[`gate`]）
//!
//! 各セッションは接続タスクが所有する値であり、接続間で共有しない。

pub mod channel;
pub mod client;
pub mod connection;
pub mod error;
pub mod gate;
pub mod keyfile;
pub mod keygen;
pub mod server;
pub mod session;
pub mod table;
pub mod transport;

pub use channel::SecureChannel;
pub use client::{ClientConfig, ClientSession};
pub use connection::ClientConnection;
pub use error::ProtocolError;
pub use gate::{GateDecision, KeyRequestGate};
pub use keyfile::{KeyFileError, StoredKey};
pub use server::{ServerContext, ServerSession, Step};
pub use session::{HandshakeState, Role};
pub use table::SessionTable;

use base64::Engine;

/// クライアントがAttestorのビジーを再試行する回数
pub const ATTESTOR_BUSY_RETRIES: u32 = 4;

pub(crate) fn b64() -> base64::engine::general_purpose::GeneralPurpose {
    base64::engine::general_purpose::STANDARD
}

/// Base64フィールドを固定長バイト列としてデコードする。
pub(crate) fn decode_fixed<const N: usize>(
    field: &str,
    value: &str,
) -> Result<[u8; N], ProtocolError> {
    let bytes = b64()
        .decode(value)
        .map_err(|e| ProtocolError::Malformed(format!("{field}のBase64デコードに失敗: {e}")))?;
    bytes.try_into().map_err(|v: Vec<u8>| {
        ProtocolError::Malformed(format!("{field}の長さが不正です: {} bytes", v.len()))
    })
}

/// Base64フィールドを可変長でデコードする。
pub(crate) fn decode_vec(field: &str, value: &str) -> Result<Vec<u8>, ProtocolError> {
    b64()
        .decode(value)
        .map_err(|e| ProtocolError::Malformed(format!("{field}のBase64デコードに失敗: {e}")))
}

/// JSONボディをパースする。
pub(crate) fn parse_body<T: serde::de::DeserializeOwned>(
    kind: aibe_types::MessageType,
    body: &[u8],
) -> Result<T, ProtocolError> {
    serde_json::from_slice(body)
        .map_err(|e| ProtocolError::Malformed(format!("{kind}ボディのパースに失敗: {e}")))
}

/// JSONボディをシリアライズする。
pub(crate) fn encode_body<T: serde::Serialize>(body: &T) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(body).map_err(|e| ProtocolError::Internal(e.to_string()))
}
