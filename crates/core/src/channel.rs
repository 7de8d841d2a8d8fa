//! # セキュアチャネル
//!
//! 方向別セッション鍵によるメッセージ単位のAES-256-GCM。
//!
//! ノンスは `方向ラベル(4) ‖ シーケンス番号(8, BE)` で、ワイヤには載せない。
//! 受信側は期待するシーケンス番号でしか復号しないため、
//! 再送・順序入れ替え・方向の取り違えはタグ検証で失敗する。
//! エンベロープ種別はAADとして束縛される。
//!
//! 直前に開封したメッセージと同じ暗号文の再送は、1つ前のシーケンス番号で
//! 開封できることで判別し、認証失敗ではなくプロトコル違反として返す。
//! それ以外の開封失敗はすべて認証失敗。

use aibe_crypto::{aes_gcm_decrypt, aes_gcm_encrypt, AES_GCM_NONCE_LEN, AES_GCM_TAG_LEN};
use aibe_types::MessageType;

use crate::error::ProtocolError;
use crate::session::{Direction, Role, SessionKeys};

/// 1メッセージで封印できる平文の上限
pub const MAX_SEALED_PLAINTEXT: usize = 4096;

fn nonce(direction: Direction, seq: u64) -> [u8; AES_GCM_NONCE_LEN] {
    let mut nonce = [0u8; AES_GCM_NONCE_LEN];
    nonce[..4].copy_from_slice(&direction.label());
    nonce[4..].copy_from_slice(&seq.to_be_bytes());
    nonce
}

/// 平文を封印する。戻り値は `ciphertext ‖ tag`。
pub fn seal(
    keys: &SessionKeys,
    direction: Direction,
    seq: u64,
    kind: MessageType,
    plaintext: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    if plaintext.len() > MAX_SEALED_PLAINTEXT {
        return Err(ProtocolError::Internal(format!(
            "封印する平文が上限を超えています: {} bytes",
            plaintext.len()
        )));
    }
    Ok(aes_gcm_encrypt(
        keys.key(direction),
        &nonce(direction, seq),
        &[kind.as_u8()],
        plaintext,
    )?)
}

/// `ciphertext ‖ tag` を開封する。失敗時は平文を一切返さない。
pub fn open(
    keys: &SessionKeys,
    direction: Direction,
    seq: u64,
    kind: MessageType,
    sealed: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    if sealed.len() < AES_GCM_TAG_LEN || sealed.len() > MAX_SEALED_PLAINTEXT + AES_GCM_TAG_LEN {
        return Err(ProtocolError::AuthFailure(format!(
            "封印済みボディ長が不正です: {} bytes",
            sealed.len()
        )));
    }
    aes_gcm_decrypt(keys.key(direction), &nonce(direction, seq), &[kind.as_u8()], sealed)
        .map_err(|_| ProtocolError::AuthFailure(format!("{kind} の認証タグが一致しません")))
}

/// 送受信のシーケンス番号を管理するチャネル。
#[derive(Debug)]
pub struct SecureChannel {
    keys: SessionKeys,
    role: Role,
    send_seq: u64,
    recv_seq: u64,
}

impl SecureChannel {
    pub fn new(keys: SessionKeys, role: Role) -> Self {
        Self {
            keys,
            role,
            send_seq: 0,
            recv_seq: 0,
        }
    }

    /// 自分の送信方向で封印し、送信シーケンス番号を進める。
    pub fn seal(&mut self, kind: MessageType, plaintext: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let sealed = seal(&self.keys, self.role.outbound(), self.send_seq, kind, plaintext)?;
        self.send_seq = self
            .send_seq
            .checked_add(1)
            .ok_or_else(|| ProtocolError::Internal("送信シーケンス番号が枯渇しました".into()))?;
        Ok(sealed)
    }

    /// 自分の受信方向で開封する。成功時のみ受信シーケンス番号を進める。
    pub fn open(&mut self, kind: MessageType, sealed: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let plaintext = match open(&self.keys, self.role.inbound(), self.recv_seq, kind, sealed) {
            Ok(plaintext) => plaintext,
            Err(e) => return Err(self.classify_failure(kind, sealed, e)),
        };
        self.recv_seq = self
            .recv_seq
            .checked_add(1)
            .ok_or_else(|| ProtocolError::Internal("受信シーケンス番号が枯渇しました".into()))?;
        Ok(plaintext)
    }

    fn classify_failure(
        &self,
        kind: MessageType,
        sealed: &[u8],
        error: ProtocolError,
    ) -> ProtocolError {
        let Some(previous) = self.recv_seq.checked_sub(1) else {
            return error;
        };
        match open(&self.keys, self.role.inbound(), previous, kind, sealed) {
            Ok(_) => ProtocolError::ProtocolViolation(format!("{kind} が再送されました")),
            Err(_) => error,
        }
    }

    pub fn keys(&self) -> &SessionKeys {
        &self.keys
    }
}
