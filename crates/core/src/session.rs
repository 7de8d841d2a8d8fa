//! # セッション状態と鍵スケジュール
//!
//! ハンドシェイクの状態、方向別セッション鍵、チャレンジバインディングを定義する。
//!
//! ```text
//! binding    = SHA-256("aibe-challenge-v1", session_id, nonce, client_pub, server_pub)
//! transcript = SHA-256("aibe-transcript-v1", binding, mpk, pkg_pubkey)
//! k_c2s, k_s2c = HKDF-SHA256(salt = seed ‖ binding, ikm = X25519(eph_c, eph_s))
//! confirmation = HMAC-SHA256(k_s2c, "aibe-attest-ok" ‖ binding)
//! ```

use std::fmt;

use aibe_crypto::{
    hkdf_derive_session_keys, hmac_sha256, hmac_sha256_verify, sha256_parts, SymmetricKey,
};

use crate::error::ProtocolError;

/// セッションIDの長さ（UUID v4）
pub const SESSION_ID_LEN: usize = 16;
/// チャレンジノンスの長さ
pub const NONCE_LEN: usize = 32;
/// 鍵導出シードの長さ
pub const SEED_LEN: usize = 32;

const BINDING_LABEL: &[u8] = b"aibe-challenge-v1";
const TRANSCRIPT_LABEL: &[u8] = b"aibe-transcript-v1";
const CONFIRMATION_LABEL: &[u8] = b"aibe-attest-ok";

/// ハンドシェイクの状態。
///
/// ```text
/// server: Idle → ChallengeSent → EvidenceExchanged → Verified → Closed
/// client: Idle → InitSent → ChallengeReceived → EvidenceExchanged → Verified → Closed
/// ```
///
/// 非終端状態からはいつでも `Failed` に遷移する。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    Idle,
    /// SESSION_INIT送信済み（クライアント）
    InitSent,
    /// CHALLENGE送信済み（サーバー）
    ChallengeSent,
    /// CHALLENGE受信済み（クライアント）
    ChallengeReceived,
    /// EVIDENCE送受信済み、結果待ち
    EvidenceExchanged,
    /// セッション鍵確立済み
    Verified,
    Closed,
    Failed,
}

impl HandshakeState {
    /// `Closed` または `Failed`。
    pub fn is_terminal(self) -> bool {
        matches!(self, HandshakeState::Closed | HandshakeState::Failed)
    }

    pub fn name(self) -> &'static str {
        match self {
            HandshakeState::Idle => "Idle",
            HandshakeState::InitSent => "InitSent",
            HandshakeState::ChallengeSent => "ChallengeSent",
            HandshakeState::ChallengeReceived => "ChallengeReceived",
            HandshakeState::EvidenceExchanged => "EvidenceExchanged",
            HandshakeState::Verified => "Verified",
            HandshakeState::Closed => "Closed",
            HandshakeState::Failed => "Failed",
        }
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 通信の向き。AES-GCMノンスの先頭4バイトに使う。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl Direction {
    pub fn label(self) -> [u8; 4] {
        match self {
            Direction::ClientToServer => *b"C2S\0",
            Direction::ServerToClient => *b"S2C\0",
        }
    }
}

/// セッションのどちら側か。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// 自分が送信する向き
    pub fn outbound(self) -> Direction {
        match self {
            Role::Client => Direction::ClientToServer,
            Role::Server => Direction::ServerToClient,
        }
    }

    /// 自分が受信する向き
    pub fn inbound(self) -> Direction {
        match self {
            Role::Client => Direction::ServerToClient,
            Role::Server => Direction::ClientToServer,
        }
    }
}

/// チャレンジバインディングを計算する。
///
/// EvidenceはこのハッシュにバインドされるためセッションIDと
/// 両エフェメラル鍵を跨いだ再利用はできない。
pub fn challenge_binding(
    session_id: &[u8; SESSION_ID_LEN],
    nonce: &[u8; NONCE_LEN],
    client_pubkey: &[u8; 32],
    server_pubkey: &[u8; 32],
) -> [u8; 32] {
    sha256_parts(
        BINDING_LABEL,
        &[&session_id[..], &nonce[..], &client_pubkey[..], &server_pubkey[..]],
    )
}

/// PKGが署名するトランスクリプトハッシュ。
pub fn transcript_hash(binding: &[u8; 32], public_params: &[u8], pkg_pubkey: &[u8]) -> [u8; 32] {
    sha256_parts(TRANSCRIPT_LABEL, &[&binding[..], public_params, pkg_pubkey])
}

/// 方向別のセッション鍵ペア。
#[derive(Clone)]
pub struct SessionKeys {
    client_to_server: SymmetricKey,
    server_to_client: SymmetricKey,
}

impl SessionKeys {
    /// ECDH共有秘密・シード・バインディングからセッション鍵を導出する。
    pub fn derive(
        shared_secret: &[u8; 32],
        seed: &[u8; SEED_LEN],
        binding: &[u8; 32],
    ) -> Result<Self, ProtocolError> {
        let mut salt = Vec::with_capacity(SEED_LEN + binding.len());
        salt.extend_from_slice(seed);
        salt.extend_from_slice(binding);
        let (client_to_server, server_to_client) = hkdf_derive_session_keys(shared_secret, &salt)?;
        Ok(Self {
            client_to_server,
            server_to_client,
        })
    }

    pub fn key(&self, direction: Direction) -> &SymmetricKey {
        match direction {
            Direction::ClientToServer => &self.client_to_server,
            Direction::ServerToClient => &self.server_to_client,
        }
    }

    /// 鍵確認MACを計算する（サーバー→クライアント鍵を使用）。
    pub fn confirmation(&self, binding: &[u8; 32]) -> Result<[u8; 32], ProtocolError> {
        Ok(hmac_sha256(
            &self.server_to_client,
            &confirmation_message(binding),
        )?)
    }

    /// 鍵確認MACを定数時間で検証する。
    pub fn verify_confirmation(&self, binding: &[u8; 32], tag: &[u8]) -> Result<(), ProtocolError> {
        hmac_sha256_verify(&self.server_to_client, &confirmation_message(binding), tag)
            .map_err(|_| ProtocolError::AuthFailure("鍵確認MACが一致しません".to_string()))
    }
}

fn confirmation_message(binding: &[u8; 32]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(CONFIRMATION_LABEL.len() + binding.len());
    msg.extend_from_slice(CONFIRMATION_LABEL);
    msg.extend_from_slice(binding);
    msg
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKeys(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(HandshakeState::Closed.is_terminal());
        assert!(HandshakeState::Failed.is_terminal());
        assert!(!HandshakeState::Verified.is_terminal());
        assert!(!HandshakeState::Idle.is_terminal());
    }

    #[test]
    fn test_roles_are_mirrored() {
        assert_eq!(Role::Client.outbound(), Role::Server.inbound());
        assert_eq!(Role::Server.outbound(), Role::Client.inbound());
        assert_ne!(
            Direction::ClientToServer.label(),
            Direction::ServerToClient.label()
        );
    }

    /// バインディングは全ての入力に依存する
    #[test]
    fn test_binding_depends_on_every_input() {
        let base = challenge_binding(&[1; 16], &[2; 32], &[3; 32], &[4; 32]);
        assert_ne!(base, challenge_binding(&[9; 16], &[2; 32], &[3; 32], &[4; 32]));
        assert_ne!(base, challenge_binding(&[1; 16], &[9; 32], &[3; 32], &[4; 32]));
        assert_ne!(base, challenge_binding(&[1; 16], &[2; 32], &[9; 32], &[4; 32]));
        assert_ne!(base, challenge_binding(&[1; 16], &[2; 32], &[3; 32], &[9; 32]));
    }

    #[test]
    fn test_confirmation_roundtrip() {
        let keys = SessionKeys::derive(&[5; 32], &[6; 32], &[7; 32]).unwrap();
        let tag = keys.confirmation(&[7; 32]).unwrap();
        assert!(keys.verify_confirmation(&[7; 32], &tag).is_ok());
        assert!(matches!(
            keys.verify_confirmation(&[8; 32], &tag),
            Err(ProtocolError::AuthFailure(_))
        ));

        let other = SessionKeys::derive(&[5; 32], &[0; 32], &[7; 32]).unwrap();
        assert!(other.verify_confirmation(&[7; 32], &tag).is_err());
    }

    #[test]
    fn test_keys_debug_is_redacted() {
        let keys = SessionKeys::derive(&[5; 32], &[6; 32], &[7; 32]).unwrap();
        assert_eq!(format!("{keys:?}"), "SessionKeys(<redacted>)");
    }
}
