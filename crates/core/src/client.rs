//! # クライアント（エンクレーブ）側セッション
//!
//! PKGとのハンドシェイクを進め、確立したセッション鍵でKEYGENを行う。
//! 各メソッドは送るべきエンベロープを返すか、受け取った応答を処理する。
//! I/Oは [`crate::connection::ClientConnection`] が担う。

use aibe_crypto::aibe::{AibeError, BlindingSecret, DecryptionKey, KeyIssuanceScheme, PublicParams};
use aibe_crypto::attestation::Attestor;
use aibe_crypto::{
    ecdh_derive_shared_secret, ed25519_verify, Ed25519Signature, Ed25519VerifyingKey, PublicKey,
    StaticSecret,
};
use aibe_types::{
    AttestResultBody, ChallengeBody, Envelope, EvidenceBody, MessageType, SessionInitBody, Status,
};
use base64::Engine;
use rand::rngs::OsRng;
use uuid::Uuid;

use crate::channel::SecureChannel;
use crate::error::ProtocolError;
use crate::gate::GateDecision;
use crate::keygen::{partial_key_from_bytes, validate_identity, KeygenRequest};
use crate::session::{
    challenge_binding, transcript_hash, HandshakeState, Role, SessionKeys, NONCE_LEN,
    SESSION_ID_LEN,
};
use crate::{b64, decode_fixed, decode_vec, encode_body, parse_body, ATTESTOR_BUSY_RETRIES};

/// クライアント設定。
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// CHALLENGE署名を検証するPKG公開鍵。`None` の場合は検証をスキップ（開発モード）
    pub pkg_verifying_key: Option<Ed25519VerifyingKey>,
    /// Attestorがビジーの場合の再試行回数
    pub busy_retries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            pkg_verifying_key: None,
            busy_retries: ATTESTOR_BUSY_RETRIES,
        }
    }
}

/// 応答待ちのKEYGENラウンド。
struct PendingKeygen {
    identity: String,
    secret: BlindingSecret,
}

/// クライアント側の1セッション。
pub struct ClientSession {
    config: ClientConfig,
    attestor: Box<dyn Attestor>,
    scheme: Box<dyn KeyIssuanceScheme>,
    state: HandshakeState,
    session_id: Option<Uuid>,
    ephemeral: Option<StaticSecret>,
    shared_secret: Option<[u8; 32]>,
    binding: Option<[u8; 32]>,
    params: Option<PublicParams>,
    channel: Option<SecureChannel>,
    pending: Option<PendingKeygen>,
}

impl ClientSession {
    pub fn new(
        config: ClientConfig,
        attestor: Box<dyn Attestor>,
        scheme: Box<dyn KeyIssuanceScheme>,
    ) -> Self {
        Self {
            config,
            attestor,
            scheme,
            state: HandshakeState::Idle,
            session_id: None,
            ephemeral: None,
            shared_secret: None,
            binding: None,
            params: None,
            channel: None,
            pending: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// PKGが割り当てたセッションID（CHALLENGE受信後）。
    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    /// PKGの公開パラメータ（CHALLENGE受信後）。
    pub fn params(&self) -> Option<&PublicParams> {
        self.params.as_ref()
    }

    /// 確立済みのセキュアチャネル。
    pub fn channel_mut(&mut self) -> Option<&mut SecureChannel> {
        self.channel.as_mut()
    }

    /// KEYGENの応答待ちか。
    pub fn keygen_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn transition(&mut self, to: HandshakeState) {
        tracing::debug!(from = %self.state, to = %to, "クライアント状態遷移");
        self.state = to;
    }

    /// 致命的エラーならセッションを `Failed` にして鍵素材を破棄する。
    fn settle<T>(&mut self, result: Result<T, ProtocolError>) -> Result<T, ProtocolError> {
        if let Err(e) = &result {
            if e.is_fatal() && !self.state.is_terminal() {
                tracing::warn!(state = %self.state, error = %e, "クライアントセッションを失敗状態にします");
                self.fail();
            }
        }
        result
    }

    /// セッションを `Failed` にする（トランスポート障害など）。
    pub fn fail(&mut self) {
        self.transition(HandshakeState::Failed);
        self.wipe();
    }

    fn wipe(&mut self) {
        self.ephemeral = None;
        self.shared_secret = None;
        self.binding = None;
        self.channel = None;
        self.pending = None;
    }

    fn expect(
        &self,
        state: HandshakeState,
        envelope: &Envelope,
        kind: MessageType,
    ) -> Result<(), ProtocolError> {
        if self.state != state {
            return Err(ProtocolError::ProtocolViolation(format!(
                "{} 状態で {} を処理しようとしました",
                self.state, envelope.kind
            )));
        }
        if envelope.kind != kind {
            return Err(ProtocolError::ProtocolViolation(format!(
                "{kind} を期待しましたが {} を受信しました",
                envelope.kind
            )));
        }
        if !envelope.status.is_ok() {
            return Err(ProtocolError::Rejected(envelope.status));
        }
        Ok(())
    }

    /// SESSION_INITを生成する。
    pub fn start(&mut self) -> Result<Envelope, ProtocolError> {
        let result = self.start_inner();
        self.settle(result)
    }

    fn start_inner(&mut self) -> Result<Envelope, ProtocolError> {
        if self.state != HandshakeState::Idle {
            return Err(ProtocolError::ProtocolViolation(format!(
                "{} 状態からハンドシェイクは開始できません",
                self.state
            )));
        }
        let ephemeral = StaticSecret::random_from_rng(OsRng);
        let body = SessionInitBody {
            client_pubkey: b64().encode(PublicKey::from(&ephemeral).as_bytes()),
        };
        self.ephemeral = Some(ephemeral);
        self.transition(HandshakeState::InitSent);
        Ok(Envelope::new(MessageType::SessionInit, encode_body(&body)?))
    }

    /// CHALLENGEを検証し、EVIDENCEを生成する。
    pub fn on_challenge(&mut self, envelope: &Envelope) -> Result<Envelope, ProtocolError> {
        let result = self.on_challenge_inner(envelope);
        self.settle(result)
    }

    fn on_challenge_inner(&mut self, envelope: &Envelope) -> Result<Envelope, ProtocolError> {
        self.expect(HandshakeState::InitSent, envelope, MessageType::Challenge)?;
        let body: ChallengeBody = parse_body(envelope.kind, &envelope.body)?;

        let session_id: [u8; SESSION_ID_LEN] = decode_fixed("session_id", &body.session_id)?;
        let nonce: [u8; NONCE_LEN] = decode_fixed("nonce", &body.nonce)?;
        let server_pubkey: [u8; 32] = decode_fixed("server_pubkey", &body.server_pubkey)?;
        let params_bytes = decode_vec("public_params", &body.public_params)?;
        let pkg_pubkey: [u8; 32] = decode_fixed("pkg_pubkey", &body.pkg_pubkey)?;
        let signature: [u8; 64] = decode_fixed("signature", &body.signature)?;
        let params = PublicParams::from_bytes(&params_bytes)
            .map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        let ephemeral = self
            .ephemeral
            .take()
            .ok_or_else(|| ProtocolError::Internal("エフェメラル鍵がありません".to_string()))?;
        let client_pubkey = PublicKey::from(&ephemeral).to_bytes();
        let binding = challenge_binding(&session_id, &nonce, &client_pubkey, &server_pubkey);

        match &self.config.pkg_verifying_key {
            Some(pinned) => {
                if pinned.as_bytes() != &pkg_pubkey {
                    return Err(ProtocolError::AuthFailure(
                        "PKG公開鍵がピン留めした鍵と一致しません".to_string(),
                    ));
                }
                let transcript = transcript_hash(&binding, &params_bytes, &pkg_pubkey);
                ed25519_verify(pinned, &transcript, &Ed25519Signature::from_bytes(&signature))?;
                tracing::info!("PKGのCHALLENGE署名を検証しました");
            }
            None => {
                tracing::warn!("PKG公開鍵が未設定のため、CHALLENGE署名の検証をスキップします（開発モード）");
            }
        }

        let shared = ecdh_derive_shared_secret(&ephemeral, &PublicKey::from(server_pubkey))?;
        let session_id = Uuid::from_bytes(session_id);
        tracing::info!(session = %session_id, params = %params.fingerprint(), "CHALLENGEを受信しました");

        self.session_id = Some(session_id);
        self.shared_secret = Some(shared);
        self.binding = Some(binding);
        self.params = Some(params);
        self.transition(HandshakeState::ChallengeReceived);

        let evidence = self.produce_evidence(&binding)?;
        let body = EvidenceBody {
            tee_type: self.attestor.tee_type().to_string(),
            evidence: b64().encode(evidence),
        };
        self.transition(HandshakeState::EvidenceExchanged);
        Ok(Envelope::new(MessageType::Evidence, encode_body(&body)?))
    }

    /// Attestorにevidenceを要求する。ビジーの場合のみ固定回数まで再試行する。
    fn produce_evidence(&self, binding: &[u8; 32]) -> Result<Vec<u8>, ProtocolError> {
        let mut attempt = 0;
        loop {
            match self.attestor.produce_evidence(binding) {
                Ok(evidence) => return Ok(evidence),
                Err(e) if e.is_transient() && attempt < self.config.busy_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, "Attestorがビジーのため再試行します");
                }
                Err(e) => return Err(ProtocolError::AttestationFailure(e.to_string())),
            }
        }
    }

    /// ATTEST_RESULTを処理し、セッション鍵を確定する。
    pub fn on_attest_result(&mut self, envelope: &Envelope) -> Result<(), ProtocolError> {
        let result = self.on_attest_result_inner(envelope);
        self.settle(result)
    }

    fn on_attest_result_inner(&mut self, envelope: &Envelope) -> Result<(), ProtocolError> {
        if envelope.kind == MessageType::AttestResult
            && envelope.status == Status::ATTESTATION_REJECTED
        {
            return Err(ProtocolError::AttestationFailure(
                "PKGがEvidenceを拒否しました".to_string(),
            ));
        }
        self.expect(HandshakeState::EvidenceExchanged, envelope, MessageType::AttestResult)?;
        let body: AttestResultBody = parse_body(envelope.kind, &envelope.body)?;
        let seed: [u8; 32] = decode_fixed("seed", &body.seed)?;
        let confirmation = decode_vec("confirmation", &body.confirmation)?;

        let shared = self
            .shared_secret
            .take()
            .ok_or_else(|| ProtocolError::Internal("共有秘密がありません".to_string()))?;
        let binding = self
            .binding
            .ok_or_else(|| ProtocolError::Internal("バインディングがありません".to_string()))?;
        let keys = SessionKeys::derive(&shared, &seed, &binding)?;
        keys.verify_confirmation(&binding, &confirmation)?;

        self.channel = Some(SecureChannel::new(keys, Role::Client));
        self.transition(HandshakeState::Verified);
        tracing::info!(session = ?self.session_id, "セッション鍵を確立しました");
        Ok(())
    }

    /// KEYGENラウンド1: ブラインド値を封印して送る。
    pub fn begin_keygen(&mut self, identity: &str) -> Result<Envelope, ProtocolError> {
        let result = self.begin_keygen_inner(identity);
        self.settle(result)
    }

    fn begin_keygen_inner(&mut self, identity: &str) -> Result<Envelope, ProtocolError> {
        if self.state != HandshakeState::Verified {
            return Err(ProtocolError::ProtocolViolation(format!(
                "{} 状態ではKEYGENを開始できません",
                self.state
            )));
        }
        if self.pending.is_some() {
            return Err(ProtocolError::ProtocolViolation(
                "前回のKEYGENが完了していません".to_string(),
            ));
        }
        validate_identity(identity)?;
        let params = self
            .params
            .as_ref()
            .ok_or_else(|| ProtocolError::Internal("公開パラメータがありません".to_string()))?;
        let (blind, secret) = self
            .scheme
            .blind(params, identity)
            .map_err(|e| ProtocolError::Internal(e.to_string()))?;

        let request = KeygenRequest {
            identity: identity.to_string(),
            blind,
        };
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| ProtocolError::Internal("セッション鍵がありません".to_string()))?;
        let sealed = channel.seal(MessageType::Keygen, &request.to_bytes())?;

        self.pending = Some(PendingKeygen {
            identity: identity.to_string(),
            secret,
        });
        Ok(Envelope::new(MessageType::Keygen, sealed))
    }

    /// KEYGENラウンド3: 部分鍵を開封し、ブラインドを外して最終鍵を得る。
    ///
    /// 検証に失敗した場合は `CryptoInconsistency` を返し、鍵は一切返さない。
    pub fn finish_keygen(&mut self, envelope: &Envelope) -> Result<DecryptionKey, ProtocolError> {
        let result = self.finish_keygen_inner(envelope);
        self.settle(result)
    }

    fn finish_keygen_inner(&mut self, envelope: &Envelope) -> Result<DecryptionKey, ProtocolError> {
        let pending = self.pending.take().ok_or_else(|| {
            ProtocolError::ProtocolViolation("応答待ちのKEYGENがありません".to_string())
        })?;
        self.expect(HandshakeState::Verified, envelope, MessageType::Keygen)?;

        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| ProtocolError::Internal("セッション鍵がありません".to_string()))?;
        let plaintext = channel.open(MessageType::Keygen, &envelope.body)?;
        let partial = partial_key_from_bytes(&plaintext)?;

        let params = self
            .params
            .as_ref()
            .ok_or_else(|| ProtocolError::Internal("公開パラメータがありません".to_string()))?;
        let key = self
            .scheme
            .unblind(params, &pending.identity, pending.secret, &partial)
            .map_err(|e| match e {
                AibeError::Inconsistent(_) => ProtocolError::CryptoInconsistency(e.to_string()),
                AibeError::InvalidEncoding(_) | AibeError::Decrypt => {
                    ProtocolError::Malformed(e.to_string())
                }
            })?;
        tracing::info!(identity = %pending.identity, "復号鍵を導出しました");
        Ok(key)
    }

    /// KEYREQを生成する。証明は平文で送る。
    pub fn key_request(&mut self, proof_bytes: Vec<u8>) -> Result<Envelope, ProtocolError> {
        if self.state.is_terminal() {
            return Err(ProtocolError::ProtocolViolation(format!(
                "{} 状態ではKEYREQを送れません",
                self.state
            )));
        }
        Ok(Envelope::new(MessageType::KeyReq, proof_bytes))
    }

    /// KEYREQの応答を判定に変換する。
    pub fn on_key_request_reply(
        &mut self,
        envelope: &Envelope,
    ) -> Result<GateDecision, ProtocolError> {
        let result = match (envelope.kind, envelope.status) {
            (MessageType::KeyReq, Status::OK) => Ok(GateDecision::Granted),
            (MessageType::KeyReq, status @ (Status::PROOF_REJECTED | Status::MALFORMED)) => {
                Ok(GateDecision::Denied(status))
            }
            (MessageType::KeyReq, status) => Err(ProtocolError::Rejected(status)),
            (kind, _) => Err(ProtocolError::ProtocolViolation(format!(
                "KEYREQを期待しましたが {kind} を受信しました"
            ))),
        };
        self.settle(result)
    }

    /// EXITを生成し、セッションを閉じる。
    pub fn close(&mut self) -> Envelope {
        if !self.state.is_terminal() {
            self.transition(HandshakeState::Closed);
        }
        self.wipe();
        Envelope::new(MessageType::Exit, Vec::new())
    }
}
