//! # PKG側セッション
//!
//! 1接続につき1つの [`ServerSession`] が、受信したエンベロープを
//! 現在の状態に照らして処理し、応答を返す。
//!
//! | 受信 | 必要な状態 | 応答 | 遷移先 |
//! |------|-----------|------|--------|
//! | SESSION_INIT | Idle | CHALLENGE | ChallengeSent |
//! | EVIDENCE | ChallengeSent | ATTEST_RESULT | Verified / Failed |
//! | KEYGEN | Verified | KEYGEN（封印済み部分鍵） | Verified |
//! | KEYREQ | 非終端 | KEYREQ（ステータスのみ） | 変化なし |
//! | EXIT | 非終端 | なし | Closed |
//!
//! 状態に合わないメッセージはプロトコル違反としてセッションを `Failed` にする。

use std::collections::HashSet;
use std::sync::Arc;

use aibe_crypto::aibe::{AibeError, Aibe, KeyIssuanceScheme, MasterKey, PublicParams, G1_LEN};
use aibe_crypto::attestation::Attestor;
use aibe_crypto::proof::KnowledgeProof;
use aibe_crypto::{
    ecdh_derive_shared_secret, ed25519_sign, Ed25519SigningKey, Ed25519VerifyingKey, PublicKey,
    StaticSecret,
};
use aibe_types::{
    AttestResultBody, ChallengeBody, Envelope, EvidenceBody, MessageType, SessionInitBody, Status,
};
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use uuid::Uuid;

use crate::channel::SecureChannel;
use crate::error::ProtocolError;
use crate::gate::KeyRequestGate;
use crate::keygen::KeygenRequest;
use crate::session::{
    challenge_binding, transcript_hash, HandshakeState, Role, SessionKeys, NONCE_LEN, SEED_LEN,
};
use crate::table::SessionTable;
use crate::{b64, decode_fixed, decode_vec, encode_body, parse_body};

/// 全セッションで共有する読み取り専用のPKG状態。
pub struct ServerContext {
    master: MasterKey,
    params_bytes: Vec<u8>,
    attestor: Box<dyn Attestor>,
    scheme: Box<dyn KeyIssuanceScheme>,
    signing_key: Ed25519SigningKey,
    gate: KeyRequestGate<KnowledgeProof>,
    table: Arc<SessionTable>,
}

impl ServerContext {
    pub fn new(
        master: MasterKey,
        attestor: Box<dyn Attestor>,
        signing_key: Ed25519SigningKey,
    ) -> Self {
        let params_bytes = master.params().to_bytes();
        Self {
            master,
            params_bytes,
            attestor,
            scheme: Box::new(Aibe),
            signing_key,
            gate: KeyRequestGate::new(),
            table: Arc::new(SessionTable::new()),
        }
    }

    /// 鍵発行スキームを差し替える。
    pub fn with_scheme(mut self, scheme: Box<dyn KeyIssuanceScheme>) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn table(&self) -> &Arc<SessionTable> {
        &self.table
    }

    pub fn params(&self) -> &PublicParams {
        self.master.params()
    }

    /// CHALLENGEの署名に使う鍵の公開鍵。クライアントはこれをピン留めできる。
    pub fn pkg_verifying_key(&self) -> Ed25519VerifyingKey {
        self.signing_key.verifying_key()
    }
}

/// 1メッセージ処理後の指示。
#[derive(Debug)]
pub enum Step {
    /// 応答を返してセッションを継続する
    Continue(Envelope),
    /// （あれば応答を返して）接続を閉じる
    Terminate {
        reply: Option<Envelope>,
        reason: Option<ProtocolError>,
    },
}

/// 要求種別に対する応答種別。
fn reply_kind(kind: MessageType) -> MessageType {
    match kind {
        MessageType::SessionInit => MessageType::Challenge,
        MessageType::Evidence => MessageType::AttestResult,
        other => other,
    }
}

/// PKG側の1セッション。接続タスクが所有する。
pub struct ServerSession {
    id: Uuid,
    state: HandshakeState,
    table: Arc<SessionTable>,
    shared_secret: Option<[u8; 32]>,
    binding: Option<[u8; 32]>,
    channel: Option<SecureChannel>,
    seen_r: HashSet<[u8; G1_LEN]>,
    keygen_rounds: u64,
}

impl ServerSession {
    pub fn new(ctx: &ServerContext) -> Self {
        let id = Uuid::new_v4();
        ctx.table.register(id);
        tracing::info!(session = %id, "セッションを作成しました");
        Self {
            id,
            state: HandshakeState::Idle,
            table: Arc::clone(&ctx.table),
            shared_secret: None,
            binding: None,
            channel: None,
            seen_r: HashSet::new(),
            keygen_rounds: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// 完了したKEYGENラウンド数。
    pub fn keygen_rounds(&self) -> u64 {
        self.keygen_rounds
    }

    /// 受信したエンベロープを処理する。
    pub fn handle(&mut self, ctx: &ServerContext, envelope: &Envelope) -> Step {
        let kind = envelope.kind;
        if self.state.is_terminal() {
            return Step::Terminate {
                reply: Some(Envelope::rejection(reply_kind(kind), Status::PROTOCOL_VIOLATION)),
                reason: Some(ProtocolError::ProtocolViolation(format!(
                    "{} 状態のセッションに {kind} を受信しました",
                    self.state
                ))),
            };
        }

        let result = if kind != MessageType::Exit && !envelope.status.is_ok() {
            Err(ProtocolError::ProtocolViolation(format!(
                "要求 {kind} のステータスが0ではありません: {}",
                envelope.status
            )))
        } else {
            match kind {
                MessageType::SessionInit => self.on_session_init(ctx, envelope),
                MessageType::Evidence => self.on_evidence(ctx, envelope),
                MessageType::Keygen => self.on_keygen(ctx, envelope),
                MessageType::KeyReq => Ok(self.on_key_request(ctx, envelope)),
                MessageType::Exit => {
                    tracing::info!(session = %self.id, "EXITを受信しました");
                    self.transition(HandshakeState::Closed);
                    self.wipe();
                    return Step::Terminate {
                        reply: None,
                        reason: None,
                    };
                }
                MessageType::Challenge | MessageType::AttestResult => {
                    Err(ProtocolError::ProtocolViolation(format!(
                        "{kind} はPKG宛てのメッセージではありません"
                    )))
                }
            }
        };

        match result {
            Ok(reply) => Step::Continue(reply),
            Err(e) if !e.is_fatal() => {
                tracing::warn!(session = %self.id, error = %e, "{kind} を拒否しました（セッションは継続）");
                Step::Continue(Envelope::rejection(reply_kind(kind), e.status()))
            }
            Err(e) => {
                tracing::warn!(session = %self.id, state = %self.state, error = %e, "セッションを失敗状態にします");
                self.transition(HandshakeState::Failed);
                self.wipe();
                Step::Terminate {
                    reply: Some(Envelope::rejection(reply_kind(kind), e.status())),
                    reason: Some(e),
                }
            }
        }
    }

    /// トランスポート側の理由（タイムアウト、切断、フレーミング）でセッションを終わらせる。
    pub fn abort(&mut self, reason: &ProtocolError) {
        if self.state.is_terminal() {
            return;
        }
        tracing::warn!(session = %self.id, state = %self.state, error = %reason, "セッションを中断します");
        let to = match reason {
            ProtocolError::ConnectionClosed => HandshakeState::Closed,
            _ => HandshakeState::Failed,
        };
        self.transition(to);
        self.wipe();
    }

    fn transition(&mut self, to: HandshakeState) {
        tracing::info!(session = %self.id, from = %self.state, to = %to, "状態遷移");
        self.state = to;
        self.table.update(self.id, to);
    }

    /// 鍵素材を破棄する。
    fn wipe(&mut self) {
        self.shared_secret = None;
        self.binding = None;
        self.channel = None;
    }

    fn expect_state(&self, expected: HandshakeState, kind: MessageType) -> Result<(), ProtocolError> {
        if self.state != expected {
            return Err(ProtocolError::ProtocolViolation(format!(
                "{} 状態で {kind} を受信しました（期待: {expected}）",
                self.state
            )));
        }
        Ok(())
    }

    fn on_session_init(
        &mut self,
        ctx: &ServerContext,
        envelope: &Envelope,
    ) -> Result<Envelope, ProtocolError> {
        self.expect_state(HandshakeState::Idle, envelope.kind)?;
        let body: SessionInitBody = parse_body(envelope.kind, &envelope.body)?;
        let client_pubkey: [u8; 32] = decode_fixed("client_pubkey", &body.client_pubkey)?;

        let ephemeral = StaticSecret::random_from_rng(OsRng);
        let server_pubkey = PublicKey::from(&ephemeral).to_bytes();
        let shared = ecdh_derive_shared_secret(&ephemeral, &PublicKey::from(client_pubkey))
            .map_err(|_| ProtocolError::Malformed("クライアント公開鍵が不正です".to_string()))?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        if !ctx.table.claim_challenge(nonce) {
            return Err(ProtocolError::Internal("チャレンジが重複しました".to_string()));
        }

        let session_id = *self.id.as_bytes();
        let binding = challenge_binding(&session_id, &nonce, &client_pubkey, &server_pubkey);
        let pkg_pubkey = ctx.signing_key.verifying_key().to_bytes();
        let transcript = transcript_hash(&binding, &ctx.params_bytes, &pkg_pubkey);
        let signature = ed25519_sign(&ctx.signing_key, &transcript);

        let reply = ChallengeBody {
            session_id: b64().encode(session_id),
            nonce: b64().encode(nonce),
            server_pubkey: b64().encode(server_pubkey),
            public_params: b64().encode(&ctx.params_bytes),
            pkg_pubkey: b64().encode(pkg_pubkey),
            signature: b64().encode(signature.to_bytes()),
        };

        self.shared_secret = Some(shared);
        self.binding = Some(binding);
        self.transition(HandshakeState::ChallengeSent);
        Ok(Envelope::new(MessageType::Challenge, encode_body(&reply)?))
    }

    fn on_evidence(
        &mut self,
        ctx: &ServerContext,
        envelope: &Envelope,
    ) -> Result<Envelope, ProtocolError> {
        self.expect_state(HandshakeState::ChallengeSent, envelope.kind)?;
        let body: EvidenceBody = parse_body(envelope.kind, &envelope.body)?;
        let evidence = decode_vec("evidence", &body.evidence)?;
        let binding = self
            .binding
            .ok_or_else(|| ProtocolError::Internal("チャレンジが未発行です".to_string()))?;
        self.transition(HandshakeState::EvidenceExchanged);

        if body.tee_type != ctx.attestor.tee_type() {
            return Err(ProtocolError::AttestationFailure(format!(
                "未対応のTEE種別: {}",
                body.tee_type
            )));
        }
        let result = ctx
            .attestor
            .verify(&binding, &evidence)
            .map_err(|e| ProtocolError::AttestationFailure(e.to_string()))?;
        tracing::info!(session = %self.id, tee_type = %result.tee_type, "Evidenceを検証しました");

        let shared = self
            .shared_secret
            .take()
            .ok_or_else(|| ProtocolError::Internal("共有秘密がありません".to_string()))?;
        let mut seed = [0u8; SEED_LEN];
        OsRng.fill_bytes(&mut seed);
        let keys = SessionKeys::derive(&shared, &seed, &binding)?;
        let confirmation = keys.confirmation(&binding)?;
        self.channel = Some(SecureChannel::new(keys, Role::Server));
        self.transition(HandshakeState::Verified);

        let reply = AttestResultBody {
            seed: b64().encode(seed),
            confirmation: b64().encode(confirmation),
        };
        Ok(Envelope::new(MessageType::AttestResult, encode_body(&reply)?))
    }

    fn on_keygen(
        &mut self,
        ctx: &ServerContext,
        envelope: &Envelope,
    ) -> Result<Envelope, ProtocolError> {
        if self.state != HandshakeState::Verified {
            return Err(ProtocolError::ProtocolViolation(format!(
                "{} 状態でKEYGENを受信しました",
                self.state
            )));
        }
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| ProtocolError::Internal("セッション鍵がありません".to_string()))?;

        let plaintext = channel.open(MessageType::Keygen, &envelope.body)?;
        let request = KeygenRequest::from_bytes(&plaintext)?;
        if !self.seen_r.insert(request.blind.r_bytes()) {
            return Err(ProtocolError::ProtocolViolation(
                "このセッションで使用済みのRです".to_string(),
            ));
        }

        let partial = ctx
            .scheme
            .issue_partial(&ctx.master, &request.identity, &request.blind)
            .map_err(|e| match e {
                AibeError::Inconsistent(_) => ProtocolError::CryptoInconsistency(e.to_string()),
                AibeError::InvalidEncoding(_) | AibeError::Decrypt => {
                    ProtocolError::Malformed(e.to_string())
                }
            })?;
        let sealed = channel.seal(MessageType::Keygen, &partial.to_bytes())?;

        self.keygen_rounds += 1;
        tracing::info!(
            session = %self.id,
            identity = %request.identity,
            round = self.keygen_rounds,
            "ブラインド部分鍵を発行しました"
        );
        Ok(Envelope::new(MessageType::Keygen, sealed))
    }

    fn on_key_request(&mut self, ctx: &ServerContext, envelope: &Envelope) -> Envelope {
        let decision = ctx.gate.handle(ctx.params(), &envelope.body);
        tracing::info!(session = %self.id, status = %decision.status(), "KEYREQを処理しました");
        decision.to_envelope()
    }
}

impl Drop for ServerSession {
    fn drop(&mut self) {
        self.table.remove(self.id);
        tracing::debug!(session = %self.id, "セッションを破棄しました");
    }
}
