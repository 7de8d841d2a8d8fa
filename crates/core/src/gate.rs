//! # 鍵要求ゲート
//!
//! KEYREQで提出された証明をPKGの公開パラメータの下で検証し、
//! 結果をステータスとして返す。検証1回分以外の状態は持たない。

use std::marker::PhantomData;

use aibe_crypto::aibe::PublicParams;
use aibe_crypto::proof::Proof;
use aibe_types::{Envelope, MessageType, Status};

/// ゲートの判定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Granted,
    Denied(Status),
}

impl GateDecision {
    pub fn status(self) -> Status {
        match self {
            GateDecision::Granted => Status::OK,
            GateDecision::Denied(status) => status,
        }
    }

    /// 応答エンベロープ（ボディ長0、ステータスのみ）。
    pub fn to_envelope(self) -> Envelope {
        Envelope::rejection(MessageType::KeyReq, self.status())
    }
}

/// 証明型 `P` を検証するゲート。
pub struct KeyRequestGate<P: Proof> {
    _proof: PhantomData<fn() -> P>,
}

impl<P: Proof> Default for KeyRequestGate<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Proof> KeyRequestGate<P> {
    pub fn new() -> Self {
        Self {
            _proof: PhantomData,
        }
    }

    /// 証明をデシリアライズして検証する。
    pub fn handle(&self, params: &PublicParams, proof_bytes: &[u8]) -> GateDecision {
        let proof = match P::deserialize(proof_bytes) {
            Ok(proof) => proof,
            Err(e) => {
                tracing::warn!(error = %e, "鍵要求の証明をパースできません");
                return GateDecision::Denied(Status::MALFORMED);
            }
        };
        if proof.verify(params) {
            tracing::info!("鍵要求の証明を受理しました");
            GateDecision::Granted
        } else {
            tracing::warn!("鍵要求の証明が検証に失敗しました");
            GateDecision::Denied(Status::PROOF_REJECTED)
        }
    }
}
