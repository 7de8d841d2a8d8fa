//! # ローカル開発用モックAttestor
//!
//! TEEハードウェアが利用できない開発環境で使用するモック実装。
//! Evidenceは Ed25519 で署名したJSONドキュメントで、
//! 測定値はNitro Enclaveのdebug-modeと同等（全ゼロ48バイト）。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use super::{verify_measurements, AttestationError, AttestationResult, Attestor};

/// モックAttestorのTEE種別
pub const MOCK_TEE_TYPE: &str = "mock";

/// 測定値マップのキー名
pub const MEASUREMENT_KEY: &str = "MEASUREMENT";

/// 測定値の長さ（SHA-384相当）
pub const MEASUREMENT_LEN: usize = 48;

/// 開発用Attestorの固定シード。
/// PKGとクライアントが同じ鍵を信頼できるよう、ビルド間で不変。
const DEVELOPMENT_SEED: [u8; 32] = *b"aibe-mock-attestor-development!!";

/// 署名対象のクレーム。
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EvidenceClaims {
    /// モジュールID
    module_id: String,
    /// TEE種別
    tee_type: String,
    /// エンクレーブ測定値（hex）
    measurement: String,
    /// チャレンジのSHA-256（hex）
    report_data: String,
    /// 署名鍵（Ed25519公開鍵、hex）
    public_key: String,
    /// 生成時刻（Unix ms）
    timestamp: u64,
}

/// モックEvidenceドキュメント。
#[derive(Debug, Serialize, Deserialize)]
struct MockEvidence {
    claims: EvidenceClaims,
    /// `serde_json::to_vec(&claims)` に対するEd25519署名（hex）
    signature: String,
}

/// モックAttestor。ローカル開発・テスト用。
///
/// 署名鍵を持つ場合はEvidenceの生成と検証の両方、
/// 持たない場合は検証のみ行える。
pub struct MockAttestor {
    /// Evidence署名鍵（エンクレーブ側のみ）
    signing_key: Option<SigningKey>,
    /// 検証時に信頼する公開鍵
    trusted_key: VerifyingKey,
    /// 生成時に主張する測定値、かつ検証時の期待値
    measurement: Vec<u8>,
    /// 残りのビジー応答回数
    busy_remaining: AtomicU32,
}

impl MockAttestor {
    /// 開発用の固定鍵・全ゼロ測定値のAttestorを生成する。
    /// PKGとクライアントの双方で同じ構成になる。
    pub fn development() -> Self {
        Self::enclave(
            SigningKey::from_bytes(&DEVELOPMENT_SEED),
            vec![0u8; MEASUREMENT_LEN],
        )
    }

    /// 指定の署名鍵と測定値でEvidenceを生成するAttestorを生成する。
    pub fn enclave(signing_key: SigningKey, measurement: Vec<u8>) -> Self {
        let trusted_key = signing_key.verifying_key();
        Self {
            signing_key: Some(signing_key),
            trusted_key,
            measurement,
            busy_remaining: AtomicU32::new(0),
        }
    }

    /// 検証専用のAttestorを生成する。
    pub fn verifier(trusted_key: VerifyingKey, expected_measurement: Vec<u8>) -> Self {
        Self {
            signing_key: None,
            trusted_key,
            measurement: expected_measurement,
            busy_remaining: AtomicU32::new(0),
        }
    }

    /// 最初の `count` 回のEvidence生成で [`AttestationError::Busy`] を返すようにする。
    pub fn with_transient_busy(self, count: u32) -> Self {
        self.busy_remaining.store(count, Ordering::SeqCst);
        self
    }

    /// 信頼する公開鍵を返す。
    pub fn public_key(&self) -> VerifyingKey {
        self.trusted_key
    }
}

impl Attestor for MockAttestor {
    fn tee_type(&self) -> &str {
        MOCK_TEE_TYPE
    }

    fn produce_evidence(&self, challenge: &[u8]) -> Result<Vec<u8>, AttestationError> {
        if self
            .busy_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AttestationError::Busy);
        }

        let signing_key = self
            .signing_key
            .as_ref()
            .ok_or_else(|| AttestationError::Unavailable("署名鍵がありません".to_string()))?;

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let claims = EvidenceClaims {
            module_id: "mock-enclave".to_string(),
            tee_type: MOCK_TEE_TYPE.to_string(),
            measurement: hex::encode(&self.measurement),
            report_data: hex::encode(crate::sha256(challenge)),
            public_key: hex::encode(signing_key.verifying_key().as_bytes()),
            timestamp,
        };
        let claims_bytes = serde_json::to_vec(&claims)
            .map_err(|e| AttestationError::Unavailable(e.to_string()))?;
        let signature = signing_key.sign(&claims_bytes);

        serde_json::to_vec(&MockEvidence {
            claims,
            signature: hex::encode(signature.to_bytes()),
        })
        .map_err(|e| AttestationError::Unavailable(e.to_string()))
    }

    fn verify(
        &self,
        challenge: &[u8],
        evidence: &[u8],
    ) -> Result<AttestationResult, AttestationError> {
        let doc: MockEvidence = serde_json::from_slice(evidence)
            .map_err(|e| AttestationError::MalformedEvidence(e.to_string()))?;
        let claims = &doc.claims;

        if claims.tee_type != MOCK_TEE_TYPE {
            return Err(AttestationError::UnsupportedTeeType(claims.tee_type.clone()));
        }

        let public_key = hex::decode(&claims.public_key)
            .map_err(|e| AttestationError::MalformedEvidence(format!("public_key: {e}")))?;
        if public_key.as_slice() != self.trusted_key.as_bytes() {
            return Err(AttestationError::UntrustedKey);
        }

        let sig_bytes: [u8; 64] = hex::decode(&doc.signature)
            .map_err(|e| AttestationError::MalformedEvidence(format!("signature: {e}")))?
            .try_into()
            .map_err(|_| AttestationError::MalformedEvidence("署名長が不正".to_string()))?;
        let claims_bytes = serde_json::to_vec(claims)
            .map_err(|e| AttestationError::MalformedEvidence(e.to_string()))?;
        self.trusted_key
            .verify(&claims_bytes, &Signature::from_bytes(&sig_bytes))
            .map_err(|_| AttestationError::SignatureVerificationFailed)?;

        let report_data = hex::decode(&claims.report_data)
            .map_err(|e| AttestationError::MalformedEvidence(format!("report_data: {e}")))?;
        if report_data != crate::sha256(challenge) {
            return Err(AttestationError::ChallengeMismatch);
        }

        let measurement = hex::decode(&claims.measurement)
            .map_err(|e| AttestationError::MalformedEvidence(format!("measurement: {e}")))?;
        let mut measurements = BTreeMap::new();
        measurements.insert(MEASUREMENT_KEY.to_string(), measurement);

        let result = AttestationResult {
            tee_type: claims.tee_type.clone(),
            measurements,
            public_key: Some(public_key),
            user_data: Some(report_data),
            timestamp: Some(claims.timestamp),
        };

        let mut expected = BTreeMap::new();
        expected.insert(MEASUREMENT_KEY.to_string(), self.measurement.clone());
        if !verify_measurements(&result, &expected) {
            return Err(AttestationError::MeasurementMismatch(
                claims.measurement.clone(),
            ));
        }

        Ok(result)
    }
}
