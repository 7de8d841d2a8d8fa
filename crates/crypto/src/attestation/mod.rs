//! # Attestation Evidence 生成・検証
//!
//! エンクレーブ内クライアントがチャレンジに対してEvidenceを生成し、
//! PKGがそれを検証するためのインターフェースを提供する。
//! 各TEE実装はサブモジュールとして配置される。
//!
//! ## 対応TEE種別
//!
//! | `tee_type` | サブモジュール | Evidence形式 | 測定値 |
//! |------------|--------------|-------------|--------|
//! | `mock` | [`mock`] | Ed25519署名付きJSON | MEASUREMENT (48バイト) |

pub mod mock;

use std::collections::BTreeMap;

/// Evidence生成・検証のエラー型。
/// 全TEE種別で共通。
#[derive(Debug, thiserror::Error)]
pub enum AttestationError {
    /// 下位のエンクレーブ呼び出しが一時的にビジー（リトライ可能）
    #[error("Attestorが一時的にビジーです")]
    Busy,
    /// Evidenceを生成できない（署名鍵を持たない検証専用Attestorなど）
    #[error("Evidenceを生成できません: {0}")]
    Unavailable(String),
    /// Evidenceのパースに失敗
    #[error("Evidenceのパースに失敗: {0}")]
    MalformedEvidence(String),
    /// 署名検証に失敗
    #[error("Evidenceの署名検証に失敗")]
    SignatureVerificationFailed,
    /// 測定値が期待値と一致しない
    #[error("測定値が期待値と一致しません: {0}")]
    MeasurementMismatch(String),
    /// Evidenceがこのチャレンジにバインドされていない
    #[error("Evidenceのreport_dataがチャレンジと一致しません")]
    ChallengeMismatch,
    /// 信頼されていない鍵で署名されている
    #[error("Evidenceの署名鍵が信頼されていません")]
    UntrustedKey,
    /// TEE種別が一致しない
    #[error("未対応のTEE種別: {0}")]
    UnsupportedTeeType(String),
}

impl AttestationError {
    /// リトライで回復し得るエラーか。
    pub fn is_transient(&self) -> bool {
        matches!(self, AttestationError::Busy)
    }
}

/// TEE種別に依存しないEvidence検証結果。
#[derive(Debug, Clone)]
pub struct AttestationResult {
    /// TEE種別（`"mock"` など）
    pub tee_type: String,
    /// 測定値マップ（TEE種別ごとにキー名が異なる）
    ///
    /// - mock: `"MEASUREMENT"` (48バイト)
    pub measurements: BTreeMap<String, Vec<u8>>,
    /// Evidenceに署名した公開鍵
    pub public_key: Option<Vec<u8>>,
    /// Evidenceに含まれるユーザーデータ（チャレンジのSHA-256）
    pub user_data: Option<Vec<u8>>,
    /// Evidence生成時のタイムスタンプ（Unix ms、取得可能な場合のみ）
    pub timestamp: Option<u64>,
}

/// Evidenceの生成と検証を行うAttestor。
///
/// クライアント側は [`Attestor::produce_evidence`] を、PKG側は
/// [`Attestor::verify`] を使う。チャレンジはハンドシェイクのバインディング値。
pub trait Attestor: Send + Sync {
    /// TEE種別を返す（EVIDENCEボディの`tee_type`フィールドに使用）。
    fn tee_type(&self) -> &str;

    /// チャレンジに対するEvidenceを生成する。
    ///
    /// エンクレーブが一時的にビジーの場合は [`AttestationError::Busy`] を返す。
    fn produce_evidence(&self, challenge: &[u8]) -> Result<Vec<u8>, AttestationError>;

    /// Evidenceがこのチャレンジに対して有効か検証する。
    fn verify(&self, challenge: &[u8], evidence: &[u8])
        -> Result<AttestationResult, AttestationError>;
}

/// 測定値が期待値と一致するか確認する。
///
/// `expected_measurements` の全キーが結果に存在し、値が一致する場合のみ `true`。
pub fn verify_measurements(
    result: &AttestationResult,
    expected_measurements: &BTreeMap<String, Vec<u8>>,
) -> bool {
    expected_measurements.iter().all(|(key, expected)| {
        result
            .measurements
            .get(key)
            .map_or(false, |actual| actual == expected)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(measurement: Vec<u8>) -> AttestationResult {
        let mut measurements = BTreeMap::new();
        measurements.insert("MEASUREMENT".to_string(), measurement);
        AttestationResult {
            tee_type: "mock".to_string(),
            measurements,
            public_key: None,
            user_data: None,
            timestamp: None,
        }
    }

    #[test]
    fn test_verify_measurements() {
        let result = result_with(vec![0u8; 48]);
        let mut expected = BTreeMap::new();
        expected.insert("MEASUREMENT".to_string(), vec![0u8; 48]);
        assert!(verify_measurements(&result, &expected));

        expected.insert("MEASUREMENT".to_string(), vec![1u8; 48]);
        assert!(!verify_measurements(&result, &expected));
    }

    /// 期待値にあるキーが結果に無ければ不一致
    #[test]
    fn test_verify_measurements_missing_key() {
        let result = result_with(vec![0u8; 48]);
        let mut expected = BTreeMap::new();
        expected.insert("PCR0".to_string(), vec![0u8; 48]);
        assert!(!verify_measurements(&result, &expected));
    }

    #[test]
    fn test_only_busy_is_transient() {
        assert!(AttestationError::Busy.is_transient());
        assert!(!AttestationError::ChallengeMismatch.is_transient());
    }
}
