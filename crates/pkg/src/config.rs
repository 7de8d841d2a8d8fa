//! # PKG設定
//!
//! 環境変数から起動設定を組み立てる。
//!
//! | 変数 | 既定値 |
//! |------|--------|
//! | `LISTEN_ADDR` | `0.0.0.0:12333` |
//! | `MASTER_KEY_PATH` | 未設定（起動ごとに生成） |
//! | `MOCK_MODE` | `false` |
//! | `ATTESTATION_PUBKEY` | 未設定（`MOCK_MODE` 以外では必須） |
//! | `EXPECTED_MEASUREMENT` | 全ゼロ48バイト |
//! | `PKG_SIGNING_KEY` | 未設定（ランダム生成） |
//! | `SESSION_TIMEOUT_SECS` | `30` |

use std::path::PathBuf;
use std::time::Duration;

use aibe_crypto::attestation::mock::{MockAttestor, MEASUREMENT_LEN};
use aibe_crypto::{Ed25519SigningKey, Ed25519VerifyingKey};

use crate::error::PkgError;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:12333";
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 30;

/// PKGの起動設定。
pub struct PkgConfig {
    pub listen_addr: String,
    /// マスター鍵ファイルのパス
    pub master_key_path: Option<PathBuf>,
    /// 開発用モックAttestorの固定鍵を信頼する
    pub mock_mode: bool,
    /// Evidence署名鍵として信頼する公開鍵
    pub attestation_pubkey: Option<Ed25519VerifyingKey>,
    /// Evidenceが持つべき測定値
    pub expected_measurement: Vec<u8>,
    /// CHALLENGE署名鍵
    pub signing_key: Option<Ed25519SigningKey>,
    /// 1メッセージあたりの受信待ち時間
    pub session_timeout: Duration,
}

impl PkgConfig {
    /// プロセスの環境変数から読み込む。
    pub fn from_env() -> Result<Self, PkgError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 任意の検索関数から読み込む。
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PkgError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr =
            lookup("LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let master_key_path = lookup("MASTER_KEY_PATH").map(PathBuf::from);
        let mock_mode = lookup("MOCK_MODE").unwrap_or_default() == "true";

        let attestation_pubkey = lookup("ATTESTATION_PUBKEY")
            .map(|hex_key| {
                let bytes = decode_hex_array::<32>("ATTESTATION_PUBKEY", &hex_key)?;
                Ed25519VerifyingKey::from_bytes(&bytes).map_err(|_| {
                    PkgError::Config("ATTESTATION_PUBKEYが有効なEd25519公開鍵ではありません".into())
                })
            })
            .transpose()?;
        if !mock_mode && attestation_pubkey.is_none() {
            return Err(PkgError::Config(
                "MOCK_MODE=true でない場合はATTESTATION_PUBKEYが必要です".into(),
            ));
        }

        let expected_measurement = match lookup("EXPECTED_MEASUREMENT") {
            Some(hex_value) => {
                decode_hex_array::<MEASUREMENT_LEN>("EXPECTED_MEASUREMENT", &hex_value)?.to_vec()
            }
            None => vec![0u8; MEASUREMENT_LEN],
        };

        let signing_key = lookup("PKG_SIGNING_KEY")
            .map(|hex_seed| {
                decode_hex_array::<32>("PKG_SIGNING_KEY", &hex_seed)
                    .map(|seed| Ed25519SigningKey::from_bytes(&seed))
            })
            .transpose()?;

        let session_timeout = match lookup("SESSION_TIMEOUT_SECS") {
            Some(secs) => {
                let secs: u64 = secs.parse().map_err(|_| {
                    PkgError::Config(format!("SESSION_TIMEOUT_SECSが数値ではありません: {secs}"))
                })?;
                if secs == 0 {
                    return Err(PkgError::Config("SESSION_TIMEOUT_SECSは1以上です".into()));
                }
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(DEFAULT_SESSION_TIMEOUT_SECS),
        };

        Ok(Self {
            listen_addr,
            master_key_path,
            mock_mode,
            attestation_pubkey,
            expected_measurement,
            signing_key,
            session_timeout,
        })
    }

    /// Evidence検証に使うAttestorを構築する。
    ///
    /// `ATTESTATION_PUBKEY` が設定されていればモックモードでもそちらを優先する。
    pub fn attestor(&self) -> MockAttestor {
        match &self.attestation_pubkey {
            Some(key) => MockAttestor::verifier(*key, self.expected_measurement.clone()),
            None => {
                tracing::warn!("開発用Attestor鍵を信頼します（MOCK_MODE）");
                MockAttestor::verifier(
                    MockAttestor::development().public_key(),
                    self.expected_measurement.clone(),
                )
            }
        }
    }
}

fn decode_hex_array<const N: usize>(name: &str, value: &str) -> Result<[u8; N], PkgError> {
    let bytes = hex::decode(value.trim())
        .map_err(|e| PkgError::Config(format!("{name}が16進数ではありません: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| PkgError::Config(format!("{name}は{N}バイトの16進数である必要があります")))
}
