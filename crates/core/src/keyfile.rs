//! # 鍵ファイル
//!
//! PKGのマスター鍵（[`MasterKeyFile`]）とクライアントの復号鍵
//! （[`StoredKeyFile`]）をJSONファイル形式と相互変換する。
//! 読み込み時は鍵と公開パラメータの整合を必ず検証する。
//! 暗号化に使う公開パラメータはどちらのファイルからも取り出せる。

use std::path::Path;

use aibe_crypto::aibe::{AibeError, DecryptionKey, MasterKey, MasterSecret, PublicParams};
use aibe_types::{MasterKeyFile, StoredKeyFile};
use base64::Engine;

use crate::b64;

/// 鍵ファイルのエラー型。
#[derive(Debug, thiserror::Error)]
pub enum KeyFileError {
    #[error("ファイルの読み書きに失敗: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSONが不正です: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{field} のBase64デコードに失敗: {source}")]
    Base64 {
        field: &'static str,
        source: base64::DecodeError,
    },
    #[error("{0}")]
    Key(#[from] AibeError),
    /// 復号鍵が記録されたIDと公開パラメータに対して無効
    #[error("復号鍵が ID {0} に対して無効です")]
    InvalidKey(String),
}

fn decode(field: &'static str, value: &str) -> Result<Vec<u8>, KeyFileError> {
    b64()
        .decode(value)
        .map_err(|source| KeyFileError::Base64 { field, source })
}

/// マスター鍵をファイル形式に変換する。
pub fn master_key_to_file(master: &MasterKey) -> MasterKeyFile {
    MasterKeyFile {
        public_params: b64().encode(master.params().to_bytes()),
        master_secret: b64().encode(master.secret().to_bytes()),
    }
}

/// ファイル形式からマスター鍵を復元する。
pub fn master_key_from_file(file: &MasterKeyFile) -> Result<MasterKey, KeyFileError> {
    let params = PublicParams::from_bytes(&decode("public_params", &file.public_params)?)?;
    let secret = MasterSecret::from_bytes(&decode("master_secret", &file.master_secret)?)?;
    Ok(MasterKey::from_parts(params, secret)?)
}

/// マスター鍵をJSONファイルに書き出す。
pub fn write_master_key(path: &Path, master: &MasterKey) -> Result<(), KeyFileError> {
    let json = serde_json::to_string_pretty(&master_key_to_file(master))?;
    std::fs::write(path, json)?;
    Ok(())
}

/// JSONファイルからマスター鍵を読み込む。
pub fn read_master_key(path: &Path) -> Result<MasterKey, KeyFileError> {
    let file: MasterKeyFile = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    master_key_from_file(&file)
}

/// `public_params` だけを読むためのビュー
#[derive(serde::Deserialize)]
struct PublicParamsView {
    public_params: String,
}

/// マスター鍵ファイル・復号鍵ファイルのどちらからでも公開パラメータを読み込む。
pub fn read_public_params(path: &Path) -> Result<PublicParams, KeyFileError> {
    let view: PublicParamsView = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    Ok(PublicParams::from_bytes(&decode("public_params", &view.public_params)?)?)
}

/// クライアントが保持する復号鍵。
#[derive(Debug, Clone)]
pub struct StoredKey {
    pub identity: String,
    pub key: DecryptionKey,
    pub params: PublicParams,
}

impl StoredKey {
    pub fn to_file(&self) -> StoredKeyFile {
        StoredKeyFile {
            identity: self.identity.clone(),
            decryption_key: b64().encode(self.key.to_bytes()),
            public_params: b64().encode(self.params.to_bytes()),
        }
    }

    /// ファイル形式から復元する。鍵がIDに対して有効でなければエラー。
    pub fn from_file(file: &StoredKeyFile) -> Result<Self, KeyFileError> {
        let key = DecryptionKey::from_bytes(&decode("decryption_key", &file.decryption_key)?)?;
        let params = PublicParams::from_bytes(&decode("public_params", &file.public_params)?)?;
        if !key.is_valid_for(&params, &file.identity) {
            return Err(KeyFileError::InvalidKey(file.identity.clone()));
        }
        Ok(Self {
            identity: file.identity.clone(),
            key,
            params,
        })
    }

    pub fn write(&self, path: &Path) -> Result<(), KeyFileError> {
        std::fs::write(path, serde_json::to_string_pretty(&self.to_file())?)?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, KeyFileError> {
        let file: StoredKeyFile = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        Self::from_file(&file)
    }
}
