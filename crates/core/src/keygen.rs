//! # KEYGEN ボディ
//!
//! 封印されるラウンド1の平文:
//!
//! ```text
//! id_len: u16 BE | identity: id_len bytes (UTF-8) | R: 48 | Hz: 48
//! ```
//!
//! ラウンド2の平文は [`PartialKey::to_bytes`] の128バイト固定長。

use aibe_crypto::aibe::{BlindRequest, PartialKey, BLIND_REQUEST_LEN, MAX_IDENTITY_LEN};

use crate::error::ProtocolError;

/// ラウンド1の要求。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeygenRequest {
    pub identity: String,
    pub blind: BlindRequest,
}

/// IDの形式を検証する（空でなく、上限以下）。
pub fn validate_identity(identity: &str) -> Result<(), ProtocolError> {
    if identity.is_empty() {
        return Err(ProtocolError::Malformed("IDが空です".to_string()));
    }
    if identity.len() > MAX_IDENTITY_LEN {
        return Err(ProtocolError::Malformed(format!(
            "IDが長すぎます: {} bytes (上限: {MAX_IDENTITY_LEN} bytes)",
            identity.len()
        )));
    }
    Ok(())
}

impl KeygenRequest {
    pub fn to_bytes(&self) -> Vec<u8> {
        let id = self.identity.as_bytes();
        let mut out = Vec::with_capacity(2 + id.len() + BLIND_REQUEST_LEN);
        out.extend_from_slice(&(id.len() as u16).to_be_bytes());
        out.extend_from_slice(id);
        out.extend_from_slice(&self.blind.to_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (len_bytes, rest) = bytes
            .split_first_chunk::<2>()
            .ok_or_else(|| ProtocolError::Malformed("KEYGENボディが短すぎます".to_string()))?;
        let id_len = u16::from_be_bytes(*len_bytes) as usize;
        if rest.len() != id_len + BLIND_REQUEST_LEN {
            return Err(ProtocolError::Malformed(format!(
                "KEYGENボディ長が不正です: {} bytes",
                bytes.len()
            )));
        }
        let (id, blind) = rest.split_at(id_len);
        let identity = std::str::from_utf8(id)
            .map_err(|_| ProtocolError::Malformed("IDがUTF-8ではありません".to_string()))?
            .to_string();
        validate_identity(&identity)?;
        let blind = BlindRequest::from_bytes(blind)
            .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        Ok(Self { identity, blind })
    }
}

/// ラウンド2の平文を復元する。
pub fn partial_key_from_bytes(bytes: &[u8]) -> Result<PartialKey, ProtocolError> {
    PartialKey::from_bytes(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))
}
