//! # A-IBE PKG 暗号処理
//!
//! ハンドシェイク・セキュアチャネル・ブラインド鍵発行で使用する暗号処理を実装する。
//!
//! ## 暗号アルゴリズム
//! | 用途 | アルゴリズム |
//! |------|------------|
//! | 鍵交換 | X25519 ECDH |
//! | 鍵導出 | HKDF-SHA256 |
//! | 対称暗号 | AES-256-GCM |
//! | 鍵確認 | HMAC-SHA256 |
//! | 署名 | Ed25519 |
//! | ハッシュ | SHA-256 |
//! | IBE鍵 | BLS12-381 ペアリング（[`aibe`]） |

pub mod aibe;
pub mod attestation;
pub mod proof;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use ed25519_dalek::{Signer, Verifier};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519StaticSecret};

pub use ed25519_dalek::{
    Signature as Ed25519Signature, SigningKey as Ed25519SigningKey,
    VerifyingKey as Ed25519VerifyingKey,
};
pub use x25519_dalek::{PublicKey, StaticSecret};

/// 暗号処理のエラー型
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// ECDH鍵交換エラー（非寄与的な公開鍵）
    #[error("ECDH鍵交換に失敗しました")]
    EcdhError,
    /// HKDF鍵導出エラー
    #[error("HKDF鍵導出に失敗しました: {0}")]
    HkdfError(String),
    /// AES-GCM暗号化エラー
    #[error("AES-GCM暗号化に失敗しました")]
    EncryptError,
    /// AES-GCM復号エラー
    #[error("AES-GCM復号に失敗しました")]
    DecryptError,
    /// Ed25519署名検証エラー
    #[error("Ed25519署名検証に失敗しました")]
    SignatureVerifyError,
    /// HMAC検証エラー
    #[error("MAC検証に失敗しました")]
    MacVerifyError,
}

/// 対称鍵（AES-256用、32バイト）
pub type SymmetricKey = [u8; 32];

/// AES-GCMのタグ長
pub const AES_GCM_TAG_LEN: usize = 16;

/// AES-GCMのノンス長
pub const AES_GCM_NONCE_LEN: usize = 12;

/// HKDFのinfoラベル（クライアント→サーバー方向）
const LABEL_CLIENT_TO_SERVER: &[u8] = b"aibe-pkg session c2s";

/// HKDFのinfoラベル（サーバー→クライアント方向）
const LABEL_SERVER_TO_CLIENT: &[u8] = b"aibe-pkg session s2c";

/// X25519 ECDHによる共有秘密の導出。
///
/// 相手の公開鍵が低位数点などで共有秘密が全ゼロになる場合はエラー。
pub fn ecdh_derive_shared_secret(
    secret_key: &X25519StaticSecret,
    public_key: &X25519PublicKey,
) -> Result<[u8; 32], CryptoError> {
    let shared = secret_key.diffie_hellman(public_key);
    if !shared.was_contributory() {
        return Err(CryptoError::EcdhError);
    }
    Ok(*shared.as_bytes())
}

/// HKDF-SHA256で方向別のセッション鍵ペアを導出する。
///
/// 戻り値は `(client→server鍵, server→client鍵)`。
pub fn hkdf_derive_session_keys(
    shared_secret: &[u8; 32],
    salt: &[u8],
) -> Result<(SymmetricKey, SymmetricKey), CryptoError> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), shared_secret);
    let mut c2s = [0u8; 32];
    let mut s2c = [0u8; 32];
    hkdf.expand(LABEL_CLIENT_TO_SERVER, &mut c2s)
        .map_err(|e| CryptoError::HkdfError(e.to_string()))?;
    hkdf.expand(LABEL_SERVER_TO_CLIENT, &mut s2c)
        .map_err(|e| CryptoError::HkdfError(e.to_string()))?;
    Ok((c2s, s2c))
}

/// AES-256-GCMによる暗号化。戻り値は `ciphertext || tag`。
pub fn aes_gcm_encrypt(
    key: &SymmetricKey,
    nonce: &[u8; AES_GCM_NONCE_LEN],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::EncryptError)?;
    let nonce = Nonce::from_slice(nonce);
    cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::EncryptError)
}

/// AES-256-GCMによる復号。
///
/// タグ比較は定数時間で行われ、不一致の場合は平文を一切返さない。
pub fn aes_gcm_decrypt(
    key: &SymmetricKey,
    nonce: &[u8; AES_GCM_NONCE_LEN],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::DecryptError)?;
    let nonce = Nonce::from_slice(nonce);
    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::DecryptError)
}

/// HMAC-SHA256を計算する。
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32], CryptoError> {
    let mut mac =
        <Hmac<Sha256> as Mac>::new_from_slice(key).map_err(|_| CryptoError::MacVerifyError)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// HMAC-SHA256を定数時間で検証する。
pub fn hmac_sha256_verify(key: &[u8], data: &[u8], tag: &[u8]) -> Result<(), CryptoError> {
    let mut mac =
        <Hmac<Sha256> as Mac>::new_from_slice(key).map_err(|_| CryptoError::MacVerifyError)?;
    mac.update(data);
    mac.verify_slice(tag).map_err(|_| CryptoError::MacVerifyError)
}

/// Ed25519による署名。
pub fn ed25519_sign(signing_key: &Ed25519SigningKey, message: &[u8]) -> Ed25519Signature {
    signing_key.sign(message)
}

/// Ed25519による署名検証。
pub fn ed25519_verify(
    verifying_key: &Ed25519VerifyingKey,
    message: &[u8],
    signature: &Ed25519Signature,
) -> Result<(), CryptoError> {
    verifying_key
        .verify(message, signature)
        .map_err(|_| CryptoError::SignatureVerifyError)
}

/// SHA-256ハッシュ計算。
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// 複数パートを長さ付きで連結してSHA-256を計算する。
/// パートの境界をずらした衝突を防ぐ。
pub fn sha256_parts(label: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update((label.len() as u32).to_be_bytes());
    hasher.update(label);
    for part in parts {
        hasher.update((part.len() as u32).to_be_bytes());
        hasher.update(part);
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&hasher.finalize());
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 双方のECDHで同じ共有秘密が得られること
    #[test]
    fn test_ecdh_key_agreement() {
        let a = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let b = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let shared_a = ecdh_derive_shared_secret(&a, &PublicKey::from(&b)).unwrap();
        let shared_b = ecdh_derive_shared_secret(&b, &PublicKey::from(&a)).unwrap();
        assert_eq!(shared_a, shared_b);
    }

    /// 全ゼロ公開鍵（非寄与的）は拒否されること
    #[test]
    fn test_ecdh_rejects_low_order_point() {
        let a = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let zero = PublicKey::from([0u8; 32]);
        assert!(matches!(
            ecdh_derive_shared_secret(&a, &zero),
            Err(CryptoError::EcdhError)
        ));
    }

    /// 方向別の鍵が異なり、saltが変われば鍵も変わること
    #[test]
    fn test_session_keys_are_directional() {
        let shared = [7u8; 32];
        let (c2s, s2c) = hkdf_derive_session_keys(&shared, b"salt-1").unwrap();
        assert_ne!(c2s, s2c);
        let (c2s_2, _) = hkdf_derive_session_keys(&shared, b"salt-2").unwrap();
        assert_ne!(c2s, c2s_2);
        let (c2s_again, s2c_again) = hkdf_derive_session_keys(&shared, b"salt-1").unwrap();
        assert_eq!((c2s, s2c), (c2s_again, s2c_again));
    }

    /// AES-GCMの暗号化・復号とAAD不一致の検出
    #[test]
    fn test_aes_gcm_with_aad() {
        let key = [3u8; 32];
        let nonce = [9u8; 12];
        let ct = aes_gcm_encrypt(&key, &nonce, b"KEYGEN", b"payload").unwrap();
        assert_eq!(ct.len(), b"payload".len() + AES_GCM_TAG_LEN);
        assert_eq!(
            aes_gcm_decrypt(&key, &nonce, b"KEYGEN", &ct).unwrap(),
            b"payload"
        );
        assert!(aes_gcm_decrypt(&key, &nonce, b"KEYREQ", &ct).is_err());
        assert!(aes_gcm_decrypt(&[4u8; 32], &nonce, b"KEYGEN", &ct).is_err());
    }

    /// HMACの検証
    #[test]
    fn test_hmac_verify() {
        let tag = hmac_sha256(b"key", b"data").unwrap();
        assert!(hmac_sha256_verify(b"key", b"data", &tag).is_ok());
        assert!(hmac_sha256_verify(b"key", b"datA", &tag).is_err());
        assert!(hmac_sha256_verify(b"key", b"data", &tag[..31]).is_err());
    }

    /// 署名→検証のラウンドトリップ
    #[test]
    fn test_ed25519_sign_verify() {
        let key = Ed25519SigningKey::generate(&mut rand::rngs::OsRng);
        let sig = ed25519_sign(&key, b"transcript");
        assert!(ed25519_verify(&key.verifying_key(), b"transcript", &sig).is_ok());
        assert!(ed25519_verify(&key.verifying_key(), b"other", &sig).is_err());
    }

    /// パート境界が異なれば別のハッシュになること
    #[test]
    fn test_sha256_parts_boundaries() {
        let a = sha256_parts(b"l", &[&b"ab"[..], &b"c"[..]]);
        let b = sha256_parts(b"l", &[&b"a"[..], &b"bc"[..]]);
        assert_ne!(a, b);
        assert_eq!(a, sha256_parts(b"l", &[&b"ab"[..], &b"c"[..]]));
    }
}
