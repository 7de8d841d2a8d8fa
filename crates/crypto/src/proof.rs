//! # 鍵要求用の所持証明
//!
//! KEYREQで提出される証明。提出者が公開パラメータ `mpk` の下で
//! `identity` に発行された復号鍵 `(d1, d2)` を持つことを、鍵を明かさずに示す。
//!
//! ## 関係式
//!
//! ```text
//! Q = g2^(α-id)
//! e(d2, Q) · e(g, g2)^d1 = e(h, g2)
//! ```
//!
//! `d1 ∈ Zp` と `d2 ∈ G1` を同時に隠すSchnorr型証明をFiat-Shamir変換したもの。
//!
//! ```text
//! 証明者: k1 ← Zp, K2 = g^k2
//!         T  = e(K2, Q) · e(g, g2)^k1
//!         c  = H(mpk ‖ identity ‖ T)
//!         s1 = k1 + c·d1,  S2 = K2 · d2^c
//! 検証者: T' = e(S2, Q) · e(g, g2)^s1 · e(h, g2)^-c
//!         c == H(mpk ‖ identity ‖ T')
//! ```
//!
//! ## ワイヤ形式
//!
//! ```text
//! id_len: u16 BE | identity: id_len bytes | c: 32 | s1: 32 | S2: 48
//! ```

use bls12_381::{pairing, G1Affine, G1Projective, Gt, Scalar};
use ff::Field;
use rand::rngs::OsRng;
use sha2::{Digest, Sha512};

use crate::aibe::{
    gt_bytes, identity_scalar, DecryptionKey, PublicParams, G1_LEN, MAX_IDENTITY_LEN, SCALAR_LEN,
};

/// Fiat-Shamirチャレンジのドメイン分離ラベル
const CHALLENGE_LABEL: &[u8] = b"aibe-keyreq-v2";

/// 証明の生成・デシリアライズエラー
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProofError {
    /// 長さが不正
    #[error("証明の長さが不正です: {0}")]
    Length(&'static str),
    /// IDが空・UTF-8でない・長すぎる
    #[error("証明のIDが不正です")]
    Identity,
    /// 群要素・スカラーが不正
    #[error("証明の要素が不正です: {0}")]
    Element(&'static str),
}

/// 鍵要求ゲートが扱う証明。
pub trait Proof: Sized {
    /// ワイヤ表現から証明を復元する。
    fn deserialize(bytes: &[u8]) -> Result<Self, ProofError>;

    /// PKGの公開パラメータの下で証明が正しいか検証する。
    fn verify(&self, params: &PublicParams) -> bool;
}

/// 復号鍵の所持証明。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KnowledgeProof {
    identity: String,
    challenge: Scalar,
    s1: Scalar,
    s2: G1Affine,
}

fn check_identity(identity: &str) -> Result<(), ProofError> {
    if identity.is_empty() || identity.len() > MAX_IDENTITY_LEN {
        return Err(ProofError::Identity);
    }
    Ok(())
}

fn challenge(params: &PublicParams, identity: &str, commitment: &Gt) -> Scalar {
    let mut hasher = Sha512::new();
    hasher.update(CHALLENGE_LABEL);
    hasher.update(params.to_bytes());
    hasher.update((identity.len() as u16).to_be_bytes());
    hasher.update(identity.as_bytes());
    hasher.update(gt_bytes(commitment));
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&hasher.finalize());
    Scalar::from_bytes_wide(&wide)
}

impl KnowledgeProof {
    /// 保持している復号鍵から所持証明を作る。
    pub fn for_key(
        params: &PublicParams,
        identity: &str,
        key: &DecryptionKey,
    ) -> Result<Self, ProofError> {
        check_identity(identity)?;
        let q = params.identity_base(&identity_scalar(identity));

        let k1 = Scalar::random(OsRng);
        let k2 = G1Affine::from(params.g() * Scalar::random(OsRng));
        let commitment = pairing(&k2, &q) + params.e_g_g2() * k1;
        let c = challenge(params, identity, &commitment);

        Ok(Self {
            identity: identity.to_string(),
            challenge: c,
            s1: k1 + c * key.d1_scalar(),
            s2: G1Affine::from(G1Projective::from(k2) + key.d2_point() * c),
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let id = self.identity.as_bytes();
        let mut out = Vec::with_capacity(2 + id.len() + 2 * SCALAR_LEN + G1_LEN);
        // for_key / deserialize で MAX_IDENTITY_LEN 以下が保証されている
        out.extend_from_slice(&(id.len() as u16).to_be_bytes());
        out.extend_from_slice(id);
        out.extend_from_slice(&self.challenge.to_bytes());
        out.extend_from_slice(&self.s1.to_bytes());
        out.extend_from_slice(&self.s2.to_compressed());
        out
    }
}

impl Proof for KnowledgeProof {
    fn deserialize(bytes: &[u8]) -> Result<Self, ProofError> {
        let (len_bytes, rest) = bytes
            .split_first_chunk::<2>()
            .ok_or(ProofError::Length("ID長"))?;
        let id_len = u16::from_be_bytes(*len_bytes) as usize;
        if id_len > MAX_IDENTITY_LEN {
            return Err(ProofError::Identity);
        }
        if rest.len() != id_len + 2 * SCALAR_LEN + G1_LEN {
            return Err(ProofError::Length("本体"));
        }
        let (id, rest) = rest.split_at(id_len);
        let identity = std::str::from_utf8(id)
            .map_err(|_| ProofError::Identity)?
            .to_string();
        check_identity(&identity)?;

        let (c, rest) = rest.split_at(SCALAR_LEN);
        let (s1, s2) = rest.split_at(SCALAR_LEN);
        let scalar = |b: &[u8], what| -> Result<Scalar, ProofError> {
            let arr: &[u8; SCALAR_LEN] = b.try_into().map_err(|_| ProofError::Element(what))?;
            Option::from(Scalar::from_bytes(arr)).ok_or(ProofError::Element(what))
        };
        let s2: &[u8; G1_LEN] = s2.try_into().map_err(|_| ProofError::Element("S2"))?;

        Ok(Self {
            identity,
            challenge: scalar(c, "c")?,
            s1: scalar(s1, "s1")?,
            s2: Option::from(G1Affine::from_compressed(s2)).ok_or(ProofError::Element("S2"))?,
        })
    }

    fn verify(&self, params: &PublicParams) -> bool {
        let q = params.identity_base(&identity_scalar(&self.identity));
        let commitment = pairing(&self.s2, &q) + params.e_g_g2() * self.s1
            - params.e_h_g2() * self.challenge;
        challenge(params, &self.identity, &commitment) == self.challenge
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aibe::{Aibe, KeyIssuanceScheme, MasterKey};

    const ALICE: &str = "alice@example.com";

    fn issue(master: &MasterKey, identity: &str) -> DecryptionKey {
        let (request, secret) = Aibe.blind(master.params(), identity).unwrap();
        let partial = Aibe.issue_partial(master, identity, &request).unwrap();
        Aibe.unblind(master.params(), identity, secret, &partial)
            .unwrap()
    }

    #[test]
    fn test_valid_proof_verifies() {
        let master = MasterKey::generate();
        let key = issue(&master, ALICE);
        let proof = KnowledgeProof::for_key(master.params(), ALICE, &key).unwrap();
        let decoded = KnowledgeProof::deserialize(&proof.to_bytes()).unwrap();
        assert_eq!(decoded, proof);
        assert!(decoded.verify(master.params()));
        assert_eq!(decoded.identity(), ALICE);
    }

    /// 別のマスター鍵で発行された鍵の証明は通らない
    #[test]
    fn test_key_from_other_master_rejected() {
        let master = MasterKey::generate();
        let other = MasterKey::generate();
        let key = issue(&other, ALICE);
        let proof = KnowledgeProof::for_key(other.params(), ALICE, &key).unwrap();
        assert!(proof.verify(other.params()));
        assert!(!proof.verify(master.params()));

        let relabelled = KnowledgeProof::for_key(master.params(), ALICE, &key).unwrap();
        assert!(!relabelled.verify(master.params()));
    }

    /// 発行されていない鍵（適当な値）からの証明は通らない
    #[test]
    fn test_keyless_proof_rejected() {
        let master = MasterKey::generate();
        let mut bytes = [0u8; crate::aibe::KEY_LEN];
        bytes[..SCALAR_LEN].copy_from_slice(&Scalar::from(42u64).to_bytes());
        bytes[SCALAR_LEN..SCALAR_LEN + G1_LEN].copy_from_slice(&G1Affine::generator().to_compressed());
        bytes[SCALAR_LEN + G1_LEN..].copy_from_slice(&G1Affine::generator().to_compressed());
        let fake = DecryptionKey::from_bytes(&bytes).unwrap();

        let proof = KnowledgeProof::for_key(master.params(), "mallory@example.com", &fake).unwrap();
        assert!(!proof.verify(master.params()));
    }

    /// IDはチャレンジに束縛されている
    #[test]
    fn test_identity_is_bound() {
        let master = MasterKey::generate();
        let key = issue(&master, ALICE);
        let mut proof = KnowledgeProof::for_key(master.params(), ALICE, &key).unwrap();
        proof.identity = "bob@example.com".to_string();
        assert!(!proof.verify(master.params()));

        let bob_proof = KnowledgeProof::for_key(master.params(), "bob@example.com", &key).unwrap();
        assert!(!bob_proof.verify(master.params()));
    }

    #[test]
    fn test_forged_response_rejected() {
        let master = MasterKey::generate();
        let key = issue(&master, ALICE);
        let mut proof = KnowledgeProof::for_key(master.params(), ALICE, &key).unwrap();
        proof.s1 += Scalar::ONE;
        assert!(!proof.verify(master.params()));
    }

    #[test]
    fn test_identity_length_checked() {
        let master = MasterKey::generate();
        let key = issue(&master, ALICE);
        let long = "a".repeat(MAX_IDENTITY_LEN + 1);
        assert_eq!(
            KnowledgeProof::for_key(master.params(), &long, &key),
            Err(ProofError::Identity)
        );
        assert_eq!(
            KnowledgeProof::for_key(master.params(), "", &key),
            Err(ProofError::Identity)
        );
    }

    #[test]
    fn test_deserialize_rejects_malformed() {
        assert_eq!(
            KnowledgeProof::deserialize(&[]),
            Err(ProofError::Length("ID長"))
        );
        let master = MasterKey::generate();
        let key = issue(&master, "a");
        let bytes = KnowledgeProof::for_key(master.params(), "a", &key)
            .unwrap()
            .to_bytes();
        assert!(KnowledgeProof::deserialize(&bytes[..bytes.len() - 1]).is_err());

        let mut bad_point = bytes.clone();
        let len = bad_point.len();
        bad_point[len - G1_LEN..].fill(0xff);
        assert!(KnowledgeProof::deserialize(&bad_point).is_err());

        let mut long_id = vec![0x01, 0x01];
        long_id.extend(std::iter::repeat(b'a').take(257));
        assert_eq!(
            KnowledgeProof::deserialize(&long_id),
            Err(ProofError::Identity)
        );
    }
}
