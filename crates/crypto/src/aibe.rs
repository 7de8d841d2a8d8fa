//! # A-IBE ブラインド鍵発行
//!
//! BLS12-381 上の Gentry 型IBE鍵を、PKGが最終鍵を知ることなく発行する。
//!
//! ## 鍵の形
//!
//! ```text
//! mpk = (g ∈ G1, h ∈ G1, g2 ∈ G2, g2α = g2^α ∈ G2),  msk = α
//! id  = H(identity) ∈ Zp
//! dk  = (d1 = r, d2 = (h · g^-r)^(1/(α-id)), d3 = g^(1/(α-id)))
//! ```
//!
//! ## 3ラウンド
//!
//! 1. クライアント: `z ≠ 0`, `r_c` を選び `Hz = h^z`, `R = g^(z·r_c)` を送る
//! 2. PKG: `r_s` を選び `dk1 = (r_s, (Hz - R)^(1/(α-id)), g^(1/(α-id)))` を返す
//! 3. クライアント: `t = r_s/z`, `r = r_c + t`,
//!    `d2 = dk1.d2^(1/z) - dk1.d3^t`, `d3 = dk1.d3` を計算し検証する
//!
//! PKGは `r_s` を知るが `z`, `r_c` を知らないため `r` も `d2` も分からない。

use bls12_381::{pairing, G1Affine, G1Projective, G2Affine, G2Projective, Gt, Scalar};
use ff::Field;
use rand::rngs::OsRng;
use sha2::{Digest, Sha512};
use std::fmt;

/// G1圧縮表現の長さ
pub const G1_LEN: usize = 48;
/// G2圧縮表現の長さ
pub const G2_LEN: usize = 96;
/// スカラーの長さ
pub const SCALAR_LEN: usize = 32;
/// 公開パラメータのバイト長（g, h, g2, g2α）
pub const PUBLIC_PARAMS_LEN: usize = 2 * G1_LEN + 2 * G2_LEN;
/// ブラインド要求のバイト長（R, Hz）
pub const BLIND_REQUEST_LEN: usize = 2 * G1_LEN;
/// 部分鍵・最終鍵のバイト長（d1, d2, d3）
pub const KEY_LEN: usize = SCALAR_LEN + 2 * G1_LEN;
/// IDの最大バイト長
pub const MAX_IDENTITY_LEN: usize = 256;

/// IDハッシュのドメイン分離ラベル
const IDENTITY_LABEL: &[u8] = b"aibe-identity-v1";

/// 鍵発行処理のエラー型
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AibeError {
    /// 群要素・スカラーのエンコーディングが不正
    #[error("群要素のエンコーディングが不正です: {0}")]
    InvalidEncoding(&'static str),
    /// 代数的整合性の検証に失敗
    #[error("鍵の代数的整合性検証に失敗しました: {0}")]
    Inconsistent(&'static str),
    /// 暗号文の認証・復号に失敗
    #[error("暗号文を復号できません")]
    Decrypt,
}

fn g1_from_slice(bytes: &[u8], what: &'static str) -> Result<G1Affine, AibeError> {
    let arr: &[u8; G1_LEN] = bytes
        .try_into()
        .map_err(|_| AibeError::InvalidEncoding(what))?;
    Option::from(G1Affine::from_compressed(arr)).ok_or(AibeError::InvalidEncoding(what))
}

fn g2_from_slice(bytes: &[u8], what: &'static str) -> Result<G2Affine, AibeError> {
    let arr: &[u8; G2_LEN] = bytes
        .try_into()
        .map_err(|_| AibeError::InvalidEncoding(what))?;
    Option::from(G2Affine::from_compressed(arr)).ok_or(AibeError::InvalidEncoding(what))
}

fn scalar_from_slice(bytes: &[u8], what: &'static str) -> Result<Scalar, AibeError> {
    let arr: &[u8; SCALAR_LEN] = bytes
        .try_into()
        .map_err(|_| AibeError::InvalidEncoding(what))?;
    Option::from(Scalar::from_bytes(arr)).ok_or(AibeError::InvalidEncoding(what))
}

/// Gtの正準表現（Fp成分の16進表記）。ハッシュ入力にだけ使う。
pub(crate) fn gt_bytes(gt: &Gt) -> Vec<u8> {
    gt.to_string().into_bytes()
}

/// 非ゼロのスカラーをサンプルする。
pub(crate) fn random_nonzero_scalar() -> Scalar {
    loop {
        let s = Scalar::random(OsRng);
        if !bool::from(s.is_zero()) {
            return s;
        }
    }
}

/// ID文字列をスカラーに写像する（SHA-512のワイドリダクション）。
pub fn identity_scalar(identity: &str) -> Scalar {
    let mut hasher = Sha512::new();
    hasher.update(IDENTITY_LABEL);
    hasher.update(identity.as_bytes());
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&hasher.finalize());
    Scalar::from_bytes_wide(&wide)
}

/// 公開パラメータ `mpk`。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicParams {
    g: G1Affine,
    h: G1Affine,
    g2: G2Affine,
    g2_alpha: G2Affine,
}

impl PublicParams {
    /// `g ‖ h ‖ g2 ‖ g2α` の圧縮表現（288バイト）。
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PUBLIC_PARAMS_LEN);
        out.extend_from_slice(&self.g.to_compressed());
        out.extend_from_slice(&self.h.to_compressed());
        out.extend_from_slice(&self.g2.to_compressed());
        out.extend_from_slice(&self.g2_alpha.to_compressed());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AibeError> {
        if bytes.len() != PUBLIC_PARAMS_LEN {
            return Err(AibeError::InvalidEncoding("公開パラメータ長"));
        }
        let (g, rest) = bytes.split_at(G1_LEN);
        let (h, rest) = rest.split_at(G1_LEN);
        let (g2, g2_alpha) = rest.split_at(G2_LEN);
        let params = Self {
            g: g1_from_slice(g, "g")?,
            h: g1_from_slice(h, "h")?,
            g2: g2_from_slice(g2, "g2")?,
            g2_alpha: g2_from_slice(g2_alpha, "g2α")?,
        };
        if bool::from(params.g.is_identity())
            || bool::from(params.h.is_identity())
            || bool::from(params.g2.is_identity())
            || bool::from(params.g2_alpha.is_identity())
        {
            return Err(AibeError::InvalidEncoding("単位元を含む公開パラメータ"));
        }
        Ok(params)
    }

    /// ログ表示用のフィンガープリント（SHA-256、hex先頭16文字）。
    pub fn fingerprint(&self) -> String {
        let digest = crate::sha256(&self.to_bytes());
        hex::encode(&digest[..8])
    }

    /// `g2^(α - id)` を公開情報だけから計算する。
    pub(crate) fn identity_base(&self, id: &Scalar) -> G2Affine {
        G2Affine::from(G2Projective::from(self.g2_alpha) - self.g2 * id)
    }

    pub(crate) fn g(&self) -> &G1Affine {
        &self.g
    }

    /// `e(g, g2)`
    pub(crate) fn e_g_g2(&self) -> Gt {
        pairing(&self.g, &self.g2)
    }

    /// `e(h, g2)`
    pub(crate) fn e_h_g2(&self) -> Gt {
        pairing(&self.h, &self.g2)
    }
}

/// マスター秘密鍵 `α`。
#[derive(Clone)]
pub struct MasterSecret(Scalar);

impl MasterSecret {
    pub fn to_bytes(&self) -> [u8; SCALAR_LEN] {
        self.0.to_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AibeError> {
        let alpha = scalar_from_slice(bytes, "マスター秘密鍵")?;
        if bool::from(alpha.is_zero()) {
            return Err(AibeError::InvalidEncoding("マスター秘密鍵がゼロ"));
        }
        Ok(Self(alpha))
    }
}

impl fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterSecret(<redacted>)")
    }
}

/// PKGのマスター鍵ペア。
#[derive(Clone, Debug)]
pub struct MasterKey {
    params: PublicParams,
    secret: MasterSecret,
}

impl MasterKey {
    /// 新しいマスター鍵ペアを生成する。
    pub fn generate() -> Self {
        let alpha = random_nonzero_scalar();
        let g = G1Affine::generator();
        let g2 = G2Affine::generator();
        let params = PublicParams {
            g,
            h: G1Affine::from(g * random_nonzero_scalar()),
            g2,
            g2_alpha: G2Affine::from(g2 * alpha),
        };
        Self {
            params,
            secret: MasterSecret(alpha),
        }
    }

    /// 保存済みの公開パラメータと秘密鍵から復元する。
    /// `g2α == g2^α` を満たさない組み合わせは拒否する。
    pub fn from_parts(params: PublicParams, secret: MasterSecret) -> Result<Self, AibeError> {
        if G2Affine::from(params.g2 * secret.0) != params.g2_alpha {
            return Err(AibeError::Inconsistent("公開パラメータと秘密鍵が対応しません"));
        }
        Ok(Self { params, secret })
    }

    pub fn params(&self) -> &PublicParams {
        &self.params
    }

    pub fn secret(&self) -> &MasterSecret {
        &self.secret
    }

    #[cfg(test)]
    fn with_alpha(alpha: Scalar) -> Self {
        let g = G1Affine::generator();
        let g2 = G2Affine::generator();
        Self {
            params: PublicParams {
                g,
                h: G1Affine::from(g * Scalar::from(7u64)),
                g2,
                g2_alpha: G2Affine::from(g2 * alpha),
            },
            secret: MasterSecret(alpha),
        }
    }
}

/// ラウンド1でクライアントが送るブラインド値 `(R, Hz)`。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlindRequest {
    r: G1Affine,
    hz: G1Affine,
}

impl BlindRequest {
    /// `R ‖ Hz`（96バイト）。
    pub fn to_bytes(&self) -> [u8; BLIND_REQUEST_LEN] {
        let mut out = [0u8; BLIND_REQUEST_LEN];
        out[..G1_LEN].copy_from_slice(&self.r.to_compressed());
        out[G1_LEN..].copy_from_slice(&self.hz.to_compressed());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AibeError> {
        if bytes.len() != BLIND_REQUEST_LEN {
            return Err(AibeError::InvalidEncoding("ブラインド要求長"));
        }
        let request = Self {
            r: g1_from_slice(&bytes[..G1_LEN], "R")?,
            hz: g1_from_slice(&bytes[G1_LEN..], "Hz")?,
        };
        if bool::from(request.hz.is_identity()) {
            return Err(AibeError::InvalidEncoding("Hzが単位元"));
        }
        Ok(request)
    }

    /// `R` の圧縮表現。セッション内での再利用検出に使う。
    pub fn r_bytes(&self) -> [u8; G1_LEN] {
        self.r.to_compressed()
    }
}

/// クライアントだけが保持するブラインド秘密 `(z, r_c)`。
/// 最終鍵の計算で消費され、複製できない。
pub struct BlindingSecret {
    z: Scalar,
    r_c: Scalar,
}

impl fmt::Debug for BlindingSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BlindingSecret(<redacted>)")
    }
}

/// `(d1, d2, d3)` の共通エンコーディング。
fn key_to_bytes(d1: &Scalar, d2: &G1Affine, d3: &G1Affine) -> [u8; KEY_LEN] {
    let mut out = [0u8; KEY_LEN];
    out[..SCALAR_LEN].copy_from_slice(&d1.to_bytes());
    out[SCALAR_LEN..SCALAR_LEN + G1_LEN].copy_from_slice(&d2.to_compressed());
    out[SCALAR_LEN + G1_LEN..].copy_from_slice(&d3.to_compressed());
    out
}

fn key_from_bytes(bytes: &[u8]) -> Result<(Scalar, G1Affine, G1Affine), AibeError> {
    if bytes.len() != KEY_LEN {
        return Err(AibeError::InvalidEncoding("鍵長"));
    }
    Ok((
        scalar_from_slice(&bytes[..SCALAR_LEN], "d1")?,
        g1_from_slice(&bytes[SCALAR_LEN..SCALAR_LEN + G1_LEN], "d2")?,
        g1_from_slice(&bytes[SCALAR_LEN + G1_LEN..], "d3")?,
    ))
}

/// ラウンド2でPKGが返すブラインド部分鍵 `dk1`。
#[derive(Clone, PartialEq, Eq)]
pub struct PartialKey {
    d1: Scalar,
    d2: G1Affine,
    d3: G1Affine,
}

impl PartialKey {
    pub fn to_bytes(&self) -> [u8; KEY_LEN] {
        key_to_bytes(&self.d1, &self.d2, &self.d3)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AibeError> {
        let (d1, d2, d3) = key_from_bytes(bytes)?;
        Ok(Self { d1, d2, d3 })
    }
}

impl fmt::Debug for PartialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PartialKey(<redacted>)")
    }
}

/// クライアントの最終復号鍵 `dk`。
#[derive(Clone, PartialEq, Eq)]
pub struct DecryptionKey {
    d1: Scalar,
    d2: G1Affine,
    d3: G1Affine,
}

impl DecryptionKey {
    pub fn to_bytes(&self) -> [u8; KEY_LEN] {
        key_to_bytes(&self.d1, &self.d2, &self.d3)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AibeError> {
        let (d1, d2, d3) = key_from_bytes(bytes)?;
        Ok(Self { d1, d2, d3 })
    }

    /// `d1`（= r）の表現。A-IBEではこの値で鍵を区別する。
    pub fn d1(&self) -> [u8; SCALAR_LEN] {
        self.d1.to_bytes()
    }

    pub(crate) fn d1_scalar(&self) -> &Scalar {
        &self.d1
    }

    pub(crate) fn d2_point(&self) -> &G1Affine {
        &self.d2
    }

    /// 鍵がこのIDに対して代数的に正しいか検証する。
    ///
    /// ```text
    /// e(d2, g2^(α-id)) == e(h, g2) - r·e(g, g2)
    /// e(d3, g2^(α-id)) == e(g, g2)
    /// ```
    pub fn is_valid_for(&self, params: &PublicParams, identity: &str) -> bool {
        let q = params.identity_base(&identity_scalar(identity));
        let e_g_g2 = params.e_g_g2();
        let e_h_g2 = params.e_h_g2();

        pairing(&self.d3, &q) == e_g_g2 && pairing(&self.d2, &q) == e_h_g2 - e_g_g2 * self.d1
    }
}

impl fmt::Debug for DecryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DecryptionKey(<redacted>)")
    }
}

/// ブラインド鍵発行の3つの操作。
///
/// PKG側は [`KeyIssuanceScheme::issue_partial`] のみを呼び、
/// クライアント側は [`KeyIssuanceScheme::blind`] と
/// [`KeyIssuanceScheme::unblind`] を呼ぶ。
pub trait KeyIssuanceScheme: Send + Sync {
    /// ラウンド1: ブラインド値と、手元に残す秘密を生成する。
    fn blind(
        &self,
        params: &PublicParams,
        identity: &str,
    ) -> Result<(BlindRequest, BlindingSecret), AibeError>;

    /// ラウンド2: マスター秘密鍵でブラインド部分鍵を計算する。
    fn issue_partial(
        &self,
        master: &MasterKey,
        identity: &str,
        request: &BlindRequest,
    ) -> Result<PartialKey, AibeError>;

    /// ラウンド3: 部分鍵からブラインドを外し、最終鍵を検証する。
    fn unblind(
        &self,
        params: &PublicParams,
        identity: &str,
        secret: BlindingSecret,
        partial: &PartialKey,
    ) -> Result<DecryptionKey, AibeError>;
}

/// BLS12-381 上の標準実装。
#[derive(Debug, Clone, Copy, Default)]
pub struct Aibe;

impl KeyIssuanceScheme for Aibe {
    fn blind(
        &self,
        params: &PublicParams,
        _identity: &str,
    ) -> Result<(BlindRequest, BlindingSecret), AibeError> {
        let z = random_nonzero_scalar();
        let r_c = random_nonzero_scalar();
        let request = BlindRequest {
            r: G1Affine::from(params.g * (z * r_c)),
            hz: G1Affine::from(params.h * z),
        };
        Ok((request, BlindingSecret { z, r_c }))
    }

    fn issue_partial(
        &self,
        master: &MasterKey,
        identity: &str,
        request: &BlindRequest,
    ) -> Result<PartialKey, AibeError> {
        let id = identity_scalar(identity);
        let inv: Scalar = Option::from((master.secret.0 - id).invert())
            .ok_or(AibeError::Inconsistent("α = H(id)"))?;

        let r_s = Scalar::random(OsRng);
        let base = G1Projective::from(request.hz) - request.r;
        Ok(PartialKey {
            d1: r_s,
            d2: G1Affine::from(base * inv),
            d3: G1Affine::from(master.params.g * inv),
        })
    }

    fn unblind(
        &self,
        params: &PublicParams,
        identity: &str,
        secret: BlindingSecret,
        partial: &PartialKey,
    ) -> Result<DecryptionKey, AibeError> {
        let z_inv: Scalar =
            Option::from(secret.z.invert()).ok_or(AibeError::Inconsistent("z = 0"))?;
        let t = partial.d1 * z_inv;
        let key = DecryptionKey {
            d1: secret.r_c + t,
            d2: G1Affine::from(partial.d2 * z_inv - partial.d3 * t),
            d3: partial.d3,
        };
        if !key.is_valid_for(params, identity) {
            return Err(AibeError::Inconsistent("最終鍵がペアリング検証を満たしません"));
        }
        Ok(key)
    }
}

// ---------------------------------------------------------------------------
// IBE暗号化
// ---------------------------------------------------------------------------

/// 暗号文のKEM部分のバイト長（u ∈ G2, v ∈ G1）
pub const CIPHERTEXT_HEADER_LEN: usize = G2_LEN + G1_LEN;

/// KEM鍵導出のドメイン分離ラベル
const KEM_LABEL: &[u8] = b"aibe-kem-v1";

/// IDに宛てた暗号文。
///
/// ```text
/// s  ← Zp
/// u  = g2^(s·(α-id)),  v = g^s
/// K  = SHA-256(e(h, g2)^s ‖ u ‖ v)
/// ct = u ‖ v ‖ AES-256-GCM(K, m)
/// ```
///
/// 復号側は `e(d2, u) · e(v, g2)^d1 = e(h, g2)^s` で `K` を再計算する。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ciphertext {
    u: G2Affine,
    v: G1Affine,
    payload: Vec<u8>,
}

impl Ciphertext {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CIPHERTEXT_HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.u.to_compressed());
        out.extend_from_slice(&self.v.to_compressed());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AibeError> {
        if bytes.len() < CIPHERTEXT_HEADER_LEN + crate::AES_GCM_TAG_LEN {
            return Err(AibeError::InvalidEncoding("暗号文長"));
        }
        let (u, rest) = bytes.split_at(G2_LEN);
        let (v, payload) = rest.split_at(G1_LEN);
        let ciphertext = Self {
            u: g2_from_slice(u, "u")?,
            v: g1_from_slice(v, "v")?,
            payload: payload.to_vec(),
        };
        if bool::from(ciphertext.u.is_identity()) || bool::from(ciphertext.v.is_identity()) {
            return Err(AibeError::InvalidEncoding("単位元を含む暗号文"));
        }
        Ok(ciphertext)
    }
}

fn kem_key(mask: &Gt, u: &G2Affine, v: &G1Affine) -> crate::SymmetricKey {
    crate::sha256_parts(
        KEM_LABEL,
        &[&gt_bytes(mask), &u.to_compressed(), &v.to_compressed()],
    )
}

/// KEM鍵は暗号化ごとに使い捨てなのでノンスは固定
const KEM_NONCE: [u8; crate::AES_GCM_NONCE_LEN] = [0u8; crate::AES_GCM_NONCE_LEN];

/// 公開パラメータだけで `identity` 宛てに暗号化する。
pub fn encrypt(
    params: &PublicParams,
    identity: &str,
    plaintext: &[u8],
) -> Result<Ciphertext, AibeError> {
    let q = params.identity_base(&identity_scalar(identity));
    if bool::from(q.is_identity()) {
        return Err(AibeError::Inconsistent("α = H(id)"));
    }
    let s = random_nonzero_scalar();
    let u = G2Affine::from(q * s);
    let v = G1Affine::from(params.g * s);
    let key = kem_key(&(params.e_h_g2() * s), &u, &v);
    let payload = crate::aes_gcm_encrypt(&key, &KEM_NONCE, &[], plaintext)
        .map_err(|_| AibeError::InvalidEncoding("平文が長すぎます"))?;
    Ok(Ciphertext { u, v, payload })
}

/// 復号鍵で暗号文を復号する。別IDの鍵や改ざんされた暗号文では [`AibeError::Decrypt`]。
pub fn decrypt(
    params: &PublicParams,
    key: &DecryptionKey,
    ciphertext: &Ciphertext,
) -> Result<Vec<u8>, AibeError> {
    let mask = pairing(&key.d2, &ciphertext.u) + pairing(&ciphertext.v, &params.g2) * key.d1;
    let kem = kem_key(&mask, &ciphertext.u, &ciphertext.v);
    crate::aes_gcm_decrypt(&kem, &KEM_NONCE, &[], &ciphertext.payload)
        .map_err(|_| AibeError::Decrypt)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "alice@example.com";

    fn issue(master: &MasterKey, identity: &str) -> DecryptionKey {
        let scheme = Aibe;
        let (request, secret) = scheme.blind(master.params(), identity).unwrap();
        let partial = scheme.issue_partial(master, identity, &request).unwrap();
        scheme
            .unblind(master.params(), identity, secret, &partial)
            .unwrap()
    }

    /// 3ラウンドで有効な鍵が得られる
    #[test]
    fn test_blind_issuance_produces_valid_key() {
        let master = MasterKey::generate();
        let key = issue(&master, ALICE);
        assert!(key.is_valid_for(master.params(), ALICE));
        assert!(!key.is_valid_for(master.params(), "bob@example.com"));
    }

    /// ブラインド秘密が異なれば最終鍵も異なる（どちらも有効）
    #[test]
    fn test_distinct_blinding_gives_distinct_keys() {
        let master = MasterKey::generate();
        let k1 = issue(&master, ALICE);
        let k2 = issue(&master, ALICE);
        assert_ne!(k1, k2);
        assert_ne!(k1.d1(), k2.d1());
        assert!(k1.is_valid_for(master.params(), ALICE));
        assert!(k2.is_valid_for(master.params(), ALICE));
    }

    /// 別IDで発行された部分鍵ではブラインド解除時に検証が失敗する
    #[test]
    fn test_unblind_rejects_partial_for_other_identity() {
        let master = MasterKey::generate();
        let scheme = Aibe;
        let (request, secret) = scheme.blind(master.params(), ALICE).unwrap();
        let partial = scheme
            .issue_partial(&master, "mallory@example.com", &request)
            .unwrap();
        assert!(matches!(
            scheme.unblind(master.params(), ALICE, secret, &partial),
            Err(AibeError::Inconsistent(_))
        ));
    }

    /// 別のマスター鍵による部分鍵も拒否される
    #[test]
    fn test_unblind_rejects_partial_from_other_master() {
        let master = MasterKey::generate();
        let other = MasterKey::generate();
        let scheme = Aibe;
        let (request, secret) = scheme.blind(master.params(), ALICE).unwrap();
        let partial = scheme.issue_partial(&other, ALICE, &request).unwrap();
        assert!(scheme
            .unblind(master.params(), ALICE, secret, &partial)
            .is_err());
    }

    /// α = H(id) のときPKGは部分鍵を作らない
    #[test]
    fn test_issue_partial_alpha_equals_identity() {
        let master = MasterKey::with_alpha(identity_scalar(ALICE));
        let scheme = Aibe;
        let (request, _secret) = scheme.blind(master.params(), ALICE).unwrap();
        assert_eq!(
            scheme.issue_partial(&master, ALICE, &request),
            Err(AibeError::Inconsistent("α = H(id)"))
        );
    }

    #[test]
    fn test_public_params_encoding() {
        let master = MasterKey::generate();
        let bytes = master.params().to_bytes();
        assert_eq!(bytes.len(), PUBLIC_PARAMS_LEN);
        assert_eq!(PublicParams::from_bytes(&bytes).unwrap(), *master.params());
        assert!(PublicParams::from_bytes(&bytes[..PUBLIC_PARAMS_LEN - 1]).is_err());
        assert_eq!(master.params().fingerprint().len(), 16);
    }

    /// 保存形式から復元したマスター鍵で発行できる
    #[test]
    fn test_master_key_from_parts() {
        let master = MasterKey::generate();
        let params = PublicParams::from_bytes(&master.params().to_bytes()).unwrap();
        let secret = MasterSecret::from_bytes(&master.secret().to_bytes()).unwrap();
        let restored = MasterKey::from_parts(params, secret).unwrap();
        let key = issue(&restored, ALICE);
        assert!(key.is_valid_for(master.params(), ALICE));

        let other = MasterKey::generate();
        assert!(MasterKey::from_parts(*other.params(), master.secret().clone()).is_err());
    }

    #[test]
    fn test_master_secret_rejects_zero() {
        assert!(MasterSecret::from_bytes(&[0u8; SCALAR_LEN]).is_err());
        assert!(MasterSecret::from_bytes(&[1u8; 31]).is_err());
    }

    #[test]
    fn test_key_encoding() {
        let master = MasterKey::generate();
        let key = issue(&master, ALICE);
        let bytes = key.to_bytes();
        assert_eq!(bytes.len(), KEY_LEN);
        assert_eq!(DecryptionKey::from_bytes(&bytes).unwrap(), key);
        assert!(DecryptionKey::from_bytes(&bytes[1..]).is_err());
    }

    #[test]
    fn test_blind_request_encoding() {
        let master = MasterKey::generate();
        let (request, _) = Aibe.blind(master.params(), ALICE).unwrap();
        let bytes = request.to_bytes();
        assert_eq!(BlindRequest::from_bytes(&bytes).unwrap(), request);
        assert_eq!(request.r_bytes(), bytes[..G1_LEN]);
        assert!(BlindRequest::from_bytes(&[0xffu8; BLIND_REQUEST_LEN]).is_err());
    }

    /// 秘密値はDebug出力に現れない
    #[test]
    fn test_debug_is_redacted() {
        let master = MasterKey::generate();
        let key = issue(&master, ALICE);
        assert_eq!(format!("{key:?}"), "DecryptionKey(<redacted>)");
        assert!(format!("{master:?}").contains("MasterSecret(<redacted>)"));
    }

    /// ブラインド発行した鍵で自分宛ての暗号文を復号できる
    #[test]
    fn test_encrypt_decrypt_with_issued_key() {
        let master = MasterKey::generate();
        let key = issue(&master, ALICE);
        let ciphertext = encrypt(master.params(), ALICE, b"block payload").unwrap();
        let decoded = Ciphertext::from_bytes(&ciphertext.to_bytes()).unwrap();
        assert_eq!(decoded, ciphertext);
        assert_eq!(
            decrypt(master.params(), &key, &decoded).unwrap(),
            b"block payload"
        );
    }

    #[test]
    fn test_decrypt_with_other_identity_fails() {
        let master = MasterKey::generate();
        let bob = issue(&master, "bob@example.com");
        let ciphertext = encrypt(master.params(), ALICE, b"secret").unwrap();
        assert_eq!(
            decrypt(master.params(), &bob, &ciphertext),
            Err(AibeError::Decrypt)
        );
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let master = MasterKey::generate();
        let key = issue(&master, ALICE);
        let mut bytes = encrypt(master.params(), ALICE, b"secret").unwrap().to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = Ciphertext::from_bytes(&bytes).unwrap();
        assert_eq!(
            decrypt(master.params(), &key, &tampered),
            Err(AibeError::Decrypt)
        );
        assert!(Ciphertext::from_bytes(&bytes[..CIPHERTEXT_HEADER_LEN]).is_err());
    }

    #[test]
    fn test_identity_scalar_is_deterministic() {
        assert_eq!(identity_scalar(ALICE), identity_scalar(ALICE));
        assert_ne!(identity_scalar(ALICE), identity_scalar("bob@example.com"));
    }
}
