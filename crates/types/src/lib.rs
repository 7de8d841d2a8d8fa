//! # A-IBE PKG 共有型定義
//!
//! PKG（鍵発行サーバー）とクライアント間でやり取りするエンベロープと、
//! その本体（ボディ）の構造体を提供する。
//!
//! ## ワイヤフォーマット
//! ```text
//! [1B: type][2B: status (BE)][4B: size (BE)][size B: body]
//! ```
//!
//! ## エンコーディング規則
//! - ハンドシェイク系のボディ: JSON（バイナリ値はBase64文字列）
//! - 鍵素材（KEYGEN）: 固定長バイナリをセキュアチャネルで封緘したもの

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// 定数
// ---------------------------------------------------------------------------

/// エンベロープヘッダ長（type 1B + status 2B + size 4B）
pub const HEADER_LEN: usize = 7;

/// エンベロープボディの最大サイズ（8KB）。
/// 宣言サイズはこの値で検証してからバッファを確保する。
pub const MAX_ENVELOPE_BODY: usize = 8 * 1024;

// ---------------------------------------------------------------------------
// メッセージ種別
// ---------------------------------------------------------------------------

/// エンベロープのメッセージ種別。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// セッション開始（クライアントのエフェメラル公開鍵）
    SessionInit = 0x01,
    /// チャレンジ（ノンス、PKG公開パラメータ）
    Challenge = 0x02,
    /// Attestation evidence
    Evidence = 0x03,
    /// Attestation結果（鍵導出シード）
    AttestResult = 0x04,
    /// ブラインド鍵生成
    Keygen = 0x05,
    /// 鍵リクエスト（証明の検証）
    KeyReq = 0x06,
    /// セッション終了
    Exit = 0x07,
}

impl MessageType {
    /// タグ値を返す。
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// ログ出力用の名前。
    pub fn name(self) -> &'static str {
        match self {
            MessageType::SessionInit => "SESSION_INIT",
            MessageType::Challenge => "CHALLENGE",
            MessageType::Evidence => "EVIDENCE",
            MessageType::AttestResult => "ATTEST_RESULT",
            MessageType::Keygen => "KEYGEN",
            MessageType::KeyReq => "KEYREQ",
            MessageType::Exit => "EXIT",
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = FramingError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0x01 => Ok(MessageType::SessionInit),
            0x02 => Ok(MessageType::Challenge),
            0x03 => Ok(MessageType::Evidence),
            0x04 => Ok(MessageType::AttestResult),
            0x05 => Ok(MessageType::Keygen),
            0x06 => Ok(MessageType::KeyReq),
            0x07 => Ok(MessageType::Exit),
            other => Err(FramingError::UnknownType(other)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// ステータスコード
// ---------------------------------------------------------------------------

/// 2バイトのステータスコード。0が成功、それ以外はエラー種別。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub u16);

impl Status {
    /// 成功
    pub const OK: Status = Status(0x0000);
    /// 不正な形式のメッセージ
    pub const MALFORMED: Status = Status(0x0001);
    /// 現在の状態では不正なメッセージ
    pub const PROTOCOL_VIOLATION: Status = Status(0x0002);
    /// Attestation evidenceが拒否された
    pub const ATTESTATION_REJECTED: Status = Status(0x0003);
    /// 認証付き復号の失敗（改ざんの疑い）
    pub const AUTH_FAILURE: Status = Status(0x0004);
    /// 鍵の組み合わせが代数的に不整合
    pub const CRYPTO_INCONSISTENCY: Status = Status(0x0005);
    /// 証明の検証に失敗
    pub const PROOF_REJECTED: Status = Status(0x0006);
    /// 内部エラー
    pub const INTERNAL: Status = Status(0x0007);

    /// 成功ステータスか。
    pub fn is_ok(self) -> bool {
        self == Status::OK
    }

    /// ログ出力用の名前。
    pub fn name(self) -> &'static str {
        match self {
            Status::OK => "OK",
            Status::MALFORMED => "MALFORMED",
            Status::PROTOCOL_VIOLATION => "PROTOCOL_VIOLATION",
            Status::ATTESTATION_REJECTED => "ATTESTATION_REJECTED",
            Status::AUTH_FAILURE => "AUTH_FAILURE",
            Status::CRYPTO_INCONSISTENCY => "CRYPTO_INCONSISTENCY",
            Status::PROOF_REJECTED => "PROOF_REJECTED",
            Status::INTERNAL => "INTERNAL",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:04x})", self.name(), self.0)
    }
}

// ---------------------------------------------------------------------------
// エンベロープ
// ---------------------------------------------------------------------------

/// フレーミングのエラー型。
/// 常に当該メッセージにとって致命的。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    /// ヘッダが宣言するより少ないバイト数しかない
    #[error("メッセージが途中で切れています: {expected} bytes 必要, {available} bytes のみ")]
    Truncated {
        /// 必要なバイト数
        expected: usize,
        /// 実際に利用可能なバイト数
        available: usize,
    },
    /// 未知のメッセージ種別
    #[error("未知のメッセージ種別: 0x{0:02x}")]
    UnknownType(u8),
    /// 宣言サイズと実際のボディ長が一致しない
    #[error("宣言サイズとボディ長が一致しません: 宣言 {declared} bytes, 実際 {actual} bytes")]
    SizeMismatch {
        /// ヘッダの宣言サイズ
        declared: usize,
        /// 実際のボディ長
        actual: usize,
    },
    /// 宣言サイズが上限を超えている
    #[error("ボディサイズが上限を超えています: {size} bytes (上限: {limit} bytes)")]
    Oversized {
        /// 宣言サイズ
        size: usize,
        /// 上限値
        limit: usize,
    },
}

/// ワイヤ通信の唯一の単位。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// メッセージ種別
    pub kind: MessageType,
    /// ステータス（リクエストでは常に0）
    pub status: Status,
    /// 不透明なボディ
    pub body: Vec<u8>,
}

impl Envelope {
    /// ステータス0のエンベロープを作る。
    pub fn new(kind: MessageType, body: Vec<u8>) -> Self {
        Self {
            kind,
            status: Status::OK,
            body,
        }
    }

    /// ボディ空の拒否エンベロープを作る。
    pub fn rejection(kind: MessageType, status: Status) -> Self {
        Self {
            kind,
            status,
            body: Vec::new(),
        }
    }

    /// ヘッダの`size`フィールドに入る値。
    pub fn size(&self) -> usize {
        self.body.len()
    }
}

/// ヘッダをパースし、種別・ステータス・宣言サイズを返す。
///
/// 宣言サイズは信頼できない入力として扱い、ここで上限を検証する。
pub fn parse_header(header: &[u8; HEADER_LEN]) -> Result<(MessageType, Status, usize), FramingError> {
    let kind = MessageType::try_from(header[0])?;
    let status = Status(u16::from_be_bytes([header[1], header[2]]));
    let size = u32::from_be_bytes([header[3], header[4], header[5], header[6]]) as usize;
    if size > MAX_ENVELOPE_BODY {
        return Err(FramingError::Oversized {
            size,
            limit: MAX_ENVELOPE_BODY,
        });
    }
    Ok((kind, status, size))
}

/// エンベロープをバイト列にエンコードする。
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, FramingError> {
    let size = envelope.size();
    if size > MAX_ENVELOPE_BODY {
        return Err(FramingError::Oversized {
            size,
            limit: MAX_ENVELOPE_BODY,
        });
    }
    let mut out = Vec::with_capacity(HEADER_LEN + size);
    out.push(envelope.kind.as_u8());
    out.extend_from_slice(&envelope.status.0.to_be_bytes());
    out.extend_from_slice(&(size as u32).to_be_bytes());
    out.extend_from_slice(&envelope.body);
    Ok(out)
}

/// バイト列からエンベロープをデコードする。副作用なし。
pub fn decode(bytes: &[u8]) -> Result<Envelope, FramingError> {
    let header: &[u8; HEADER_LEN] = bytes
        .get(..HEADER_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or(FramingError::Truncated {
            expected: HEADER_LEN,
            available: bytes.len(),
        })?;
    let (kind, status, size) = parse_header(header)?;

    let body = &bytes[HEADER_LEN..];
    if body.len() < size {
        return Err(FramingError::Truncated {
            expected: HEADER_LEN + size,
            available: bytes.len(),
        });
    }
    if body.len() != size {
        return Err(FramingError::SizeMismatch {
            declared: size,
            actual: body.len(),
        });
    }

    Ok(Envelope {
        kind,
        status,
        body: body.to_vec(),
    })
}

// ---------------------------------------------------------------------------
// ハンドシェイクのボディ
// ---------------------------------------------------------------------------

/// SESSION_INIT のボディ。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInitBody {
    /// Base64エンコードされたクライアントのX25519エフェメラル公開鍵
    pub client_pubkey: String,
}

/// CHALLENGE のボディ。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeBody {
    /// PKGが割り当てたセッションID（UUID）
    pub session_id: String,
    /// Base64エンコードされた32バイトのノンス
    pub nonce: String,
    /// Base64エンコードされたPKGのX25519エフェメラル公開鍵
    pub server_pubkey: String,
    /// Base64エンコードされたA-IBE公開パラメータ
    pub public_params: String,
    /// Base64エンコードされたPKGのEd25519公開鍵
    pub pkg_pubkey: String,
    /// Base64エンコードされたトランスクリプト署名
    pub signature: String,
}

/// EVIDENCE のボディ。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceBody {
    /// TEE種別（"mock" 等）
    pub tee_type: String,
    /// Base64エンコードされたAttestation evidence
    pub evidence: String,
}

/// ATTEST_RESULT（受理時）のボディ。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestResultBody {
    /// Base64エンコードされた32バイトの鍵導出シード
    pub seed: String,
    /// Base64エンコードされた鍵確認用MAC
    pub confirmation: String,
}

// ---------------------------------------------------------------------------
// 永続化ファイル形式
// ---------------------------------------------------------------------------

/// PKGのマスター鍵ファイル。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterKeyFile {
    /// Base64エンコードされた公開パラメータ
    pub public_params: String,
    /// Base64エンコードされたマスター秘密鍵
    pub master_secret: String,
}

/// クライアントが保存する復号鍵ファイル。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredKeyFile {
    /// 鍵の対象となるID
    pub identity: String,
    /// Base64エンコードされた復号鍵 (d1 || d2 || d3)
    pub decryption_key: String,
    /// Base64エンコードされた公開パラメータ
    pub public_params: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        Envelope::new(MessageType::Keygen, vec![1, 2, 3, 4, 5])
    }

    /// エンコード→デコードで元のエンベロープに戻ること
    #[test]
    fn test_roundtrip_all_types() {
        for tag in 0x01..=0x07u8 {
            let kind = MessageType::try_from(tag).unwrap();
            let env = Envelope {
                kind,
                status: Status(0x0102),
                body: vec![tag; tag as usize * 3],
            };
            let bytes = encode(&env).unwrap();
            assert_eq!(bytes.len(), HEADER_LEN + env.size());
            assert_eq!(decode(&bytes).unwrap(), env);
        }
    }

    /// ボディ空のエンベロープも往復できること
    #[test]
    fn test_roundtrip_empty_body() {
        let env = Envelope::rejection(MessageType::KeyReq, Status::PROOF_REJECTED);
        assert_eq!(decode(&encode(&env).unwrap()).unwrap(), env);
    }

    /// ヘッダ形式がビッグエンディアンであること
    #[test]
    fn test_header_layout() {
        let env = Envelope {
            kind: MessageType::AttestResult,
            status: Status::ATTESTATION_REJECTED,
            body: vec![0xaa; 0x0102],
        };
        let bytes = encode(&env).unwrap();
        assert_eq!(&bytes[..HEADER_LEN], &[0x04, 0x00, 0x03, 0x00, 0x00, 0x01, 0x02]);
    }

    /// ヘッダ未満のバイト列はTruncated
    #[test]
    fn test_decode_short_header() {
        assert_eq!(
            decode(&[0x01, 0x00]),
            Err(FramingError::Truncated {
                expected: HEADER_LEN,
                available: 2
            })
        );
    }

    /// 宣言サイズよりボディが短い場合はTruncated
    #[test]
    fn test_decode_truncated_body() {
        let mut bytes = encode(&sample()).unwrap();
        bytes.pop();
        assert!(matches!(decode(&bytes), Err(FramingError::Truncated { .. })));
    }

    /// 宣言サイズよりボディが長い場合はSizeMismatch
    #[test]
    fn test_decode_trailing_bytes() {
        let mut bytes = encode(&sample()).unwrap();
        bytes.push(0);
        assert_eq!(
            decode(&bytes),
            Err(FramingError::SizeMismatch {
                declared: 5,
                actual: 6
            })
        );
    }

    /// 未知の種別タグはUnknownType
    #[test]
    fn test_decode_unknown_type() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[0] = 0x42;
        assert_eq!(decode(&bytes), Err(FramingError::UnknownType(0x42)));
        bytes[0] = 0x00;
        assert_eq!(decode(&bytes), Err(FramingError::UnknownType(0x00)));
    }

    /// 上限を超える宣言サイズはボディを読む前に拒否される
    #[test]
    fn test_decode_oversized_declared_size() {
        let mut header = [0u8; HEADER_LEN];
        header[0] = MessageType::Evidence.as_u8();
        header[3..].copy_from_slice(&u32::MAX.to_be_bytes());
        assert_eq!(
            decode(&header),
            Err(FramingError::Oversized {
                size: u32::MAX as usize,
                limit: MAX_ENVELOPE_BODY
            })
        );
    }

    /// 上限を超えるボディはエンコードできない
    #[test]
    fn test_encode_oversized_body() {
        let env = Envelope::new(MessageType::Evidence, vec![0; MAX_ENVELOPE_BODY + 1]);
        assert!(matches!(encode(&env), Err(FramingError::Oversized { .. })));
        let env = Envelope::new(MessageType::Evidence, vec![0; MAX_ENVELOPE_BODY]);
        assert!(encode(&env).is_ok());
    }

    /// ステータスの表示形式
    #[test]
    fn test_status_display() {
        assert_eq!(Status::AUTH_FAILURE.to_string(), "AUTH_FAILURE(0x0004)");
        assert_eq!(Status(0x0999).to_string(), "UNKNOWN(0x0999)");
        assert!(Status::OK.is_ok());
        assert!(!Status::INTERNAL.is_ok());
    }
}
