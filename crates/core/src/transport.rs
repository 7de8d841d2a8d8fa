//! # 非同期フレーミング
//!
//! 任意の `AsyncRead` / `AsyncWrite` 上でエンベロープを読み書きする。
//! ヘッダの宣言サイズは上限と照合してからバッファを確保する。

use aibe_types::{encode, parse_header, Envelope, HEADER_LEN};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;

/// エンベロープを1つ読み込む。
///
/// ヘッダ読み込み前にEOFに達した場合は [`ProtocolError::ConnectionClosed`]。
pub async fn read_envelope<R>(reader: &mut R) -> Result<Envelope, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::ConnectionClosed)
        }
        Err(e) => return Err(e.into()),
    }
    let (kind, status, size) = parse_header(&header)?;

    let mut body = vec![0u8; size];
    reader.read_exact(&mut body).await?;
    Ok(Envelope { kind, status, body })
}

/// エンベロープを1つ書き込み、フラッシュする。
pub async fn write_envelope<W>(writer: &mut W, envelope: &Envelope) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode(envelope)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aibe_types::{FramingError, MessageType, Status, MAX_ENVELOPE_BODY};

    #[tokio::test]
    async fn test_write_then_read() {
        let (mut a, mut b) = tokio::io::duplex(64 * 1024);
        let sent = Envelope {
            kind: MessageType::AttestResult,
            status: Status::ATTESTATION_REJECTED,
            body: b"{}".to_vec(),
        };
        write_envelope(&mut a, &sent).await.unwrap();
        write_envelope(&mut a, &Envelope::new(MessageType::Exit, vec![]))
            .await
            .unwrap();
        assert_eq!(read_envelope(&mut b).await.unwrap(), sent);
        assert_eq!(read_envelope(&mut b).await.unwrap().kind, MessageType::Exit);
    }

    #[tokio::test]
    async fn test_eof_before_header_is_closed() {
        let (a, mut b) = tokio::io::duplex(1024);
        drop(a);
        assert!(matches!(
            read_envelope(&mut b).await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    /// 上限を超える宣言サイズはボディを読む前に拒否する
    #[tokio::test]
    async fn test_oversized_header_rejected_before_read() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let mut header = vec![MessageType::Keygen.as_u8(), 0, 0];
        header.extend_from_slice(&((MAX_ENVELOPE_BODY as u32) + 1).to_be_bytes());
        tokio::io::AsyncWriteExt::write_all(&mut a, &header)
            .await
            .unwrap();
        assert!(matches!(
            read_envelope(&mut b).await,
            Err(ProtocolError::Framing(FramingError::Oversized { .. }))
        ));
    }

    #[tokio::test]
    async fn test_unknown_type_rejected() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        tokio::io::AsyncWriteExt::write_all(&mut a, &[0x7f, 0, 0, 0, 0, 0, 0])
            .await
            .unwrap();
        assert!(matches!(
            read_envelope(&mut b).await,
            Err(ProtocolError::Framing(FramingError::UnknownType(0x7f)))
        ));
    }

    /// ボディ途中での切断はトランスポートエラー
    #[tokio::test]
    async fn test_truncated_body() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        tokio::io::AsyncWriteExt::write_all(&mut a, &[0x05, 0, 0, 0, 0, 0, 10, 1, 2])
            .await
            .unwrap();
        drop(a);
        assert!(matches!(
            read_envelope(&mut b).await,
            Err(ProtocolError::Transport(_))
        ));
    }
}
