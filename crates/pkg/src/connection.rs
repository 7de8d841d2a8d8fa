//! # 接続ドライバ
//!
//! 1接続につき1つの [`ServerSession`] を所有し、受信→処理→応答を繰り返す。
//! 次のメッセージの受信はタイムアウト付きで待つ。
//! ペアリング計算を含む処理は `spawn_blocking` 上で行う。

use std::sync::Arc;
use std::time::Duration;

use aibe_core::transport::{read_envelope, write_envelope};
use aibe_core::{ProtocolError, ServerContext, ServerSession, Step};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::PkgError;

/// 1接続を最後まで処理する。
///
/// ピアのEXITまたは切断で正常終了、セッションの失敗やタイムアウトは `Err`。
pub async fn serve_connection<S>(
    mut stream: S,
    ctx: Arc<ServerContext>,
    timeout: Duration,
) -> Result<(), PkgError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = ServerSession::new(&ctx);

    loop {
        let envelope = match tokio::time::timeout(timeout, read_envelope(&mut stream)).await {
            Ok(Ok(envelope)) => envelope,
            Ok(Err(ProtocolError::ConnectionClosed)) => {
                session.abort(&ProtocolError::ConnectionClosed);
                tracing::info!(session = %session.id(), "ピアが接続を閉じました");
                return Ok(());
            }
            Ok(Err(e)) => {
                session.abort(&e);
                return Err(e.into());
            }
            Err(_) => {
                session.abort(&ProtocolError::Timeout);
                return Err(ProtocolError::Timeout.into());
            }
        };
        tracing::debug!(session = %session.id(), kind = %envelope.kind, size = envelope.size(), "受信");

        let task_ctx = Arc::clone(&ctx);
        let (returned, step) = tokio::task::spawn_blocking(move || {
            let step = session.handle(&task_ctx, &envelope);
            (session, step)
        })
        .await
        .map_err(|e| PkgError::Internal(format!("セッション処理タスクが異常終了しました: {e}")))?;
        session = returned;

        match step {
            Step::Continue(reply) => {
                if let Err(e) = write_envelope(&mut stream, &reply).await {
                    session.abort(&e);
                    return Err(e.into());
                }
            }
            Step::Terminate { reply, reason } => {
                if let Some(reply) = reply {
                    if let Err(e) = write_envelope(&mut stream, &reply).await {
                        tracing::debug!(session = %session.id(), error = %e, "拒否応答を送れませんでした");
                    }
                }
                if let Err(e) = stream.shutdown().await {
                    tracing::debug!(session = %session.id(), error = %e, "切断に失敗しました");
                }
                return match reason {
                    None => Ok(()),
                    Some(e) => Err(e.into()),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aibe_core::{ClientConfig, ClientConnection, ClientSession, GateDecision, HandshakeState};
    use aibe_crypto::aibe::{self, Aibe, MasterKey};
    use aibe_crypto::attestation::mock::MockAttestor;
    use aibe_crypto::proof::KnowledgeProof;
    use aibe_crypto::Ed25519SigningKey;
    use aibe_types::{Envelope, MessageType, Status};

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn context() -> Arc<ServerContext> {
        Arc::new(ServerContext::new(
            MasterKey::generate(),
            Box::new(MockAttestor::development()),
            Ed25519SigningKey::generate(&mut rand::rngs::OsRng),
        ))
    }

    fn client_session(ctx: &ServerContext) -> ClientSession {
        ClientSession::new(
            ClientConfig {
                pkg_verifying_key: Some(ctx.pkg_verifying_key()),
                ..ClientConfig::default()
            },
            Box::new(MockAttestor::development()),
            Box::new(Aibe),
        )
    }

    #[tokio::test]
    async fn test_full_session_over_duplex() {
        let ctx = context();
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(serve_connection(server_io, Arc::clone(&ctx), TIMEOUT));

        let mut conn = ClientConnection::new(client_io, client_session(&ctx), TIMEOUT);
        conn.attest().await.unwrap();
        assert_eq!(conn.session().state(), HandshakeState::Verified);
        assert_eq!(ctx.table().verified_sessions(), 1);

        let key = conn.keygen("alice@example.com").await.unwrap();
        assert!(key.is_valid_for(ctx.params(), "alice@example.com"));
        let ciphertext = aibe::encrypt(ctx.params(), "alice@example.com", b"hello").unwrap();
        assert_eq!(aibe::decrypt(ctx.params(), &key, &ciphertext).unwrap(), b"hello");

        let proof = KnowledgeProof::for_key(ctx.params(), "alice@example.com", &key).unwrap();
        assert_eq!(
            conn.key_request(proof.to_bytes()).await.unwrap(),
            GateDecision::Granted
        );

        conn.close().await.unwrap();
        server.await.unwrap().unwrap();
        assert_eq!(ctx.table().live_sessions(), 0);
    }

    /// Verified前のKEYGENには拒否応答が返り、接続が閉じられる
    #[tokio::test]
    async fn test_keygen_before_attestation_closes_connection() {
        let ctx = context();
        let (mut client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(serve_connection(server_io, Arc::clone(&ctx), TIMEOUT));

        write_envelope(&mut client_io, &Envelope::new(MessageType::Keygen, vec![0u8; 64]))
            .await
            .unwrap();
        let reply = read_envelope(&mut client_io).await.unwrap();
        assert_eq!(reply.kind, MessageType::Keygen);
        assert_eq!(reply.status, Status::PROTOCOL_VIOLATION);
        assert!(matches!(
            read_envelope(&mut client_io).await,
            Err(ProtocolError::ConnectionClosed)
        ));
        assert!(matches!(
            server.await.unwrap(),
            Err(PkgError::Protocol(ProtocolError::ProtocolViolation(_)))
        ));
    }

    #[tokio::test]
    async fn test_framing_error_closes_connection() {
        let ctx = context();
        let (mut client_io, server_io) = tokio::io::duplex(1024);
        let server = tokio::spawn(serve_connection(server_io, Arc::clone(&ctx), TIMEOUT));

        client_io.write_all(&[0x7f, 0, 0, 0, 0, 0, 0]).await.unwrap();
        assert!(matches!(
            server.await.unwrap(),
            Err(PkgError::Protocol(ProtocolError::Framing(_)))
        ));
        assert_eq!(ctx.table().live_sessions(), 0);
    }

    #[tokio::test]
    async fn test_idle_connection_times_out() {
        let ctx = context();
        let (_client_io, server_io) = tokio::io::duplex(1024);
        let result = serve_connection(server_io, ctx, Duration::from_millis(50)).await;
        assert!(matches!(
            result,
            Err(PkgError::Protocol(ProtocolError::Timeout))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_is_clean() {
        let ctx = context();
        let (client_io, server_io) = tokio::io::duplex(1024);
        drop(client_io);
        serve_connection(server_io, Arc::clone(&ctx), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(ctx.table().live_sessions(), 0);
    }

    /// ループバックTCP上で複数クライアントが並行して鍵を取得する
    #[tokio::test]
    async fn test_concurrent_clients_over_tcp() {
        let ctx = context();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let ctx = Arc::clone(&server_ctx);
                tokio::spawn(async move {
                    let _ = serve_connection(stream, ctx, TIMEOUT).await;
                });
            }
        });

        let mut handles = Vec::new();
        for i in 0..3 {
            let session = client_session(&ctx);
            let params = *ctx.params();
            handles.push(tokio::spawn(async move {
                let identity = format!("user{i}@example.com");
                let mut conn = ClientConnection::connect(addr, session, TIMEOUT)
                    .await
                    .unwrap();
                conn.attest().await.unwrap();
                let key = conn.keygen(&identity).await.unwrap();
                assert!(key.is_valid_for(&params, &identity));
                conn.close().await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
