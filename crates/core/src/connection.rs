//! # クライアント接続
//!
//! [`ClientSession`] をストリーム上で駆動する。1つ送って対応する応答を待つ、
//! の繰り返しで、応答待ちはタイムアウト付き。

use std::time::Duration;

use aibe_crypto::aibe::DecryptionKey;
use aibe_types::Envelope;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::client::ClientSession;
use crate::error::ProtocolError;
use crate::gate::GateDecision;
use crate::transport::{read_envelope, write_envelope};

/// PKGへのクライアント接続。
pub struct ClientConnection<S> {
    stream: S,
    session: ClientSession,
    timeout: Duration,
}

impl ClientConnection<TcpStream> {
    /// TCPでPKGに接続する。
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        session: ClientSession,
        timeout: Duration,
    ) -> Result<Self, ProtocolError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ProtocolError::Timeout)??;
        Ok(Self::new(stream, session, timeout))
    }
}

impl<S> ClientConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, session: ClientSession, timeout: Duration) -> Self {
        Self {
            stream,
            session,
            timeout,
        }
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    /// 1往復する。トランスポート障害はセッションを失敗させる。
    async fn round_trip(&mut self, request: &Envelope) -> Result<Envelope, ProtocolError> {
        let result = async {
            write_envelope(&mut self.stream, request).await?;
            tokio::time::timeout(self.timeout, read_envelope(&mut self.stream))
                .await
                .map_err(|_| ProtocolError::Timeout)?
        }
        .await;
        if result.is_err() {
            self.session.fail();
        }
        result
    }

    /// ハンドシェイクを完了させる。
    pub async fn attest(&mut self) -> Result<(), ProtocolError> {
        let init = self.session.start()?;
        let challenge = self.round_trip(&init).await?;
        let evidence = self.session.on_challenge(&challenge)?;
        let result = self.round_trip(&evidence).await?;
        self.session.on_attest_result(&result)
    }

    /// KEYGENの3ラウンドを行い、最終鍵を返す。
    pub async fn keygen(&mut self, identity: &str) -> Result<DecryptionKey, ProtocolError> {
        let request = self.session.begin_keygen(identity)?;
        let reply = self.round_trip(&request).await?;
        self.session.finish_keygen(&reply)
    }

    /// 証明を送り、ゲートの判定を受け取る。
    pub async fn key_request(&mut self, proof_bytes: Vec<u8>) -> Result<GateDecision, ProtocolError> {
        let request = self.session.key_request(proof_bytes)?;
        let reply = self.round_trip(&request).await?;
        self.session.on_key_request_reply(&reply)
    }

    /// EXITを送って接続を閉じる。
    pub async fn close(mut self) -> Result<(), ProtocolError> {
        let exit = self.session.close();
        write_envelope(&mut self.stream, &exit).await?;
        self.stream.shutdown().await?;
        Ok(())
    }
}
