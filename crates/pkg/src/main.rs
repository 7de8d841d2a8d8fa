//! # A-IBE PKGサーバー
//!
//! Attestation済みのエンクレーブにだけブラインド部分鍵を発行する鍵生成サーバー。
//!
//! ## 起動シーケンス
//! 1. 環境変数から設定を読み込む
//! 2. マスター鍵を読み込む（未設定なら生成）
//! 3. CHALLENGE署名鍵とEvidence検証用Attestorを用意する
//! 4. TCPで待ち受け、接続ごとにタスクを起動する

mod config;
mod connection;
mod error;

use std::sync::Arc;

use aibe_core::keyfile::read_master_key;
use aibe_core::ServerContext;
use aibe_crypto::aibe::MasterKey;
use aibe_crypto::Ed25519SigningKey;

use crate::config::PkgConfig;
use crate::error::PkgError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = PkgConfig::from_env()?;

    let master = match &config.master_key_path {
        Some(path) => {
            let master = read_master_key(path).map_err(PkgError::from)?;
            tracing::info!(path = %path.display(), "マスター鍵を読み込みました");
            master
        }
        None => {
            tracing::warn!("MASTER_KEY_PATHが未設定です。マスター鍵を生成します（開発環境用、再起動で失われます）");
            MasterKey::generate()
        }
    };
    tracing::info!(params = %master.params().fingerprint(), "公開パラメータ");

    let signing_key = match &config.signing_key {
        Some(key) => key.clone(),
        None => {
            tracing::warn!("PKG_SIGNING_KEYが未設定です。ランダムキーを生成します（開発環境用）");
            Ed25519SigningKey::generate(&mut rand::rngs::OsRng)
        }
    };
    tracing::info!(
        pkg_pubkey = %hex::encode(signing_key.verifying_key().to_bytes()),
        "CHALLENGE署名用公開鍵"
    );

    if config.mock_mode {
        tracing::warn!("MOCK_MODEで起動します。本番環境では使用しないでください");
    }
    let ctx = Arc::new(ServerContext::new(
        master,
        Box::new(config.attestor()),
        signing_key,
    ));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!("PKGサーバーを {} で起動します", config.listen_addr);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "接続の受け付けに失敗しました");
                continue;
            }
        };
        let ctx = Arc::clone(&ctx);
        let timeout = config.session_timeout;
        tokio::spawn(async move {
            tracing::info!(%peer, "接続を受け付けました");
            match connection::serve_connection(stream, ctx, timeout).await {
                Ok(()) => tracing::info!(%peer, "接続を終了しました"),
                Err(e) => tracing::warn!(%peer, error = %e, "接続がエラーで終了しました"),
            }
        });
    }
}
