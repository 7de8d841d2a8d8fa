//! # サブコマンドの実装

use std::path::Path;
use std::time::Duration;

use aibe_core::keyfile::{read_public_params, write_master_key};
use aibe_core::{ClientConfig, ClientConnection, ClientSession, GateDecision, StoredKey};
use aibe_crypto::aibe::{self, Aibe, Ciphertext, MasterKey};
use aibe_crypto::attestation::mock::MockAttestor;
use aibe_crypto::proof::KnowledgeProof;
use aibe_crypto::Ed25519VerifyingKey;

/// `setup`: マスター鍵を生成して保存する。
pub fn setup(out: &Path) -> anyhow::Result<()> {
    let master = MasterKey::generate();
    write_master_key(out, &master)?;
    tracing::info!(
        path = %out.display(),
        params = %master.params().fingerprint(),
        "マスター鍵を生成しました"
    );
    Ok(())
}

/// 16進数のPKG公開鍵をパースする。
pub fn parse_pkg_pubkey(hex_key: &str) -> anyhow::Result<Ed25519VerifyingKey> {
    let bytes: [u8; 32] = hex::decode(hex_key.trim())?
        .try_into()
        .map_err(|_| anyhow::anyhow!("PKG公開鍵は32バイトの16進数である必要があります"))?;
    Ok(Ed25519VerifyingKey::from_bytes(&bytes)?)
}

fn session(pkg_pubkey: Option<Ed25519VerifyingKey>) -> ClientSession {
    tracing::warn!("開発用モックAttestorでEvidenceを生成します");
    ClientSession::new(
        ClientConfig {
            pkg_verifying_key: pkg_pubkey,
            ..ClientConfig::default()
        },
        Box::new(MockAttestor::development()),
        Box::new(Aibe),
    )
}

/// `keygen`: ハンドシェイクとブラインド鍵発行を行い、復号鍵を保存する。
pub async fn keygen(
    server: &str,
    identity: &str,
    out: &Path,
    pkg_pubkey: Option<&str>,
    timeout_secs: u64,
) -> anyhow::Result<()> {
    let pkg_pubkey = pkg_pubkey.map(parse_pkg_pubkey).transpose()?;
    let timeout = Duration::from_secs(timeout_secs);

    let mut conn = ClientConnection::connect(server, session(pkg_pubkey), timeout).await?;
    conn.attest().await?;
    let key = conn.keygen(identity).await?;
    let params = conn
        .session()
        .params()
        .copied()
        .ok_or_else(|| anyhow::anyhow!("公開パラメータを受信していません"))?;
    conn.close().await?;

    let stored = StoredKey {
        identity: identity.to_string(),
        key,
        params,
    };
    stored.write(out)?;
    tracing::info!(path = %out.display(), identity, "復号鍵を保存しました");
    Ok(())
}

/// `keyreq`: 保存済みの復号鍵から所持証明を作り、ゲートの判定を表示する。
pub async fn keyreq(server: &str, key_path: &Path, timeout_secs: u64) -> anyhow::Result<()> {
    let stored = StoredKey::read(key_path)?;
    let proof = KnowledgeProof::for_key(&stored.params, &stored.identity, &stored.key)?;

    let mut conn =
        ClientConnection::connect(server, session(None), Duration::from_secs(timeout_secs))
            .await?;
    let decision = conn.key_request(proof.to_bytes()).await?;
    conn.close().await?;

    match decision {
        GateDecision::Granted => {
            tracing::info!(identity = %stored.identity, "鍵要求が受理されました");
            Ok(())
        }
        GateDecision::Denied(status) => {
            anyhow::bail!("鍵要求が拒否されました: {status}")
        }
    }
}

/// `encrypt`: 公開パラメータだけでIDに宛ててファイルを暗号化する。
pub fn encrypt(params_path: &Path, identity: &str, input: &Path, out: &Path) -> anyhow::Result<()> {
    let params = read_public_params(params_path)?;
    let plaintext = std::fs::read(input)?;
    let ciphertext = aibe::encrypt(&params, identity, &plaintext)?;
    let bytes = ciphertext.to_bytes();
    std::fs::write(out, &bytes)?;
    tracing::info!(
        identity,
        plaintext = plaintext.len(),
        ciphertext = bytes.len(),
        path = %out.display(),
        "暗号化しました"
    );
    Ok(())
}

/// `decrypt`: 保存済みの復号鍵で暗号文ファイルを復号する。
pub fn decrypt(key_path: &Path, input: &Path, out: &Path) -> anyhow::Result<()> {
    let stored = StoredKey::read(key_path)?;
    let ciphertext = Ciphertext::from_bytes(&std::fs::read(input)?)?;
    let plaintext = aibe::decrypt(&stored.params, &stored.key, &ciphertext)?;
    std::fs::write(out, &plaintext)?;
    tracing::info!(
        identity = %stored.identity,
        size = plaintext.len(),
        path = %out.display(),
        "復号しました"
    );
    Ok(())
}
