//! # A-IBE PKG CLI
//!
//! ## 使い方
//!
//! ```bash
//! aibe-cli setup --out master.json
//! aibe-cli keygen --server 127.0.0.1:12333 --identity alice@example.com --out alice.json
//! aibe-cli keyreq --server 127.0.0.1:12333 --key alice.json
//! aibe-cli encrypt --params alice.json --identity bob@example.com --input msg.txt --out msg.ct
//! aibe-cli decrypt --key bob.json --input msg.ct --out msg.txt
//! ```

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "aibe-cli")]
#[command(version)]
#[command(about = "Attestation付きブラインド鍵発行クライアント", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// マスター鍵を生成してファイルに保存する
    Setup {
        /// 出力先のマスター鍵ファイル
        #[arg(long)]
        out: PathBuf,
    },
    /// PKGからブラインド鍵発行で復号鍵を取得する
    Keygen {
        /// PKGのアドレス（host:port）
        #[arg(long)]
        server: String,
        /// 鍵を取得するID
        #[arg(long)]
        identity: String,
        /// 復号鍵の出力先
        #[arg(long)]
        out: PathBuf,
        /// ピン留めするPKGのCHALLENGE署名公開鍵（16進数）
        #[arg(long)]
        pkg_pubkey: Option<String>,
        /// 応答待ちのタイムアウト秒数
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
    /// 保存済みの復号鍵の所持を証明し、ゲートの判定を受け取る
    Keyreq {
        /// PKGのアドレス（host:port）
        #[arg(long)]
        server: String,
        /// 復号鍵ファイル
        #[arg(long)]
        key: PathBuf,
        /// 応答待ちのタイムアウト秒数
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
    /// IDに宛ててファイルを暗号化する
    Encrypt {
        /// 公開パラメータを含む鍵ファイル（マスター鍵・復号鍵のどちらでも可）
        #[arg(long)]
        params: PathBuf,
        /// 宛先のID
        #[arg(long)]
        identity: String,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// 復号鍵で暗号文ファイルを復号する
    Decrypt {
        /// 復号鍵ファイル
        #[arg(long)]
        key: PathBuf,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    match Cli::parse().command {
        Command::Setup { out } => commands::setup(&out),
        Command::Keygen {
            server,
            identity,
            out,
            pkg_pubkey,
            timeout_secs,
        } => {
            commands::keygen(
                &server,
                &identity,
                &out,
                pkg_pubkey.as_deref(),
                timeout_secs,
            )
            .await
        }
        Command::Keyreq {
            server,
            key,
            timeout_secs,
        } => commands::keyreq(&server, &key, timeout_secs).await,
        Command::Encrypt {
            params,
            identity,
            input,
            out,
        } => commands::encrypt(&params, &identity, &input, &out),
        Command::Decrypt { key, input, out } => commands::decrypt(&key, &input, &out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_keygen() {
        let cli = Cli::try_parse_from([
            "aibe-cli",
            "keygen",
            "--server",
            "127.0.0.1:12333",
            "--identity",
            "alice",
            "--out",
            "alice.json",
        ])
        .unwrap();
        match cli.command {
            Command::Keygen {
                identity,
                pkg_pubkey,
                timeout_secs,
                ..
            } => {
                assert_eq!(identity, "alice");
                assert!(pkg_pubkey.is_none());
                assert_eq!(timeout_secs, 30);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_decrypt() {
        let cli = Cli::try_parse_from([
            "aibe-cli", "decrypt", "--key", "bob.json", "--input", "msg.ct", "--out", "msg.txt",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Decrypt { .. }));
        assert!(Cli::try_parse_from(["aibe-cli", "encrypt", "--identity", "bob"]).is_err());
    }

    #[test]
    fn test_keyreq_requires_key() {
        assert!(Cli::try_parse_from(["aibe-cli", "keyreq", "--server", "x:1"]).is_err());
    }
}
