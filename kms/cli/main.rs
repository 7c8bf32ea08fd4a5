/// `kms` command line: runs the server, or talks to a running one.

mod client;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use directories::ProjectDirs;
use kms_engine::logging::init_logging;
use kms_engine::{Kms, KmsConfig};
use kms_server::ServerConfig;
use serde_json::{Value, json};
use tracing::info;

use client::KmsClient;

#[derive(Parser, Debug)]
#[command(name = "kms", version, about = "Node key management service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP server
    Server {
        #[command(subcommand)]
        command: ServerCommands,
    },
    /// Manage keys on a running server
    Key {
        #[command(flatten)]
        client: ClientArgs,
        #[command(subcommand)]
        command: KeyCommands,
    },
    /// Manage secrets on a running server
    Secret {
        #[command(flatten)]
        client: ClientArgs,
        #[command(subcommand)]
        command: SecretCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ServerCommands {
    Start(ServerStartArgs),
}

#[derive(Args, Debug)]
struct ServerStartArgs {
    #[arg(long, env = "KMS_ADDR", default_value = "0.0.0.0:8200")]
    addr: SocketAddr,

    /// Defaults to the platform data directory
    #[arg(long, env = "KMS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Require this key on every API request
    #[arg(long, env = "KMS_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Keep all state in memory (lost on exit)
    #[arg(long)]
    in_memory: bool,

    /// Also write daily rolling log files here
    #[arg(long, env = "KMS_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[arg(long)]
    log_json: bool,

    #[arg(long, default_value_t = 30)]
    request_timeout_secs: u64,

    #[arg(long, env = "KMS_CORS_ORIGIN", default_value = "*")]
    cors_origin: String,

    #[arg(long)]
    disable_mpc: bool,

    #[arg(long)]
    disable_secrets: bool,

    /// 0 disables background compaction
    #[arg(long, default_value_t = 300)]
    compaction_interval_secs: u64,

    #[arg(long, default_value_t = 300)]
    signing_expiry_secs: u64,
}

#[derive(Args, Debug)]
struct ClientArgs {
    #[arg(long, env = "KMS_SERVER", default_value = "http://127.0.0.1:8200")]
    server: String,

    #[arg(long, env = "KMS_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[derive(Subcommand, Debug)]
enum KeyCommands {
    Create {
        #[arg(long)]
        name: String,
        /// aes-256-gcm, rsa-4096, ecc-nist-p256, ed25519, rsa-3072, ecdsa-p384, ...
        #[arg(long, default_value = "aes-256-gcm")]
        algorithm: String,
        /// encrypt-decrypt or sign-verify; derived from the algorithm when omitted
        #[arg(long)]
        usage: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        project_id: String,
    },
    List,
    Get {
        id: String,
    },
    Delete {
        id: String,
    },
    Rotate {
        id: String,
    },
}

#[derive(Args, Debug, Clone)]
struct SecretScopeArgs {
    #[arg(long, default_value = "")]
    environment: String,
    #[arg(long, default_value = "/")]
    path: String,
    #[arg(long, default_value = "")]
    project_id: String,
}

impl SecretScopeArgs {
    fn query(&self) -> [(&str, &str); 3] {
        [
            ("environment", self.environment.as_str()),
            ("secretPath", self.path.as_str()),
            ("workspaceId", self.project_id.as_str()),
        ]
    }
}

#[derive(Subcommand, Debug)]
enum SecretCommands {
    Create {
        name: String,
        #[arg(long)]
        value: String,
        #[command(flatten)]
        scope: SecretScopeArgs,
        #[arg(long)]
        comment: Option<String>,
    },
    List {
        #[command(flatten)]
        scope: SecretScopeArgs,
    },
    Get {
        name: String,
        #[command(flatten)]
        scope: SecretScopeArgs,
        /// Include the decrypted value
        #[arg(long)]
        reveal: bool,
    },
    Delete {
        name: String,
        #[command(flatten)]
        scope: SecretScopeArgs,
    },
}

impl ServerStartArgs {
    fn kms_config(&self) -> anyhow::Result<KmsConfig> {
        let data_dir = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => default_data_dir()?,
        };
        Ok(KmsConfig {
            data_dir,
            in_memory: self.in_memory,
            signing_expiry: Duration::from_secs(self.signing_expiry_secs),
            ..KmsConfig::default()
        })
    }

    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            addr: self.addr,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            cors_origin: self.cors_origin.clone(),
            api_key: self.api_key.clone().filter(|k| !k.is_empty()),
            enable_secrets: !self.disable_secrets,
            enable_mpc: !self.disable_mpc,
            compaction_interval: (self.compaction_interval_secs > 0)
                .then(|| Duration::from_secs(self.compaction_interval_secs)),
        }
    }
}

fn default_data_dir() -> anyhow::Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "kms").context("failed to resolve project dirs")?;
    Ok(dirs.data_dir().to_path_buf())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Server {
            command: ServerCommands::Start(args),
        } => start_server(args).await,
        Commands::Key { client, command } => {
            let client = KmsClient::new(&client.server, client.api_key);
            print_json(&run_key_command(&client, command).await?)
        }
        Commands::Secret { client, command } => {
            let client = KmsClient::new(&client.server, client.api_key);
            print_json(&run_secret_command(&client, command).await?)
        }
    }
}

async fn start_server(args: ServerStartArgs) -> anyhow::Result<()> {
    // keep the guard alive so buffered file logs are flushed on exit
    let _guard = init_logging(args.log_dir.as_deref(), args.log_json);

    let kms_config = args.kms_config()?;
    let server_config = args.server_config();
    info!(
        data_dir = %kms_config.data_dir.display(),
        in_memory = kms_config.in_memory,
        "starting KMS"
    );

    let kms = tokio::task::spawn_blocking(move || Kms::open(&kms_config))
        .await
        .context("KMS startup task failed")?
        .context("failed to open KMS")?;

    kms_server::serve(Arc::new(kms), server_config, kms_server::shutdown_signal())
        .await
        .context("server error")?;
    info!("KMS stopped");
    Ok(())
}

async fn run_key_command(client: &KmsClient, command: KeyCommands) -> anyhow::Result<Value> {
    match command {
        KeyCommands::Create {
            name,
            algorithm,
            usage,
            description,
            project_id,
        } => {
            let body = json!({
                "name": name,
                "encryptionAlgorithm": algorithm,
                "keyUsage": usage.unwrap_or_default(),
                "description": description,
                "projectId": project_id,
            });
            client.post("/v1/kms/keys", &body).await
        }
        KeyCommands::List => client.get("/v1/kms/keys", &[]).await,
        KeyCommands::Get { id } => client.get(&format!("/v1/kms/keys/{id}"), &[]).await,
        KeyCommands::Delete { id } => client.delete(&format!("/v1/kms/keys/{id}"), &[]).await,
        KeyCommands::Rotate { id } => {
            client
                .post(&format!("/v1/kms/keys/{id}/rotate"), &json!({}))
                .await
        }
    }
}

async fn run_secret_command(client: &KmsClient, command: SecretCommands) -> anyhow::Result<Value> {
    match command {
        SecretCommands::Create {
            name,
            value,
            scope,
            comment,
        } => {
            let body = json!({
                "workspaceId": scope.project_id,
                "environment": scope.environment,
                "secretPath": scope.path,
                "secretValue": value,
                "secretComment": comment.unwrap_or_default(),
            });
            client.post(&format!("/v3/secrets/raw/{name}"), &body).await
        }
        SecretCommands::List { scope } => client.get("/v3/secrets/raw", &scope.query()).await,
        SecretCommands::Get { name, scope, reveal } => {
            let path = if reveal {
                format!("/v3/secrets/raw/{name}/value")
            } else {
                format!("/v3/secrets/raw/{name}")
            };
            client.get(&path, &scope.query()).await
        }
        SecretCommands::Delete { name, scope } => {
            client
                .delete(&format!("/v3/secrets/raw/{name}"), &scope.query())
                .await
        }
    }
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_start_flags() {
        let cli = Cli::try_parse_from([
            "kms",
            "server",
            "start",
            "--addr",
            "127.0.0.1:9000",
            "--in-memory",
            "--disable-mpc",
            "--compaction-interval-secs",
            "0",
            "--api-key",
            "k",
        ])
        .unwrap();

        let Commands::Server {
            command: ServerCommands::Start(args),
        } = cli.command
        else {
            panic!("expected server start");
        };
        let config = args.server_config();
        assert_eq!(config.addr, "127.0.0.1:9000".parse().unwrap());
        assert!(!config.enable_mpc);
        assert!(config.enable_secrets);
        assert_eq!(config.compaction_interval, None);
        assert_eq!(config.api_key.as_deref(), Some("k"));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(args.kms_config().unwrap().in_memory);
    }

    #[test]
    fn test_server_start_defaults() {
        let cli = Cli::try_parse_from(["kms", "server", "start", "--data-dir", "/tmp/kms"]).unwrap();
        let Commands::Server {
            command: ServerCommands::Start(args),
        } = cli.command
        else {
            panic!("expected server start");
        };
        assert_eq!(args.cors_origin, "*");
        assert_eq!(args.kms_config().unwrap().data_dir, PathBuf::from("/tmp/kms"));
        assert_eq!(
            args.server_config().compaction_interval,
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn test_client_subcommands_parse() {
        let cli = Cli::try_parse_from([
            "kms",
            "key",
            "--server",
            "http://kms:8200",
            "create",
            "--name",
            "signer",
            "--algorithm",
            "ed25519",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Key {
                command: KeyCommands::Create { .. },
                ..
            }
        ));

        let cli = Cli::try_parse_from([
            "kms", "secret", "get", "DB_PASSWORD", "--environment", "prod", "--reveal",
        ])
        .unwrap();
        let Commands::Secret {
            command: SecretCommands::Get { name, scope, reveal },
            ..
        } = cli.command
        else {
            panic!("expected secret get");
        };
        assert_eq!(name, "DB_PASSWORD");
        assert_eq!(scope.path, "/");
        assert!(reveal);

        assert!(Cli::try_parse_from(["kms", "secret", "create", "X"]).is_err());
    }
}
