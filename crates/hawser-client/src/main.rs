//! hawser file-transfer client CLI.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use hawser_client::client::{Client, ClientConfig};
use hawser_client::metrics::TransferMetrics;
use hawser_transport::shim::LossConfig;

/// hawser reliable-UDP file transfer client.
#[derive(Parser, Debug)]
#[command(name = "hawser", about = "hawser reliable-UDP file transfer client")]
struct Cli {
    /// Server address.
    #[arg(long, default_value = "127.0.0.1:9000")]
    server: SocketAddr,

    /// Outbound drop probability, for loss exercises.
    #[arg(long)]
    loss: Option<f64>,

    /// Upper bound of the shim's delivery jitter in milliseconds.
    #[arg(long, default_value_t = 50)]
    max_delay_ms: u64,

    /// Shim RNG seed.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Print a JSON metrics report when done.
    #[arg(long, default_value_t = false)]
    metrics: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List files on the server.
    List,
    /// Delete a remote file.
    Delete { name: String },
    /// Download a remote file.
    Get {
        remote: String,
        /// Local destination (defaults to the remote name).
        local: Option<PathBuf>,
        /// Resume from the current local size.
        #[arg(long, default_value_t = false)]
        resume: bool,
    },
    /// Upload a local file; resumes automatically from the server offset.
    Put {
        local: PathBuf,
        /// Remote name (defaults to the local file name).
        remote: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::new(cli.server);
    if let Some(loss_rate) = cli.loss {
        config.loss = Some(LossConfig {
            loss_rate,
            max_delay: Duration::from_millis(cli.max_delay_ms),
            seed: cli.seed,
        });
    }

    let mut client = Client::connect(config).await?;
    let mut metrics = TransferMetrics::new();

    match cli.command {
        Cmd::List => {
            for name in client.list().await? {
                println!("{name}");
            }
        }
        Cmd::Delete { name } => {
            client.delete(&name).await?;
            info!(name = %name, "deleted");
        }
        Cmd::Get {
            remote,
            local,
            resume,
        } => {
            let local = local.unwrap_or_else(|| PathBuf::from(&remote));
            let outcome = client.get(&remote, &local, resume).await?;
            metrics.record_bytes(outcome.bytes_written);
            metrics.record_delay(outcome.elapsed);
            info!(
                remote = %remote,
                local = %local.display(),
                bytes = outcome.bytes_written,
                resumed_at = outcome.resumed_at,
                "download complete"
            );
        }
        Cmd::Put { local, remote } => {
            let remote = match remote {
                Some(name) => name,
                None => local
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .context("local path has no file name")?,
            };
            let outcome = client.put(&local, &remote).await?;
            metrics.record_bytes(outcome.bytes_sent);
            metrics.record_delay(outcome.elapsed);
            info!(
                local = %local.display(),
                remote = %remote,
                bytes = outcome.bytes_sent,
                resumed_at = outcome.resumed_at,
                "upload complete"
            );
        }
    }

    if cli.metrics {
        metrics.set_retransmissions(client.transport_stats().sender.retransmissions);
        println!("{}", serde_json::to_string_pretty(&metrics.report())?);
    }
    Ok(())
}
