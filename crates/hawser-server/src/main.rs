//! hawser file server daemon.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use hawser_server::config::ServerConfig;

/// hawser reliable-UDP file server.
#[derive(Parser, Debug)]
#[command(name = "hawser-server", about = "hawser reliable-UDP file server")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the UDP bind address.
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Override the served files directory.
    #[arg(long)]
    files_dir: Option<PathBuf>,

    /// Outbound drop probability, for loss exercises.
    #[arg(long)]
    loss: Option<f64>,

    /// Upper bound of the shim's delivery jitter in milliseconds.
    #[arg(long)]
    max_delay_ms: Option<u64>,

    /// Surface undecodable datagrams on the data stream (debug).
    #[arg(long, default_value_t = false)]
    deliver_unframed: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(dir) = cli.files_dir {
        config.files_dir = dir;
    }
    if let Some(loss) = cli.loss {
        config.loss_rate = loss;
    }
    if let Some(delay) = cli.max_delay_ms {
        config.max_delay_ms = delay;
    }
    if cli.deliver_unframed {
        config.deliver_unframed = true;
    }

    hawser_server::run(config).await
}
