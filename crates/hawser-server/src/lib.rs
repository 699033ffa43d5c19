//! # hawser-server
//!
//! The file-serving side of hawser: one UDP endpoint, one latched peer, and
//! a protocol session that answers `LIST` / `DELETE` / `GET` / `PUT` over
//! the reliable control and data streams.
//!
//! - [`config`] — TOML configuration with CLI overrides
//! - [`store`] — flat on-disk file store with offset-addressed uploads
//! - [`session`] — per-peer protocol state machine

pub mod config;
pub mod session;
pub mod store;

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use hawser_transport::endpoint::{Delivered, Endpoint, EndpointConfig};

use crate::config::ServerConfig;
use crate::session::{Action, Session};
use crate::store::FileStore;

/// A running server: endpoint bound, serve loop spawned.
pub struct Server {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Server {
    /// Bind the endpoint and start serving.
    pub async fn start(config: ServerConfig) -> anyhow::Result<Server> {
        let store = FileStore::open(&config.files_dir)?;

        let mut endpoint_config = EndpointConfig::server(config.bind_addr);
        endpoint_config.loss = config.loss();
        endpoint_config.deliver_unframed = config.deliver_unframed;
        let endpoint = Endpoint::bind(endpoint_config).await?;
        let local_addr = endpoint.local_addr();

        info!(
            %local_addr,
            files_dir = %config.files_dir.display(),
            "server listening"
        );
        let session = Session::new(store);
        let task = tokio::spawn(serve(endpoint, session));
        Ok(Server { local_addr, task })
    }

    /// The actual bound address (useful with a port-0 bind).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the serve loop to end.
    pub async fn join(self) -> anyhow::Result<()> {
        self.task.await?;
        Ok(())
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Bind and serve until the transport closes.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    Server::start(config).await?.join().await
}

enum Incoming {
    Control(Delivered),
    Data(Delivered),
}

async fn serve(mut endpoint: Endpoint, mut session: Session) {
    loop {
        let incoming = tokio::select! {
            c = endpoint.control.recv() => match c {
                Some(d) => Incoming::Control(d),
                None => break,
            },
            d = endpoint.data.recv() => match d {
                Some(d) => Incoming::Data(d),
                None => break,
            },
        };

        let actions = match incoming {
            Incoming::Control(d) => session.on_control_bytes(&d.payload),
            Incoming::Data(d) => session.on_data_bytes(&d.payload),
        };

        for action in actions {
            let result = match action {
                Action::Control(text) => endpoint.send_control(Bytes::from(text)).await,
                Action::Data(frame) => endpoint.send(frame).await,
            };
            if result.is_err() {
                warn!("transport closed while replying");
                return;
            }
        }
    }
    debug!("serve loop ended");
}
