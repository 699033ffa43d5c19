//! # UDP endpoint
//!
//! Wires the pure sender/receiver machines to a `tokio` UDP socket. One
//! driver task exclusively owns the transport state: datagram arrival,
//! timer expiry, and application-initiated sends all execute serially on it,
//! so the machines never see concurrent mutation.
//!
//! The application talks to the driver through an [`Endpoint`] handle:
//! `send`/`send_control` enqueue bytes, and two bounded pull streams (one
//! data, one control) yield the reassembled byte stream in order. The
//! retransmission timer is a deadline the driver sleeps on between events,
//! so at most one timer is ever armed.
//!
//! If the endpoint is built without a remote address it latches the first
//! observed source as its peer and addresses all outbound traffic there.

use bytes::Bytes;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::receiver::{GbnReceiver, ReceiverEvent, Stream};
use crate::sender::{GbnSender, SenderConfig, ADVERTISED_WINDOW};
use crate::shim::{LossConfig, LossShim, ShimAction};
use crate::stats::TransportStats;
use crate::wire::{Header, Packet};

// ─── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TransportError {
    /// The endpoint shut down; anything still in flight is gone.
    #[error("transport closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ─── Configuration ──────────────────────────────────────────────────────────

/// Endpoint configuration.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Local bind address.
    pub local_addr: SocketAddr,
    /// Fixed peer; `None` latches the first observed source address.
    pub remote_addr: Option<SocketAddr>,
    /// Sender tunables (conn id, MSS, window, timer interval).
    pub sender: SenderConfig,
    /// Outbound lossy shim, for tests and profile-driven exercises.
    pub loss: Option<LossConfig>,
    /// Surface undecodable datagrams on the data stream with no header.
    /// Off by default: production endpoints drop malformed traffic.
    pub deliver_unframed: bool,
    /// Capacity of each delivery stream and of the command queue.
    pub queue_capacity: usize,
}

impl EndpointConfig {
    /// Client shape: ephemeral local port, known server address.
    pub fn client(remote_addr: SocketAddr) -> Self {
        EndpointConfig {
            local_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            remote_addr: Some(remote_addr),
            sender: SenderConfig::default(),
            loss: None,
            deliver_unframed: false,
            queue_capacity: 256,
        }
    }

    /// Server shape: fixed local port, peer latched from the first datagram.
    pub fn server(local_addr: SocketAddr) -> Self {
        EndpointConfig {
            local_addr,
            remote_addr: None,
            sender: SenderConfig::default(),
            loss: None,
            deliver_unframed: false,
            queue_capacity: 256,
        }
    }
}

// ─── Delivery ───────────────────────────────────────────────────────────────

/// One in-order delivery from the peer.
#[derive(Debug, Clone)]
pub struct Delivered {
    /// Decoded header; `None` only for unframed passthrough bytes.
    pub header: Option<Header>,
    pub payload: Bytes,
}

/// Pull side of one delivery stream. There is one current reader per stream.
pub struct StreamReader {
    rx: mpsc::Receiver<Delivered>,
}

impl StreamReader {
    /// Await the next in-order delivery. `None` once the endpoint is closed
    /// and the queue is drained.
    pub async fn recv(&mut self) -> Option<Delivered> {
        self.rx.recv().await
    }

    /// Non-blocking variant, for draining already-queued deliveries.
    pub fn try_recv(&mut self) -> Option<Delivered> {
        self.rx.try_recv().ok()
    }
}

// ─── Endpoint handle ────────────────────────────────────────────────────────

enum Command {
    Send(Bytes),
    SendControl(Bytes),
    Shutdown,
}

/// Handle to a running endpoint driver.
pub struct Endpoint {
    cmd_tx: mpsc::Sender<Command>,
    /// In-order data stream from the peer.
    pub data: StreamReader,
    /// In-order control-line stream from the peer.
    pub control: StreamReader,
    stats_rx: watch::Receiver<TransportStats>,
    local_addr: SocketAddr,
}

impl Endpoint {
    /// Bind the local socket and start the driver task.
    pub async fn bind(config: EndpointConfig) -> Result<Endpoint, TransportError> {
        let socket = UdpSocket::bind(config.local_addr).await?;
        let local_addr = socket.local_addr()?;

        let (cmd_tx, cmd_rx) = mpsc::channel(config.queue_capacity);
        let (data_tx, data_rx) = mpsc::channel(config.queue_capacity);
        let (control_tx, control_rx) = mpsc::channel(config.queue_capacity);
        let (stats_tx, stats_rx) = watch::channel(TransportStats::default());

        let driver = Driver {
            socket: Arc::new(socket),
            peer: config.remote_addr,
            conn_id: config.sender.conn_id,
            sender: GbnSender::new(config.sender),
            receiver: GbnReceiver::new(),
            shim: config.loss.map(LossShim::new),
            deliver_unframed: config.deliver_unframed,
            cmd_rx,
            data_tx,
            control_tx,
            stats_tx,
        };
        tokio::spawn(driver.run());

        info!(%local_addr, "endpoint bound");
        Ok(Endpoint {
            cmd_tx,
            data: StreamReader { rx: data_rx },
            control: StreamReader { rx: control_rx },
            stats_rx,
            local_addr,
        })
    }

    /// Queue bytes on the reliable data stream. Transmitted in append order.
    pub async fn send(&self, data: Bytes) -> Result<(), TransportError> {
        self.cmd_tx
            .send(Command::Send(data))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Queue one reliably delivered control line, interleaved with data in
    /// call order.
    pub async fn send_control(&self, line: Bytes) -> Result<(), TransportError> {
        self.cmd_tx
            .send(Command::SendControl(line))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Stop the driver. In-flight state is discarded; subsequent operations
    /// fail with [`TransportError::Closed`].
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown).await;
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Latest statistics snapshot published by the driver.
    pub fn stats(&self) -> TransportStats {
        self.stats_rx.borrow().clone()
    }
}

// ─── Driver ─────────────────────────────────────────────────────────────────

struct Driver {
    socket: Arc<UdpSocket>,
    peer: Option<SocketAddr>,
    conn_id: u32,
    sender: GbnSender,
    receiver: GbnReceiver,
    shim: Option<LossShim>,
    deliver_unframed: bool,
    cmd_rx: mpsc::Receiver<Command>,
    data_tx: mpsc::Sender<Delivered>,
    control_tx: mpsc::Sender<Delivered>,
    stats_tx: watch::Sender<TransportStats>,
}

enum DriverEvent {
    Cmd(Command),
    Datagram(usize, SocketAddr),
    TimerFired,
    Stop,
    Noop,
}

impl Driver {
    async fn run(mut self) {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let event = {
                let timeout = self
                    .sender
                    .timer_deadline()
                    .map(|d| d.saturating_duration_since(Instant::now()));
                tokio::select! {
                    cmd = self.cmd_rx.recv() => match cmd {
                        Some(cmd) => DriverEvent::Cmd(cmd),
                        None => DriverEvent::Stop,
                    },
                    res = self.socket.recv_from(&mut buf) => match res {
                        Ok((n, from)) => DriverEvent::Datagram(n, from),
                        Err(e) => {
                            warn!(error = %e, "socket receive failed");
                            DriverEvent::Noop
                        }
                    },
                    _ = tokio::time::sleep(timeout.unwrap_or_default()), if timeout.is_some() => {
                        DriverEvent::TimerFired
                    }
                }
            };

            let now = Instant::now();
            match event {
                DriverEvent::Cmd(Command::Send(bytes)) => self.sender.send(bytes, now),
                DriverEvent::Cmd(Command::SendControl(bytes)) => {
                    self.sender.send_control(bytes, now)
                }
                DriverEvent::Cmd(Command::Shutdown) => break,
                DriverEvent::Datagram(n, from) => self.on_datagram(&buf[..n], from, now).await,
                DriverEvent::TimerFired => self.sender.on_timeout(now),
                DriverEvent::Stop => break,
                DriverEvent::Noop => {}
            }

            self.pump().await;
        }
        debug!("endpoint driver stopped");
    }

    async fn on_datagram(&mut self, datagram: &[u8], from: SocketAddr, now: Instant) {
        if self.peer.is_none() {
            debug!(%from, "latched peer address");
            self.peer = Some(from);
        }

        match Packet::decode(datagram) {
            Ok(pkt) => {
                if pkt.header.is_ack() {
                    trace!(ack = pkt.header.ack, "ack");
                    self.sender.handle_ack(pkt.header.ack, now);
                } else {
                    self.receiver.receive(pkt.header, pkt.payload);
                }
            }
            Err(e) if self.deliver_unframed => {
                trace!(error = %e, len = datagram.len(), "unframed passthrough");
                let delivered = Delivered {
                    header: None,
                    payload: Bytes::copy_from_slice(datagram),
                };
                if self.data_tx.send(delivered).await.is_err() {
                    trace!("data stream closed; passthrough dropped");
                }
            }
            Err(e) => {
                trace!(error = %e, "dropping malformed datagram");
                self.receiver.record_malformed();
            }
        }
    }

    /// Flush receiver events (deliveries, ACKs) and sender output, then
    /// publish a stats snapshot.
    async fn pump(&mut self) {
        let events: Vec<ReceiverEvent> = self.receiver.drain_events().collect();
        for event in events {
            match event {
                ReceiverEvent::Deliver {
                    stream,
                    header,
                    payload,
                } => {
                    let delivered = Delivered {
                        header: Some(header),
                        payload,
                    };
                    let tx = match stream {
                        Stream::Data => &self.data_tx,
                        Stream::Control => &self.control_tx,
                    };
                    if tx.send(delivered).await.is_err() {
                        trace!("delivery stream closed; dropping");
                    }
                }
                ReceiverEvent::SendAck { ack } => {
                    let datagram = Packet::ack(self.conn_id, ack, ADVERTISED_WINDOW).encode();
                    self.transmit(datagram).await;
                }
            }
        }

        let outgoing: Vec<Bytes> = self.sender.drain_output().collect();
        for datagram in outgoing {
            self.transmit(datagram).await;
        }

        self.stats_tx.send_replace(self.snapshot());
    }

    async fn transmit(&mut self, datagram: Bytes) {
        let Some(peer) = self.peer else {
            trace!("no peer yet; dropping outbound datagram");
            return;
        };

        let action = match self.shim.as_mut() {
            Some(shim) => shim.plan(),
            None => ShimAction::Deliver(Duration::ZERO),
        };
        match action {
            ShimAction::Drop => {
                trace!(len = datagram.len(), "shim dropped outbound datagram");
            }
            ShimAction::Deliver(delay) if delay.is_zero() => {
                if let Err(e) = self.socket.send_to(&datagram, peer).await {
                    warn!(error = %e, "send failed");
                }
            }
            ShimAction::Deliver(delay) => {
                // The shim only reschedules the sendto; boundaries and bytes
                // are untouched.
                let socket = self.socket.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = socket.send_to(&datagram, peer).await;
                });
            }
        }
    }

    fn snapshot(&self) -> TransportStats {
        TransportStats {
            sender: self.sender.stats().clone(),
            receiver: self.receiver.stats().clone(),
            shim_dropped: self.shim.as_ref().map(|s| s.dropped()).unwrap_or(0),
        }
    }
}
