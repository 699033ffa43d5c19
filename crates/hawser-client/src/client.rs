//! # Client connection and transfer operations
//!
//! One [`Client`] owns one transport endpoint. Commands go out on the
//! control stream; replies are `END`-terminated line blocks read back from
//! it; GET payload arrives as CRC-tagged frames on the data stream and is
//! reassembled here.

use bytes::Bytes;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use hawser_proto::command::{Command, LineBuffer, Reply, END_LINE};
use hawser_proto::frame::{encode_frame, FrameDecoder, FrameError, FrameEvent, CHUNK_SIZE};
use hawser_transport::endpoint::{Endpoint, EndpointConfig, TransportError};
use hawser_transport::shim::LossConfig;
use hawser_transport::stats::TransportStats;

// ─── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("remote file not found")]
    NotFound,
    #[error("server error: {0}")]
    Remote(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("{0} data chunks failed CRC verification")]
    ChunkCrc(u64),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

// ─── Configuration & outcomes ───────────────────────────────────────────────

/// Client connection parameters.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address.
    pub server_addr: SocketAddr,
    /// Optional outbound lossy shim, for loss exercises.
    pub loss: Option<LossConfig>,
    /// Bytes per upload chunk.
    pub chunk_size: usize,
}

impl ClientConfig {
    pub fn new(server_addr: SocketAddr) -> Self {
        ClientConfig {
            server_addr,
            loss: None,
            chunk_size: CHUNK_SIZE,
        }
    }
}

/// Result of a completed upload.
#[derive(Debug, Clone)]
pub struct PutOutcome {
    /// Bytes actually transmitted this session (size minus resume offset).
    pub bytes_sent: u64,
    /// Offset the server asked us to resume from.
    pub resumed_at: u64,
    /// Chunks the server rejected with `CRCERR`.
    pub crc_rejected: u64,
    pub elapsed: Duration,
}

/// Result of a completed download.
#[derive(Debug, Clone)]
pub struct GetOutcome {
    /// Bytes written to the local file this session.
    pub bytes_written: u64,
    /// Local offset the download started at.
    pub resumed_at: u64,
    pub elapsed: Duration,
}

/// Progress hook: (bytes transferred so far, total when known).
pub type ProgressFn = dyn FnMut(u64, Option<u64>) + Send;

// ─── Client ─────────────────────────────────────────────────────────────────

enum Incoming {
    Control(Bytes),
    Data(Bytes),
}

/// A connected transfer client.
pub struct Client {
    endpoint: Endpoint,
    lines: LineBuffer,
    chunk_size: usize,
    progress: Option<Box<ProgressFn>>,
}

impl Client {
    /// Bind an ephemeral local port addressed at the server.
    pub async fn connect(config: ClientConfig) -> Result<Client, ClientError> {
        let mut endpoint_config = EndpointConfig::client(config.server_addr);
        endpoint_config.loss = config.loss;
        let endpoint = Endpoint::bind(endpoint_config).await?;
        debug!(local = %endpoint.local_addr(), server = %config.server_addr, "client connected");
        Ok(Client {
            endpoint,
            lines: LineBuffer::new(),
            chunk_size: config.chunk_size,
            progress: None,
        })
    }

    /// Install a progress callback invoked as transfers advance.
    pub fn set_progress(&mut self, f: impl FnMut(u64, Option<u64>) + Send + 'static) {
        self.progress = Some(Box::new(f));
    }

    /// Transport-level statistics for this connection.
    pub fn transport_stats(&self) -> TransportStats {
        self.endpoint.stats()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    // ─── Operations ─────────────────────────────────────────────────────

    /// Names of the files the server holds.
    pub async fn list(&mut self) -> Result<Vec<String>, ClientError> {
        self.send_command(Command::List).await?;
        let block = self.await_reply().await?;
        if let Some(Reply::Error(reason)) = block.first().and_then(|l| Reply::parse(l)) {
            return Err(ClientError::Remote(reason));
        }
        Ok(block)
    }

    /// Delete a remote file.
    pub async fn delete(&mut self, name: &str) -> Result<(), ClientError> {
        self.send_command(Command::Delete {
            name: name.to_owned(),
        })
        .await?;
        let block = self.await_reply().await?;
        match Self::expect_status(&block)? {
            Reply::Ok => Ok(()),
            Reply::NotFound => Err(ClientError::NotFound),
            Reply::Error(reason) => Err(ClientError::Remote(reason)),
            other => Err(ClientError::Protocol(format!("unexpected reply {other:?}"))),
        }
    }

    /// Upload a local file. The server's `OFFSET` reply decides where the
    /// upload starts, so an interrupted transfer resumes automatically.
    pub async fn put(&mut self, local: &Path, remote: &str) -> Result<PutOutcome, ClientError> {
        let started = Instant::now();
        let size = std::fs::metadata(local)?.len();

        self.send_command(Command::Put {
            name: remote.to_owned(),
            size,
        })
        .await?;

        let block = self.await_reply().await?;
        let offset = match Self::expect_status(&block)? {
            Reply::Offset(n) => n,
            Reply::Error(reason) => return Err(ClientError::Remote(reason)),
            other => {
                return Err(ClientError::Protocol(format!(
                    "expected OFFSET, got {other:?}"
                )))
            }
        };
        if offset > size {
            return Err(ClientError::Protocol(format!(
                "server offset {offset} beyond local size {size}"
            )));
        }
        info!(local = %local.display(), remote, size, offset, "upload starting");

        let mut file = File::open(local)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut sent = offset;
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let n = read_full(&mut file, &mut buf)?;
            if n == 0 {
                break;
            }
            self.endpoint.send(encode_frame(&buf[..n])).await?;
            sent += n as u64;
            if let Some(cb) = self.progress.as_mut() {
                cb(sent, Some(size));
            }
        }

        self.send_command(Command::Done).await?;

        // The server answers every rejected chunk with its own CRCERR block
        // before the final status arrives.
        let mut crc_rejected = 0u64;
        loop {
            let block = self.await_reply().await?;
            match Self::expect_status(&block)? {
                Reply::CrcErr => {
                    warn!("server rejected a chunk (CRC)");
                    crc_rejected += 1;
                }
                Reply::Ok => {
                    return Ok(PutOutcome {
                        bytes_sent: sent - offset,
                        resumed_at: offset,
                        crc_rejected,
                        elapsed: started.elapsed(),
                    })
                }
                Reply::Error(reason) => return Err(ClientError::Remote(reason)),
                other => {
                    return Err(ClientError::Protocol(format!("unexpected reply {other:?}")))
                }
            }
        }
    }

    /// Download a remote file into `local`. With `resume`, the transfer
    /// starts at the current local size and appends; otherwise the local
    /// file is rewritten from scratch.
    pub async fn get(
        &mut self,
        remote: &str,
        local: &Path,
        resume: bool,
    ) -> Result<GetOutcome, ClientError> {
        let started = Instant::now();
        let offset = if resume {
            std::fs::metadata(local).map(|m| m.len()).unwrap_or(0)
        } else {
            0
        };

        self.send_command(Command::Get {
            name: remote.to_owned(),
            offset,
        })
        .await?;
        info!(remote, local = %local.display(), offset, "download starting");

        let mut decoder = FrameDecoder::new();
        let mut sink: Option<File> = None;
        let mut written = 0u64;
        let mut crc_bad = 0u64;
        let mut status: Option<Reply> = None;
        let mut done = false;

        while !done {
            match self.next_incoming().await? {
                Incoming::Control(bytes) => {
                    self.lines.push(&bytes);
                    while let Some(line) = self.lines.next_line() {
                        if line == END_LINE {
                            match status.take() {
                                Some(Reply::Done) => {
                                    done = true;
                                    break;
                                }
                                Some(Reply::NotFound) => return Err(ClientError::NotFound),
                                Some(Reply::Error(reason)) => {
                                    return Err(ClientError::Remote(reason))
                                }
                                Some(other) => {
                                    return Err(ClientError::Protocol(format!(
                                        "unexpected reply {other:?}"
                                    )))
                                }
                                None => {
                                    return Err(ClientError::Protocol(
                                        "empty reply block".into(),
                                    ))
                                }
                            }
                        }
                        status = Reply::parse(&line);
                    }
                }
                Incoming::Data(bytes) => {
                    decoder.push(&bytes);
                    written += self.drain_chunks(
                        &mut decoder,
                        &mut sink,
                        local,
                        offset,
                        resume,
                        written,
                        &mut crc_bad,
                    )?;
                }
            }
        }

        // Data queued before the DONE control line may still be unread.
        while let Some(delivered) = self.endpoint.data.try_recv() {
            decoder.push(&delivered.payload);
        }
        written += self.drain_chunks(
            &mut decoder,
            &mut sink,
            local,
            offset,
            resume,
            written,
            &mut crc_bad,
        )?;

        if crc_bad > 0 {
            return Err(ClientError::ChunkCrc(crc_bad));
        }
        // A zero-chunk download (empty file, or nothing past the resume
        // offset) still materializes the local file.
        let sink = match sink {
            Some(f) => f,
            None => open_sink(local, offset, resume)?,
        };
        sink.sync_all()?;

        info!(remote, written, offset, "download complete");
        Ok(GetOutcome {
            bytes_written: written,
            resumed_at: offset,
            elapsed: started.elapsed(),
        })
    }

    // ─── Internals ──────────────────────────────────────────────────────

    async fn send_command(&mut self, cmd: Command) -> Result<(), ClientError> {
        self.endpoint
            .send_control(Bytes::from(cmd.to_string()))
            .await?;
        Ok(())
    }

    /// Collect control lines up to the `END` terminator.
    async fn await_reply(&mut self) -> Result<Vec<String>, ClientError> {
        let mut block = Vec::new();
        loop {
            while let Some(line) = self.lines.next_line() {
                if line == END_LINE {
                    return Ok(block);
                }
                block.push(line);
            }
            let delivered = self
                .endpoint
                .control
                .recv()
                .await
                .ok_or(ClientError::Transport(TransportError::Closed))?;
            self.lines.push(&delivered.payload);
        }
    }

    fn expect_status(block: &[String]) -> Result<Reply, ClientError> {
        let first = block
            .first()
            .ok_or_else(|| ClientError::Protocol("empty reply block".into()))?;
        Reply::parse(first)
            .ok_or_else(|| ClientError::Protocol(format!("unexpected reply: {first}")))
    }

    async fn next_incoming(&mut self) -> Result<Incoming, ClientError> {
        tokio::select! {
            c = self.endpoint.control.recv() => c
                .map(|d| Incoming::Control(d.payload))
                .ok_or(ClientError::Transport(TransportError::Closed)),
            d = self.endpoint.data.recv() => d
                .map(|d| Incoming::Data(d.payload))
                .ok_or(ClientError::Transport(TransportError::Closed)),
        }
    }

    /// Write every decodable chunk to the local sink; returns bytes written.
    #[allow(clippy::too_many_arguments)]
    fn drain_chunks(
        &mut self,
        decoder: &mut FrameDecoder,
        sink: &mut Option<File>,
        local: &Path,
        offset: u64,
        resume: bool,
        already_written: u64,
        crc_bad: &mut u64,
    ) -> Result<u64, ClientError> {
        let mut written = 0u64;
        loop {
            match decoder.next_event() {
                Ok(Some(FrameEvent::Chunk(chunk))) => {
                    if sink.is_none() {
                        *sink = Some(open_sink(local, offset, resume)?);
                    }
                    if let Some(file) = sink.as_mut() {
                        file.write_all(&chunk)?;
                    }
                    written += chunk.len() as u64;
                    if let Some(cb) = self.progress.as_mut() {
                        cb(offset + already_written + written, None);
                    }
                }
                Ok(Some(FrameEvent::CrcMismatch {
                    declared,
                    computed,
                    len,
                })) => {
                    warn!(declared, computed, len, "downloaded chunk failed CRC");
                    *crc_bad += 1;
                }
                Ok(None) => return Ok(written),
                Err(FrameError::BadHeader(header)) => {
                    return Err(ClientError::Protocol(format!("bad DATA: {header}")))
                }
            }
        }
    }
}

/// Open the local download sink: truncate for a fresh transfer, or keep the
/// first `offset` bytes for a resume.
fn open_sink(local: &Path, offset: u64, resume: bool) -> io::Result<File> {
    if resume && offset > 0 {
        let mut file = OpenOptions::new().write(true).create(true).open(local)?;
        file.set_len(offset)?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(file)
    } else {
        File::create(local)
    }
}

/// Read until the buffer is full or EOF.
fn read_full(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
