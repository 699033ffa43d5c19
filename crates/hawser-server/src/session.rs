//! # Server session
//!
//! Protocol state machine for one peer: parses control lines into commands,
//! feeds data-stream bytes through the frame decoder during an active PUT,
//! and produces the control replies and data frames to send back.
//!
//! Error policy: a chunk CRC mismatch answers `CRCERR` and framing continues;
//! a malformed frame header ends the upload with `ERROR bad DATA` but keeps
//! the session alive; `DONE` without an active PUT and unknown commands are
//! answered with `ERROR <reason>` and the session is preserved.

use bytes::Bytes;
use tracing::{info, warn};

use hawser_proto::command::{encode_listing, Command, LineBuffer, Reply};
use hawser_proto::frame::{encode_frame, FrameDecoder, FrameError, FrameEvent};

use crate::store::{FileStore, StoreError, UploadSink};

// ─── Actions ────────────────────────────────────────────────────────────────

/// Something the session wants sent to the peer.
#[derive(Debug)]
pub enum Action {
    /// Control-line text (already `END`-terminated where applicable).
    Control(String),
    /// One encoded data frame.
    Data(Bytes),
}

// ─── Session ────────────────────────────────────────────────────────────────

struct Upload {
    name: String,
    declared_size: u64,
    offset: u64,
    received: u64,
    sink: UploadSink,
}

/// Per-peer protocol state.
pub struct Session {
    store: FileStore,
    lines: LineBuffer,
    frames: FrameDecoder,
    upload: Option<Upload>,
}

impl Session {
    pub fn new(store: FileStore) -> Self {
        Session {
            store,
            lines: LineBuffer::new(),
            frames: FrameDecoder::new(),
            upload: None,
        }
    }

    /// Whether a PUT is currently in progress.
    pub fn uploading(&self) -> bool {
        self.upload.is_some()
    }

    /// Feed bytes from the control stream; returns the actions to send.
    pub fn on_control_bytes(&mut self, bytes: &[u8]) -> Vec<Action> {
        self.lines.push(bytes);
        let mut actions = Vec::new();
        while let Some(line) = self.lines.next_line() {
            if line.is_empty() {
                continue;
            }
            match Command::parse(&line) {
                Ok(cmd) => self.dispatch(cmd, &mut actions),
                Err(e) => {
                    warn!(line = %line, error = %e, "rejected control line");
                    actions.push(Action::Control(Reply::Error(e.to_string()).encode()));
                }
            }
        }
        actions
    }

    /// Feed bytes from the data stream; returns the actions to send.
    pub fn on_data_bytes(&mut self, bytes: &[u8]) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.upload.is_none() {
            warn!(len = bytes.len(), "data with no active upload");
            actions.push(Action::Control(
                Reply::Error("unexpected DATA".into()).encode(),
            ));
            return actions;
        }

        self.frames.push(bytes);
        loop {
            match self.frames.next_event() {
                Ok(Some(FrameEvent::Chunk(payload))) => {
                    let Some(upload) = self.upload.as_mut() else {
                        break;
                    };
                    if let Err(e) = upload.sink.write_chunk(&payload) {
                        warn!(name = %upload.name, error = %e, "chunk write failed");
                        self.upload = None;
                        self.frames.reset();
                        actions.push(Action::Control(
                            Reply::Error(format!("io: {e}")).encode(),
                        ));
                        break;
                    }
                    upload.received += payload.len() as u64;
                }
                Ok(Some(FrameEvent::CrcMismatch {
                    declared,
                    computed,
                    len,
                })) => {
                    warn!(declared, computed, len, "chunk failed CRC; dropped");
                    actions.push(Action::Control(Reply::CrcErr.encode()));
                }
                Ok(None) => break,
                Err(FrameError::BadHeader(header)) => {
                    warn!(header = %header, "malformed frame header; upload aborted");
                    self.upload = None;
                    self.frames.reset();
                    actions.push(Action::Control(Reply::Error("bad DATA".into()).encode()));
                    break;
                }
            }
        }
        actions
    }

    fn dispatch(&mut self, cmd: Command, actions: &mut Vec<Action>) {
        match cmd {
            Command::List => {
                let reply = match self.store.list() {
                    Ok(names) => encode_listing(&names),
                    Err(e) => Reply::Error(format!("io: {e}")).encode(),
                };
                actions.push(Action::Control(reply));
            }
            Command::Delete { name } => {
                let reply = match self.store.delete(&name) {
                    Ok(()) => Reply::Ok,
                    Err(StoreError::NotFound(_)) => Reply::NotFound,
                    Err(e) => Reply::Error(e.to_string()),
                };
                actions.push(Action::Control(reply.encode()));
            }
            Command::Put { name, size } => self.begin_upload(name, size, actions),
            Command::Done => self.finish_upload(actions),
            Command::Get { name, offset } => self.stream_file(&name, offset, actions),
        }
    }

    fn begin_upload(&mut self, name: String, size: u64, actions: &mut Vec<Action>) {
        if self.upload.take().is_some() {
            warn!("new PUT replaces an unfinished upload");
        }

        let held = match self.store.size_of(&name) {
            Ok(n) => n,
            Err(StoreError::NotFound(_)) => 0,
            Err(e) => {
                actions.push(Action::Control(Reply::Error(e.to_string()).encode()));
                return;
            }
        };
        // Resuming only makes sense while the bytes on disk can be a prefix
        // of the incoming file; otherwise start over.
        let offset = if held <= size { held } else { 0 };

        match self.store.open_upload(&name, offset) {
            Ok(sink) => {
                info!(name = %name, size, offset, "upload started");
                self.frames.reset();
                self.upload = Some(Upload {
                    name,
                    declared_size: size,
                    offset,
                    received: 0,
                    sink,
                });
                actions.push(Action::Control(Reply::Offset(offset).encode()));
            }
            Err(e) => actions.push(Action::Control(Reply::Error(e.to_string()).encode())),
        }
    }

    fn finish_upload(&mut self, actions: &mut Vec<Action>) {
        let Some(upload) = self.upload.take() else {
            actions.push(Action::Control(
                Reply::Error("DONE without active PUT".into()).encode(),
            ));
            return;
        };
        let Upload {
            name,
            declared_size,
            offset,
            received,
            sink,
        } = upload;

        let total = offset + received;
        let reply = match sink.commit() {
            Ok(()) if total == declared_size => {
                info!(name = %name, total, "upload committed");
                Reply::Ok
            }
            Ok(()) => {
                warn!(name = %name, declared_size, total, "upload size mismatch");
                Reply::Error(format!(
                    "size mismatch: declared {declared_size}, holding {total}"
                ))
            }
            Err(e) => Reply::Error(format!("io: {e}")),
        };
        actions.push(Action::Control(reply.encode()));
    }

    fn stream_file(&mut self, name: &str, offset: u64, actions: &mut Vec<Action>) {
        let chunks = match self.store.read_chunks(name, offset) {
            Ok(c) => c,
            Err(StoreError::NotFound(_)) => {
                actions.push(Action::Control(Reply::NotFound.encode()));
                return;
            }
            Err(e) => {
                actions.push(Action::Control(Reply::Error(e.to_string()).encode()));
                return;
            }
        };

        let mut sent = 0u64;
        for chunk in chunks {
            match chunk {
                Ok(data) => {
                    sent += data.len() as u64;
                    actions.push(Action::Data(encode_frame(&data)));
                }
                Err(e) => {
                    warn!(name, error = %e, "read failed mid-download");
                    actions.push(Action::Control(Reply::Error(format!("io: {e}")).encode()));
                    return;
                }
            }
        }
        info!(name, offset, sent, "download streamed");
        actions.push(Action::Control(Reply::Done.encode()));
    }
}
