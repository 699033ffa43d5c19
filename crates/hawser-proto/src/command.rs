//! # Control-line grammar
//!
//! Commands and replies are newline-terminated ASCII lines on the control
//! stream. Multi-line replies (the `LIST` body) are terminated by the literal
//! line `END`; single-status replies carry the status line followed by `END`.
//!
//! ```text
//! LIST                → <name>\n...<name>\nEND\n
//! DELETE <name>       → OK\nEND\n | NOTFOUND\nEND\n
//! PUT <name> <size>   → OFFSET <n>\nEND\n
//! DONE                → OK\nEND\n | ERROR <reason>\nEND\n
//! GET <name> <offset> → (data frames) DONE\nEND\n | NOTFOUND\nEND\n
//! ```

use bytes::{Buf, BytesMut};
use std::fmt;
use thiserror::Error;

/// Terminator line of every reply.
pub const END_LINE: &str = "END";

// ─── Errors ─────────────────────────────────────────────────────────────────

/// A control line that does not parse as a command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("malformed {0} command")]
    Malformed(&'static str),
}

// ─── Commands ───────────────────────────────────────────────────────────────

/// Client → server commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Delete { name: String },
    Put { name: String, size: u64 },
    Done,
    Get { name: String, offset: u64 },
}

impl Command {
    /// Parse one line (without its terminating newline).
    pub fn parse(line: &str) -> Result<Command, CommandError> {
        let mut tokens = line.split_whitespace();
        let verb = tokens.next().unwrap_or("");
        let cmd = match verb {
            "LIST" => Command::List,
            "DONE" => Command::Done,
            "DELETE" => {
                let name = tokens
                    .next()
                    .ok_or(CommandError::Malformed("DELETE"))?
                    .to_owned();
                Command::Delete { name }
            }
            "PUT" => {
                let name = tokens
                    .next()
                    .ok_or(CommandError::Malformed("PUT"))?
                    .to_owned();
                let size = tokens
                    .next()
                    .and_then(|t| t.parse().ok())
                    .ok_or(CommandError::Malformed("PUT"))?;
                Command::Put { name, size }
            }
            "GET" => {
                let name = tokens
                    .next()
                    .ok_or(CommandError::Malformed("GET"))?
                    .to_owned();
                let offset = tokens
                    .next()
                    .and_then(|t| t.parse().ok())
                    .ok_or(CommandError::Malformed("GET"))?;
                Command::Get { name, offset }
            }
            _ => return Err(CommandError::Unknown(line.to_owned())),
        };
        if tokens.next().is_some() {
            return Err(CommandError::Malformed("trailing tokens"));
        }
        Ok(cmd)
    }
}

impl fmt::Display for Command {
    /// Renders the wire line including the terminating newline.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::List => writeln!(f, "LIST"),
            Command::Delete { name } => writeln!(f, "DELETE {name}"),
            Command::Put { name, size } => writeln!(f, "PUT {name} {size}"),
            Command::Done => writeln!(f, "DONE"),
            Command::Get { name, offset } => writeln!(f, "GET {name} {offset}"),
        }
    }
}

// ─── Replies ────────────────────────────────────────────────────────────────

/// Server → client status replies. Every reply block ends with `END`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Bytes of the named file the server already holds.
    Offset(u64),
    Ok,
    NotFound,
    /// A data chunk failed CRC verification; the chunk was dropped.
    CrcErr,
    /// End of a GET data stream.
    Done,
    Error(String),
}

impl Reply {
    /// The bare status line, without terminator.
    pub fn line(&self) -> String {
        match self {
            Reply::Offset(n) => format!("OFFSET {n}"),
            Reply::Ok => "OK".to_owned(),
            Reply::NotFound => "NOTFOUND".to_owned(),
            Reply::CrcErr => "CRCERR".to_owned(),
            Reply::Done => "DONE".to_owned(),
            Reply::Error(reason) => format!("ERROR {reason}"),
        }
    }

    /// The full wire block: status line plus `END` terminator.
    pub fn encode(&self) -> String {
        format!("{}\n{END_LINE}\n", self.line())
    }

    /// Parse a status line. `None` for anything else (e.g. a LIST name).
    pub fn parse(line: &str) -> Option<Reply> {
        if let Some(rest) = line.strip_prefix("OFFSET ") {
            return rest.trim().parse().ok().map(Reply::Offset);
        }
        if let Some(rest) = line.strip_prefix("ERROR ") {
            return Some(Reply::Error(rest.to_owned()));
        }
        match line {
            "OK" => Some(Reply::Ok),
            "NOTFOUND" => Some(Reply::NotFound),
            "CRCERR" => Some(Reply::CrcErr),
            "DONE" => Some(Reply::Done),
            "ERROR" => Some(Reply::Error(String::new())),
            _ => None,
        }
    }
}

/// Render a LIST reply body: one name per line, then `END`.
pub fn encode_listing(names: &[String]) -> String {
    let mut out = String::new();
    for name in names {
        out.push_str(name);
        out.push('\n');
    }
    out.push_str(END_LINE);
    out.push('\n');
    out
}

// ─── Line splitting ─────────────────────────────────────────────────────────

/// Accumulates stream bytes and yields complete newline-terminated lines,
/// regardless of how the underlying transport split them across deliveries.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete line, without its newline.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let line = self.buf.split_to(pos + 1);
        Some(String::from_utf8_lossy(&line[..pos]).into_owned())
    }

    /// Bytes buffered without a terminating newline yet.
    pub fn pending(&self) -> usize {
        self.buf.remaining()
    }
}
