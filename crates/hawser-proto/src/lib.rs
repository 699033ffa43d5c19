//! # hawser-proto
//!
//! The application protocol that rides the reliable byte streams: newline-
//! terminated ASCII control lines (commands and `END`-terminated replies) on
//! the control stream, and length-prefixed, CRC-tagged binary data chunks on
//! the data stream.
//!
//! Everything here is pure bytes-in/bytes-out; the transport and the file
//! system live elsewhere.
//!
//! - [`command`] — command/reply grammar and the line splitter
//! - [`frame`] — `HDR <crc> <len>` data-chunk framing and reassembly

pub mod command;
pub mod frame;
