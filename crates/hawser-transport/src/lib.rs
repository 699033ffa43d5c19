//! # hawser-transport
//!
//! Reliable, in-order byte streams over an unreliable datagram substrate.
//!
//! A Go-Back-N sender with cumulative acknowledgments, a single
//! retransmission timer, and fast retransmit on duplicate ACKs; an in-order
//! receiver that reassembles the byte stream from variable-sized datagram
//! payloads. Data and control text share one sequence space (multiplexed by a
//! flag bit) and are separated into two delivery streams at the receiving
//! application.
//!
//! ## Crate structure
//!
//! - [`wire`] — Fixed-size packet header, CRC-32 checksum, encode/decode
//! - [`sender`] — Go-Back-N sender state machine (pure logic, no I/O)
//! - [`receiver`] — In-order receiver state machine (pure logic, no I/O)
//! - [`endpoint`] — UDP endpoint driver wiring the machines to a socket
//! - [`shim`] — Outbound lossy-link shim (drop probability + jitter)
//! - [`stats`] — Sender/receiver statistics

pub mod endpoint;
pub mod receiver;
pub mod sender;
pub mod shim;
pub mod stats;
pub mod wire;
