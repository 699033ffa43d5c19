//! # hawser-client
//!
//! The transfer side of hawser: connect to a server, then `list`, `delete`,
//! `get` (with resume), and `put` (the server's `OFFSET` reply makes every
//! upload resumable).
//!
//! - [`client`] — connection handle and the transfer operations
//! - [`metrics`] — transfer metrics (bytes, latency percentiles, retransmits)

pub mod client;
pub mod metrics;
