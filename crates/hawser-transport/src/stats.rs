//! # Transport statistics
//!
//! Counters kept by the sender and receiver machines, published by the
//! endpoint driver as a JSON-serializable snapshot.

use serde::Serialize;

// ─── Sender stats ───────────────────────────────────────────────────────────

/// Aggregate sender-side statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SenderStats {
    /// Segments transmitted for the first time.
    pub packets_sent: u64,
    /// Payload bytes transmitted for the first time.
    pub bytes_sent: u64,
    /// Segments retransmitted (timer expiry or fast retransmit).
    pub retransmissions: u64,
    /// Cumulative ACKs processed.
    pub acks_received: u64,
}

impl SenderStats {
    /// Retransmission overhead ratio.
    pub fn retransmit_ratio(&self) -> f64 {
        if self.packets_sent == 0 {
            0.0
        } else {
            self.retransmissions as f64 / self.packets_sent as f64
        }
    }
}

// ─── Receiver stats ─────────────────────────────────────────────────────────

/// Aggregate receiver-side statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReceiverStats {
    /// Well-formed non-ACK packets received (including duplicates).
    pub packets_received: u64,
    /// Payload bytes received (including duplicates).
    pub bytes_received: u64,
    /// Segments delivered to the application (unique, in order).
    pub packets_delivered: u64,
    /// Payload bytes delivered to the application.
    pub bytes_delivered: u64,
    /// Duplicate segments (already delivered or already buffered).
    pub duplicates: u64,
    /// Cumulative ACKs emitted.
    pub acks_sent: u64,
    /// Datagrams dropped because they failed to decode.
    pub malformed_dropped: u64,
}

impl ReceiverStats {
    /// Unique goodput ratio: delivered vs received.
    pub fn goodput_ratio(&self) -> f64 {
        if self.packets_received == 0 {
            0.0
        } else {
            self.packets_delivered as f64 / self.packets_received as f64
        }
    }
}

// ─── Combined snapshot ──────────────────────────────────────────────────────

/// Snapshot of both directions of one endpoint, published by the driver.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransportStats {
    pub sender: SenderStats,
    pub receiver: ReceiverStats,
    /// Outbound datagrams swallowed by the lossy shim.
    pub shim_dropped: u64,
}
