//! # In-order receiver
//!
//! Pure logic — no I/O. Buffers out-of-order segments keyed by their starting
//! byte offset, delivers the byte stream strictly in order, and answers every
//! arrival with a cumulative ACK. Duplicates below the expected cursor are
//! re-ACKed without delivery, which drives the peer's duplicate-ACK fast
//! retransmit.
//!
//! Deliveries are tagged by stream: control-line segments (CMD flag) and data
//! segments share one sequence space on the wire but surface on separate
//! streams at the application.

use bytes::Bytes;
use std::collections::{BTreeMap, VecDeque};
use tracing::trace;

use crate::stats::ReceiverStats;
use crate::wire::Header;

// ─── Delivery ───────────────────────────────────────────────────────────────

/// Which application stream a delivered segment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Data,
    Control,
}

/// Events the receiver generates for the endpoint driver.
#[derive(Debug)]
pub enum ReceiverEvent {
    /// An in-order segment is ready for the application.
    Deliver {
        stream: Stream,
        header: Header,
        payload: Bytes,
    },
    /// A cumulative ACK should be sent to the peer.
    SendAck { ack: u32 },
}

// ─── Receiver ───────────────────────────────────────────────────────────────

/// In-order receiver state machine.
///
/// Invariants: `expected_seq` is non-decreasing; every key of the reorder
/// buffer is `>= expected_seq`; the delivered byte stream equals the sent
/// byte stream with no gaps and no duplicates.
pub struct GbnReceiver {
    /// Next in-order byte offset to deliver.
    expected_seq: u32,
    /// Out-of-order segments keyed by starting byte offset.
    reorder: BTreeMap<u32, (Header, Bytes)>,
    events: VecDeque<ReceiverEvent>,
    stats: ReceiverStats,
}

impl GbnReceiver {
    pub fn new() -> Self {
        GbnReceiver {
            expected_seq: 0,
            reorder: BTreeMap::new(),
            events: VecDeque::new(),
            stats: ReceiverStats::default(),
        }
    }

    /// Process a well-formed non-ACK packet.
    pub fn receive(&mut self, header: Header, payload: Bytes) {
        debug_assert!(!header.is_ack(), "ACKs are handled by the sender");
        self.stats.packets_received += 1;
        self.stats.bytes_received += payload.len() as u64;

        let seq = header.seq;
        if seq < self.expected_seq {
            // Already delivered. Re-ACK so the peer resynchronizes; this is
            // what feeds its duplicate-ACK counter.
            trace!(seq, expected = self.expected_seq, "duplicate segment");
            self.stats.duplicates += 1;
            self.push_ack();
            return;
        }

        if self.reorder.insert(seq, (header, payload)).is_some() {
            self.stats.duplicates += 1;
        }

        while let Some((header, payload)) = self.reorder.remove(&self.expected_seq) {
            self.expected_seq += payload.len() as u32;
            self.stats.packets_delivered += 1;
            self.stats.bytes_delivered += payload.len() as u64;
            let stream = if header.is_cmd() {
                Stream::Control
            } else {
                Stream::Data
            };
            self.events.push_back(ReceiverEvent::Deliver {
                stream,
                header,
                payload,
            });
        }

        self.push_ack();
    }

    /// Account a datagram that failed to decode and was dropped.
    pub fn record_malformed(&mut self) {
        self.stats.malformed_dropped += 1;
    }

    fn push_ack(&mut self) {
        self.events.push_back(ReceiverEvent::SendAck {
            ack: self.expected_seq,
        });
        self.stats.acks_sent += 1;
    }

    /// Drain pending events in generation order.
    pub fn drain_events(&mut self) -> impl Iterator<Item = ReceiverEvent> + '_ {
        self.events.drain(..)
    }

    /// Next in-order byte offset the receiver is waiting for.
    pub fn expected_seq(&self) -> u32 {
        self.expected_seq
    }

    /// Segments buffered above the in-order cursor.
    pub fn reorder_len(&self) -> usize {
        self.reorder.len()
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }
}

impl Default for GbnReceiver {
    fn default() -> Self {
        Self::new()
    }
}
