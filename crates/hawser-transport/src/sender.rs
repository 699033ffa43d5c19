//! # Go-Back-N sender
//!
//! Pure logic — no I/O. Splits application data into MSS-sized segments,
//! transmits within a fixed window, tracks unacknowledged segments keyed by
//! their starting byte offset, and recovers losses with a single
//! retransmission timer plus fast retransmit on three duplicate ACKs.
//!
//! Control lines share the sequence space with data (tagged by a flag bit)
//! and interleave at the instant of the call, so a control line queued before
//! a data write is delivered before it.
//!
//! The machine never sleeps: it exposes [`GbnSender::timer_deadline`] and the
//! I/O layer calls [`GbnSender::on_timeout`] when the deadline passes, so at
//! most one timer is ever armed.

use bytes::Bytes;
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::stats::SenderStats;
use crate::wire::Packet;

// ─── Tunables ───────────────────────────────────────────────────────────────

/// Maximum payload bytes per data segment.
pub const MSS: usize = 1200;

/// Maximum in-flight MSS-sized segments.
pub const WINDOW_SIZE: usize = 5;

/// Interval of the (single) retransmission timer.
pub const RETRANSMIT_INTERVAL: Duration = Duration::from_millis(450);

/// Receive window advertised in every outgoing header.
pub const ADVERTISED_WINDOW: u16 = 4096;

/// Duplicate ACKs that trigger a fast retransmit.
const DUP_ACK_THRESHOLD: u32 = 3;

// ─── Configuration ──────────────────────────────────────────────────────────

/// Sender configuration parameters.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Connection identifier stamped on every packet.
    pub conn_id: u32,
    /// Maximum payload per data segment.
    pub mss: usize,
    /// Window bound in MSS-sized segments.
    pub window_size: usize,
    /// Retransmission timer interval.
    pub retransmit_interval: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        SenderConfig {
            conn_id: 1,
            mss: MSS,
            window_size: WINDOW_SIZE,
            retransmit_interval: RETRANSMIT_INTERVAL,
        }
    }
}

// ─── Internal state ─────────────────────────────────────────────────────────

/// A segment queued for first transmission. Data is pre-split to MSS at
/// enqueue time so control segments can interleave in call order.
#[derive(Debug)]
struct Segment {
    payload: Bytes,
    control: bool,
}

/// A transmitted, not-yet-acknowledged segment.
#[derive(Debug)]
struct InFlight {
    /// Encoded wire bytes, retransmitted verbatim.
    wire: Bytes,
    /// Payload length (how far this segment advances the stream).
    len: u32,
    /// Timestamp of the most recent (re)transmission.
    sent_at: Instant,
}

// ─── Sender ─────────────────────────────────────────────────────────────────

/// Go-Back-N sender state machine.
///
/// Invariants: `send_base <= next_seq`; `send_base` is non-decreasing; the
/// keys of `unacked` are a subset of `[send_base, next_seq)`; the in-flight
/// byte span never exceeds `window_size * mss` when `try_send` returns.
pub struct GbnSender {
    config: SenderConfig,
    /// Lowest unacknowledged byte offset.
    send_base: u32,
    /// Next byte offset to transmit.
    next_seq: u32,
    /// Segments awaiting first transmission, in call order.
    pending: VecDeque<Segment>,
    /// In-flight segments keyed by starting byte offset.
    unacked: BTreeMap<u32, InFlight>,
    /// Highest ACK value seen, for duplicate detection.
    last_ack: u32,
    /// Consecutive duplicates of `last_ack`.
    dup_acks: u32,
    /// Deadline of the retransmission timer, when armed.
    timer: Option<Instant>,
    /// Encoded datagrams ready for the socket.
    output: VecDeque<Bytes>,
    stats: SenderStats,
}

impl GbnSender {
    pub fn new(config: SenderConfig) -> Self {
        GbnSender {
            config,
            send_base: 0,
            next_seq: 0,
            pending: VecDeque::new(),
            unacked: BTreeMap::new(),
            last_ack: 0,
            dup_acks: 0,
            timer: None,
            output: VecDeque::new(),
            stats: SenderStats::default(),
        }
    }

    /// Queue application data. Split into MSS-sized data segments and
    /// transmitted as far as the window allows; the rest waits for ACKs.
    pub fn send(&mut self, data: Bytes, now: Instant) {
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + self.config.mss).min(data.len());
            self.pending.push_back(Segment {
                payload: data.slice(offset..end),
                control: false,
            });
            offset = end;
        }
        self.try_send(now);
    }

    /// Queue a single reliably delivered control segment. The caller provides
    /// payloads that fit within one MSS; control is never split.
    pub fn send_control(&mut self, line: Bytes, now: Instant) {
        if line.is_empty() {
            return;
        }
        debug_assert!(
            line.len() <= self.config.mss,
            "control segment exceeds MSS"
        );
        self.pending.push_back(Segment {
            payload: line,
            control: true,
        });
        self.try_send(now);
    }

    /// Transmit queued segments while the window bound holds.
    fn try_send(&mut self, now: Instant) {
        while self.window_has_room() {
            let Some(seg) = self.pending.pop_front() else {
                break;
            };
            let seq = self.next_seq;
            let len = seg.payload.len() as u32;
            let packet = if seg.control {
                Packet::control(self.config.conn_id, seq, ADVERTISED_WINDOW, seg.payload)
            } else {
                Packet::data(self.config.conn_id, seq, ADVERTISED_WINDOW, seg.payload)
            };
            let wire = packet.encode();
            trace!(seq, len, control = seg.control, "transmit");
            self.output.push_back(wire.clone());
            self.unacked.insert(
                seq,
                InFlight {
                    wire,
                    len,
                    sent_at: now,
                },
            );
            if self.timer.is_none() {
                self.timer = Some(now + self.config.retransmit_interval);
            }
            self.next_seq = seq + len;
            self.stats.packets_sent += 1;
            self.stats.bytes_sent += len as u64;
        }
    }

    fn window_has_room(&self) -> bool {
        (self.next_seq - self.send_base) as usize / self.config.mss < self.config.window_size
    }

    /// Process a cumulative ACK. Every unacked segment starting below `ack`
    /// is released; three duplicates trigger a fast retransmit of the oldest
    /// outstanding segment; the timer stops when nothing is in flight.
    pub fn handle_ack(&mut self, ack: u32, now: Instant) {
        self.stats.acks_received += 1;

        // A well-behaved peer never acknowledges past next_seq; clamp so a
        // bogus value cannot break the window arithmetic.
        let ack = ack.min(self.next_seq);

        if ack == self.last_ack {
            self.dup_acks += 1;
        } else {
            self.last_ack = ack;
            self.dup_acks = 0;
        }

        // split_off keeps entries >= ack: everything below is acknowledged.
        self.unacked = self.unacked.split_off(&ack);

        if self.dup_acks >= DUP_ACK_THRESHOLD {
            if let Some((&seq, inflight)) = self.unacked.iter_mut().next() {
                debug!(seq, "fast retransmit");
                self.output.push_back(inflight.wire.clone());
                inflight.sent_at = now;
                self.stats.retransmissions += 1;
            }
            self.dup_acks = 0;
        }

        // Delayed ACKs can arrive out of order; send_base never moves back.
        if ack > self.send_base {
            self.send_base = ack;
        }

        if self.send_base == self.next_seq {
            self.timer = None;
        } else {
            self.timer = Some(now + self.config.retransmit_interval);
        }

        self.try_send(now);
    }

    /// Timer expiry: retransmit every in-flight segment in key order and
    /// re-arm.
    pub fn on_timeout(&mut self, now: Instant) {
        if self.unacked.is_empty() {
            self.timer = None;
            return;
        }
        debug!(in_flight = self.unacked.len(), "retransmission timeout");
        for inflight in self.unacked.values_mut() {
            self.output.push_back(inflight.wire.clone());
            inflight.sent_at = now;
            self.stats.retransmissions += 1;
        }
        self.timer = Some(now + self.config.retransmit_interval);
    }

    /// Deadline of the armed retransmission timer, if any.
    pub fn timer_deadline(&self) -> Option<Instant> {
        self.timer
    }

    /// Drain encoded datagrams ready for the socket.
    pub fn drain_output(&mut self) -> impl Iterator<Item = Bytes> + '_ {
        self.output.drain(..)
    }

    /// Whether everything queued has been transmitted and acknowledged.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.unacked.is_empty()
    }

    pub fn send_base(&self) -> u32 {
        self.send_base
    }

    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    /// Number of in-flight (unacknowledged) segments.
    pub fn in_flight(&self) -> usize {
        self.unacked.len()
    }

    /// Time since the oldest in-flight segment was last (re)transmitted.
    pub fn oldest_in_flight_age(&self, now: Instant) -> Option<Duration> {
        self.unacked
            .values()
            .next()
            .map(|inflight| now.duration_since(inflight.sent_at))
    }

    /// Segments queued but not yet transmitted.
    pub fn backlog(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Packet;

    fn test_sender() -> GbnSender {
        GbnSender::new(SenderConfig {
            conn_id: 1,
            mss: 100,
            window_size: 5,
            retransmit_interval: Duration::from_millis(450),
        })
    }

    fn decode_all(sender: &mut GbnSender) -> Vec<Packet> {
        sender
            .drain_output()
            .map(|d| Packet::decode(&d).unwrap())
            .collect()
    }

    // ─── Windowing ──────────────────────────────────────────────────────

    #[test]
    fn window_caps_in_flight_segments() {
        let mut tx = test_sender();
        let now = Instant::now();
        tx.send(Bytes::from(vec![0u8; 1000]), now);

        // 10 segments queued, only 5 fit the window.
        let out = decode_all(&mut tx);
        assert_eq!(out.len(), 5);
        assert_eq!(tx.in_flight(), 5);
        assert_eq!(tx.backlog(), 5);
        assert_eq!(tx.next_seq(), 500);
    }

    #[test]
    fn segments_carry_consecutive_byte_offsets() {
        let mut tx = test_sender();
        tx.send(Bytes::from(vec![0u8; 250]), Instant::now());

        let out = decode_all(&mut tx);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].header.seq, 0);
        assert_eq!(out[1].header.seq, 100);
        assert_eq!(out[2].header.seq, 200);
        assert_eq!(out[2].payload.len(), 50);
    }

    #[test]
    fn ack_frees_window_for_backlog() {
        let mut tx = test_sender();
        let now = Instant::now();
        tx.send(Bytes::from(vec![0u8; 1000]), now);
        tx.drain_output().for_each(drop);

        tx.handle_ack(300, now);
        assert_eq!(tx.send_base(), 300);

        // Three more segments admitted: offsets 500, 600, 700.
        let out = decode_all(&mut tx);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].header.seq, 500);
        assert_eq!(tx.in_flight(), 5);
    }

    // ─── Control interleaving ───────────────────────────────────────────

    #[test]
    fn control_interleaves_in_call_order() {
        let mut tx = test_sender();
        let now = Instant::now();
        tx.send(Bytes::from(vec![0u8; 100]), now);
        tx.send_control(Bytes::from_static(b"OK\nEND\n"), now);
        tx.send(Bytes::from(vec![1u8; 100]), now);

        let out = decode_all(&mut tx);
        assert_eq!(out.len(), 3);
        assert!(!out[0].header.is_cmd());
        assert!(out[1].header.is_cmd());
        assert_eq!(out[1].header.seq, 100);
        assert_eq!(out[1].payload, &b"OK\nEND\n"[..]);
        assert!(!out[2].header.is_cmd());
        assert_eq!(out[2].header.seq, 107);
    }

    #[test]
    fn empty_control_is_dropped() {
        let mut tx = test_sender();
        tx.send_control(Bytes::new(), Instant::now());
        assert!(tx.is_idle());
        assert_eq!(tx.drain_output().count(), 0);
    }

    // ─── ACK processing ─────────────────────────────────────────────────

    #[test]
    fn cumulative_ack_completes_transfer() {
        let mut tx = test_sender();
        let now = Instant::now();
        tx.send(Bytes::from(vec![0u8; 450]), now);
        tx.drain_output().for_each(drop);

        tx.handle_ack(450, now);
        assert_eq!(tx.send_base(), 450);
        assert_eq!(tx.next_seq(), 450);
        assert_eq!(tx.in_flight(), 0);
        assert!(tx.is_idle());
        assert!(tx.timer_deadline().is_none());
        assert_eq!(tx.stats().retransmissions, 0);
    }

    #[test]
    fn stale_ack_does_not_regress_send_base() {
        let mut tx = test_sender();
        let now = Instant::now();
        tx.send(Bytes::from(vec![0u8; 300]), now);
        tx.drain_output().for_each(drop);

        tx.handle_ack(300, now);
        tx.handle_ack(100, now); // delayed duplicate from earlier
        assert_eq!(tx.send_base(), 300);
    }

    #[test]
    fn triple_duplicate_ack_triggers_fast_retransmit() {
        let mut tx = test_sender();
        let now = Instant::now();
        tx.send(Bytes::from(vec![0u8; 500]), now);
        tx.drain_output().for_each(drop);

        // Segment at offset 100 was lost: the peer keeps acking 100.
        tx.handle_ack(100, now);
        tx.handle_ack(100, now);
        tx.handle_ack(100, now);
        assert_eq!(tx.stats().retransmissions, 0, "two dups are not enough");

        tx.handle_ack(100, now);
        assert_eq!(tx.stats().retransmissions, 1);

        let out = decode_all(&mut tx);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].header.seq, 100, "oldest outstanding segment");
    }

    #[test]
    fn dup_counter_resets_after_fast_retransmit() {
        let mut tx = test_sender();
        let now = Instant::now();
        tx.send(Bytes::from(vec![0u8; 500]), now);
        tx.drain_output().for_each(drop);

        for _ in 0..4 {
            tx.handle_ack(100, now);
        }
        assert_eq!(tx.stats().retransmissions, 1);
        tx.drain_output().for_each(drop);

        // Counter was reset: two more duplicates do not retransmit again.
        tx.handle_ack(100, now);
        tx.handle_ack(100, now);
        assert_eq!(tx.stats().retransmissions, 1);
        assert_eq!(tx.drain_output().count(), 0);
    }

    // ─── Timer ──────────────────────────────────────────────────────────

    #[test]
    fn timer_armed_while_data_in_flight() {
        let mut tx = test_sender();
        let now = Instant::now();
        assert!(tx.timer_deadline().is_none());

        tx.send(Bytes::from(vec![0u8; 100]), now);
        assert_eq!(tx.timer_deadline(), Some(now + RETRANSMIT_INTERVAL));

        tx.handle_ack(100, now);
        assert!(tx.timer_deadline().is_none());
    }

    #[test]
    fn partial_ack_rearms_timer() {
        let mut tx = test_sender();
        let now = Instant::now();
        tx.send(Bytes::from(vec![0u8; 300]), now);

        let later = now + Duration::from_millis(100);
        tx.handle_ack(100, later);
        assert_eq!(tx.timer_deadline(), Some(later + RETRANSMIT_INTERVAL));
    }

    #[test]
    fn timeout_retransmits_all_in_flight_in_order() {
        let mut tx = test_sender();
        let now = Instant::now();
        tx.send(Bytes::from(vec![0u8; 300]), now);
        tx.drain_output().for_each(drop);
        assert_eq!(tx.in_flight(), 3);

        let fire = now + RETRANSMIT_INTERVAL;
        tx.on_timeout(fire);
        assert_eq!(tx.stats().retransmissions, 3);
        assert_eq!(tx.timer_deadline(), Some(fire + RETRANSMIT_INTERVAL));

        let out = decode_all(&mut tx);
        let seqs: Vec<u32> = out.iter().map(|p| p.header.seq).collect();
        assert_eq!(seqs, vec![0, 100, 200]);
    }

    #[test]
    fn timeout_with_nothing_in_flight_disarms() {
        let mut tx = test_sender();
        tx.on_timeout(Instant::now());
        assert!(tx.timer_deadline().is_none());
        assert_eq!(tx.stats().retransmissions, 0);
    }

    #[test]
    fn retransmitted_bytes_match_original_wire_bytes() {
        let mut tx = test_sender();
        let now = Instant::now();
        tx.send(Bytes::from(vec![7u8; 100]), now);
        let original: Vec<Bytes> = tx.drain_output().collect();

        tx.on_timeout(now + RETRANSMIT_INTERVAL);
        let resent: Vec<Bytes> = tx.drain_output().collect();
        assert_eq!(original, resent);
    }
}
