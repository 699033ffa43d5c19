//! # Integration tests: sender ↔ receiver through the wire format
//!
//! No sockets — the "network" passes encoded datagrams directly, with loss
//! applied in the middle. Timer expiry is simulated by calling `on_timeout`
//! whenever a round makes no progress, so recovery is exercised without
//! waiting on wall-clock time.

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::RngExt as _;
use rand::SeedableRng;
use std::time::{Duration, Instant};

use hawser_transport::receiver::{GbnReceiver, ReceiverEvent, Stream};
use hawser_transport::sender::{GbnSender, SenderConfig};
use hawser_transport::wire::Packet;

// ─── Harness ────────────────────────────────────────────────────────────────

fn test_sender() -> GbnSender {
    GbnSender::new(SenderConfig {
        conn_id: 1,
        mss: 1200,
        window_size: 5,
        retransmit_interval: Duration::from_millis(450),
    })
}

#[derive(Debug, Default)]
struct RunReport {
    timeouts: u32,
    data: Vec<u8>,
    control: Vec<u8>,
    /// Stream tags in delivery order, for ordering assertions.
    order: Vec<Stream>,
}

/// Drive `tx` until idle, delivering through `rx`. `drop_data` and
/// `drop_ack` decide the fate of each forward/backward datagram by index.
fn run_until_idle(
    tx: &mut GbnSender,
    rx: &mut GbnReceiver,
    mut drop_data: impl FnMut(usize) -> bool,
    mut drop_ack: impl FnMut(usize) -> bool,
) -> RunReport {
    let now = Instant::now();
    let mut report = RunReport::default();
    let mut data_idx = 0;
    let mut ack_idx = 0;

    for round in 0.. {
        assert!(round < 100_000, "transfer failed to converge");
        if tx.is_idle() {
            break;
        }

        let mut outgoing: Vec<Bytes> = tx.drain_output().collect();
        if outgoing.is_empty() {
            // Nothing in flight made it through: the retransmission timer
            // would fire next.
            tx.on_timeout(now);
            report.timeouts += 1;
            outgoing = tx.drain_output().collect();
        }

        for datagram in outgoing {
            let lost = drop_data(data_idx);
            data_idx += 1;
            if lost {
                continue;
            }
            let pkt = Packet::decode(&datagram).expect("sender emits well-formed packets");
            rx.receive(pkt.header, pkt.payload);
        }

        let events: Vec<ReceiverEvent> = rx.drain_events().collect();
        for event in events {
            match event {
                ReceiverEvent::Deliver {
                    stream, payload, ..
                } => {
                    report.order.push(stream);
                    match stream {
                        Stream::Data => report.data.extend_from_slice(&payload),
                        Stream::Control => report.control.extend_from_slice(&payload),
                    }
                }
                ReceiverEvent::SendAck { ack } => {
                    let lost = drop_ack(ack_idx);
                    ack_idx += 1;
                    if !lost {
                        tx.handle_ack(ack, now);
                    }
                }
            }
        }
    }

    report
}

fn random_payload(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.random::<u8>()).collect()
}

fn random_drop(p: f64, seed: u64) -> impl FnMut(usize) -> bool {
    let mut rng = StdRng::seed_from_u64(seed);
    move |_| rng.random::<f64>() < p
}

fn no_drop(_: usize) -> bool {
    false
}

// ─── Stream identity ────────────────────────────────────────────────────────

#[test]
fn lossless_transfer_is_bit_identical_with_no_retransmissions() {
    let mut tx = test_sender();
    let mut rx = GbnReceiver::new();
    let payload = random_payload(256 * 1024, 1);

    tx.send(Bytes::from(payload.clone()), Instant::now());
    let report = run_until_idle(&mut tx, &mut rx, no_drop, no_drop);

    assert_eq!(report.data, payload);
    assert_eq!(report.timeouts, 0);
    assert_eq!(tx.stats().retransmissions, 0);
    assert_eq!(rx.stats().duplicates, 0);
}

#[test]
fn transfer_survives_moderate_loss_both_directions() {
    let mut tx = test_sender();
    let mut rx = GbnReceiver::new();
    let payload = random_payload(256 * 1024, 2);

    tx.send(Bytes::from(payload.clone()), Instant::now());
    let report = run_until_idle(
        &mut tx,
        &mut rx,
        random_drop(0.1, 10),
        random_drop(0.1, 11),
    );

    assert_eq!(report.data, payload);
    assert!(tx.stats().retransmissions > 0);
}

#[test]
fn transfer_survives_heavy_loss() {
    let mut tx = test_sender();
    let mut rx = GbnReceiver::new();
    let payload = random_payload(64 * 1024, 3);

    tx.send(Bytes::from(payload.clone()), Instant::now());
    let report = run_until_idle(
        &mut tx,
        &mut rx,
        random_drop(0.3, 20),
        random_drop(0.3, 21),
    );

    assert_eq!(report.data, payload);
}

#[test]
fn single_byte_transfer() {
    let mut tx = test_sender();
    let mut rx = GbnReceiver::new();

    tx.send(Bytes::from_static(b"x"), Instant::now());
    let report = run_until_idle(&mut tx, &mut rx, no_drop, no_drop);
    assert_eq!(report.data, b"x");
}

// ─── Ordering ───────────────────────────────────────────────────────────────

#[test]
fn sends_are_delivered_in_call_order() {
    let mut tx = test_sender();
    let mut rx = GbnReceiver::new();
    let now = Instant::now();

    let a = random_payload(10_000, 4);
    let b = random_payload(3_000, 5);
    tx.send(Bytes::from(a.clone()), now);
    tx.send(Bytes::from(b.clone()), now);

    let report = run_until_idle(&mut tx, &mut rx, no_drop, no_drop);
    let mut expected = a;
    expected.extend_from_slice(&b);
    assert_eq!(report.data, expected);
}

#[test]
fn call_order_survives_loss() {
    let mut tx = test_sender();
    let mut rx = GbnReceiver::new();
    let now = Instant::now();

    let a = random_payload(20_000, 6);
    let b = random_payload(20_000, 7);
    tx.send(Bytes::from(a.clone()), now);
    tx.send(Bytes::from(b.clone()), now);

    let report = run_until_idle(
        &mut tx,
        &mut rx,
        random_drop(0.2, 30),
        random_drop(0.2, 31),
    );
    let mut expected = a;
    expected.extend_from_slice(&b);
    assert_eq!(report.data, expected);
}

#[test]
fn control_lines_interleave_with_data_in_call_order() {
    let mut tx = test_sender();
    let mut rx = GbnReceiver::new();
    let now = Instant::now();

    tx.send(Bytes::from(vec![0xAA; 2400]), now); // two data segments
    tx.send_control(Bytes::from_static(b"DONE\n"), now);
    tx.send(Bytes::from(vec![0xBB; 100]), now);

    let report = run_until_idle(&mut tx, &mut rx, no_drop, no_drop);
    assert_eq!(report.control, b"DONE\n");
    assert_eq!(
        report.order,
        vec![Stream::Data, Stream::Data, Stream::Control, Stream::Data]
    );
}

// ─── Cumulative ACK state ───────────────────────────────────────────────────

#[test]
fn completed_transfer_leaves_clean_sender_state() {
    let mut tx = test_sender();
    let mut rx = GbnReceiver::new();
    let total = 100_000;

    tx.send(Bytes::from(random_payload(total, 8)), Instant::now());
    run_until_idle(&mut tx, &mut rx, random_drop(0.1, 40), no_drop);

    assert_eq!(tx.send_base(), total as u32);
    assert_eq!(tx.next_seq(), total as u32);
    assert_eq!(tx.in_flight(), 0);
    assert!(tx.timer_deadline().is_none());
    assert_eq!(rx.expected_seq(), total as u32);
    assert_eq!(rx.reorder_len(), 0);
}

// ─── Loss recovery paths ────────────────────────────────────────────────────

#[test]
fn single_loss_recovers_via_fast_retransmit_without_timeout() {
    let mut tx = test_sender();
    let mut rx = GbnReceiver::new();

    // Five full segments; the second transmission (index 1) is lost.
    tx.send(Bytes::from(random_payload(6_000, 9)), Instant::now());
    let report = run_until_idle(&mut tx, &mut rx, |i| i == 1, no_drop);

    assert_eq!(report.data.len(), 6_000);
    assert_eq!(report.timeouts, 0, "dup ACKs should beat the timer");
    assert_eq!(tx.stats().retransmissions, 1);
}

#[test]
fn full_window_loss_recovers_via_timeout() {
    let mut tx = test_sender();
    let mut rx = GbnReceiver::new();
    let payload = random_payload(6_000, 12);

    // Every first transmission is lost; only retransmissions get through.
    tx.send(Bytes::from(payload.clone()), Instant::now());
    let report = run_until_idle(&mut tx, &mut rx, |i| i < 5, no_drop);

    assert_eq!(report.data, payload);
    assert!(report.timeouts >= 1);
    assert_eq!(tx.stats().retransmissions, 5);
}

#[test]
fn lost_acks_cause_duplicates_but_not_corruption() {
    let mut tx = test_sender();
    let mut rx = GbnReceiver::new();
    let payload = random_payload(24_000, 13);

    // The whole first round of ACKs is lost: the timer fires and the full
    // window is retransmitted into a receiver that already delivered it.
    tx.send(Bytes::from(payload.clone()), Instant::now());
    let report = run_until_idle(&mut tx, &mut rx, no_drop, |i| i < 5);

    assert_eq!(report.data, payload, "duplicates must not be redelivered");
    assert!(rx.stats().duplicates >= 5);
    assert!(report.timeouts >= 1);
}
