//! # Transfer metrics
//!
//! Bytes moved, per-transfer latencies with mean and p95, and the
//! retransmission count pulled from the transport. The report serializes to
//! JSON for the `--metrics` flag and for collaborating front-ends.

use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct TransferMetrics {
    delays_ms: Vec<f64>,
    bytes_moved: u64,
    retransmissions: u64,
}

/// Snapshot produced by [`TransferMetrics::report`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsReport {
    pub total_bytes: u64,
    pub retransmissions: u64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
}

impl TransferMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_delay(&mut self, elapsed: Duration) {
        self.delays_ms.push(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn record_bytes(&mut self, n: u64) {
        self.bytes_moved += n;
    }

    pub fn set_retransmissions(&mut self, n: u64) {
        self.retransmissions = n;
    }

    pub fn report(&self) -> MetricsReport {
        let avg = if self.delays_ms.is_empty() {
            0.0
        } else {
            self.delays_ms.iter().sum::<f64>() / self.delays_ms.len() as f64
        };
        MetricsReport {
            total_bytes: self.bytes_moved,
            retransmissions: self.retransmissions,
            avg_latency_ms: avg,
            p95_latency_ms: percentile(&self.delays_ms, 0.95),
        }
    }
}

fn percentile(samples: &[f64], q: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = ((sorted.len() as f64) * q).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_is_zeroed() {
        let report = TransferMetrics::new().report();
        assert_eq!(report.total_bytes, 0);
        assert_eq!(report.avg_latency_ms, 0.0);
        assert_eq!(report.p95_latency_ms, 0.0);
    }

    #[test]
    fn aggregates_bytes_and_latency() {
        let mut m = TransferMetrics::new();
        m.record_bytes(1000);
        m.record_bytes(500);
        m.record_delay(Duration::from_millis(10));
        m.record_delay(Duration::from_millis(30));
        m.set_retransmissions(3);

        let report = m.report();
        assert_eq!(report.total_bytes, 1500);
        assert_eq!(report.retransmissions, 3);
        assert!((report.avg_latency_ms - 20.0).abs() < 1e-9);
    }

    #[test]
    fn p95_of_uniform_samples() {
        let mut m = TransferMetrics::new();
        for ms in 1..=100u64 {
            m.record_delay(Duration::from_millis(ms));
        }
        let report = m.report();
        assert!((report.p95_latency_ms - 95.0).abs() < 1e-9);
    }

    #[test]
    fn p95_of_single_sample() {
        let mut m = TransferMetrics::new();
        m.record_delay(Duration::from_millis(7));
        assert!((m.report().p95_latency_ms - 7.0).abs() < 1e-9);
    }
}
