//! # Lossy-link shim
//!
//! A thin outbound filter used for testing and profile-driven exercises:
//! each datagram is dropped with probability `loss_rate`, otherwise delivered
//! after a uniform random delay in `[0, max_delay]`. The shim never
//! duplicates a datagram, never corrupts bytes, and preserves datagram
//! boundaries; independent delays may reorder separate datagrams, which is
//! exactly the impairment the transport has to recover from.
//!
//! The decision itself is pure and deterministic for a given seed, so tests
//! can replay impairment sequences; the endpoint driver does the actual
//! delayed `send_to` scheduling.

use rand::rngs::StdRng;
use rand::RngExt as _;
use rand::SeedableRng;
use std::time::Duration;

// ─── Configuration ──────────────────────────────────────────────────────────

/// Lossy shim parameters.
#[derive(Debug, Clone)]
pub struct LossConfig {
    /// Per-datagram drop probability in `[0, 1]`.
    pub loss_rate: f64,
    /// Upper bound of the uniform delivery delay.
    pub max_delay: Duration,
    /// RNG seed; a given seed replays the same drop/delay sequence.
    pub seed: u64,
}

impl Default for LossConfig {
    fn default() -> Self {
        LossConfig {
            loss_rate: 0.05,
            max_delay: Duration::from_millis(50),
            seed: 0,
        }
    }
}

// ─── Shim ───────────────────────────────────────────────────────────────────

/// Verdict for one outbound datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShimAction {
    /// Swallow the datagram.
    Drop,
    /// Deliver after the given delay.
    Deliver(Duration),
}

/// Per-endpoint outbound loss/jitter injector.
#[derive(Debug)]
pub struct LossShim {
    config: LossConfig,
    rng: StdRng,
    dropped: u64,
}

impl LossShim {
    pub fn new(config: LossConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        LossShim {
            config,
            rng,
            dropped: 0,
        }
    }

    /// Decide the fate of the next outbound datagram.
    pub fn plan(&mut self) -> ShimAction {
        if self.rng.random::<f64>() < self.config.loss_rate {
            self.dropped += 1;
            return ShimAction::Drop;
        }
        let delay = self.config.max_delay.mul_f64(self.rng.random::<f64>());
        ShimAction::Deliver(delay)
    }

    /// Datagrams swallowed so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
