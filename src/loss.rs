//! Artificial packet loss.
//!
//! Real networks drop packets.  To exercise the reliability mechanisms on a
//! loopback interface, every transmit on the forward path and every inbound
//! segment on the reverse path first asks a [`LossInjector`] whether the
//! packet should vanish.  A dropped packet is never put on the wire (or never
//! processed), but the caller still reports it as a `Dropped` event.
//!
//! The random source is pluggable through [`LossOracle`] so tests can script
//! exactly which packets disappear.

use std::sync::Arc;

use rand::Rng;

/// Decides, per packet, whether it is lost.
pub trait LossOracle: Send + Sync {
    /// One independent decision: `true` means drop.
    fn should_drop(&self, probability: f64) -> bool;
}

/// Production oracle: one fresh uniform draw per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomLoss;

impl LossOracle for RandomLoss {
    fn should_drop(&self, probability: f64) -> bool {
        if probability <= 0.0 {
            return false;
        }
        rand::rng().random::<f64>() < probability
    }
}

/// A loss probability bound to the oracle that evaluates it.
#[derive(Clone)]
pub struct LossInjector {
    probability: f64,
    oracle: Arc<dyn LossOracle>,
}

impl LossInjector {
    /// Random loss with the given probability (`0.0..=1.0`).
    pub fn new(probability: f64) -> Self {
        Self::with_oracle(probability, Arc::new(RandomLoss))
    }

    /// An injector that never drops anything.
    pub fn lossless() -> Self {
        Self::new(0.0)
    }

    pub fn with_oracle(probability: f64, oracle: Arc<dyn LossOracle>) -> Self {
        Self {
            probability,
            oracle,
        }
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    /// `true` when the current packet should be dropped.
    pub fn should_drop(&self) -> bool {
        self.oracle.should_drop(self.probability)
    }
}

impl Default for LossInjector {
    fn default() -> Self {
        Self::lossless()
    }
}

impl std::fmt::Debug for LossInjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LossInjector")
            .field("probability", &self.probability)
            .finish_non_exhaustive()
    }
}
