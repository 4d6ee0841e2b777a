// ─────────────────────────────────────────────────────────────────────
// StructGate — Token Entropy Probe
// ─────────────────────────────────────────────────────────────────────
//! Shannon entropy of the next-token distribution: local epistemic
//! uncertainty at this step. 0 at a one-hot distribution, ln(V) at a
//! uniform one over V tokens.

use structgate_types::observable::keys;
use structgate_types::{Observable, StepTrace};

use crate::linalg::softmax;
use crate::probe::Probe;

/// Guards `ln(0)` in the entropy sum.
pub const ENTROPY_EPS: f64 = 1e-9;

/// `-Σ p·ln(p + ε)`, clamped at 0 (the ε term can push a one-hot
/// distribution a hair below zero).
pub fn shannon_entropy(probs: &[f64]) -> f64 {
    let h: f64 = -probs
        .iter()
        .map(|&p| p * (p + ENTROPY_EPS).ln())
        .sum::<f64>();
    h.max(0.0)
}

/// Writes `logits`, `token_probs` and `entropy`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntropyProbe;

impl Probe for EntropyProbe {
    fn name(&self) -> &'static str {
        "entropy"
    }

    fn observe(&mut self, step: &StepTrace) -> Observable {
        let Some(probs) = softmax(&step.logits) else {
            return Observable::new();
        };
        let entropy = shannon_entropy(&probs);
        Observable::new()
            .with(keys::LOGITS, step.logits.clone())
            .with(keys::TOKEN_PROBS, probs)
            .with(keys::ENTROPY, entropy)
    }
}
