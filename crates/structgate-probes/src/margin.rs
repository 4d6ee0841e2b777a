// ─────────────────────────────────────────────────────────────────────
// StructGate — Confidence Margin Probe
// ─────────────────────────────────────────────────────────────────────

use structgate_types::observable::keys;
use structgate_types::{Observable, StepTrace};

use crate::linalg::softmax;
use crate::probe::Probe;

/// Largest representable value below 1.0.
const MARGIN_CEILING: f64 = 1.0 - f64::EPSILON / 2.0;

/// The two largest entries of `probs`, largest first.
pub fn top_two(probs: &[f64]) -> Option<(f64, f64)> {
    if probs.len() < 2 {
        return None;
    }
    let (mut first, mut second) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for &p in probs {
        if p > first {
            second = first;
            first = p;
        } else if p > second {
            second = p;
        }
    }
    Some((first, second))
}

/// `margin = p(top1) − p(top2)`: higher means a more confident step.
///
/// Exact ties at the top give 0. Fewer than two classes gives nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarginProbe;

impl Probe for MarginProbe {
    fn name(&self) -> &'static str {
        "margin"
    }

    fn observe(&mut self, step: &StepTrace) -> Observable {
        let Some((p1, p2)) = softmax(&step.logits).as_deref().and_then(top_two) else {
            return Observable::new();
        };
        // p2 can underflow to 0 for extreme logit gaps.
        let margin = (p1 - p2).clamp(0.0, MARGIN_CEILING);
        Observable::new().with(keys::MARGIN, margin)
    }
}
