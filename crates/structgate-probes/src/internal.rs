// ─────────────────────────────────────────────────────────────────────
// StructGate — Internal-State Probes (Stateless)
// ─────────────────────────────────────────────────────────────────────
//! Probes over instantaneous hidden activations.
//!
//! - [`LayerDeltaProbe`]: direction change between the last two layers.
//!   A large delta flags an abrupt internal-state jump.
//! - [`NormProbe`]: activation energy of the last layer. Large values flag
//!   out-of-distribution tokens or numerical instability.

use structgate_types::observable::keys;
use structgate_types::{Observable, StepTrace};

use crate::linalg::{dot, l2_norm};
use crate::probe::Probe;

/// Cosine similarity, clamped to [−1, 1]. `None` on mismatched lengths,
/// empty or zero-norm inputs, or non-finite results.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let denom = l2_norm(a) * l2_norm(b);
    if denom == 0.0 || !denom.is_finite() {
        return None;
    }
    let sim = dot(a, b) / denom;
    sim.is_finite().then(|| sim.clamp(-1.0, 1.0))
}

/// Writes `layer_similarity` and `layer_delta = 1 − similarity` ∈ [0, 2].
#[derive(Debug, Clone, Copy, Default)]
pub struct LayerDeltaProbe;

impl Probe for LayerDeltaProbe {
    fn name(&self) -> &'static str {
        "layer_delta"
    }

    fn observe(&mut self, step: &StepTrace) -> Observable {
        let (Some(last), Some(prev)) = (step.last_features(), step.prev_features()) else {
            return Observable::new();
        };
        if last.len() != prev.len() {
            log::warn!(
                "layer_delta: hidden dims differ ({} vs {}), skipping step",
                last.len(),
                prev.len()
            );
            return Observable::new();
        }
        match cosine_similarity(last, prev) {
            Some(sim) => Observable::new()
                .with(keys::LAYER_SIMILARITY, sim)
                .with(keys::LAYER_DELTA, 1.0 - sim),
            None => Observable::new(),
        }
    }
}

/// Writes `activation_energy`, the L2 norm of the last hidden state.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormProbe;

impl Probe for NormProbe {
    fn name(&self) -> &'static str {
        "norm"
    }

    fn observe(&mut self, step: &StepTrace) -> Observable {
        match step.last_features() {
            Some(h) => Observable::new().with(keys::ACTIVATION_ENERGY, l2_norm(h)),
            None => Observable::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use structgate_types::HiddenState;

    fn step(last: Vec<f64>, prev: Vec<f64>) -> StepTrace {
        StepTrace::new("t", vec![0.0], last, prev)
    }

    #[test]
    fn test_identical_direction_zero_delta() {
        let obs = LayerDeltaProbe.observe(&step(vec![1.0, 2.0, 3.0], vec![2.0, 4.0, 6.0]));
        assert!(obs.scalar(keys::LAYER_DELTA).unwrap().abs() < 1e-12);
        assert!((obs.scalar(keys::LAYER_SIMILARITY).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_opposite_direction_delta_two() {
        let obs = LayerDeltaProbe.observe(&step(vec![1.0, -2.0], vec![-1.0, 2.0]));
        assert!((obs.scalar(keys::LAYER_DELTA).unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_orthogonal_delta_one() {
        let obs = LayerDeltaProbe.observe(&step(vec![1.0, 0.0], vec![0.0, 5.0]));
        assert!((obs.scalar(keys::LAYER_DELTA).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_missing_hidden_state_gives_nothing() {
        let s = StepTrace::from_logits("t", vec![1.0]);
        assert!(LayerDeltaProbe.observe(&s).is_empty());
        assert!(NormProbe.observe(&s).is_empty());

        let mut only_last = step(vec![1.0], vec![1.0]);
        only_last.prev_hidden = None;
        assert!(LayerDeltaProbe.observe(&only_last).is_empty());
        assert!(!NormProbe.observe(&only_last).is_empty());
    }

    #[test]
    fn test_mismatched_or_zero_vectors_give_nothing() {
        assert!(LayerDeltaProbe
            .observe(&step(vec![1.0, 2.0], vec![1.0]))
            .is_empty());
        assert!(LayerDeltaProbe
            .observe(&step(vec![0.0, 0.0], vec![1.0, 1.0]))
            .is_empty());
    }

    #[test]
    fn test_norm_value() {
        let obs = NormProbe.observe(&step(vec![3.0, 4.0], vec![0.0, 0.0]));
        assert_eq!(obs.scalar(keys::ACTIVATION_ENERGY), Some(5.0));
    }

    #[test]
    fn test_norm_uses_last_sequence_position() {
        let mut s = StepTrace::from_logits("t", vec![0.0]);
        // [batch=1, seq=2, dim=2]: final position is (3, 4).
        s.last_hidden = Some(HiddenState::with_shape(vec![1.0, 1.0, 3.0, 4.0], vec![1, 2, 2]).unwrap());
        assert_eq!(NormProbe.observe(&s).scalar(keys::ACTIVATION_ENERGY), Some(5.0));
    }

    proptest! {
        #[test]
        fn prop_delta_within_bounds(
            pair in (1usize..64).prop_flat_map(|n| (
                prop::collection::vec(-10.0f64..10.0, n),
                prop::collection::vec(-10.0f64..10.0, n),
            ))
        ) {
            let obs = LayerDeltaProbe.observe(&step(pair.0, pair.1));
            if let Some(delta) = obs.scalar(keys::LAYER_DELTA) {
                prop_assert!((0.0..=2.0).contains(&delta));
                let sim = obs.scalar(keys::LAYER_SIMILARITY).unwrap();
                prop_assert!((-1.0..=1.0).contains(&sim));
            }
        }

        #[test]
        fn prop_norm_non_negative(v in prop::collection::vec(-1e3f64..1e3, 1..128)) {
            let obs = NormProbe.observe(&step(v.clone(), v));
            prop_assert!(obs.scalar(keys::ACTIVATION_ENERGY).unwrap() >= 0.0);
        }
    }
}
