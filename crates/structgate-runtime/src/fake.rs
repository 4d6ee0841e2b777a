// ─────────────────────────────────────────────────────────────────────
// StructGate — Deterministic Stand-in Models
// ─────────────────────────────────────────────────────────────────────
//! Models for wiring tests and demos. No weights, no tokenizer.
//!
//! - [`FakeModel`]: seeded synthetic model whose confidence depends on
//!   prompt length, with optional simulated representational collapse.
//! - [`ScriptedModel`]: replays a fixed list of steps, optionally
//!   failing at a chosen index.

use structgate_types::{StepTrace, StructGateError, StructGateResult};

use crate::model::{LanguageModel, StepStream};

/// Prompts shorter than this (in characters) get confident logits.
pub const CONFIDENT_PROMPT_CHARS: usize = 20;

/// Default hidden-state width of [`FakeModel`].
pub const DEFAULT_HIDDEN_DIM: usize = 16;

const FORWARD_VOCAB: [&str; 3] = ["yes", "no", "maybe"];
const CONFIDENT_LOGITS: [f64; 3] = [10.0, 1.0, 0.5];
const UNCERTAIN_LOGITS: [f64; 3] = [1.0, 1.0, 1.0];

const GENERATION_VOCAB: [&str; 8] = [
    " the", " state", " is", " stable", " and", " bounded", ".", " again",
];

/// Logit boost given to one token per step for confident prompts.
const CONFIDENT_BOOST: f64 = 8.0;

/// Spread between the last two layers' hidden states.
const LAYER_NOISE: f64 = 0.1;

/// Minimal xorshift64 RNG (no external dep).
#[derive(Debug, Clone)]
struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0xDEAD_BEEF_CAFE_BABE } else { seed },
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform in [0, 1).
    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Approximate standard normal via Box-Muller.
    fn next_normal(&mut self) -> f64 {
        let u1 = self.next_f64().max(1e-300);
        let u2 = self.next_f64();
        (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
    }

    fn normal_vec(&mut self, dim: usize) -> Vec<f64> {
        (0..dim).map(|_| self.next_normal()).collect()
    }
}

/// Index of the largest score; first index wins ties (greedy decoding).
fn argmax(scores: &[f64]) -> usize {
    scores
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, &v)| {
            if v > bv {
                (i, v)
            } else {
                (bi, bv)
            }
        })
        .0
}

/// Deterministic, controllable stand-in for a language model.
///
/// Short prompts produce confident (low-entropy) steps, long prompts
/// near-uniform ones. The same seed always yields the same trace.
#[derive(Debug, Clone)]
pub struct FakeModel {
    rng: SimpleRng,
    hidden_dim: usize,
    collapse_after: Option<usize>,
}

impl FakeModel {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SimpleRng::new(seed),
            hidden_dim: DEFAULT_HIDDEN_DIM,
            collapse_after: None,
        }
    }

    /// Width of the synthetic hidden states (at least 1).
    pub fn with_hidden_dim(mut self, dim: usize) -> Self {
        self.hidden_dim = dim.max(1);
        self
    }

    /// From step `n` on, every last-layer hidden state is the same vector.
    pub fn collapse_after(mut self, n: usize) -> Self {
        self.collapse_after = Some(n);
        self
    }

    pub fn is_confident(prompt: &str) -> bool {
        prompt.chars().count() < CONFIDENT_PROMPT_CHARS
    }
}

impl Default for FakeModel {
    fn default() -> Self {
        Self::new(0)
    }
}

impl LanguageModel for FakeModel {
    fn forward(&mut self, prompt: &str) -> StructGateResult<StepTrace> {
        let logits = if Self::is_confident(prompt) {
            CONFIDENT_LOGITS
        } else {
            UNCERTAIN_LOGITS
        };
        let token = FORWARD_VOCAB[argmax(&logits)];
        Ok(StepTrace::from_logits(token, logits.to_vec()))
    }

    fn generate_with_trace(
        &mut self,
        prompt: &str,
        max_steps: usize,
    ) -> StructGateResult<StepStream<'_>> {
        let confident = Self::is_confident(prompt);
        let dim = self.hidden_dim;
        let collapse_after = self.collapse_after;
        let rng = &mut self.rng;
        let collapsed = rng.normal_vec(dim);

        Ok(Box::new((0..max_steps).map(move |i| {
            let mut logits = rng.normal_vec(GENERATION_VOCAB.len());
            if confident {
                let k = (rng.next_u64() % GENERATION_VOCAB.len() as u64) as usize;
                logits[k] += CONFIDENT_BOOST;
            }
            let token = GENERATION_VOCAB[argmax(&logits)];

            let last = match collapse_after {
                Some(n) if i >= n => collapsed.clone(),
                _ => rng.normal_vec(dim),
            };
            let prev: Vec<f64> = last
                .iter()
                .map(|v| v + LAYER_NOISE * rng.next_normal())
                .collect();
            Ok(StepTrace::new(token, logits, last, prev))
        })))
    }
}

/// Replays a fixed list of step traces.
#[derive(Debug, Clone, Default)]
pub struct ScriptedModel {
    steps: Vec<StepTrace>,
    fail_at: Option<usize>,
    pulled: usize,
}

impl ScriptedModel {
    pub fn new(steps: Vec<StepTrace>) -> Self {
        Self {
            steps,
            fail_at: None,
            pulled: 0,
        }
    }

    /// Yield a [`StructGateError::Model`] instead of step `index`.
    pub fn fail_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Steps drawn from streams so far, across all runs.
    pub fn pulled(&self) -> usize {
        self.pulled
    }
}

impl LanguageModel for ScriptedModel {
    fn forward(&mut self, _prompt: &str) -> StructGateResult<StepTrace> {
        if self.fail_at == Some(0) {
            return Err(StructGateError::Model("scripted failure at step 0".to_string()));
        }
        self.steps
            .first()
            .cloned()
            .ok_or_else(|| StructGateError::Model("script is empty".to_string()))
    }

    fn generate_with_trace(
        &mut self,
        _prompt: &str,
        max_steps: usize,
    ) -> StructGateResult<StepStream<'_>> {
        let fail_at = self.fail_at;
        let pulled = &mut self.pulled;
        Ok(Box::new(self.steps.iter().take(max_steps).enumerate().map(
            move |(i, step)| {
                *pulled += 1;
                if fail_at == Some(i) {
                    Err(StructGateError::Model(format!("scripted failure at step {i}")))
                } else {
                    Ok(step.clone())
                }
            },
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_confident_vs_uncertain() {
        let mut model = FakeModel::new(42);
        let short = model.forward("Hi").unwrap();
        assert_eq!(short.logits, vec![10.0, 1.0, 0.5]);
        assert_eq!(short.token, "yes");
        assert!(short.last_hidden.is_none());

        let long = model.forward("This prompt is definitely long enough").unwrap();
        assert_eq!(long.logits, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_prompt_length_boundary() {
        assert!(FakeModel::is_confident(&"a".repeat(19)));
        assert!(!FakeModel::is_confident(&"a".repeat(20)));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let collect = |seed| {
            let mut model = FakeModel::new(seed);
            model
                .generate_with_trace("Hi", 6)
                .unwrap()
                .map(|s| s.unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(collect(7), collect(7));
        assert_ne!(collect(7), collect(8));
    }

    #[test]
    fn test_generation_is_greedy_and_bounded() {
        let mut model = FakeModel::new(1).with_hidden_dim(4);
        let steps: Vec<StepTrace> = model
            .generate_with_trace("Hi", 5)
            .unwrap()
            .map(|s| s.unwrap())
            .collect();
        assert_eq!(steps.len(), 5);
        for s in &steps {
            assert_eq!(s.token, GENERATION_VOCAB[argmax(&s.logits)]);
            assert_eq!(s.last_features().unwrap().len(), 4);
            assert_eq!(s.prev_features().unwrap().len(), 4);
        }
    }

    #[test]
    fn test_collapse_after() {
        let mut model = FakeModel::new(3).collapse_after(2);
        let steps: Vec<StepTrace> = model
            .generate_with_trace("Hi", 5)
            .unwrap()
            .map(|s| s.unwrap())
            .collect();
        assert_ne!(steps[0].last_hidden, steps[1].last_hidden);
        assert_ne!(steps[1].last_hidden, steps[2].last_hidden);
        assert_eq!(steps[2].last_hidden, steps[3].last_hidden);
        assert_eq!(steps[3].last_hidden, steps[4].last_hidden);
    }

    #[test]
    fn test_scripted_replay_and_failure() {
        let script = vec![
            StepTrace::from_logits("a", vec![1.0]),
            StepTrace::from_logits("b", vec![1.0]),
            StepTrace::from_logits("c", vec![1.0]),
        ];
        let mut model = ScriptedModel::new(script.clone()).fail_at(1);
        let items: Vec<_> = model.generate_with_trace("p", 10).unwrap().collect();
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(StructGateError::Model(_))));
        assert_eq!(model.pulled(), 3);

        let mut empty = ScriptedModel::default();
        assert!(empty.forward("p").is_err());
        assert_eq!(ScriptedModel::new(script).forward("p").unwrap().token, "a");
    }

    #[test]
    fn test_argmax_first_wins_ties() {
        assert_eq!(argmax(&[1.0, 1.0, 1.0]), 0);
        assert_eq!(argmax(&[0.5, 2.0, 2.0]), 1);
    }
}
