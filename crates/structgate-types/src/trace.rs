// ─────────────────────────────────────────────────────────────────────
// StructGate — Step Trace, Gate Action, Audit Log Types
// ─────────────────────────────────────────────────────────────────────

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{StructGateError, StructGateResult};
use crate::observable::Observable;

/// A hidden-state tensor from one layer: flat row-major data plus shape.
///
/// Most collaborators hand over a rank-1 vector `[dim]`; some hand over
/// the full `[batch, seq, dim]` activation. [`HiddenState::feature_vector`]
/// reduces either to one feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HiddenState {
    data: Vec<f64>,
    shape: Vec<usize>,
}

impl HiddenState {
    /// Rank-1 hidden state.
    pub fn vector(data: Vec<f64>) -> Self {
        let shape = vec![data.len()];
        Self { data, shape }
    }

    /// Hidden state of arbitrary rank. The shape must cover `data` exactly.
    pub fn with_shape(data: Vec<f64>, shape: Vec<usize>) -> StructGateResult<Self> {
        if shape.is_empty() {
            return Err(StructGateError::Validation(
                "hidden state shape must have at least one axis".to_string(),
            ));
        }
        let expected = shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| {
                StructGateError::Validation(format!("hidden state shape {shape:?} overflows"))
            })?;
        if expected != data.len() {
            return Err(StructGateError::Validation(format!(
                "hidden state shape {shape:?} needs {expected} values, got {}",
                data.len()
            )));
        }
        Ok(Self { data, shape })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Size of the feature (last) axis.
    pub fn dim(&self) -> usize {
        self.shape.last().copied().unwrap_or(0)
    }

    /// One feature vector sampled from this state.
    ///
    /// Sampling policy for rank ≥ 2: first element on every leading axis,
    /// except the sequence axis (second to last), which takes its final
    /// position. For `[batch, seq, dim]` that is batch 0, last token.
    /// Returns `None` for zero-sized states.
    pub fn feature_vector(&self) -> Option<&[f64]> {
        let dim = self.dim();
        if dim == 0 || self.data.is_empty() {
            return None;
        }
        let rank = self.shape.len();
        if rank == 1 {
            return Some(&self.data);
        }
        let seq_len = self.shape[rank - 2];
        if seq_len == 0 {
            return None;
        }
        // Leading axes are all at index 0, so only the sequence offset remains.
        let start = (seq_len - 1) * dim;
        self.data.get(start..start + dim)
    }
}

/// One generation step's raw data, as produced by the model collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTrace {
    /// Generated token text.
    pub token: String,
    /// Next-token score vector (length = vocabulary size).
    pub logits: Vec<f64>,
    /// Last-layer hidden state.
    pub last_hidden: Option<HiddenState>,
    /// Previous-layer hidden state.
    pub prev_hidden: Option<HiddenState>,
}

impl StepTrace {
    /// Step with logits only (no white-box access to hidden states).
    pub fn from_logits(token: impl Into<String>, logits: Vec<f64>) -> Self {
        Self {
            token: token.into(),
            logits,
            last_hidden: None,
            prev_hidden: None,
        }
    }

    /// Step with rank-1 hidden states for the last two layers.
    pub fn new(
        token: impl Into<String>,
        logits: Vec<f64>,
        last_hidden: Vec<f64>,
        prev_hidden: Vec<f64>,
    ) -> Self {
        Self {
            token: token.into(),
            logits,
            last_hidden: Some(HiddenState::vector(last_hidden)),
            prev_hidden: Some(HiddenState::vector(prev_hidden)),
        }
    }

    pub fn last_features(&self) -> Option<&[f64]> {
        self.last_hidden.as_ref().and_then(HiddenState::feature_vector)
    }

    pub fn prev_features(&self) -> Option<&[f64]> {
        self.prev_hidden.as_ref().and_then(HiddenState::feature_vector)
    }
}

/// Control decision returned by the gate.
///
/// Semantic actions, not vocabulary tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateAction {
    /// Continuation admitted.
    Allow,
    /// Continuation refused.
    Refuse,
    /// No control decision taken (observe-only policy).
    Noop,
}

impl GateAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "ALLOW",
            Self::Refuse => "REFUSE",
            Self::Noop => "NOOP",
        }
    }

    pub fn is_refuse(self) -> bool {
        self == Self::Refuse
    }
}

impl fmt::Display for GateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable audit record for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Zero-based step index within the run.
    pub step: usize,
    /// Generated token (or the prompt, for single-step diagnostics).
    pub token: String,
    /// Merged observable for this step.
    pub observable: Observable,
    /// Gate decision, if a gate was invoked.
    pub action: Option<GateAction>,
}

/// Summary of one generation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationSession {
    pub prompt: String,
    pub entries: Vec<LogEntry>,
    pub halted: bool,
    pub halt_index: Option<usize>,
    pub halt_reason: String,
    pub start_time_s: f64,
    pub end_time_s: f64,
}

impl GenerationSession {
    /// Generated text. A halted session stops before the refused token.
    pub fn output(&self) -> String {
        let end = match (self.halted, self.halt_index) {
            (true, Some(i)) => i.min(self.entries.len()),
            _ => self.entries.len(),
        };
        self.entries[..end]
            .iter()
            .map(|e| e.token.as_str())
            .collect()
    }

    pub fn token_count(&self) -> usize {
        self.entries.len()
    }

    pub fn refusal_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.action == Some(GateAction::Refuse))
            .count()
    }

    /// Per-step values of a scalar metric; `None` where unavailable.
    pub fn metric_series(&self, key: &str) -> Vec<Option<f64>> {
        self.entries
            .iter()
            .map(|e| e.observable.scalar(key))
            .collect()
    }

    /// Mean over the steps where the metric is available and finite.
    pub fn mean_metric(&self, key: &str) -> Option<f64> {
        let values: Vec<f64> = self
            .metric_series(key)
            .into_iter()
            .flatten()
            .filter(|v| v.is_finite())
            .collect();
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }

    pub fn max_metric(&self, key: &str) -> Option<f64> {
        self.metric_series(key)
            .into_iter()
            .flatten()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
    }

    pub fn duration_ms(&self) -> f64 {
        (self.end_time_s - self.start_time_s) * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observable::keys;

    fn entry(step: usize, token: &str, entropy: Option<f64>, action: Option<GateAction>) -> LogEntry {
        let mut observable = Observable::new();
        if let Some(h) = entropy {
            observable.insert(keys::ENTROPY, h);
        }
        LogEntry {
            step,
            token: token.to_string(),
            observable,
            action,
        }
    }

    #[test]
    fn test_feature_vector_rank1() {
        let h = HiddenState::vector(vec![1.0, 2.0, 3.0]);
        assert_eq!(h.feature_vector(), Some(&[1.0, 2.0, 3.0][..]));
        assert_eq!(h.dim(), 3);
    }

    #[test]
    fn test_feature_vector_last_position_first_batch() {
        // [batch=2, seq=3, dim=2]
        let data: Vec<f64> = (0..12).map(|v| v as f64).collect();
        let h = HiddenState::with_shape(data, vec![2, 3, 2]).unwrap();
        assert_eq!(h.feature_vector(), Some(&[4.0, 5.0][..]));
    }

    #[test]
    fn test_feature_vector_rank2() {
        // [seq=2, dim=3]
        let h = HiddenState::with_shape(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0], vec![2, 3]).unwrap();
        assert_eq!(h.feature_vector(), Some(&[3.0, 4.0, 5.0][..]));
    }

    #[test]
    fn test_feature_vector_empty() {
        assert_eq!(HiddenState::vector(vec![]).feature_vector(), None);
        let h = HiddenState::with_shape(vec![], vec![1, 0, 4]).unwrap();
        assert_eq!(h.feature_vector(), None);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let err = HiddenState::with_shape(vec![1.0; 5], vec![2, 3]).unwrap_err();
        assert!(matches!(err, StructGateError::Validation(_)));
    }

    #[test]
    fn test_shape_overflow_rejected() {
        // A wrapping product would be 0 and match the empty data.
        let err = HiddenState::with_shape(vec![], vec![usize::MAX / 2 + 1, 2]).unwrap_err();
        assert!(matches!(err, StructGateError::Validation(_)));
        assert!(HiddenState::with_shape(vec![], vec![usize::MAX, usize::MAX, 0]).is_err());
    }

    #[test]
    fn test_gate_action_serde() {
        assert_eq!(serde_json::to_string(&GateAction::Refuse).unwrap(), "\"REFUSE\"");
        let a: GateAction = serde_json::from_str("\"NOOP\"").unwrap();
        assert_eq!(a, GateAction::Noop);
        assert_eq!(GateAction::Allow.to_string(), "ALLOW");
    }

    #[test]
    fn test_session_output_halted() {
        let session = GenerationSession {
            entries: vec![
                entry(0, "Hello", None, Some(GateAction::Allow)),
                entry(1, " world", None, Some(GateAction::Allow)),
                entry(2, " bad", None, Some(GateAction::Refuse)),
            ],
            halted: true,
            halt_index: Some(2),
            ..Default::default()
        };
        assert_eq!(session.output(), "Hello world");
        assert_eq!(session.token_count(), 3);
        assert_eq!(session.refusal_count(), 1);
    }

    #[test]
    fn test_session_output_normal() {
        let session = GenerationSession {
            entries: vec![entry(0, "Hello", None, None), entry(1, " world", None, None)],
            ..Default::default()
        };
        assert_eq!(session.output(), "Hello world");
        assert_eq!(session.refusal_count(), 0);
    }

    #[test]
    fn test_session_metric_stats_skip_missing() {
        let session = GenerationSession {
            entries: vec![
                entry(0, "a", Some(0.5), None),
                entry(1, "b", None, None),
                entry(2, "c", Some(1.5), None),
            ],
            ..Default::default()
        };
        assert_eq!(
            session.metric_series(keys::ENTROPY),
            vec![Some(0.5), None, Some(1.5)]
        );
        assert!((session.mean_metric(keys::ENTROPY).unwrap() - 1.0).abs() < 1e-12);
        assert_eq!(session.max_metric(keys::ENTROPY), Some(1.5));
        assert_eq!(session.mean_metric(keys::MARGIN), None);
    }
}
