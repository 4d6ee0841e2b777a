// ─────────────────────────────────────────────────────────────────────
// StructGate — Observable Contract
// ─────────────────────────────────────────────────────────────────────
//! The canonical shape of data passed from probes to policies.
//!
//! An [`Observable`] is an open, append-only mapping from metric name to
//! [`ObservableValue`]. Probes write the keys they can compute and omit
//! the rest; they never write a zero in place of a missing metric. The
//! substitution of a fail-closed value for an absent metric happens once,
//! at the policy boundary.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical metric keys written by the built-in probes.
pub mod keys {
    pub const LOGITS: &str = "logits";
    pub const TOKEN_PROBS: &str = "token_probs";
    pub const ENTROPY: &str = "entropy";
    pub const MARGIN: &str = "margin";
    pub const LAYER_SIMILARITY: &str = "layer_similarity";
    pub const LAYER_DELTA: &str = "layer_delta";
    pub const ACTIVATION_ENERGY: &str = "activation_energy";
    pub const SV_RATIO: &str = "sv_ratio";
    pub const SVD_READY: &str = "svd_ready";
    pub const RANK: &str = "rank";
}

/// A single value in an observable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObservableValue {
    /// A computed scalar metric.
    Scalar(f64),
    /// A metric that exists in the contract but may be unavailable this
    /// step (the spectral ratio before its window fills).
    Optional(Option<f64>),
    /// A boolean status flag such as `svd_ready`.
    Flag(bool),
    /// Raw structured data (logits, distributions).
    Vector(Vec<f64>),
}

impl ObservableValue {
    /// Scalar view of this value, if it carries one.
    ///
    /// `Optional(None)`, flags and vectors have no scalar view.
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(v) => Some(*v),
            Self::Optional(v) => *v,
            Self::Flag(_) | Self::Vector(_) => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            Self::Vector(v) => Some(v),
            _ => None,
        }
    }
}

impl From<f64> for ObservableValue {
    fn from(v: f64) -> Self {
        Self::Scalar(v)
    }
}

impl From<Option<f64>> for ObservableValue {
    fn from(v: Option<f64>) -> Self {
        Self::Optional(v)
    }
}

impl From<bool> for ObservableValue {
    fn from(v: bool) -> Self {
        Self::Flag(v)
    }
}

impl From<Vec<f64>> for ObservableValue {
    fn from(v: Vec<f64>) -> Self {
        Self::Vector(v)
    }
}

/// Named metric mapping produced by one or more probes for one step.
///
/// There is deliberately no removal operation: once a probe writes a key
/// during a call, the key stays. [`Observable::merge`] overwrites on
/// collision (last write wins).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Observable {
    values: BTreeMap<String, ObservableValue>,
}

impl Observable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a value, replacing any earlier value under the same key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ObservableValue>) {
        self.values.insert(key.into(), value.into());
    }

    /// Builder form of [`Observable::insert`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ObservableValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Merge `other` into `self`; keys in `other` win on collision.
    pub fn merge(&mut self, other: Observable) {
        self.values.extend(other.values);
    }

    pub fn get(&self, key: &str) -> Option<&ObservableValue> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Scalar value under `key`, or `None` when absent or unavailable.
    pub fn scalar(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(ObservableValue::as_scalar)
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(ObservableValue::as_flag)
    }

    pub fn vector(&self, key: &str) -> Option<&[f64]> {
        self.get(key).and_then(ObservableValue::as_vector)
    }

    /// Scalar view of a gateable metric.
    pub fn metric(&self, metric: Metric) -> Option<f64> {
        self.scalar(metric.key())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ObservableValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Gateable scalar metrics.
///
/// Policy configuration names metrics through this enum, so a constraint
/// can only reference a metric some probe actually produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Entropy,
    Margin,
    LayerSimilarity,
    LayerDelta,
    ActivationEnergy,
    SvRatio,
    Rank,
}

impl Metric {
    pub const ALL: [Metric; 7] = [
        Metric::Entropy,
        Metric::Margin,
        Metric::LayerSimilarity,
        Metric::LayerDelta,
        Metric::ActivationEnergy,
        Metric::SvRatio,
        Metric::Rank,
    ];

    /// Observable key this metric is stored under.
    pub fn key(self) -> &'static str {
        match self {
            Self::Entropy => keys::ENTROPY,
            Self::Margin => keys::MARGIN,
            Self::LayerSimilarity => keys::LAYER_SIMILARITY,
            Self::LayerDelta => keys::LAYER_DELTA,
            Self::ActivationEnergy => keys::ACTIVATION_ENERGY,
            Self::SvRatio => keys::SV_RATIO,
            Self::Rank => keys::RANK,
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.key() == key)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}
