// ─────────────────────────────────────────────────────────────────────
// StructGate — Gate Policies
// ─────────────────────────────────────────────────────────────────────
//! Threshold, conjunctive-fusion and passive policies.
//!
//! Every comparison goes through [`Constraint`], which is where the
//! fail-closed substitution for missing metrics lives.

use std::fmt;

use serde::Serialize;
use structgate_types::{
    Comparison, ConstraintSpec, GateAction, Metric, Observable, PolicySpec, StructGateError,
    StructGateResult,
};

/// Decision capability: observable in, action out. Never errors.
pub trait Policy {
    fn decide(&self, obs: &Observable) -> GateAction;

    /// Constraints that failed on `obs`. Audit only.
    fn violations(&self, _obs: &Observable) -> Vec<Violation> {
        Vec::new()
    }
}

/// One bound on one metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constraint {
    pub metric: Metric,
    pub bound: f64,
    pub comparison: Comparison,
}

impl Constraint {
    pub fn new(metric: Metric, bound: f64, comparison: Comparison) -> Self {
        Self {
            metric,
            bound,
            comparison,
        }
    }

    /// Upper bound: holds iff `value <= bound`.
    pub fn max(metric: Metric, bound: f64) -> Self {
        Self::new(metric, bound, Comparison::Max)
    }

    /// Lower bound: holds iff `value >= bound`.
    pub fn min(metric: Metric, bound: f64) -> Self {
        Self::new(metric, bound, Comparison::Min)
    }

    /// Value that can never satisfy this constraint's direction.
    pub fn fail_closed_value(&self) -> f64 {
        match self.comparison {
            Comparison::Max => f64::INFINITY,
            Comparison::Min => f64::NEG_INFINITY,
        }
    }

    /// Metric value as the gate sees it: absent, unavailable and NaN
    /// readings become [`Constraint::fail_closed_value`].
    pub fn observed(&self, obs: &Observable) -> f64 {
        match obs.metric(self.metric) {
            Some(v) if !v.is_nan() => v,
            _ => self.fail_closed_value(),
        }
    }

    pub fn holds(&self, obs: &Observable) -> bool {
        let value = self.observed(obs);
        match self.comparison {
            Comparison::Max => value <= self.bound,
            Comparison::Min => value >= self.bound,
        }
    }

    /// `Some(violation)` when the constraint fails on `obs`.
    pub fn check(&self, obs: &Observable) -> Option<Violation> {
        if self.holds(obs) {
            None
        } else {
            Some(Violation {
                metric: self.metric,
                observed: self.observed(obs),
                bound: self.bound,
                comparison: self.comparison,
            })
        }
    }
}

impl From<ConstraintSpec> for Constraint {
    fn from(spec: ConstraintSpec) -> Self {
        Self::new(spec.metric, spec.bound, spec.comparison)
    }
}

/// A failed constraint, with the value the gate compared.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Violation {
    pub metric: Metric,
    pub observed: f64,
    pub bound: f64,
    pub comparison: Comparison,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.comparison {
            Comparison::Max => ">",
            Comparison::Min => "<",
        };
        write!(f, "{} ({:.4} {op} {})", self.metric, self.observed, self.bound)
    }
}

/// Single-metric, single-bound policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdPolicy {
    constraint: Constraint,
}

impl ThresholdPolicy {
    pub fn new(constraint: Constraint) -> Self {
        Self { constraint }
    }

    /// REFUSE when entropy strictly exceeds `bound`.
    pub fn max_entropy(bound: f64) -> Self {
        Self::new(Constraint::max(Metric::Entropy, bound))
    }

    /// REFUSE when the top-two margin falls below `bound`.
    pub fn min_margin(bound: f64) -> Self {
        Self::new(Constraint::min(Metric::Margin, bound))
    }

    pub fn constraint(&self) -> &Constraint {
        &self.constraint
    }
}

impl Policy for ThresholdPolicy {
    fn decide(&self, obs: &Observable) -> GateAction {
        if self.constraint.holds(obs) {
            GateAction::Allow
        } else {
            GateAction::Refuse
        }
    }

    fn violations(&self, obs: &Observable) -> Vec<Violation> {
        self.constraint.check(obs).into_iter().collect()
    }
}

/// Conjunctive fusion: ALLOW only if every constraint holds.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionPolicy {
    constraints: Vec<Constraint>,
}

impl FusionPolicy {
    /// Fails with [`StructGateError::Config`] on an empty constraint list.
    pub fn new(constraints: Vec<Constraint>) -> StructGateResult<Self> {
        if constraints.is_empty() {
            return Err(StructGateError::Config(
                "fusion policy needs at least one constraint".to_string(),
            ));
        }
        Ok(Self { constraints })
    }

    /// `entropy <= max_entropy AND margin >= min_margin`.
    pub fn entropy_margin(max_entropy: f64, min_margin: f64) -> Self {
        Self {
            constraints: vec![
                Constraint::max(Metric::Entropy, max_entropy),
                Constraint::min(Metric::Margin, min_margin),
            ],
        }
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }
}

impl Policy for FusionPolicy {
    fn decide(&self, obs: &Observable) -> GateAction {
        if self.constraints.iter().all(|c| c.holds(obs)) {
            GateAction::Allow
        } else {
            GateAction::Refuse
        }
    }

    fn violations(&self, obs: &Observable) -> Vec<Violation> {
        self.constraints.iter().filter_map(|c| c.check(obs)).collect()
    }
}

/// Closed set of policies, picked at construction.
#[derive(Debug, Clone, PartialEq)]
pub enum GatePolicy {
    Threshold(ThresholdPolicy),
    Fusion(FusionPolicy),
    /// Observe-only: always NOOP.
    Passive,
}

impl GatePolicy {
    /// Build from configuration. Bounds are validated first.
    pub fn from_spec(spec: &PolicySpec) -> StructGateResult<Self> {
        spec.validate()?;
        Ok(match spec {
            PolicySpec::Threshold {
                metric,
                bound,
                comparison,
            } => Self::Threshold(ThresholdPolicy::new(Constraint::new(
                *metric,
                *bound,
                *comparison,
            ))),
            PolicySpec::Fusion { constraints } => Self::Fusion(FusionPolicy::new(
                constraints.iter().copied().map(Constraint::from).collect(),
            )?),
            PolicySpec::Passive => Self::Passive,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Threshold(_) => "threshold",
            Self::Fusion(_) => "fusion",
            Self::Passive => "passive",
        }
    }
}

impl Policy for GatePolicy {
    fn decide(&self, obs: &Observable) -> GateAction {
        match self {
            Self::Threshold(p) => p.decide(obs),
            Self::Fusion(p) => p.decide(obs),
            Self::Passive => GateAction::Noop,
        }
    }

    fn violations(&self, obs: &Observable) -> Vec<Violation> {
        match self {
            Self::Threshold(p) => p.violations(obs),
            Self::Fusion(p) => p.violations(obs),
            Self::Passive => Vec::new(),
        }
    }
}

impl From<ThresholdPolicy> for GatePolicy {
    fn from(p: ThresholdPolicy) -> Self {
        Self::Threshold(p)
    }
}

impl From<FusionPolicy> for GatePolicy {
    fn from(p: FusionPolicy) -> Self {
        Self::Fusion(p)
    }
}
