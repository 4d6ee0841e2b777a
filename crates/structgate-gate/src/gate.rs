// ─────────────────────────────────────────────────────────────────────
// StructGate — Gate
// ─────────────────────────────────────────────────────────────────────

use serde::Serialize;
use structgate_types::{GateAction, Observable, PolicySpec, StructGateResult};

use crate::policy::{GatePolicy, Policy, Violation};

/// Decision plus the constraints behind it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateVerdict {
    pub action: GateAction,
    pub violations: Vec<Violation>,
}

impl GateVerdict {
    /// Human-readable refusal reason; empty when nothing was violated.
    pub fn reason(&self) -> String {
        self.violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Stateless wrapper that applies one policy per evaluation.
#[derive(Debug, Clone)]
pub struct Gate {
    policy: GatePolicy,
}

impl Gate {
    pub fn new(policy: impl Into<GatePolicy>) -> Self {
        Self {
            policy: policy.into(),
        }
    }

    pub fn from_spec(spec: &PolicySpec) -> StructGateResult<Self> {
        Ok(Self::new(GatePolicy::from_spec(spec)?))
    }

    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    pub fn evaluate(&self, obs: &Observable) -> GateAction {
        let action = self.policy.decide(obs);
        if action.is_refuse() {
            log::debug!("gate refused ({} policy)", self.policy.name());
        }
        action
    }

    pub fn review(&self, obs: &Observable) -> GateVerdict {
        let verdict = GateVerdict {
            action: self.policy.decide(obs),
            violations: self.policy.violations(obs),
        };
        if verdict.action.is_refuse() {
            log::debug!(
                "gate refused ({} policy): {}",
                self.policy.name(),
                verdict.reason()
            );
        }
        verdict
    }
}
