// ─────────────────────────────────────────────────────────────────────
// StructGate — Configuration
// ─────────────────────────────────────────────────────────────────────

use serde::{Deserialize, Serialize};

use crate::error::{StructGateError, StructGateResult};
use crate::observable::Metric;

/// Default trailing window of the spectral probe.
pub const DEFAULT_WINDOW_SIZE: usize = 10;

/// Singular values above this count toward the reported rank.
pub const DEFAULT_RANK_TOLERANCE: f64 = 1e-6;

fn default_window_size() -> usize {
    DEFAULT_WINDOW_SIZE
}

fn default_rank_tolerance() -> f64 {
    DEFAULT_RANK_TOLERANCE
}

/// Which probe to build, and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum ProbeSpec {
    Entropy,
    Margin,
    LayerDelta,
    Norm,
    Spectral {
        #[serde(default = "default_window_size")]
        window_size: usize,
        #[serde(default = "default_rank_tolerance")]
        rank_tolerance: f64,
    },
}

impl ProbeSpec {
    pub fn spectral(window_size: usize) -> Self {
        Self::Spectral {
            window_size,
            rank_tolerance: DEFAULT_RANK_TOLERANCE,
        }
    }

    pub fn validate(&self) -> StructGateResult<()> {
        if let Self::Spectral {
            window_size,
            rank_tolerance,
        } = self
        {
            if *window_size < 1 {
                return Err(StructGateError::Config(format!(
                    "window_size must be >= 1, got {window_size}"
                )));
            }
            if !rank_tolerance.is_finite() || *rank_tolerance <= 0.0 {
                return Err(StructGateError::Config(format!(
                    "rank_tolerance must be finite and > 0, got {rank_tolerance}"
                )));
            }
        }
        Ok(())
    }
}

/// Direction in which a bound constrains its metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// Upper bound: the metric must not exceed the bound.
    #[default]
    Max,
    /// Lower bound: the metric must reach the bound.
    Min,
}

/// One `(metric, bound, direction)` triple.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConstraintSpec {
    pub metric: Metric,
    pub bound: f64,
    #[serde(default)]
    pub comparison: Comparison,
}

impl ConstraintSpec {
    pub fn max(metric: Metric, bound: f64) -> Self {
        Self {
            metric,
            bound,
            comparison: Comparison::Max,
        }
    }

    pub fn min(metric: Metric, bound: f64) -> Self {
        Self {
            metric,
            bound,
            comparison: Comparison::Min,
        }
    }

    pub fn validate(&self) -> StructGateResult<()> {
        if !self.bound.is_finite() {
            return Err(StructGateError::Config(format!(
                "bound for {} must be finite, got {}",
                self.metric, self.bound
            )));
        }
        Ok(())
    }
}

/// Which gate policy to build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum PolicySpec {
    /// Single metric, single bound.
    Threshold {
        metric: Metric,
        bound: f64,
        #[serde(default)]
        comparison: Comparison,
    },
    /// Every constraint must hold (logical AND).
    Fusion { constraints: Vec<ConstraintSpec> },
    /// Observe only; the gate always answers NOOP.
    Passive,
}

impl PolicySpec {
    pub fn validate(&self) -> StructGateResult<()> {
        match self {
            Self::Threshold {
                metric,
                bound,
                comparison,
            } => ConstraintSpec {
                metric: *metric,
                bound: *bound,
                comparison: *comparison,
            }
            .validate(),
            Self::Fusion { constraints } => {
                if constraints.is_empty() {
                    return Err(StructGateError::Config(
                        "fusion policy needs at least one constraint".to_string(),
                    ));
                }
                constraints.iter().try_for_each(ConstraintSpec::validate)
            }
            Self::Passive => Ok(()),
        }
    }
}

/// Generation loop parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Upper bound on steps per run.
    pub max_steps: usize,
    /// Stop the run at the first REFUSE (the refusing step is still logged).
    pub halt_on_refuse: bool,
    /// Emit one status line per step at `info` level.
    pub verbose: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: 32,
            halt_on_refuse: false,
            verbose: false,
        }
    }
}

/// Full runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StructGateConfig {
    /// Probes, in aggregation order (later keys win on collision).
    pub probes: Vec<ProbeSpec>,
    /// Gate policy; `None` runs without a gate.
    pub policy: Option<PolicySpec>,
    pub engine: EngineConfig,
}

impl Default for StructGateConfig {
    fn default() -> Self {
        Self {
            probes: vec![
                ProbeSpec::Entropy,
                ProbeSpec::Margin,
                ProbeSpec::LayerDelta,
                ProbeSpec::Norm,
                ProbeSpec::spectral(DEFAULT_WINDOW_SIZE),
            ],
            // Entropy <= 6.5 AND margin >= 0.02 (empirical calibration).
            policy: Some(PolicySpec::Fusion {
                constraints: vec![
                    ConstraintSpec::max(Metric::Entropy, 6.5),
                    ConstraintSpec::min(Metric::Margin, 0.02),
                ],
            }),
            engine: EngineConfig::default(),
        }
    }
}

impl StructGateConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> StructGateResult<()> {
        if self.probes.is_empty() {
            return Err(StructGateError::Config(
                "at least one probe must be configured".to_string(),
            ));
        }
        self.probes.iter().try_for_each(ProbeSpec::validate)?;
        if let Some(policy) = &self.policy {
            policy.validate()?;
        }
        Ok(())
    }

    /// Load from JSON string. Unknown keys are rejected.
    pub fn from_json(json: &str) -> StructGateResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| StructGateError::Config(format!("JSON parse error: {e}")))
    }

    /// Load from JSON and validate in one step.
    pub fn from_json_validated(json: &str) -> StructGateResult<Self> {
        let config = Self::from_json(json)?;
        config.validate()?;
        log::debug!(
            "loaded config: {} probes, policy={}",
            config.probes.len(),
            config.policy.is_some()
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(StructGateConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_window_rejected() {
        let config = StructGateConfig {
            probes: vec![ProbeSpec::spectral(0)],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("window_size"));
    }

    #[test]
    fn test_empty_fusion_rejected() {
        let config = StructGateConfig {
            policy: Some(PolicySpec::Fusion {
                constraints: vec![],
            }),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(StructGateError::Config(_))
        ));
    }

    #[test]
    fn test_nan_bound_rejected() {
        let policy = PolicySpec::Threshold {
            metric: Metric::Entropy,
            bound: f64::NAN,
            comparison: Comparison::Max,
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_no_probes_rejected() {
        let config = StructGateConfig {
            probes: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "probes": [
                {"kind": "entropy"},
                {"kind": "spectral", "window_size": 6}
            ],
            "policy": {"kind": "threshold", "metric": "entropy", "bound": 6.5},
            "engine": {"max_steps": 24, "halt_on_refuse": true}
        }"#;
        let config = StructGateConfig::from_json_validated(json).unwrap();
        assert_eq!(config.probes.len(), 2);
        assert_eq!(
            config.probes[1],
            ProbeSpec::Spectral {
                window_size: 6,
                rank_tolerance: DEFAULT_RANK_TOLERANCE
            }
        );
        assert_eq!(
            config.policy,
            Some(PolicySpec::Threshold {
                metric: Metric::Entropy,
                bound: 6.5,
                comparison: Comparison::Max
            })
        );
        assert_eq!(config.engine.max_steps, 24);
        assert!(config.engine.halt_on_refuse);
        assert!(!config.engine.verbose);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(StructGateConfig::from_json(r#"{"temperature": 0.7}"#).is_err());
        assert!(StructGateConfig::from_json(
            r#"{"probes": [{"kind": "spectral", "window": 6}]}"#
        )
        .is_err());
        assert!(StructGateConfig::from_json(
            r#"{"policy": {"kind": "threshold", "metric": "perplexity", "bound": 1.0}}"#
        )
        .is_err());
    }

    #[test]
    fn test_fusion_from_json_min_comparison() {
        let json = r#"{"policy": {"kind": "fusion", "constraints": [
            {"metric": "entropy", "bound": 6.5},
            {"metric": "margin", "bound": 0.02, "comparison": "min"}
        ]}}"#;
        let config = StructGateConfig::from_json_validated(json).unwrap();
        match config.policy {
            Some(PolicySpec::Fusion { constraints }) => {
                assert_eq!(constraints[0], ConstraintSpec::max(Metric::Entropy, 6.5));
                assert_eq!(constraints[1], ConstraintSpec::min(Metric::Margin, 0.02));
            }
            other => panic!("expected fusion policy, got {other:?}"),
        }
        // Probes fall back to the default suite.
        assert_eq!(config.probes.len(), 5);
    }
}
