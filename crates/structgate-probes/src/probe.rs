// ─────────────────────────────────────────────────────────────────────
// StructGate — Probe Capability
// ─────────────────────────────────────────────────────────────────────

use structgate_types::{Observable, ProbeSpec, StepTrace, StructGateResult};

use crate::entropy::EntropyProbe;
use crate::internal::{LayerDeltaProbe, NormProbe};
use crate::margin::MarginProbe;
use crate::multi::MultiProbe;
use crate::spectral::SpectralProbe;

/// Extracts diagnostic signals from one generation step.
pub trait Probe {
    /// Short stable identifier, used in logs.
    fn name(&self) -> &'static str;

    /// Observe one step and return the metrics this probe could compute.
    fn observe(&mut self, step: &StepTrace) -> Observable;

    /// Drop any cross-step state. Stateless probes have none.
    fn reset(&mut self) {}
}

/// The closed set of probe variants, chosen at construction.
#[derive(Debug, Clone)]
pub enum ProbeKind {
    Entropy(EntropyProbe),
    Margin(MarginProbe),
    LayerDelta(LayerDeltaProbe),
    Norm(NormProbe),
    Spectral(SpectralProbe),
    Multi(MultiProbe),
}

impl ProbeKind {
    /// Build a probe from its configuration entry.
    pub fn from_spec(spec: &ProbeSpec) -> StructGateResult<Self> {
        spec.validate()?;
        Ok(match spec {
            ProbeSpec::Entropy => Self::Entropy(EntropyProbe),
            ProbeSpec::Margin => Self::Margin(MarginProbe),
            ProbeSpec::LayerDelta => Self::LayerDelta(LayerDeltaProbe),
            ProbeSpec::Norm => Self::Norm(NormProbe),
            ProbeSpec::Spectral {
                window_size,
                rank_tolerance,
            } => Self::Spectral(
                SpectralProbe::try_new(*window_size)?.with_rank_tolerance(*rank_tolerance),
            ),
        })
    }
}

impl Probe for ProbeKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Entropy(p) => p.name(),
            Self::Margin(p) => p.name(),
            Self::LayerDelta(p) => p.name(),
            Self::Norm(p) => p.name(),
            Self::Spectral(p) => p.name(),
            Self::Multi(p) => p.name(),
        }
    }

    fn observe(&mut self, step: &StepTrace) -> Observable {
        match self {
            Self::Entropy(p) => p.observe(step),
            Self::Margin(p) => p.observe(step),
            Self::LayerDelta(p) => p.observe(step),
            Self::Norm(p) => p.observe(step),
            Self::Spectral(p) => p.observe(step),
            Self::Multi(p) => p.observe(step),
        }
    }

    fn reset(&mut self) {
        match self {
            Self::Spectral(p) => p.reset(),
            Self::Multi(p) => p.reset(),
            Self::Entropy(_) | Self::Margin(_) | Self::LayerDelta(_) | Self::Norm(_) => {}
        }
    }
}

impl From<EntropyProbe> for ProbeKind {
    fn from(p: EntropyProbe) -> Self {
        Self::Entropy(p)
    }
}

impl From<MarginProbe> for ProbeKind {
    fn from(p: MarginProbe) -> Self {
        Self::Margin(p)
    }
}

impl From<LayerDeltaProbe> for ProbeKind {
    fn from(p: LayerDeltaProbe) -> Self {
        Self::LayerDelta(p)
    }
}

impl From<NormProbe> for ProbeKind {
    fn from(p: NormProbe) -> Self {
        Self::Norm(p)
    }
}

impl From<SpectralProbe> for ProbeKind {
    fn from(p: SpectralProbe) -> Self {
        Self::Spectral(p)
    }
}

impl From<MultiProbe> for ProbeKind {
    fn from(p: MultiProbe) -> Self {
        Self::Multi(p)
    }
}
