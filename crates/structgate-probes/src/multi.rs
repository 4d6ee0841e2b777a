// ─────────────────────────────────────────────────────────────────────
// StructGate — Multi-Probe Aggregator
// ─────────────────────────────────────────────────────────────────────

use structgate_types::{Observable, ProbeSpec, StepTrace, StructGateResult};

use crate::probe::{Probe, ProbeKind};

/// Runs an ordered list of probes and merges their observations.
///
/// On key collision the later probe wins. The aggregate is itself a
/// [`Probe`], so an engine cannot tell one probe from many.
#[derive(Debug, Clone, Default)]
pub struct MultiProbe {
    probes: Vec<ProbeKind>,
}

impl MultiProbe {
    pub fn new(probes: Vec<ProbeKind>) -> Self {
        Self { probes }
    }

    /// Build the probe list from configuration, in order.
    pub fn from_specs(specs: &[ProbeSpec]) -> StructGateResult<Self> {
        let probes = specs
            .iter()
            .map(ProbeKind::from_spec)
            .collect::<StructGateResult<Vec<_>>>()?;
        Ok(Self { probes })
    }

    /// Append a probe after the existing ones.
    pub fn push(&mut self, probe: impl Into<ProbeKind>) {
        self.probes.push(probe.into());
    }

    pub fn with(mut self, probe: impl Into<ProbeKind>) -> Self {
        self.push(probe);
        self
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.probes.iter().map(Probe::name).collect()
    }

    pub fn probes(&self) -> &[ProbeKind] {
        &self.probes
    }
}

impl Probe for MultiProbe {
    fn name(&self) -> &'static str {
        "multi"
    }

    fn observe(&mut self, step: &StepTrace) -> Observable {
        let mut merged = Observable::new();
        for probe in &mut self.probes {
            merged.merge(probe.observe(step));
        }
        merged
    }

    fn reset(&mut self) {
        self.probes.iter_mut().for_each(Probe::reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EntropyProbe, LayerDeltaProbe, MarginProbe, NormProbe, SpectralProbe};
    use structgate_types::observable::keys;

    fn spectral(window: usize) -> ProbeKind {
        SpectralProbe::new(window).into()
    }

    #[test]
    fn test_entropy_and_margin_do_not_interfere() {
        let step = StepTrace::from_logits("t", vec![10.0, 1.0, 0.5]);
        let mut multi = MultiProbe::new(vec![EntropyProbe.into(), MarginProbe.into()]);
        let merged = multi.observe(&step);

        let alone_entropy = EntropyProbe.observe(&step);
        let alone_margin = MarginProbe.observe(&step);
        assert_eq!(merged.scalar(keys::ENTROPY), alone_entropy.scalar(keys::ENTROPY));
        assert_eq!(merged.scalar(keys::MARGIN), alone_margin.scalar(keys::MARGIN));
        assert_eq!(merged.len(), alone_entropy.len() + alone_margin.len());
    }

    #[test]
    fn test_last_write_wins() {
        // Two spectral probes: the second (window 1) is ready immediately
        // and overwrites the first's not-ready answer.
        let step = StepTrace::new("t", vec![0.0], vec![1.0, 2.0], vec![1.0, 2.0]);
        let mut multi = MultiProbe::new(vec![spectral(3), spectral(1)]);
        let obs = multi.observe(&step);
        assert_eq!(obs.flag(keys::SVD_READY), Some(true));

        let mut reversed = MultiProbe::new(vec![spectral(1), spectral(3)]);
        let obs = reversed.observe(&step);
        assert_eq!(obs.flag(keys::SVD_READY), Some(false));
    }

    #[test]
    fn test_full_suite_keys() {
        let step = StepTrace::new("t", vec![2.0, 1.0], vec![1.0, 0.0], vec![0.0, 1.0]);
        let mut multi = MultiProbe::default()
            .with(EntropyProbe)
            .with(MarginProbe)
            .with(LayerDeltaProbe)
            .with(NormProbe)
            .with(SpectralProbe::new(4));
        let obs = multi.observe(&step);
        for key in [
            keys::ENTROPY,
            keys::MARGIN,
            keys::LAYER_DELTA,
            keys::LAYER_SIMILARITY,
            keys::ACTIVATION_ENERGY,
            keys::SV_RATIO,
            keys::SVD_READY,
        ] {
            assert!(obs.contains_key(key), "missing {key}");
        }
        assert_eq!(multi.names(), vec!["entropy", "margin", "layer_delta", "norm", "spectral"]);
    }

    #[test]
    fn test_from_specs_and_reset() {
        let mut multi =
            MultiProbe::from_specs(&[ProbeSpec::Entropy, ProbeSpec::spectral(2)]).unwrap();
        assert_eq!(multi.len(), 2);
        let step = StepTrace::new("t", vec![0.0], vec![1.0], vec![1.0]);
        multi.observe(&step);
        multi.observe(&step);
        multi.reset();
        match &multi.probes()[1] {
            ProbeKind::Spectral(p) => assert_eq!(p.buffer_len(), 0),
            other => panic!("unexpected probe {other:?}"),
        }
    }

    #[test]
    fn test_empty_aggregator_observes_nothing() {
        let mut multi = MultiProbe::default();
        assert!(multi.is_empty());
        assert!(multi.observe(&StepTrace::from_logits("t", vec![1.0])).is_empty());
    }

    #[test]
    fn test_nested_aggregator() {
        let inner = MultiProbe::new(vec![EntropyProbe.into()]);
        let mut outer = MultiProbe::new(vec![inner.into(), MarginProbe.into()]);
        let obs = outer.observe(&StepTrace::from_logits("t", vec![1.0, 0.0]));
        assert!(obs.contains_key(keys::ENTROPY));
        assert!(obs.contains_key(keys::MARGIN));
    }
}
