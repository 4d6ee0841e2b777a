// ─────────────────────────────────────────────────────────────────────
// StructGate — Runtime Engine + Generation Engine
// ─────────────────────────────────────────────────────────────────────
//! Orchestration loops: forward → observe → optional decide → append.
//!
//! Two variants:
//! - `RuntimeEngine`: single forward pass, single observation.
//! - `GenerationEngine`: multi-step pull loop with an audit log and
//!   optional halt on refusal.

use std::time::Instant;

use structgate_gate::Gate;
use structgate_probes::{MultiProbe, Probe};
use structgate_types::observable::keys;
use structgate_types::{
    EngineConfig, GateAction, GenerationSession, LogEntry, Observable, StructGateConfig,
    StructGateError, StructGateResult,
};

use crate::model::LanguageModel;

/// Compact one-line dashboard for a step.
///
/// `['tok'] | SVD: 0.9876 | Delta: 0.1234 | Ent: 1.2345`. An unready
/// spectral ratio prints `WAIT`; any other absent metric prints `----`.
pub fn format_status_line(token: &str, obs: &Observable) -> String {
    let fmt = |key: &str, missing: &str| {
        obs.scalar(key)
            .map_or_else(|| missing.to_string(), |v| format!("{v:.4}"))
    };
    format!(
        "['{}'] | SVD: {} | Delta: {} | Ent: {}",
        token.escape_debug(),
        fmt(keys::SV_RATIO, "WAIT"),
        fmt(keys::LAYER_DELTA, "----"),
        fmt(keys::ENTROPY, "----"),
    )
}

/// Single-step diagnostic engine.
pub struct RuntimeEngine<M, P> {
    model: M,
    probe: P,
    gate: Option<Gate>,
}

impl<M: LanguageModel, P: Probe> RuntimeEngine<M, P> {
    pub fn new(model: M, probe: P) -> Self {
        Self {
            model,
            probe,
            gate: None,
        }
    }

    pub fn with_gate(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// One forward pass, one observation. Model errors are returned as-is.
    pub fn step(&mut self, prompt: &str) -> StructGateResult<Observable> {
        let trace = self.model.forward(prompt).map_err(|e| {
            log::error!("forward pass failed: {e}");
            e
        })?;
        Ok(self.probe.observe(&trace))
    }

    /// [`RuntimeEngine::step`] plus the gate decision, as a log entry.
    pub fn review(&mut self, prompt: &str) -> StructGateResult<LogEntry> {
        let observable = self.step(prompt)?;
        let action = self.gate.as_ref().map(|g| g.evaluate(&observable));
        Ok(LogEntry {
            step: 0,
            token: prompt.to_string(),
            observable,
            action,
        })
    }

    pub fn probe_mut(&mut self) -> &mut P {
        &mut self.probe
    }
}

/// Multi-step generation loop with per-step telemetry.
///
/// The engine keeps only the session of the last run. Cross-step state
/// (the spectral window) lives in the probe and carries over between runs
/// until the caller resets it via [`GenerationEngine::probe_mut`].
pub struct GenerationEngine<M, P = MultiProbe> {
    model: M,
    probe: P,
    gate: Option<Gate>,
    config: EngineConfig,
    session: GenerationSession,
}

impl<M: LanguageModel> GenerationEngine<M, MultiProbe> {
    /// Build probes and gate from a validated configuration.
    pub fn from_config(model: M, config: &StructGateConfig) -> StructGateResult<Self> {
        config.validate()?;
        let probe = MultiProbe::from_specs(&config.probes)?;
        let gate = config.policy.as_ref().map(Gate::from_spec).transpose()?;
        Ok(Self {
            model,
            probe,
            gate,
            config: config.engine.clone(),
            session: GenerationSession::default(),
        })
    }
}

impl<M: LanguageModel, P: Probe> GenerationEngine<M, P> {
    pub fn new(model: M, probe: P) -> Self {
        Self {
            model,
            probe,
            gate: None,
            config: EngineConfig::default(),
            session: GenerationSession::default(),
        }
    }

    pub fn with_gate(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Stop the run at the first REFUSE. The refusing step is still logged.
    pub fn halt_on_refuse(mut self, enabled: bool) -> Self {
        self.config.halt_on_refuse = enabled;
        self
    }

    pub fn verbose(mut self, enabled: bool) -> Self {
        self.config.verbose = enabled;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run with the configured `max_steps`.
    pub fn run_default(&mut self, prompt: &str) -> StructGateResult<&[LogEntry]> {
        let max_steps = self.config.max_steps;
        self.run(prompt, max_steps)
    }

    /// Generate up to `max_steps` steps, observing and gating each one.
    ///
    /// Clears the previous log first. A model error aborts the run; the
    /// entries logged before it stay available via [`Self::logs`].
    pub fn run(&mut self, prompt: &str, max_steps: usize) -> StructGateResult<&[LogEntry]> {
        let start = Instant::now();
        let Self {
            model,
            probe,
            gate,
            config,
            session,
        } = self;
        *session = GenerationSession {
            prompt: prompt.to_string(),
            ..Default::default()
        };
        log::info!("generation start: {prompt:?} (max_steps={max_steps})");

        let stream = model.generate_with_trace(prompt, max_steps).map_err(|e| {
            log::error!("model failed to start generation: {e}");
            e
        })?;

        let mut failure: Option<StructGateError> = None;
        for (i, item) in stream.take(max_steps).enumerate() {
            let trace = match item {
                Ok(trace) => trace,
                Err(e) => {
                    log::error!("model failed at step {i}: {e}");
                    failure = Some(e);
                    break;
                }
            };

            let observable = probe.observe(&trace);
            let action = gate.as_ref().map(|g| g.evaluate(&observable));
            if config.verbose {
                log::info!("{}", format_status_line(&trace.token, &observable));
            }

            let halt = config.halt_on_refuse && action == Some(GateAction::Refuse);
            if halt {
                let reason = gate
                    .as_ref()
                    .map(|g| g.review(&observable).reason())
                    .unwrap_or_default();
                session.halted = true;
                session.halt_index = Some(i);
                session.halt_reason = format!("gate_refuse ({reason})");
            }
            session.entries.push(LogEntry {
                step: i,
                token: trace.token,
                observable,
                action,
            });
            if halt {
                log::info!("generation halted at step {i}: {}", session.halt_reason);
                break;
            }
        }

        session.end_time_s = start.elapsed().as_secs_f64();
        if let Some(e) = failure {
            return Err(e);
        }
        log::info!(
            "generation complete: {} steps, {} refused",
            session.token_count(),
            session.refusal_count()
        );
        Ok(&session.entries)
    }

    /// Entries of the last run.
    pub fn logs(&self) -> &[LogEntry] {
        &self.session.entries
    }

    /// Last run as a session record.
    pub fn session(&self) -> &GenerationSession {
        &self.session
    }

    /// Entries of the last run as a JSON array.
    pub fn logs_json(&self) -> StructGateResult<String> {
        serde_json::to_string(&self.session.entries)
            .map_err(|e| StructGateError::Validation(format!("log serialisation failed: {e}")))
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    pub fn probe_mut(&mut self) -> &mut P {
        &mut self.probe
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }
}
