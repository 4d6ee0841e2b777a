// ─────────────────────────────────────────────────────────────────────
// StructGate — Runtime Telemetry Types
// License: GNU AGPL v3
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! Type definitions, configuration, and error hierarchy for StructGate,
//! the white-box telemetry pipeline that probes a generative model's
//! internal state step by step and gates continuation of generation.
//!
//! Everything crossing a layer boundary lives here:
//!
//! - [`StepTrace`]: one step of raw model output (token, logits, hidden
//!   states), produced by the external model collaborator.
//! - [`Observable`]: the flat metric mapping probes write and policies read.
//! - [`GateAction`] and [`LogEntry`]: the decision surface and audit record.
//! - [`StructGateConfig`]: the only recognised configuration surface.

pub mod config;
pub mod error;
pub mod observable;
pub mod trace;

pub use config::{
    Comparison, ConstraintSpec, EngineConfig, PolicySpec, ProbeSpec, StructGateConfig,
};
pub use error::{StructGateError, StructGateResult};
pub use observable::{Metric, Observable, ObservableValue};
pub use trace::{GateAction, GenerationSession, HiddenState, LogEntry, StepTrace};
