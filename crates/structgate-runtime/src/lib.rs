// ─────────────────────────────────────────────────────────────────────
// StructGate — Runtime Engines
// License: GNU AGPL v3
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! Ties a model collaborator to probes and an optional gate.
//!
//! - [`RuntimeEngine`]: one forward pass, one observation.
//! - [`GenerationEngine`]: pulls traced steps one at a time, observes,
//!   gates, and records an audit log per run.
//!
//! All cross-step state lives in the probe. The engines keep only the
//! log of the last run, so swapping probes never changes engine logic.

pub mod engine;
pub mod fake;
pub mod model;

pub use engine::{format_status_line, GenerationEngine, RuntimeEngine};
pub use fake::{FakeModel, ScriptedModel};
pub use model::{LanguageModel, StepStream};
