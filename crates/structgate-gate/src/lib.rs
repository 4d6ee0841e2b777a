// ─────────────────────────────────────────────────────────────────────
// StructGate — Decision Layer
// License: GNU AGPL v3
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! Deterministic gate that maps an observable to a [`GateAction`].
//!
//! # Safety Invariants
//!
//! 1. **Fail-closed**: a metric that is absent, unavailable (`null`), or
//!    NaN is replaced by the most conservative value for its bound's
//!    direction (+∞ for an upper bound, −∞ for a lower bound). A missing
//!    metric can never produce ALLOW.
//! 2. **Conjunction is strict**: the fusion policy ALLOWs only when every
//!    constraint holds; one violation is enough to REFUSE.
//! 3. **No memory**: policies and the gate hold only immutable
//!    configuration. Each evaluation is independent of all earlier ones.
//!
//! [`GateAction`]: structgate_types::GateAction

pub mod gate;
pub mod policy;

pub use gate::{Gate, GateVerdict};
pub use policy::{Constraint, FusionPolicy, GatePolicy, Policy, ThresholdPolicy, Violation};
