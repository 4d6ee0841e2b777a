// ─────────────────────────────────────────────────────────────────────
// StructGate — Runtime Probes
// License: GNU AGPL v3
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! Signal extraction from one generation step at a time.
//!
//! Every probe implements [`Probe`]: it reads a [`StepTrace`] and writes
//! the metrics it can compute into an [`Observable`]. Stateless probes are
//! pure functions of the step; the [`SpectralProbe`] owns a bounded FIFO
//! of recent hidden states and must not be shared between sessions.
//!
//! # Invariants
//!
//! 1. **Probes never fail**: missing or malformed inputs produce an empty
//!    (or explicitly not-ready) observable, never an error or a panic.
//! 2. **No silent zeros**: a metric that cannot be computed is omitted, so
//!    the gate can apply its fail-closed default.
//! 3. **Window readiness is exact**: the spectral probe reports
//!    `svd_ready = true` iff its buffer holds exactly `window_size` vectors.
//!
//! [`StepTrace`]: structgate_types::StepTrace
//! [`Observable`]: structgate_types::Observable

pub mod entropy;
pub mod internal;
pub mod linalg;
pub mod margin;
pub mod multi;
pub mod probe;
pub mod spectral;

pub use entropy::EntropyProbe;
pub use internal::{LayerDeltaProbe, NormProbe};
pub use margin::MarginProbe;
pub use multi::MultiProbe;
pub use probe::{Probe, ProbeKind};
pub use spectral::SpectralProbe;
