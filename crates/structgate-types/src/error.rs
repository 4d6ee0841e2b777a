// ─────────────────────────────────────────────────────────────────────
// StructGate — Error Hierarchy
// ─────────────────────────────────────────────────────────────────────

use thiserror::Error;

/// Root error type for all StructGate failures.
///
/// Probes and policies never return these: a probe that cannot compute a
/// metric omits it, and a policy fails closed. Errors are reserved for the
/// edges of the pipeline (configuration, model collaborator, malformed
/// step data) and for solver internals that the spectral probe absorbs.
#[derive(Error, Debug)]
pub enum StructGateError {
    /// The model collaborator failed to load or to produce a step.
    #[error("model error: {0}")]
    Model(String),

    /// Invalid configuration (window size, bounds, empty constraint set).
    #[error("config error: {0}")]
    Config(String),

    /// Malformed step data (hidden-state shape does not match its buffer).
    #[error("validation error: {0}")]
    Validation(String),

    /// Numerical error (NaN/Inf, solver non-convergence).
    #[error("numerical error: {0}")]
    Numerical(String),
}

pub type StructGateResult<T> = Result<T, StructGateError>;
