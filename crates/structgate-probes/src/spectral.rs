// ─────────────────────────────────────────────────────────────────────
// StructGate — Spectral (SVD) Probe
// ─────────────────────────────────────────────────────────────────────
//! Detects low-rank degeneration ("collapse") of the hidden-state
//! trajectory over a trailing window of steps.
//!
//! Per step:
//!   1. Take one feature vector from the last-layer hidden state
//!      (batch 0, final sequence position; see
//!      [`HiddenState::feature_vector`]).
//!   2. Append it to the FIFO buffer; evict the oldest beyond the window.
//!   3. Until the window is full: `{sv_ratio: null, svd_ready: false}`.
//!   4. Stack into a `W × D` matrix and subtract the column means.
//!   5. `sv_ratio = σ₁ / (Σσᵢ + ε)`, `rank = #{σᵢ > tol}`.
//!
//! Centering a window of large activations leaves rounding noise of
//! about `W·D·ε` times the raw norm. Singular values at or below that
//! floor are not counted towards `rank`, and a window whose centered
//! norm is entirely noise reads as collapse to a single point.
//!
//! A ratio near 1 means every recent hidden state points the same way.
//! That is necessary but not sufficient for repetition or collapse, so
//! gate on it together with other probes.
//!
//! [`HiddenState::feature_vector`]: structgate_types::HiddenState::feature_vector

use std::collections::VecDeque;

use structgate_types::config::DEFAULT_RANK_TOLERANCE;
use structgate_types::observable::keys;
use structgate_types::{Observable, StepTrace, StructGateError, StructGateResult};

use crate::linalg::{center_columns, l2_norm, singular_values};
use crate::probe::Probe;

/// Guards the ratio against an all-zero spectrum.
pub const SV_EPS: f64 = 1e-9;


/// One spectral analysis of a full window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralReading {
    /// σ₁ / Σσ, in (0, 1].
    pub sv_ratio: f64,
    /// Singular values above the rank tolerance.
    pub rank: usize,
}

/// Stateful spectral probe owning a bounded trajectory buffer.
///
/// One instance per generation session: the buffer is never shared.
#[derive(Debug, Clone)]
pub struct SpectralProbe {
    window_size: usize,
    rank_tolerance: f64,
    buffer: VecDeque<Vec<f64>>,
}

impl SpectralProbe {
    /// New probe with the given window. A window of 0 is raised to 1;
    /// use [`SpectralProbe::try_new`] to reject it instead.
    pub fn new(window_size: usize) -> Self {
        if window_size == 0 {
            log::warn!("spectral probe: window_size 0 raised to 1");
        }
        let window_size = window_size.max(1);
        Self {
            window_size,
            rank_tolerance: DEFAULT_RANK_TOLERANCE,
            buffer: VecDeque::with_capacity(window_size + 1),
        }
    }

    pub fn try_new(window_size: usize) -> StructGateResult<Self> {
        if window_size < 1 {
            return Err(StructGateError::Config(format!(
                "window_size must be >= 1, got {window_size}"
            )));
        }
        Ok(Self::new(window_size))
    }

    pub fn with_rank_tolerance(mut self, tolerance: f64) -> Self {
        self.rank_tolerance = tolerance;
        self
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_ready(&self) -> bool {
        self.buffer.len() == self.window_size
    }

    fn not_ready() -> Observable {
        Observable::new()
            .with(keys::SV_RATIO, None::<f64>)
            .with(keys::SVD_READY, false)
    }

    fn push(&mut self, features: &[f64]) {
        if let Some(front) = self.buffer.front() {
            if front.len() != features.len() {
                log::warn!(
                    "spectral probe: hidden dim changed {} -> {}, restarting window",
                    front.len(),
                    features.len()
                );
                self.buffer.clear();
            }
        }
        self.buffer.push_back(features.to_vec());
        while self.buffer.len() > self.window_size {
            self.buffer.pop_front();
        }
    }

    /// Analyse the current buffer as a `W × D` matrix.
    pub fn analyze(&self) -> StructGateResult<SpectralReading> {
        let rows = self.buffer.len();
        let cols = self.buffer.front().map_or(0, Vec::len);
        if rows == 0 || cols == 0 {
            return Err(StructGateError::Numerical("empty window".to_string()));
        }

        let mut m: Vec<f64> = Vec::with_capacity(rows * cols);
        for row in &self.buffer {
            m.extend_from_slice(row);
        }
        let raw_norm = l2_norm(&m);
        if !raw_norm.is_finite() {
            return Err(StructGateError::Numerical(
                "non-finite hidden state in window".to_string(),
            ));
        }
        if raw_norm == 0.0 {
            return Err(StructGateError::Numerical("all-zero window".to_string()));
        }

        center_columns(&mut m, rows, cols);
        let noise_floor = (rows * cols) as f64 * f64::EPSILON * raw_norm;
        if l2_norm(&m) <= noise_floor {
            // Identical states: the trajectory sits on one point, the
            // limit of rank-1 collapse. Mean-centering leaves only noise.
            return Ok(SpectralReading {
                sv_ratio: 1.0,
                rank: 0,
            });
        }

        let sv = singular_values(&m, rows, cols)?;
        let total: f64 = sv.iter().sum();
        let sv_ratio = sv[0] / (total + SV_EPS);
        if !sv_ratio.is_finite() {
            return Err(StructGateError::Numerical(format!(
                "non-finite ratio (σ₁ = {}, Σσ = {total})",
                sv[0]
            )));
        }
        let floor = self.rank_tolerance.max(noise_floor);
        let rank = sv.iter().filter(|&&s| s > floor).count();
        Ok(SpectralReading { sv_ratio, rank })
    }
}

impl Probe for SpectralProbe {
    fn name(&self) -> &'static str {
        "spectral"
    }

    fn observe(&mut self, step: &StepTrace) -> Observable {
        let Some(features) = step.last_features() else {
            return Self::not_ready();
        };
        self.push(features);

        if !self.is_ready() {
            return Self::not_ready();
        }

        match self.analyze() {
            Ok(reading) => Observable::new()
                .with(keys::SV_RATIO, Some(reading.sv_ratio))
                .with(keys::SVD_READY, true)
                .with(keys::RANK, reading.rank as f64),
            Err(e) => {
                log::warn!("spectral probe: {e}; reporting not ready");
                Self::not_ready()
            }
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }
}
