// ─────────────────────────────────────────────────────────────────────
// StructGate — PyO3 FFI Bindings
// License: GNU AGPL v3
// ─────────────────────────────────────────────────────────────────────
// Note: #[deny(unsafe_code)] not applied: PyO3 proc macros generate
// unsafe blocks internally. All hand-written code in this crate is safe.
//! Python-callable wrappers around the StructGate probes, gate and
//! generation engine.
//!
//! # FFI Safety
//!
//! - GIL acquired via `Python::with_gil` before every call into the model.
//! - Python exceptions raised by the model surface as `RuntimeError`.
//! - Config is validated before storage (`StructGateConfig::validate()`).
//! - Probe and engine classes are `unsendable`: one set per session.
//!
//! Install: `pip install -e crates/structgate-ffi` (requires maturin).
//!
//! Usage from Python:
//! ```python
//! from structgate import StructGateConfig, GenerationEngine
//!
//! engine = GenerationEngine(model, StructGateConfig(max_entropy=6.5))
//! for entry in engine.run("Explain the proof", max_tokens=16):
//!     print(entry["token"], entry["action"], entry["metrics"]["entropy"])
//! ```

use pyo3::exceptions::{PyRuntimeError, PyStopIteration, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyDict, PyList};

use structgate_gate::{Constraint, FusionPolicy, Gate, GatePolicy};
use structgate_probes::{MultiProbe, Probe};
use structgate_runtime::{GenerationEngine, LanguageModel, StepStream};
use structgate_types::{
    Comparison, ConstraintSpec, EngineConfig, HiddenState, LogEntry, Metric, Observable,
    ObservableValue, PolicySpec, ProbeSpec, StepTrace, StructGateConfig, StructGateError,
    StructGateResult,
};

// ─── Conversions ────────────────────────────────────────────────────

fn to_py_err(e: StructGateError) -> PyErr {
    match e {
        StructGateError::Config(_) | StructGateError::Validation(_) => {
            PyValueError::new_err(e.to_string())
        }
        StructGateError::Model(_) | StructGateError::Numerical(_) => {
            PyRuntimeError::new_err(e.to_string())
        }
    }
}

fn model_err(e: PyErr) -> StructGateError {
    StructGateError::Model(e.to_string())
}

fn observable_to_dict<'py>(py: Python<'py>, obs: &Observable) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new(py);
    for (key, value) in obs.iter() {
        match value {
            ObservableValue::Scalar(v) => dict.set_item(key, *v)?,
            ObservableValue::Optional(v) => dict.set_item(key, *v)?,
            ObservableValue::Flag(b) => dict.set_item(key, *b)?,
            ObservableValue::Vector(v) => dict.set_item(key, v.clone())?,
        }
    }
    Ok(dict)
}

/// Metric dict from Python. Entries of any other type are skipped, so the
/// gate sees them as absent and fails closed.
fn observable_from_dict(dict: &Bound<'_, PyDict>) -> PyResult<Observable> {
    let mut obs = Observable::new();
    for (key, value) in dict.iter() {
        let key: String = key.extract()?;
        if value.is_none() {
            obs.insert(key, None::<f64>);
        } else if value.is_instance_of::<PyBool>() {
            obs.insert(key, value.extract::<bool>()?);
        } else if let Ok(v) = value.extract::<f64>() {
            obs.insert(key, v);
        } else if let Ok(v) = value.extract::<Vec<f64>>() {
            obs.insert(key, v);
        }
    }
    Ok(obs)
}

/// Hidden state under `key`, shaped by the optional `<key>_shape` entry.
fn hidden_from_dict(dict: &Bound<'_, PyDict>, key: &str) -> PyResult<Option<HiddenState>> {
    let data = match dict.get_item(key)? {
        Some(v) if !v.is_none() => v.extract::<Vec<f64>>()?,
        _ => return Ok(None),
    };
    match dict.get_item(format!("{key}_shape"))? {
        Some(s) if !s.is_none() => {
            let shape = s.extract::<Vec<usize>>()?;
            HiddenState::with_shape(data, shape)
                .map(Some)
                .map_err(to_py_err)
        }
        _ => Ok(Some(HiddenState::vector(data))),
    }
}

fn step_from_dict(dict: &Bound<'_, PyDict>) -> PyResult<StepTrace> {
    let token = match dict.get_item("token")? {
        Some(t) => t.extract::<String>()?,
        None => String::new(),
    };
    let logits = dict
        .get_item("logits")?
        .ok_or_else(|| PyValueError::new_err("step is missing 'logits'"))?
        .extract::<Vec<f64>>()?;
    Ok(StepTrace {
        token,
        logits,
        last_hidden: hidden_from_dict(dict, "last_hidden_state")?,
        prev_hidden: hidden_from_dict(dict, "prev_hidden_state")?,
    })
}

fn step_from_any(value: &Bound<'_, PyAny>) -> PyResult<StepTrace> {
    step_from_dict(value.downcast::<PyDict>()?)
}

fn entry_to_dict<'py>(py: Python<'py>, entry: &LogEntry) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new(py);
    dict.set_item("step", entry.step)?;
    dict.set_item("token", entry.token.as_str())?;
    dict.set_item("metrics", observable_to_dict(py, &entry.observable)?)?;
    dict.set_item("action", entry.action.map(|a| a.as_str()))?;
    Ok(dict)
}

fn parse_metric(name: &str) -> PyResult<Metric> {
    Metric::from_key(name).ok_or_else(|| PyValueError::new_err(format!("unknown metric '{name}'")))
}

fn parse_comparison(name: &str) -> PyResult<Comparison> {
    match name {
        "max" => Ok(Comparison::Max),
        "min" => Ok(Comparison::Min),
        other => Err(PyValueError::new_err(format!(
            "comparison must be 'max' or 'min', got '{other}'"
        ))),
    }
}

// ─── Python model adapter ───────────────────────────────────────────

/// Any Python object with `forward(prompt)` and
/// `generate_with_trace(prompt, max_tokens=...)` returning step dicts.
struct PyModel {
    obj: PyObject,
}

impl LanguageModel for PyModel {
    fn forward(&mut self, prompt: &str) -> StructGateResult<StepTrace> {
        Python::with_gil(|py| {
            let out = self.obj.call_method1(py, "forward", (prompt,))?;
            step_from_any(out.bind(py))
        })
        .map_err(model_err)
    }

    fn generate_with_trace(
        &mut self,
        prompt: &str,
        max_steps: usize,
    ) -> StructGateResult<StepStream<'_>> {
        let iter = Python::with_gil(|py| -> PyResult<PyObject> {
            let kwargs = PyDict::new(py);
            kwargs.set_item("max_tokens", max_steps)?;
            let out = self
                .obj
                .call_method(py, "generate_with_trace", (prompt,), Some(&kwargs))?;
            out.call_method0(py, "__iter__")
        })
        .map_err(model_err)?;

        Ok(Box::new(std::iter::from_fn(move || {
            Python::with_gil(|py| match iter.call_method0(py, "__next__") {
                Ok(item) => Some(step_from_any(item.bind(py)).map_err(model_err)),
                Err(e) if e.is_instance_of::<PyStopIteration>(py) => None,
                Err(e) => Some(Err(model_err(e))),
            })
        })))
    }
}

// ─── PyStructGateConfig ─────────────────────────────────────────────

/// Python-visible configuration: default probe suite plus fusion gate.
#[pyclass(name = "StructGateConfig")]
#[derive(Clone)]
struct PyStructGateConfig {
    inner: StructGateConfig,
}

#[pymethods]
impl PyStructGateConfig {
    #[new]
    #[pyo3(signature = (
        max_entropy = 6.5,
        min_margin = 0.02,
        window_size = 10,
        max_steps = 32,
        halt_on_refuse = false,
        verbose = false,
    ))]
    fn new(
        max_entropy: f64,
        min_margin: f64,
        window_size: usize,
        max_steps: usize,
        halt_on_refuse: bool,
        verbose: bool,
    ) -> PyResult<Self> {
        let config = StructGateConfig {
            probes: vec![
                ProbeSpec::Entropy,
                ProbeSpec::Margin,
                ProbeSpec::LayerDelta,
                ProbeSpec::Norm,
                ProbeSpec::spectral(window_size),
            ],
            policy: Some(PolicySpec::Fusion {
                constraints: vec![
                    ConstraintSpec::max(Metric::Entropy, max_entropy),
                    ConstraintSpec::min(Metric::Margin, min_margin),
                ],
            }),
            engine: EngineConfig {
                max_steps,
                halt_on_refuse,
                verbose,
            },
        };
        config.validate().map_err(to_py_err)?;
        Ok(Self { inner: config })
    }

    /// Construct from JSON string. Unknown keys are rejected.
    #[staticmethod]
    fn from_json(json: &str) -> PyResult<Self> {
        let config = StructGateConfig::from_json_validated(json).map_err(to_py_err)?;
        Ok(Self { inner: config })
    }

    fn to_json(&self) -> PyResult<String> {
        serde_json::to_string(&self.inner).map_err(|e| PyValueError::new_err(e.to_string()))
    }

    #[getter]
    fn max_steps(&self) -> usize {
        self.inner.engine.max_steps
    }

    #[getter]
    fn halt_on_refuse(&self) -> bool {
        self.inner.engine.halt_on_refuse
    }

    fn __repr__(&self) -> String {
        format!(
            "StructGateConfig(probes={}, gated={}, max_steps={})",
            self.inner.probes.len(),
            self.inner.policy.is_some(),
            self.inner.engine.max_steps
        )
    }
}

fn config_or_default(config: Option<PyRef<'_, PyStructGateConfig>>) -> StructGateConfig {
    config.map(|c| c.inner.clone()).unwrap_or_default()
}

// ─── ProbeSuite ─────────────────────────────────────────────────────

/// Ordered probe set with merged output. Owns the spectral window.
#[pyclass(name = "ProbeSuite", unsendable)]
struct PyProbeSuite {
    inner: MultiProbe,
}

#[pymethods]
impl PyProbeSuite {
    #[new]
    #[pyo3(signature = (config = None))]
    fn new(config: Option<PyRef<'_, PyStructGateConfig>>) -> PyResult<Self> {
        let config = config_or_default(config);
        let inner = MultiProbe::from_specs(&config.probes).map_err(to_py_err)?;
        Ok(Self { inner })
    }

    /// Observe one step dict (`token`, `logits`, `last_hidden_state`,
    /// `prev_hidden_state`) and return the merged metric dict.
    fn observe<'py>(
        &mut self,
        py: Python<'py>,
        step: &Bound<'py, PyDict>,
    ) -> PyResult<Bound<'py, PyDict>> {
        let trace = step_from_dict(step)?;
        observable_to_dict(py, &self.inner.observe(&trace))
    }

    fn reset(&mut self) {
        self.inner.reset();
    }

    fn names(&self) -> Vec<&'static str> {
        self.inner.names()
    }

    fn __len__(&self) -> usize {
        self.inner.len()
    }
}

// ─── Gate ───────────────────────────────────────────────────────────

/// Stateless decision gate over a metric dict.
#[pyclass(name = "Gate")]
struct PyGate {
    inner: Gate,
}

#[pymethods]
impl PyGate {
    #[new]
    #[pyo3(signature = (config = None))]
    fn new(config: Option<PyRef<'_, PyStructGateConfig>>) -> PyResult<Self> {
        let config = config_or_default(config);
        let spec = config
            .policy
            .ok_or_else(|| PyValueError::new_err("config has no policy"))?;
        let inner = Gate::from_spec(&spec).map_err(to_py_err)?;
        Ok(Self { inner })
    }

    /// Single-bound gate, e.g. `Gate.threshold("entropy", 6.5)`.
    #[staticmethod]
    #[pyo3(signature = (metric, bound, comparison = "max"))]
    fn threshold(metric: &str, bound: f64, comparison: &str) -> PyResult<Self> {
        let spec = PolicySpec::Threshold {
            metric: parse_metric(metric)?,
            bound,
            comparison: parse_comparison(comparison)?,
        };
        let inner = Gate::from_spec(&spec).map_err(to_py_err)?;
        Ok(Self { inner })
    }

    /// `entropy <= max_entropy AND margin >= min_margin`.
    #[staticmethod]
    #[pyo3(signature = (max_entropy = 6.5, min_margin = 0.02))]
    fn fusion(max_entropy: f64, min_margin: f64) -> PyResult<Self> {
        let policy = FusionPolicy::new(vec![
            Constraint::max(Metric::Entropy, max_entropy),
            Constraint::min(Metric::Margin, min_margin),
        ])
        .map_err(to_py_err)?;
        Ok(Self {
            inner: Gate::new(policy),
        })
    }

    /// Observe-only gate: always `"NOOP"`.
    #[staticmethod]
    fn passive() -> Self {
        Self {
            inner: Gate::new(GatePolicy::Passive),
        }
    }

    /// `"ALLOW"`, `"REFUSE"` or `"NOOP"`.
    fn evaluate(&self, metrics: &Bound<'_, PyDict>) -> PyResult<&'static str> {
        let obs = observable_from_dict(metrics)?;
        Ok(self.inner.evaluate(&obs).as_str())
    }

    /// `(action, reason)`; the reason lists violated constraints.
    fn review(&self, metrics: &Bound<'_, PyDict>) -> PyResult<(&'static str, String)> {
        let obs = observable_from_dict(metrics)?;
        let verdict = self.inner.review(&obs);
        Ok((verdict.action.as_str(), verdict.reason()))
    }

    fn __repr__(&self) -> String {
        format!("Gate(policy={})", self.inner.policy().name())
    }
}

// ─── GenerationEngine ───────────────────────────────────────────────

/// Generation loop driving a Python model through probes and gate.
#[pyclass(name = "GenerationEngine", unsendable)]
struct PyGenerationEngine {
    inner: GenerationEngine<PyModel>,
}

#[pymethods]
impl PyGenerationEngine {
    #[new]
    #[pyo3(signature = (model, config = None))]
    fn new(model: PyObject, config: Option<PyRef<'_, PyStructGateConfig>>) -> PyResult<Self> {
        let config = config_or_default(config);
        let inner =
            GenerationEngine::from_config(PyModel { obj: model }, &config).map_err(to_py_err)?;
        Ok(Self { inner })
    }

    /// Run generation; returns one dict per step
    /// (`step`, `token`, `metrics`, `action`).
    #[pyo3(signature = (prompt, max_tokens = None))]
    fn run<'py>(
        &mut self,
        py: Python<'py>,
        prompt: &str,
        max_tokens: Option<usize>,
    ) -> PyResult<Bound<'py, PyList>> {
        let max_steps = max_tokens.unwrap_or(self.inner.config().max_steps);
        let entries = self.inner.run(prompt, max_steps).map_err(to_py_err)?;
        let list = PyList::empty(py);
        for entry in entries {
            list.append(entry_to_dict(py, entry)?)?;
        }
        Ok(list)
    }

    /// Single forward pass through the probes, without gating.
    fn step<'py>(&mut self, py: Python<'py>, prompt: &str) -> PyResult<Bound<'py, PyDict>> {
        let trace = self.inner.model_mut().forward(prompt).map_err(to_py_err)?;
        observable_to_dict(py, &self.inner.probe_mut().observe(&trace))
    }

    fn logs<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyList>> {
        let list = PyList::empty(py);
        for entry in self.inner.logs() {
            list.append(entry_to_dict(py, entry)?)?;
        }
        Ok(list)
    }

    fn logs_json(&self) -> PyResult<String> {
        self.inner.logs_json().map_err(to_py_err)
    }

    /// Clear cross-step probe state (the spectral window).
    fn reset_probes(&mut self) {
        self.inner.probe_mut().reset();
    }

    #[getter]
    fn halted(&self) -> bool {
        self.inner.session().halted
    }

    #[getter]
    fn halt_index(&self) -> Option<usize> {
        self.inner.session().halt_index
    }

    #[getter]
    fn halt_reason(&self) -> &str {
        &self.inner.session().halt_reason
    }

    fn output(&self) -> String {
        self.inner.session().output()
    }

    fn refusal_count(&self) -> usize {
        self.inner.session().refusal_count()
    }

    fn mean_metric(&self, key: &str) -> Option<f64> {
        self.inner.session().mean_metric(key)
    }

    fn duration_ms(&self) -> f64 {
        self.inner.session().duration_ms()
    }

    fn __repr__(&self) -> String {
        let session = self.inner.session();
        format!(
            "GenerationEngine(steps={}, refused={}, halted={})",
            session.token_count(),
            session.refusal_count(),
            session.halted
        )
    }
}

// ─── Module Registration ────────────────────────────────────────────

/// StructGate: white-box probes and a fail-closed gate for generation.
///
/// - `StructGateConfig`: configuration
/// - `ProbeSuite`: step dict → metric dict
/// - `Gate`: metric dict → `"ALLOW" | "REFUSE" | "NOOP"`
/// - `GenerationEngine`: probed, gated generation over a Python model
#[pymodule]
fn structgate(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyStructGateConfig>()?;
    m.add_class::<PyProbeSuite>()?;
    m.add_class::<PyGate>()?;
    m.add_class::<PyGenerationEngine>()?;
    Ok(())
}
