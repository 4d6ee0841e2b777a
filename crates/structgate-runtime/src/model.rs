// ─────────────────────────────────────────────────────────────────────
// StructGate — Model Collaborator Contract
// ─────────────────────────────────────────────────────────────────────

use structgate_types::{StepTrace, StructGateResult};

/// Lazy, finite, non-restartable sequence of traced steps.
pub type StepStream<'a> = Box<dyn Iterator<Item = StructGateResult<StepTrace>> + 'a>;

/// What the runtime needs from a language model.
///
/// Weight loading, tokenization and decoding live behind this trait.
/// Decoding is greedy; the engines never sample.
pub trait LanguageModel {
    /// One forward pass over `prompt`.
    fn forward(&mut self, prompt: &str) -> StructGateResult<StepTrace>;

    /// Start greedy generation. The stream yields at most `max_steps`
    /// steps and ends early when the model is exhausted. An `Err` item
    /// is fatal for the run.
    fn generate_with_trace(
        &mut self,
        prompt: &str,
        max_steps: usize,
    ) -> StructGateResult<StepStream<'_>>;
}

impl<M: LanguageModel + ?Sized> LanguageModel for Box<M> {
    fn forward(&mut self, prompt: &str) -> StructGateResult<StepTrace> {
        (**self).forward(prompt)
    }

    fn generate_with_trace(
        &mut self,
        prompt: &str,
        max_steps: usize,
    ) -> StructGateResult<StepStream<'_>> {
        (**self).generate_with_trace(prompt, max_steps)
    }
}
