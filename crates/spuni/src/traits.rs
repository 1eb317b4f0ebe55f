//! Collaborator seams: the model, tokenizer and prompt builder the engine
//! drives but does not implement.

use anyhow::Result;
use ndarray::{Array3, ArrayView2};

use crate::chat::Dialog;

/// An opaque decoder-only transformer.
///
/// `forward` consumes the token slice `[batch, slice_len]` that begins at
/// buffer position `start_pos` and returns logits of shape
/// `[batch, slice_len, vocab]`. The model keeps its own incremental KV cache
/// keyed by `start_pos`; within one generation call the offsets it sees are
/// strictly non-decreasing, and the cache lifetime matches that call.
pub trait CausalModel: Send {
    fn forward(&mut self, tokens: ArrayView2<u32>, start_pos: usize) -> Result<Array3<f32>>;
}

/// Text/token-id codec exposing the reserved ids the token buffer needs.
pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str, bos: bool, eos: bool) -> Result<Vec<u32>>;

    fn decode(&self, tokens: &[u32]) -> Result<String>;

    /// Reserved id used to pre-fill unwritten buffer cells.
    fn pad_id(&self) -> u32;

    /// Reserved id that ends a generated sequence.
    fn eos_id(&self) -> u32;
}

/// Flattens a structured dialog into a single prompt token sequence.
pub trait PromptBuilder {
    fn build_prompt_completion(
        &self,
        dialog: &Dialog,
        tokenizer: &dyn Tokenizer,
    ) -> Result<Vec<u32>>;
}
