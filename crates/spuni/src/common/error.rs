//! Common error types for the generation engine.

use thiserror::Error;

/// Errors surfaced by the generation engine.
///
/// Precondition violations abort the whole batch call before any compute;
/// there is no partial-batch success and no retry path at this layer.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The prompt batch holds no rows.
    #[error("prompt batch is empty")]
    EmptyBatch,

    /// A prompt holds no tokens.
    #[error("prompt at row {0} is empty")]
    EmptyPrompt(usize),

    /// More prompts than the engine was configured for.
    #[error("batch of {got} prompts exceeds the configured maximum of {max}")]
    BatchTooLarge { got: usize, max: usize },

    /// A prompt longer than the model's sequence capacity.
    #[error("prompt of {got} tokens exceeds the maximum sequence length of {max}")]
    PromptTooLong { got: usize, max: usize },

    /// The model collaborator failed or returned malformed logits.
    #[error("model forward pass failed: {0}")]
    Forward(#[source] anyhow::Error),

    /// The tokenizer collaborator failed.
    #[error("tokenization failed: {0}")]
    Tokenizer(#[source] anyhow::Error),

    /// The prompt-builder collaborator failed.
    #[error("prompt formatting failed: {0}")]
    PromptBuild(#[source] anyhow::Error),

    /// Sampling hit a degenerate distribution.
    #[error("sampling failed: {0}")]
    Sampling(#[source] anyhow::Error),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
