pub mod error;
pub mod sampling;

pub use error::{EngineError, EngineResult};
pub use sampling::*;

/// Static limits and seeding for one engine instance.
///
/// Everything that used to live in ambient process-wide state (default
/// device, dtype, RNG seed) is carried here explicitly instead.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hard cap on the token buffer width, including the prompt.
    pub max_seq_len: usize,
    /// Largest number of prompts one `generate` call may carry.
    pub max_batch_size: usize,
    /// Fixed RNG seed for sampling; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_seq_len: 2048,
            max_batch_size: 8,
            seed: None,
        }
    }
}

/// Per-call decoding parameters.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Cap on newly generated tokens per row; `None` falls back to
    /// `max_seq_len - 1`.
    pub max_gen_len: Option<usize>,
    /// Softmax temperature; `<= 0` switches to greedy argmax decoding.
    pub temperature: f32,
    /// Nucleus mass threshold for top-p sampling.
    pub top_p: f32,
    /// Record per-token log-probabilities alongside the tokens.
    pub logprobs: bool,
    /// Include the prompt tokens in the returned sequences.
    pub echo: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_gen_len: None,
            temperature: 0.6,
            top_p: 0.9,
            logprobs: false,
            echo: false,
        }
    }
}
