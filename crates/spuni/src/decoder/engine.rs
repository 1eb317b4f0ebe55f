//! The decode loop: batched, lockstep autoregressive generation.

use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use log::{debug, info};
use ndarray::{s, Array2, Array3};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::common::error::{EngineError, EngineResult};
use crate::common::sampling::{greedy, log_softmax_1d, sample_top_p, softmax_1d_inplace};
use crate::common::{EngineConfig, GenerationConfig};
use crate::decoder::buffer::TokenBuffer;
use crate::decoder::cursor::{DecodeCursor, DecodePhase};
use crate::traits::{CausalModel, Tokenizer};

/// Trimmed, EOS-truncated output of one `generate` call, one entry per row.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutput {
    pub tokens: Vec<Vec<u32>>,
    pub logprobs: Option<Vec<Vec<f32>>>,
}

/// Batched autoregressive generation over an opaque forward-pass model.
///
/// All rows of a batch advance in lockstep inside one sequential loop over
/// positions. The engine exclusively owns the token buffer, the EOS flags and
/// the optional log-probability buffer for the duration of one [`generate`]
/// call, and drives the model's incremental KV cache with strictly
/// non-decreasing offsets.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use spuni::{EngineConfig, GenerationConfig, GenerationEngine};
///
/// # fn model() -> Box<dyn spuni::CausalModel> { unimplemented!() }
/// # fn tokenizer() -> Arc<dyn spuni::Tokenizer> { unimplemented!() }
/// # fn main() -> spuni::EngineResult<()> {
/// let mut engine = GenerationEngine::new(model(), tokenizer(), EngineConfig::default());
/// let predictions = engine.text_completion(
///     &["The capital of Iceland is"],
///     &GenerationConfig { max_gen_len: Some(16), ..Default::default() },
/// )?;
/// println!("{}", predictions[0].generation);
/// # Ok(())
/// # }
/// ```
///
/// [`generate`]: GenerationEngine::generate
pub struct GenerationEngine {
    model: Box<dyn CausalModel>,
    tokenizer: Arc<dyn Tokenizer>,
    config: EngineConfig,
    rng: StdRng,
}

impl GenerationEngine {
    pub fn new(
        model: Box<dyn CausalModel>,
        tokenizer: Arc<dyn Tokenizer>,
        config: EngineConfig,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            model,
            tokenizer,
            config,
            rng,
        }
    }

    pub fn tokenizer(&self) -> &dyn Tokenizer {
        self.tokenizer.as_ref()
    }

    pub fn max_seq_len(&self) -> usize {
        self.config.max_seq_len
    }

    /// Generate continuations for a batch of prompt token sequences.
    ///
    /// Every sequence advances one position per step until the buffer fills
    /// or every row has produced the EOS id. Returned sequences are trimmed
    /// to `max_gen_len` generated tokens (plus the prompt when `echo` is
    /// set) and cut strictly before the first EOS occurrence; requested
    /// log-probabilities are truncated identically.
    pub fn generate(
        &mut self,
        prompt_tokens: &[Vec<u32>],
        config: &GenerationConfig,
    ) -> EngineResult<GenerationOutput> {
        let bsz = prompt_tokens.len();
        if bsz == 0 {
            return Err(EngineError::EmptyBatch);
        }
        if bsz > self.config.max_batch_size {
            return Err(EngineError::BatchTooLarge {
                got: bsz,
                max: self.config.max_batch_size,
            });
        }
        for (row, prompt) in prompt_tokens.iter().enumerate() {
            if prompt.is_empty() {
                return Err(EngineError::EmptyPrompt(row));
            }
            if prompt.len() > self.config.max_seq_len {
                return Err(EngineError::PromptTooLong {
                    got: prompt.len(),
                    max: self.config.max_seq_len,
                });
            }
        }

        let max_gen_len = config.max_gen_len.unwrap_or(self.config.max_seq_len - 1);
        let min_prompt_len = prompt_tokens.iter().map(Vec::len).min().unwrap_or(0);
        let max_prompt_len = prompt_tokens.iter().map(Vec::len).max().unwrap_or(0);
        let total_len = self.config.max_seq_len.min(max_gen_len + max_prompt_len);

        let pad_id = self.tokenizer.pad_id();
        let eos_id = self.tokenizer.eos_id();

        let mut buffer = TokenBuffer::new(prompt_tokens, total_len, pad_id);
        let mut token_logprobs = config
            .logprobs
            .then(|| Array2::<f32>::zeros((bsz, total_len)));
        let mut eos_reached = vec![false; bsz];
        let mut cursor = DecodeCursor::new(min_prompt_len, max_prompt_len, total_len);

        debug!(
            "generate: batch={bsz} total_len={total_len} max_gen_len={max_gen_len} \
             temperature={} top_p={}",
            config.temperature, config.top_p
        );
        let started = Instant::now();
        let mut steps = 0usize;

        while let Some(step) = cursor.next_step() {
            let logits = self
                .model
                .forward(buffer.slice(step.prev, step.cur), step.prev)
                .map_err(EngineError::Forward)?;
            let (lb, ls, _) = logits.dim();
            if lb != bsz || ls != step.cur - step.prev {
                return Err(EngineError::Forward(anyhow!(
                    "model returned logits of shape {:?} for slice [{}, {})",
                    logits.shape(),
                    step.prev,
                    step.cur
                )));
            }

            let last = logits.slice(s![.., ls - 1, ..]);
            for row in 0..bsz {
                let next = if config.temperature > 0.0 {
                    let mut probs = last.row(row).mapv(|x| x / config.temperature);
                    softmax_1d_inplace(&mut probs);
                    sample_top_p(probs.view(), config.top_p, &mut self.rng)
                        .map_err(EngineError::Sampling)?
                } else {
                    greedy(last.row(row))
                };
                // Rows still inside their prompt keep the prompt token.
                let written = buffer.write(row, step.cur, next);
                if !buffer.is_prompt(row, step.cur) && written == eos_id {
                    eos_reached[row] = true;
                }
            }

            if let Some(lp) = token_logprobs.as_mut() {
                accumulate_logprobs(lp, &logits, &buffer, step.prev, step.cur, pad_id);
            }

            steps += 1;
            if eos_reached.iter().all(|&done| done) {
                cursor.finish_early();
            }
        }

        if cursor.phase() == DecodePhase::EarlyStopped {
            debug!("generate: every row reached EOS, stopped early after {steps} steps");
        }
        let elapsed = started.elapsed();
        if steps > 0 {
            info!(
                "generate: {} steps x {} rows in {:.3}s ({:.1} pos/s)",
                steps,
                bsz,
                elapsed.as_secs_f64(),
                steps as f64 / elapsed.as_secs_f64().max(1e-9)
            );
        }

        let mut out_tokens = Vec::with_capacity(bsz);
        let mut out_logprobs = config.logprobs.then(|| Vec::with_capacity(bsz));
        for row in 0..bsz {
            let prompt_len = buffer.prompt_len(row);
            let start = if config.echo { 0 } else { prompt_len };
            let end = (prompt_len + max_gen_len).min(total_len);
            let mut tokens: Vec<u32> = (start..end).map(|pos| buffer.get(row, pos)).collect();
            let mut logprobs = token_logprobs
                .as_ref()
                .map(|lp| lp.slice(s![row, start..end]).to_vec());

            // Cut strictly before the first EOS, if any.
            if let Some(eos_idx) = tokens.iter().position(|&t| t == eos_id) {
                tokens.truncate(eos_idx);
                if let Some(lp) = logprobs.as_mut() {
                    lp.truncate(eos_idx);
                }
            }

            out_tokens.push(tokens);
            if let (Some(out), Some(lp)) = (out_logprobs.as_mut(), logprobs) {
                out.push(lp);
            }
        }

        Ok(GenerationOutput {
            tokens: out_tokens,
            logprobs: out_logprobs,
        })
    }
}

/// Negative cross-entropy of the buffer tokens at positions `[prev+1, cur]`
/// against the model's logits for the slice, written into the matching cells
/// of the log-probability buffer. Pad targets are skipped, mirroring an
/// ignore-index in the loss.
fn accumulate_logprobs(
    out: &mut Array2<f32>,
    logits: &Array3<f32>,
    buffer: &TokenBuffer,
    prev: usize,
    cur: usize,
    pad_id: u32,
) {
    for row in 0..buffer.batch_size() {
        for pos in prev + 1..=cur {
            let target = buffer.get(row, pos);
            if target == pad_id {
                continue;
            }
            let step_logits = logits.slice(s![row, pos - prev - 1, ..]);
            let log_probs = log_softmax_1d(step_logits);
            if (target as usize) < log_probs.len() {
                out[[row, pos]] = log_probs[target as usize];
            }
        }
    }
}
