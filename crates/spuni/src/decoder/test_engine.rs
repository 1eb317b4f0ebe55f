use std::sync::{Arc, Mutex};

use anyhow::Result;
use approx::assert_relative_eq;
use ndarray::{Array3, ArrayView2};

use crate::chat::{Dialog, Role};
use crate::common::error::EngineError;
use crate::common::{EngineConfig, GenerationConfig};
use crate::decoder::engine::GenerationEngine;
use crate::traits::{CausalModel, PromptBuilder, Tokenizer};

// =========================================================================
//  Mock tokenizer: pad=0, bos=1, eos=2, byte b maps to id b + 3
// =========================================================================

struct ByteTokenizer;

impl Tokenizer for ByteTokenizer {
    fn encode(&self, text: &str, bos: bool, eos: bool) -> Result<Vec<u32>> {
        let mut ids = Vec::new();
        if bos {
            ids.push(1);
        }
        ids.extend(text.bytes().map(|b| b as u32 + 3));
        if eos {
            ids.push(2);
        }
        Ok(ids)
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        let bytes: Vec<u8> = tokens
            .iter()
            .filter(|&&t| t >= 3)
            .map(|&t| (t - 3) as u8)
            .collect();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn pad_id(&self) -> u32 {
        0
    }

    fn eos_id(&self) -> u32 {
        2
    }
}

// =========================================================================
//  Mock models
// =========================================================================

/// Predicts `(token + 1) % vocab` at every position and records the cache
/// offsets it was called with.
struct PlusOneModel {
    vocab: usize,
    offsets: Arc<Mutex<Vec<usize>>>,
}

impl PlusOneModel {
    fn new(vocab: usize) -> Self {
        Self {
            vocab,
            offsets: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl CausalModel for PlusOneModel {
    fn forward(&mut self, tokens: ArrayView2<u32>, start_pos: usize) -> Result<Array3<f32>> {
        self.offsets.lock().unwrap().push(start_pos);
        let (bsz, slice_len) = tokens.dim();
        let mut logits = Array3::from_elem((bsz, slice_len, self.vocab), -100.0f32);
        for row in 0..bsz {
            for col in 0..slice_len {
                let next = (tokens[[row, col]] as usize + 1) % self.vocab;
                logits[[row, col, next]] = 100.0;
            }
        }
        Ok(logits)
    }
}

/// Predicts `script[pos]` for absolute buffer position `pos`, same for every
/// row. Positions past the script repeat its last entry.
struct ScriptedModel {
    script: Vec<u32>,
    vocab: usize,
}

impl CausalModel for ScriptedModel {
    fn forward(&mut self, tokens: ArrayView2<u32>, start_pos: usize) -> Result<Array3<f32>> {
        let (bsz, slice_len) = tokens.dim();
        let mut logits = Array3::from_elem((bsz, slice_len, self.vocab), -100.0f32);
        for row in 0..bsz {
            for col in 0..slice_len {
                let predicted_pos = (start_pos + col + 1).min(self.script.len() - 1);
                logits[[row, col, self.script[predicted_pos] as usize]] = 100.0;
            }
        }
        Ok(logits)
    }
}

/// Returns the same logits row at every position.
struct ConstLogitsModel {
    row: Vec<f32>,
}

impl CausalModel for ConstLogitsModel {
    fn forward(&mut self, tokens: ArrayView2<u32>, _start_pos: usize) -> Result<Array3<f32>> {
        let (bsz, slice_len) = tokens.dim();
        let mut logits = Array3::zeros((bsz, slice_len, self.row.len()));
        for row in 0..bsz {
            for col in 0..slice_len {
                for (v, &x) in self.row.iter().enumerate() {
                    logits[[row, col, v]] = x;
                }
            }
        }
        Ok(logits)
    }
}

/// Joins all message contents into one prompt string.
struct JoinBuilder;

impl PromptBuilder for JoinBuilder {
    fn build_prompt_completion(
        &self,
        dialog: &Dialog,
        tokenizer: &dyn Tokenizer,
    ) -> Result<Vec<u32>> {
        let text = dialog
            .messages()
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        tokenizer.encode(&text, true, false)
    }
}

// =========================================================================
//  Helpers
// =========================================================================

fn engine_with(
    model: Box<dyn CausalModel>,
    max_seq_len: usize,
    max_batch_size: usize,
) -> GenerationEngine {
    GenerationEngine::new(
        model,
        Arc::new(ByteTokenizer),
        EngineConfig {
            max_seq_len,
            max_batch_size,
            seed: Some(0),
        },
    )
}

fn greedy_config(max_gen_len: usize) -> GenerationConfig {
    GenerationConfig {
        max_gen_len: Some(max_gen_len),
        temperature: 0.0,
        ..Default::default()
    }
}

// =========================================================================
//  Decode loop
// =========================================================================

#[test]
fn test_greedy_is_deterministic() {
    let run = || {
        let mut engine = engine_with(Box::new(PlusOneModel::new(1000)), 64, 4);
        engine
            .generate(&[vec![5, 6, 7]], &greedy_config(4))
            .unwrap()
    };
    let first = run();
    let second = run();
    assert_eq!(first.tokens, vec![vec![8, 9, 10, 11]]);
    assert_eq!(first, second);
}

#[test]
fn test_output_rows_match_batch_size() {
    let mut engine = engine_with(Box::new(PlusOneModel::new(1000)), 64, 4);
    let prompts = vec![vec![5, 6, 7], vec![10, 11], vec![20, 21, 22, 23]];
    let output = engine.generate(&prompts, &greedy_config(3)).unwrap();

    assert_eq!(output.tokens.len(), 3);
    for tokens in &output.tokens {
        assert!(tokens.len() <= 3);
    }
    assert!(output.logprobs.is_none());
}

#[test]
fn test_mixed_length_batch_trims_independently() {
    let mut engine = engine_with(Box::new(PlusOneModel::new(1000)), 64, 4);
    let output = engine
        .generate(&[vec![5, 6], vec![5, 6, 7, 8]], &greedy_config(2))
        .unwrap();

    assert_eq!(output.tokens[0], vec![7, 8]);
    assert_eq!(output.tokens[1], vec![9, 10]);
}

#[test]
fn test_echo_includes_prompt_prefix() {
    let mut engine = engine_with(Box::new(PlusOneModel::new(1000)), 64, 4);
    let config = GenerationConfig {
        echo: true,
        ..greedy_config(2)
    };
    let output = engine.generate(&[vec![5, 6, 7]], &config).unwrap();

    assert_eq!(output.tokens[0], vec![5, 6, 7, 8, 9]);
}

#[test]
fn test_prompt_prefix_survives_sampling() {
    // Sampling must never rewrite prompt positions, whatever it would have
    // drawn there.
    let mut engine = engine_with(
        Box::new(ConstLogitsModel {
            row: vec![2.0, 1.5, -30.0, 1.0, 0.5],
        }),
        64,
        4,
    );
    let config = GenerationConfig {
        max_gen_len: Some(3),
        temperature: 1.0,
        top_p: 0.9,
        echo: true,
        ..Default::default()
    };
    let output = engine.generate(&[vec![4, 3, 3]], &config).unwrap();
    assert_eq!(&output.tokens[0][..3], &[4, 3, 3]);
}

#[test]
fn test_seeded_sampling_is_reproducible() {
    let run = || {
        let mut engine = GenerationEngine::new(
            Box::new(ConstLogitsModel {
                row: vec![2.0, 1.5, -30.0, 1.0, 0.5],
            }),
            Arc::new(ByteTokenizer),
            EngineConfig {
                max_seq_len: 32,
                max_batch_size: 4,
                seed: Some(42),
            },
        );
        let config = GenerationConfig {
            max_gen_len: Some(5),
            temperature: 1.0,
            top_p: 0.95,
            ..Default::default()
        };
        engine.generate(&[vec![4], vec![3, 4]], &config).unwrap()
    };
    assert_eq!(run(), run());
}

#[test]
fn test_eos_truncates_tokens_and_logprobs() {
    // Script: positions 3..=6 would be 9, EOS, 8, 8; generation must stop
    // strictly before the EOS and early-exit the loop.
    let model = ScriptedModel {
        script: vec![0, 0, 0, 9, 2, 8, 8],
        vocab: 12,
    };
    let mut engine = engine_with(Box::new(model), 64, 4);
    let config = GenerationConfig {
        logprobs: true,
        ..greedy_config(4)
    };
    let output = engine.generate(&[vec![5, 6, 7]], &config).unwrap();

    assert_eq!(output.tokens[0], vec![9]);
    let logprobs = output.logprobs.unwrap();
    assert_eq!(logprobs[0].len(), 1);
    // One-hot logits make the chosen token's log-probability ~0.
    assert!(logprobs[0][0].abs() < 1e-3);
}

#[test]
fn test_logprob_values_match_log_softmax() {
    let mut engine = engine_with(
        Box::new(ConstLogitsModel {
            row: vec![0.0, 1.0, -30.0, 0.5],
        }),
        64,
        4,
    );
    let config = GenerationConfig {
        logprobs: true,
        echo: true,
        ..greedy_config(2)
    };
    let output = engine.generate(&[vec![3]], &config).unwrap();

    // Greedy picks index 1 everywhere; its log-probability is
    // 1 - ln(e^0 + e^1 + e^-30 + e^0.5).
    assert_eq!(output.tokens[0], vec![3, 1, 1]);
    let logprobs = output.logprobs.unwrap();
    let expected = 1.0f32 - (1.0f32.exp() + (-30.0f32).exp() + 0.5f32.exp() + 1.0).ln();
    assert_eq!(logprobs[0][0], 0.0); // position 0 is never scored
    assert_relative_eq!(logprobs[0][1], expected, max_relative = 1e-3);
    assert_relative_eq!(logprobs[0][2], expected, max_relative = 1e-3);
}

#[test]
fn test_cache_offsets_start_at_zero_and_never_regress() {
    let model = PlusOneModel::new(100);
    let offsets = model.offsets.clone();
    let mut engine = engine_with(Box::new(model), 16, 4);
    engine
        .generate(&[vec![5, 6, 7], vec![5, 6]], &greedy_config(4))
        .unwrap();

    let seen = offsets.lock().unwrap().clone();
    assert_eq!(seen[0], 0);
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
}

// =========================================================================
//  Preconditions
// =========================================================================

#[test]
fn test_batch_too_large_is_rejected() {
    let mut engine = engine_with(Box::new(PlusOneModel::new(100)), 16, 2);
    let err = engine
        .generate(&[vec![5], vec![6], vec![7]], &greedy_config(2))
        .unwrap_err();
    assert!(matches!(err, EngineError::BatchTooLarge { got: 3, max: 2 }));
}

#[test]
fn test_long_prompt_is_rejected() {
    let mut engine = engine_with(Box::new(PlusOneModel::new(100)), 4, 2);
    let err = engine
        .generate(&[vec![5, 6, 7, 8, 9]], &greedy_config(2))
        .unwrap_err();
    assert!(matches!(err, EngineError::PromptTooLong { got: 5, max: 4 }));
}

#[test]
fn test_empty_batch_is_rejected() {
    let mut engine = engine_with(Box::new(PlusOneModel::new(100)), 16, 2);
    let err = engine.generate(&[], &greedy_config(2)).unwrap_err();
    assert!(matches!(err, EngineError::EmptyBatch));
}

#[test]
fn test_empty_prompt_is_rejected() {
    let mut engine = engine_with(Box::new(PlusOneModel::new(100)), 16, 2);
    let err = engine
        .generate(&[vec![5], vec![]], &greedy_config(2))
        .unwrap_err();
    assert!(matches!(err, EngineError::EmptyPrompt(1)));
}

// =========================================================================
//  Completion assemblers
// =========================================================================

#[test]
fn test_text_completion_decodes_generation() {
    let mut engine = engine_with(Box::new(PlusOneModel::new(300)), 64, 4);
    let predictions = engine
        .text_completion(&["AB"], &greedy_config(3))
        .unwrap();

    assert_eq!(predictions.len(), 1);
    assert_eq!(predictions[0].generation, "CDE");
    assert!(predictions[0].tokens.is_none());
    assert!(predictions[0].logprobs.is_none());
}

#[test]
fn test_text_completion_with_logprobs_decodes_pieces() {
    let mut engine = engine_with(Box::new(PlusOneModel::new(300)), 64, 4);
    let config = GenerationConfig {
        logprobs: true,
        ..greedy_config(3)
    };
    let predictions = engine.text_completion(&["AB"], &config).unwrap();

    let pieces = predictions[0].tokens.as_ref().unwrap();
    assert_eq!(pieces, &["C".to_string(), "D".to_string(), "E".to_string()]);
    assert_eq!(predictions[0].logprobs.as_ref().unwrap().len(), 3);
}

#[test]
fn test_text_completion_defaults_gen_len_to_seq_capacity() {
    let mut engine = engine_with(Box::new(PlusOneModel::new(300)), 8, 4);
    let config = GenerationConfig {
        temperature: 0.0,
        ..Default::default()
    };
    let predictions = engine.text_completion(&["A"], &config).unwrap();

    // Prompt is [bos, 'A'] = 2 tokens, so the 8-wide buffer leaves 6.
    assert_eq!(predictions[0].generation, "BCDEFG");
}

#[test]
fn test_chat_completion_tags_assistant_turn() {
    let mut engine = engine_with(Box::new(PlusOneModel::new(300)), 64, 4);
    let mut dialog = Dialog::new();
    dialog.push_user("AB");

    let predictions = engine
        .chat_completion(&[dialog], &JoinBuilder, &greedy_config(3))
        .unwrap();

    assert_eq!(predictions.len(), 1);
    assert_eq!(predictions[0].generation.role, Role::Assistant);
    assert_eq!(predictions[0].generation.content, "CDE");
}

#[test]
fn test_chat_completion_never_echoes_prompt() {
    let mut engine = engine_with(Box::new(PlusOneModel::new(300)), 64, 4);
    let mut dialog = Dialog::new();
    dialog.push_user("AB");

    let config = GenerationConfig {
        echo: true,
        ..greedy_config(3)
    };
    let predictions = engine
        .chat_completion(&[dialog], &JoinBuilder, &config)
        .unwrap();
    assert_eq!(predictions[0].generation.content, "CDE");
}
