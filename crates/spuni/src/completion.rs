//! Completion assemblers: thin, stateless pipelines from raw text or dialogs
//! to structured predictions. All mutable state lives inside the one
//! [`generate`] invocation they wrap.
//!
//! [`generate`]: crate::decoder::engine::GenerationEngine::generate

use serde::Serialize;

use crate::chat::{Dialog, Message};
use crate::common::error::{EngineError, EngineResult};
use crate::common::GenerationConfig;
use crate::decoder::engine::GenerationEngine;
use crate::traits::PromptBuilder;

/// One plain text completion.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionPrediction {
    pub generation: String,
    /// Individually decoded output tokens; present when log-probabilities
    /// were requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<Vec<f32>>,
}

/// One generated chat turn, tagged with the assistant role.
#[derive(Debug, Clone, Serialize)]
pub struct ChatPrediction {
    pub generation: Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<Vec<f32>>,
}

impl GenerationEngine {
    /// Complete each raw prompt string.
    ///
    /// Prompts are encoded with a BOS marker and no EOS marker;
    /// `max_gen_len` defaults to `max_seq_len - 1` when unset.
    pub fn text_completion(
        &mut self,
        prompts: &[&str],
        config: &GenerationConfig,
    ) -> EngineResult<Vec<CompletionPrediction>> {
        let mut prompt_tokens = Vec::with_capacity(prompts.len());
        for prompt in prompts {
            let ids = self
                .tokenizer()
                .encode(prompt, true, false)
                .map_err(EngineError::Tokenizer)?;
            prompt_tokens.push(ids);
        }

        let output = self.generate(&prompt_tokens, config)?;

        let mut predictions = Vec::with_capacity(output.tokens.len());
        for (row, tokens) in output.tokens.iter().enumerate() {
            let generation = self
                .tokenizer()
                .decode(tokens)
                .map_err(EngineError::Tokenizer)?;
            let (pieces, logprobs) = if config.logprobs {
                (
                    Some(self.decode_pieces(tokens)?),
                    output.logprobs.as_ref().map(|lp| lp[row].clone()),
                )
            } else {
                (None, None)
            };
            predictions.push(CompletionPrediction {
                generation,
                tokens: pieces,
                logprobs,
            });
        }
        Ok(predictions)
    }

    /// Complete each dialog with one assistant turn.
    ///
    /// Dialogs are flattened to prompt tokens by the prompt-builder
    /// collaborator; generation never echoes the prompt.
    pub fn chat_completion(
        &mut self,
        dialogs: &[Dialog],
        builder: &dyn PromptBuilder,
        config: &GenerationConfig,
    ) -> EngineResult<Vec<ChatPrediction>> {
        let mut prompt_tokens = Vec::with_capacity(dialogs.len());
        for dialog in dialogs {
            let ids = builder
                .build_prompt_completion(dialog, self.tokenizer())
                .map_err(EngineError::PromptBuild)?;
            prompt_tokens.push(ids);
        }

        let config = GenerationConfig {
            echo: false,
            ..config.clone()
        };
        let output = self.generate(&prompt_tokens, &config)?;

        let mut predictions = Vec::with_capacity(output.tokens.len());
        for (row, tokens) in output.tokens.iter().enumerate() {
            let content = self
                .tokenizer()
                .decode(tokens)
                .map_err(EngineError::Tokenizer)?;
            let (pieces, logprobs) = if config.logprobs {
                (
                    Some(self.decode_pieces(tokens)?),
                    output.logprobs.as_ref().map(|lp| lp[row].clone()),
                )
            } else {
                (None, None)
            };
            predictions.push(ChatPrediction {
                generation: Message::assistant(content),
                tokens: pieces,
                logprobs,
            });
        }
        Ok(predictions)
    }

    fn decode_pieces(&self, tokens: &[u32]) -> EngineResult<Vec<String>> {
        tokens
            .iter()
            .map(|&t| {
                self.tokenizer()
                    .decode(&[t])
                    .map_err(EngineError::Tokenizer)
            })
            .collect()
    }
}
