//! Fixed-shape token grid shared by all rows of one generation call.

use ndarray::{s, Array2, ArrayView2};

/// Token grid of shape `[batch, total_len]`, pre-filled with the pad id and
/// seeded with each prompt left-aligned.
///
/// The input-text mask remembers which cells held prompt tokens when the
/// buffer was built; sampled tokens never overwrite those cells.
#[derive(Debug)]
pub struct TokenBuffer {
    tokens: Array2<u32>,
    input_mask: Array2<bool>,
    prompt_lens: Vec<usize>,
}

impl TokenBuffer {
    pub fn new(prompts: &[Vec<u32>], total_len: usize, pad_id: u32) -> Self {
        let mut tokens = Array2::from_elem((prompts.len(), total_len), pad_id);
        for (row, prompt) in prompts.iter().enumerate() {
            for (col, &token) in prompt.iter().take(total_len).enumerate() {
                tokens[[row, col]] = token;
            }
        }
        let input_mask = tokens.mapv(|t| t != pad_id);
        let prompt_lens = prompts.iter().map(|p| p.len().min(total_len)).collect();
        Self {
            tokens,
            input_mask,
            prompt_lens,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.tokens.nrows()
    }

    pub fn total_len(&self) -> usize {
        self.tokens.ncols()
    }

    pub fn prompt_len(&self, row: usize) -> usize {
        self.prompt_lens[row]
    }

    /// The slice `[.., prev..cur]` handed to the model's forward pass.
    pub fn slice(&self, prev: usize, cur: usize) -> ArrayView2<u32> {
        self.tokens.slice(s![.., prev..cur])
    }

    pub fn get(&self, row: usize, pos: usize) -> u32 {
        self.tokens[[row, pos]]
    }

    /// True when the cell held an original prompt token.
    pub fn is_prompt(&self, row: usize, pos: usize) -> bool {
        self.input_mask[[row, pos]]
    }

    /// Write a sampled token. Prompt cells keep their original token; the
    /// token actually stored is returned.
    pub fn write(&mut self, row: usize, pos: usize, token: u32) -> u32 {
        if self.input_mask[[row, pos]] {
            self.tokens[[row, pos]]
        } else {
            self.tokens[[row, pos]] = token;
            token
        }
    }
}
