//! Shared position cursor for the decode loop.
//!
//! All rows of a batch advance in lockstep: one position per step, shared
//! across the batch, regardless of how many rows have already finished. The
//! cursor keeps the loop's phases and its cache-offset invariant (strictly
//! non-decreasing `prev`) testable without a model attached.

/// Phase of the decode loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePhase {
    /// The next written position still falls inside the longest prompt, so
    /// some rows replay prompt tokens instead of accepting sampled ones.
    Priming,
    /// Every row is past its prompt; all written tokens are sampled.
    Generating,
    /// Every row reached EOS before the buffer filled; remaining positions
    /// were skipped.
    EarlyStopped,
    /// The cursor walked the whole buffer.
    Done,
}

/// One step of the decode loop: forward the buffer slice `[prev, cur)` at
/// cache offset `prev`, then write position `cur`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeStep {
    pub prev: usize,
    pub cur: usize,
}

/// Walks positions `min_prompt_len..total_len`. The first step hands the
/// whole shortest prompt to the model as one slice (prefill); every later
/// step advances a single position.
#[derive(Debug)]
pub struct DecodeCursor {
    prev: usize,
    cur: usize,
    total_len: usize,
    prompt_end: usize,
    phase: DecodePhase,
}

impl DecodeCursor {
    pub fn new(min_prompt_len: usize, max_prompt_len: usize, total_len: usize) -> Self {
        let mut cursor = Self {
            prev: 0,
            cur: min_prompt_len,
            total_len,
            prompt_end: max_prompt_len,
            phase: DecodePhase::Priming,
        };
        cursor.phase = cursor.phase_for(cursor.cur);
        cursor
    }

    fn phase_for(&self, pos: usize) -> DecodePhase {
        if pos >= self.total_len {
            DecodePhase::Done
        } else if pos < self.prompt_end {
            DecodePhase::Priming
        } else {
            DecodePhase::Generating
        }
    }

    pub fn phase(&self) -> DecodePhase {
        self.phase
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, DecodePhase::Done | DecodePhase::EarlyStopped)
    }

    /// Hand out the next step and advance, or `None` once the walk is over.
    pub fn next_step(&mut self) -> Option<DecodeStep> {
        if self.is_finished() {
            return None;
        }
        let step = DecodeStep {
            prev: self.prev,
            cur: self.cur,
        };
        self.prev = self.cur;
        self.cur += 1;
        self.phase = self.phase_for(self.cur);
        Some(step)
    }

    /// Every row reached EOS; skip the remaining positions.
    pub fn finish_early(&mut self) {
        if self.phase != DecodePhase::Done {
            self.phase = DecodePhase::EarlyStopped;
        }
    }
}
