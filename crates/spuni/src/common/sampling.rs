//! Token sampling strategies.
//!
//! Every function here operates on a single vocabulary row; the decode loop
//! applies them per batch row after slicing out the last-step logits.

use std::cmp::Ordering;

use anyhow::{bail, Result};
use ndarray::{Array1, ArrayView1};
use rand::Rng;

/// Floor used when filtering logits. Kept finite (rather than `-inf`) so a
/// later softmax or renormalization pass stays well-behaved.
pub const LOGIT_FLOOR: f32 = 1e-10;

/// Numerically stable in-place softmax over one row.
pub fn softmax_1d_inplace(row: &mut Array1<f32>) {
    let max = row.fold(f32::NEG_INFINITY, |acc, &x| acc.max(x));
    row.mapv_inplace(|x| (x - max).exp());
    let sum = row.sum();
    *row /= sum;
}

/// Log-softmax over one row, max-shifted for stability.
pub fn log_softmax_1d(row: ArrayView1<f32>) -> Array1<f32> {
    let max = row.fold(f32::NEG_INFINITY, |acc, &x| acc.max(x));
    let shifted = row.mapv(|x| x - max);
    let log_sum = shifted.mapv(f32::exp).sum().ln();
    shifted - log_sum
}

/// Argmax over one logits row. Used when the temperature is zero or negative.
pub fn greedy(logits: ArrayView1<f32>) -> u32 {
    logits
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(Ordering::Equal))
        .map(|(idx, _)| idx as u32)
        .unwrap_or(0)
}

/// Nucleus (top-p) sampling over one probability row.
///
/// Keeps the minimal prefix of the descending-sorted distribution whose
/// cumulative mass reaches `p` (the top entry always survives), renormalizes
/// the surviving mass and draws one token from it. `p <= 0` or `p >= 1`
/// removes nothing, which degenerates to a plain multinomial draw.
pub fn sample_top_p<R: Rng>(probs: ArrayView1<f32>, p: f32, rng: &mut R) -> Result<u32> {
    let mut order: Vec<usize> = (0..probs.len()).collect();
    order.sort_by(|&a, &b| probs[b].partial_cmp(&probs[a]).unwrap_or(Ordering::Equal));

    let mut sorted: Vec<f32> = order.iter().map(|&i| probs[i]).collect();
    if p > 0.0 && p < 1.0 {
        // Drop entries whose preceding cumulative mass already reaches p; the
        // top entry sees zero preceding mass and is always kept.
        let mut preceding = 0.0f32;
        for q in sorted.iter_mut() {
            if preceding > p {
                *q = 0.0;
            } else {
                preceding += *q;
            }
        }
    }

    let total: f32 = sorted.iter().sum();
    if total <= 0.0 {
        bail!("top-p filtering left no probability mass (p = {p})");
    }
    for q in sorted.iter_mut() {
        *q /= total;
    }

    let uniform: f32 = rng.gen();
    let mut cumulative = 0.0f32;
    for (rank, &q) in sorted.iter().enumerate() {
        cumulative += q;
        if cumulative >= uniform {
            return Ok(order[rank] as u32);
        }
    }
    // Rounding slack: fall back to the last surviving entry.
    let last = sorted.iter().rposition(|&q| q > 0.0).unwrap_or(0);
    Ok(order[last] as u32)
}

/// Top-k filtering over one logits row.
///
/// Every logit strictly below the k-th largest is floored to [`LOGIT_FLOOR`].
/// `k == 0` is an identity pass-through; `k` beyond the vocabulary is clamped.
pub fn top_k_logits(mut logits: Array1<f32>, k: usize) -> Array1<f32> {
    let k = k.min(logits.len());
    if k == 0 {
        return logits;
    }
    let mut order: Vec<usize> = (0..logits.len()).collect();
    order.sort_by(|&a, &b| logits[b].partial_cmp(&logits[a]).unwrap_or(Ordering::Equal));
    let threshold = logits[order[k - 1]];
    logits.mapv_inplace(|x| if x < threshold { LOGIT_FLOOR } else { x });
    logits
}

/// Plain multinomial sampling: softmax the logits row, then draw once.
pub fn sample_from_logits<R: Rng>(logits: ArrayView1<f32>, rng: &mut R) -> Result<u32> {
    let mut probs = logits.to_owned();
    softmax_1d_inplace(&mut probs);
    sample_from_probs(probs.view(), rng)
}

/// Weighted draw from an already-normalized probability row.
pub fn sample_from_probs<R: Rng>(probs: ArrayView1<f32>, rng: &mut R) -> Result<u32> {
    let uniform: f32 = rng.gen();
    let mut cumulative = 0.0f32;
    for (idx, &prob) in probs.iter().enumerate() {
        cumulative += prob;
        if cumulative >= uniform {
            return Ok(idx as u32);
        }
    }
    Ok((probs.len() - 1) as u32)
}
