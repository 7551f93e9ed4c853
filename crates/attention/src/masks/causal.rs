//! Builders for causal attention masks.
//!
//! The resulting tensors have dtype [`MASK_DTYPE`](super::MASK_DTYPE) and shape
//! `[q_len, k_len]`. Entries are `1` where attention is permitted and `0`
//! otherwise; the masks broadcast over batch and head axes when applied.

use candle_core::{Device, Result, Tensor};

/// Construct a lower-triangular causal mask for the supplied sequence lengths.
///
/// Position `(i, j)` is allowed iff `j <= i`. When `k_len > q_len`, queries
/// are assumed to align with the most recent `q_len` keys, allowing access to
/// the extended prefix.
pub fn build_causal_mask(device: &Device, q_len: usize, k_len: usize) -> Result<Tensor> {
    let offset = k_len.saturating_sub(q_len);
    let data: Vec<u8> = (0..q_len)
        .flat_map(|q| (0..k_len).map(move |k| u8::from(k <= q + offset)))
        .collect();

    Tensor::from_vec(data, (q_len, k_len), device)
}
