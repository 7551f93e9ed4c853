//! Builders for padding masks used to drop padded keys.
//!
//! Padding masks are shaped `[batch, 1, 1, k_len]` so they broadcast across
//! heads and query positions. They share the dtype described in
//! [`MASK_DTYPE`](super::MASK_DTYPE).

use candle_core::{bail, Device, Result, Tensor};

use super::MASK_DTYPE;

/// Construct padding masks from per-batch valid key lengths.
///
/// Lengths larger than `k_len` are clamped, so such rows keep every key.
pub fn padding_mask_from_lengths(
    device: &Device,
    key_lengths: &[usize],
    k_len: usize,
) -> Result<Tensor> {
    let batch = key_lengths.len();
    let mut data = vec![0u8; batch * k_len];

    for (b, &valid) in key_lengths.iter().enumerate() {
        let valid = valid.min(k_len);
        let row_start = b * k_len;
        data[row_start..row_start + valid].fill(1);
    }

    Tensor::from_vec(data, (batch, 1, 1, k_len), device)
}

/// Construct padding masks from boolean padding indicators.
///
/// Each inner slice corresponds to a batch element and must share the same
/// length. `true` indicates a padded (masked) key position.
pub fn padding_mask_from_booleans(device: &Device, padding: &[Vec<bool>]) -> Result<Tensor> {
    let Some(first) = padding.first() else {
        return Tensor::zeros((0, 1, 1, 0), MASK_DTYPE, device);
    };

    let k_len = first.len();
    if let Some(ragged) = padding.iter().position(|row| row.len() != k_len) {
        bail!(
            "all boolean padding masks must share k_len {k_len}, row {ragged} has {}",
            padding[ragged].len()
        );
    }

    let data: Vec<u8> = padding
        .iter()
        .flat_map(|row| row.iter().map(|&is_padding| u8::from(!is_padding)))
        .collect();

    Tensor::from_vec(data, (padding.len(), 1, 1, k_len), device)
}
