//! Mask utilities shared by attention implementations.
//!
//! Masks are allow-masks with dtype [`MASK_DTYPE`]: `1` where a query may
//! attend to a key and `0` where it may not. Disallowed scores are replaced by
//! a large finite negative value (see [`DEFAULT_MASK_FILL`]) before the
//! softmax so they vanish after normalisation while a fully masked row still
//! yields a finite, uniform distribution.

pub mod causal;
pub mod padding;

use candle_core::{bail, DType, Result, Tensor};

/// Dtype shared by all allow-masks.
pub const MASK_DTYPE: DType = DType::U8;

/// Score written into masked positions.
pub const DEFAULT_MASK_FILL: f32 = -1e9;

/// Weakest accepted fill; `exp` of anything at or below it underflows to zero in `f32`.
pub const MAX_MASK_FILL: f32 = -1e4;

pub use causal::build_causal_mask;
pub use padding::{padding_mask_from_booleans, padding_mask_from_lengths};

/// Converts a `{0, 1}` mask of any dtype into a [`MASK_DTYPE`] allow-mask.
///
/// Every non-zero entry counts as "attend".
pub fn to_allow_mask(mask: &Tensor) -> Result<Tensor> {
    if mask.dtype() == MASK_DTYPE {
        Ok(mask.clone())
    } else {
        mask.ne(&mask.zeros_like()?)
    }
}

/// Logical AND of two allow-masks, broadcasting from the trailing axes.
pub fn combine_masks(lhs: &Tensor, rhs: &Tensor) -> Result<Tensor> {
    let lhs = to_allow_mask(lhs)?;
    let rhs = to_allow_mask(rhs)?;
    lhs.broadcast_mul(&rhs)
}

/// Lifts `mask` to the rank of a score tensor and broadcasts it.
///
/// Accepted layouts:
/// * `[q_len, k_len]`, shared by every batch element and head;
/// * `[batch, q_len, k_len]`, shared across heads of rank-4 scores;
/// * `[batch, 1, q_len | 1, k_len]` against rank-3 (single head) scores;
/// * the score rank itself, with size-1 axes broadcast.
pub fn broadcast_to_scores(mask: &Tensor, scores_dims: &[usize]) -> Result<Tensor> {
    let mask_rank = mask.rank();
    let scores_rank = scores_dims.len();
    let lifted = match (mask_rank, scores_rank) {
        (m, s) if m == s => mask.clone(),
        (2, s) if s > 2 => {
            let mut dims = vec![1; s - 2];
            dims.extend_from_slice(mask.dims());
            mask.reshape(dims)?
        }
        (3, 4) => mask.unsqueeze(1)?,
        (4, 3) if mask.dims()[1] == 1 => mask.squeeze(1)?,
        (m, s) => bail!(
            "mask of rank {m} ({:?}) cannot be applied to scores of rank {s} ({:?})",
            mask.dims(),
            scores_dims
        ),
    };
    lifted.broadcast_as(scores_dims)?.contiguous()
}

/// Replaces the scores at disallowed positions with `fill`.
pub fn apply_mask(scores: &Tensor, mask: &Tensor, fill: f32) -> Result<Tensor> {
    let allow = broadcast_to_scores(&to_allow_mask(mask)?, scores.dims())?;
    let fill = Tensor::full(fill, scores.dims(), scores.device())?.to_dtype(scores.dtype())?;
    allow.where_cond(scores, &fill)
}
