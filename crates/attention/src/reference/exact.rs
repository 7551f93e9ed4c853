//! Reference scaled-dot-product attention kernel.
//!
//! The exact path prioritises numerical fidelity and mirrors the semantics
//! described by the [`Attention`](crate::core::Attention) trait. Scores,
//! masking and the softmax are evaluated in `f32`; context and weights are
//! cast back to the input dtype.

use std::sync::OnceLock;

use candle_core::{DType, Tensor};
use candle_nn::ops::softmax_last_dim;
use layers::{Dropout, Mode};

use crate::core::{Attention, AttentionError, AttentionOutput};
use crate::masks::{self, DEFAULT_MASK_FILL};

/// Numerically stable, portable attention kernel.
#[derive(Debug)]
pub struct ExactAttention {
    mask_fill: f32,
    dropout: Dropout,
    first_call: OnceLock<()>,
}

impl ExactAttention {
    /// Kernel without dropout using [`DEFAULT_MASK_FILL`].
    pub fn new() -> Self {
        Self {
            mask_fill: DEFAULT_MASK_FILL,
            dropout: Dropout::disabled(),
            first_call: OnceLock::new(),
        }
    }

    /// Replaces the value written into masked scores.
    pub fn with_mask_fill(mut self, mask_fill: f32) -> Self {
        self.mask_fill = mask_fill;
        self
    }

    /// Enables dropout on the attention weights during training.
    pub fn with_dropout(mut self, dropout: Dropout) -> Self {
        self.dropout = dropout;
        self
    }

    pub fn mask_fill(&self) -> f32 {
        self.mask_fill
    }

    pub fn dropout_p(&self) -> f32 {
        self.dropout.probability()
    }
}

impl Default for ExactAttention {
    fn default() -> Self {
        Self::new()
    }
}

/// `(batch, heads, seq, dim)` view of a rank-3 or rank-4 operand.
fn operand_dims(
    name: &str,
    tensor: &Tensor,
) -> Result<(usize, usize, usize, usize), AttentionError> {
    match tensor.dims() {
        &[batch, seq, dim] => Ok((batch, 1, seq, dim)),
        &[batch, heads, seq, dim] => Ok((batch, heads, seq, dim)),
        dims => Err(AttentionError::shape(format!(
            "{name} must have shape [batch, seq, dim] or [batch, heads, seq, head_dim], got {dims:?}"
        ))),
    }
}

impl Attention for ExactAttention {
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
        mode: Mode,
    ) -> Result<AttentionOutput, AttentionError> {
        if self.first_call.set(()).is_ok() {
            log::info!(
                "attention::reference init mask_fill={:e} dropout_p={}",
                self.mask_fill,
                self.dropout.probability()
            );
        }

        let dtype = q.dtype();
        if dtype != k.dtype() || dtype != v.dtype() {
            return Err(AttentionError::shape("q, k, v must share the same dtype"));
        }
        if !matches!(dtype, DType::F32 | DType::F16 | DType::BF16) {
            return Err(AttentionError::UnsupportedDType {
                requested: format!("{dtype:?}"),
            });
        }
        if q.rank() != k.rank() || q.rank() != v.rank() {
            return Err(AttentionError::shape(format!(
                "q, k, v must share a rank, got {}, {}, {}",
                q.rank(),
                k.rank(),
                v.rank()
            )));
        }

        let (batch, heads, q_len, head_dim) = operand_dims("q", q)?;
        let (kb, kh, k_len, kd) = operand_dims("k", k)?;
        let (vb, vh, vk, vd) = operand_dims("v", v)?;
        if kb != batch || kh != heads || kd != head_dim {
            return Err(AttentionError::shape(format!(
                "k shape mismatch: expected [{batch}, {heads}, ?, {head_dim}] got [{kb}, {kh}, {k_len}, {kd}]"
            )));
        }
        if vb != batch || vh != heads || vk != k_len {
            return Err(AttentionError::shape(format!(
                "v shape mismatch: expected [{batch}, {heads}, {k_len}, ?] got [{vb}, {vh}, {vk}, {vd}]"
            )));
        }
        log::trace!(
            "attention::reference attend batch={batch} heads={heads} q_len={q_len} k_len={k_len} head_dim={head_dim} mode={mode:?}"
        );

        let q_work = q.to_dtype(DType::F32)?;
        let k_work = k.to_dtype(DType::F32)?;
        let v_work = v.to_dtype(DType::F32)?.contiguous()?;

        let scale = 1.0 / (head_dim as f64).sqrt();
        let k_t = k_work.transpose(k.rank() - 2, k.rank() - 1)?.contiguous()?;
        let mut scores = q_work.contiguous()?.matmul(&k_t)?.affine(scale, 0.0)?;

        if let Some(mask) = mask {
            scores = masks::apply_mask(&scores, mask, self.mask_fill).map_err(|err| {
                AttentionError::shape(format!("mask {:?}: {err}", mask.dims()))
            })?;
        }

        let weights = softmax_last_dim(&scores)?;
        let weights = self.dropout.forward(&weights, mode)?;
        let context = weights.matmul(&v_work)?;

        Ok(AttentionOutput {
            context: context.to_dtype(dtype)?,
            weights: weights.to_dtype(dtype)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masks::build_causal_mask;
    use candle_core::{Device, Result as CandleResult};

    fn build_inputs(device: &Device) -> CandleResult<(Tensor, Tensor, Tensor)> {
        let data: Vec<f32> = (0..64).map(|i| (i as f32) * 0.01).collect();
        let q = Tensor::from_vec(data.clone(), (1, 2, 4, 8), device)?;
        let reversed = data.iter().rev().copied().collect::<Vec<_>>();
        let k = Tensor::from_vec(reversed, (1, 2, 4, 8), device)?;
        let v = Tensor::from_vec(data, (1, 2, 4, 8), device)?;
        Ok((q, k, v))
    }

    fn naive_attention(
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
    ) -> CandleResult<Tensor> {
        let (batch, heads, q_len, head_dim) = q.dims4()?;
        let (_, _, k_len, _) = k.dims4()?;
        let mut output = vec![0f32; batch * heads * q_len * head_dim];

        let q_vec = q.flatten_all()?.to_vec1::<f32>()?;
        let k_vec = k.flatten_all()?.to_vec1::<f32>()?;
        let v_vec = v.flatten_all()?.to_vec1::<f32>()?;
        let mask_rows = match mask {
            Some(m) => Some(m.to_vec2::<u8>()?),
            None => None,
        };
        let scale = 1.0 / (head_dim as f32).sqrt();

        for b in 0..batch {
            for h in 0..heads {
                for q_idx in 0..q_len {
                    let mut row = vec![f32::NEG_INFINITY; k_len];
                    for (k_idx, slot) in row.iter_mut().enumerate() {
                        if let Some(rows) = &mask_rows {
                            if rows[q_idx][k_idx] == 0 {
                                continue;
                            }
                        }
                        let mut dot = 0f32;
                        for d in 0..head_dim {
                            let qi = ((b * heads + h) * q_len + q_idx) * head_dim + d;
                            let ki = ((b * heads + h) * k_len + k_idx) * head_dim + d;
                            dot += q_vec[qi] * k_vec[ki];
                        }
                        *slot = dot * scale;
                    }
                    let max_val = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                    let exps: Vec<f32> = row.iter().map(|s| (s - max_val).exp()).collect();
                    let denom: f32 = exps.iter().sum();
                    for d in 0..head_dim {
                        let mut acc = 0f32;
                        for (k_idx, e) in exps.iter().enumerate() {
                            let vi = ((b * heads + h) * k_len + k_idx) * head_dim + d;
                            acc += e / denom * v_vec[vi];
                        }
                        output[((b * heads + h) * q_len + q_idx) * head_dim + d] = acc;
                    }
                }
            }
        }

        Tensor::from_vec(output, (batch, heads, q_len, head_dim), q.device())
    }

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> CandleResult<f32> {
        a.to_dtype(DType::F32)?
            .sub(&b.to_dtype(DType::F32)?)?
            .abs()?
            .flatten_all()?
            .max(0)?
            .to_vec0::<f32>()
    }

    #[test]
    fn exact_attention_matches_naive() -> CandleResult<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let mask = build_causal_mask(&device, 4, 4)?;
        let output = ExactAttention::default()
            .attend(&q, &k, &v, Some(&mask), Mode::Eval)
            .unwrap();
        let expected = naive_attention(&q, &k, &v, Some(&mask))?;
        assert!(max_abs_diff(&output.context, &expected)? < 1e-5);
        assert_eq!(output.weights.dims(), &[1, 2, 4, 4]);
        Ok(())
    }

    #[test]
    fn unmasked_attention_matches_naive() -> CandleResult<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let output = ExactAttention::default()
            .attend(&q, &k, &v, None, Mode::Eval)
            .unwrap();
        let expected = naive_attention(&q, &k, &v, None)?;
        assert!(max_abs_diff(&output.context, &expected)? < 1e-5);
        Ok(())
    }

    #[test]
    fn rank_three_inputs_are_single_head() -> CandleResult<()> {
        let device = Device::Cpu;
        let q = Tensor::randn(0f32, 1.0, (2, 5, 8), &device)?;
        let k = Tensor::randn(0f32, 1.0, (2, 7, 8), &device)?;
        let v = Tensor::randn(0f32, 1.0, (2, 7, 3), &device)?;
        let output = ExactAttention::default()
            .attend(&q, &k, &v, None, Mode::Eval)
            .unwrap();
        assert_eq!(output.context.dims(), &[2, 5, 3]);
        assert_eq!(output.weights.dims(), &[2, 5, 7]);
        Ok(())
    }

    #[test]
    fn weights_rows_sum_to_one() -> CandleResult<()> {
        let device = Device::Cpu;
        let q = Tensor::randn(0f32, 1.0, (2, 3, 6, 4), &device)?;
        let k = Tensor::randn(0f32, 1.0, (2, 3, 6, 4), &device)?;
        let mask = build_causal_mask(&device, 6, 6)?;
        let output = ExactAttention::default()
            .attend(&q, &k, &k, Some(&mask), Mode::Eval)
            .unwrap();
        let sums = output.weights.sum(3)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-5));
        Ok(())
    }

    #[test]
    fn mismatched_shapes_error() {
        let device = Device::Cpu;
        let q = Tensor::zeros((1, 2, 4, 8), DType::F32, &device).unwrap();
        let k = Tensor::zeros((1, 2, 5, 8), DType::F32, &device).unwrap();
        let v = Tensor::zeros((1, 2, 4, 8), DType::F32, &device).unwrap();
        let err = ExactAttention::default()
            .attend(&q, &k, &v, None, Mode::Eval)
            .unwrap_err();
        assert!(matches!(err, AttentionError::InvalidShape { .. }));

        let k = Tensor::zeros((1, 2, 4, 6), DType::F32, &device).unwrap();
        let err = ExactAttention::default()
            .attend(&q, &k, &v, None, Mode::Eval)
            .unwrap_err();
        assert!(matches!(err, AttentionError::InvalidShape { .. }));
    }

    #[test]
    fn mask_shape_validation() {
        let device = Device::Cpu;
        let q = Tensor::zeros((1, 2, 4, 8), DType::F32, &device).unwrap();
        let mask = Tensor::ones((1, 3, 4, 4), DType::U8, &device).unwrap();
        let err = ExactAttention::default()
            .attend(&q, &q, &q, Some(&mask), Mode::Eval)
            .unwrap_err();
        assert!(matches!(err, AttentionError::InvalidShape { .. }));
    }

    #[test]
    fn integer_inputs_are_unsupported() {
        let device = Device::Cpu;
        let q = Tensor::zeros((1, 4, 8), DType::U32, &device).unwrap();
        let err = ExactAttention::default()
            .attend(&q, &q, &q, None, Mode::Eval)
            .unwrap_err();
        assert!(matches!(err, AttentionError::UnsupportedDType { .. }));
    }

    #[test]
    fn dtype_matrix() -> CandleResult<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let mask = build_causal_mask(&device, 4, 4)?;
        let reference = ExactAttention::default()
            .attend(&q, &k, &v, Some(&mask), Mode::Eval)
            .unwrap();
        for dtype in [DType::F32, DType::BF16, DType::F16] {
            let out = ExactAttention::default()
                .attend(
                    &q.to_dtype(dtype)?,
                    &k.to_dtype(dtype)?,
                    &v.to_dtype(dtype)?,
                    Some(&mask),
                    Mode::Eval,
                )
                .unwrap();
            assert_eq!(out.context.dtype(), dtype);
            let max = max_abs_diff(&out.context, &reference.context)?;
            assert!(max < 5e-2, "dtype {:?} diverged by {max}", dtype);
        }
        Ok(())
    }

    #[test]
    fn numerical_stability() -> CandleResult<()> {
        let device = Device::Cpu;
        let q = Tensor::full(10_000.0f32, (1, 1, 4, 4), &device)?;
        let k = Tensor::full(-10_000.0f32, (1, 1, 4, 4), &device)?;
        let v = Tensor::ones((1, 1, 4, 4), DType::F32, &device)?;
        let out = ExactAttention::default()
            .attend(&q, &k, &v, None, Mode::Eval)
            .unwrap()
            .context
            .flatten_all()?
            .to_vec1::<f32>()?;
        assert!(out.iter().all(|value| value.is_finite()));
        Ok(())
    }

    #[test]
    fn fully_masked_rows_stay_finite() -> CandleResult<()> {
        let device = Device::Cpu;
        let q = Tensor::randn(0f32, 1.0, (1, 3, 4), &device)?;
        let mask = Tensor::zeros((3, 3), DType::U8, &device)?;
        let out = ExactAttention::default()
            .attend(&q, &q, &q, Some(&mask), Mode::Eval)
            .unwrap();
        let weights = out.weights.flatten_all()?.to_vec1::<f32>()?;
        assert!(weights.iter().all(|w| (w - 1.0 / 3.0).abs() < 1e-6));
        Ok(())
    }

    #[test]
    fn dropout_only_fires_in_training() -> CandleResult<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let kernel = ExactAttention::default().with_dropout(Dropout::new(0.5, 3)?);
        let plain = ExactAttention::default();

        let eval = kernel.attend(&q, &k, &v, None, Mode::Eval).unwrap();
        let reference = plain.attend(&q, &k, &v, None, Mode::Eval).unwrap();
        assert!(max_abs_diff(&eval.weights, &reference.weights)? < 1e-7);

        let train = kernel.attend(&q, &k, &v, None, Mode::Train).unwrap();
        let zeros = train
            .weights
            .flatten_all()?
            .to_vec1::<f32>()?
            .iter()
            .filter(|w| **w == 0.0)
            .count();
        assert!(zeros > 0);
        Ok(())
    }
}
