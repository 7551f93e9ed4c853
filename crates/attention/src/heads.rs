//! Reshapes between the token layout and the per-head layout.
//!
//! Projections produce `[batch, seq, heads * head_dim]`; kernels consume
//! `[batch, heads, seq, head_dim]`. The last axis is split into `heads`
//! contiguous groups, so head `h` owns features `h * head_dim..(h + 1) * head_dim`.

use candle_core::{bail, Result, Tensor};

/// `[B, T, H * d] -> [B, H, T, d]`.
pub fn split_heads(tensor: &Tensor, heads: usize) -> Result<Tensor> {
    let (batch, seq, width) = tensor.dims3()?;
    if heads == 0 || width % heads != 0 {
        bail!("cannot split width {width} into {heads} heads");
    }
    tensor
        .reshape((batch, seq, heads, width / heads))?
        .transpose(1, 2)?
        .contiguous()
}

/// `[B, H, T, d] -> [B, T, H * d]`, the inverse of [`split_heads`].
pub fn merge_heads(tensor: &Tensor) -> Result<Tensor> {
    let (batch, heads, seq, head_dim) = tensor.dims4()?;
    tensor
        .transpose(1, 2)?
        .contiguous()?
        .reshape((batch, seq, heads * head_dim))
}

/// Duplicates each key/value head `n_rep` times along the head axis.
///
/// `[B, H_kv, T, d] -> [B, H_kv * n_rep, T, d]` where output head `i` equals
/// input head `i / n_rep`: copies of one head are adjacent, so consecutive
/// query heads share the same key/value head.
pub fn repeat_kv(tensor: &Tensor, n_rep: usize) -> Result<Tensor> {
    if n_rep == 0 {
        bail!("repeat_kv requires n_rep > 0");
    }
    if n_rep == 1 {
        return Ok(tensor.clone());
    }
    let (batch, kv_heads, seq, head_dim) = tensor.dims4()?;
    tensor
        .unsqueeze(2)?
        .broadcast_as((batch, kv_heads, n_rep, seq, head_dim))?
        .reshape((batch, kv_heads * n_rep, seq, head_dim))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn arange(shape: (usize, usize, usize), device: &Device) -> Result<Tensor> {
        let total = shape.0 * shape.1 * shape.2;
        Tensor::arange(0f32, total as f32, device)?.reshape(shape)
    }

    #[test]
    fn split_moves_feature_groups_onto_head_axis() -> Result<()> {
        let x = arange((1, 2, 6), &Device::Cpu)?;
        let heads = split_heads(&x, 3)?;
        assert_eq!(heads.dims(), &[1, 3, 2, 2]);

        // Head 1 holds features 2..4 of every token.
        let head1 = heads.get(0)?.get(1)?.to_vec2::<f32>()?;
        assert_eq!(head1, vec![vec![2.0, 3.0], vec![8.0, 9.0]]);
        Ok(())
    }

    #[test]
    fn merge_inverts_split() -> Result<()> {
        let x = Tensor::randn(0f32, 1.0, (2, 5, 12), &Device::Cpu)?;
        let round_trip = merge_heads(&split_heads(&x, 4)?)?;
        assert_eq!(round_trip.dims(), x.dims());
        let diff = round_trip.sub(&x)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }

    #[test]
    fn split_rejects_uneven_width() -> Result<()> {
        let x = Tensor::zeros((1, 2, 10), DType::F32, &Device::Cpu)?;
        assert!(split_heads(&x, 3).is_err());
        assert!(split_heads(&x, 0).is_err());
        Ok(())
    }

    #[test]
    fn repeat_kv_duplicates_heads_contiguously() -> Result<()> {
        let device = Device::Cpu;
        let kv = Tensor::arange(0f32, 2.0 * 2.0 * 3.0 * 2.0, &device)?.reshape((2, 2, 3, 2))?;
        let n_rep = 3;
        let expanded = repeat_kv(&kv, n_rep)?;
        assert_eq!(expanded.dims(), &[2, 6, 3, 2]);

        for b in 0..2 {
            for head in 0..6 {
                let got = expanded.get(b)?.get(head)?.to_vec2::<f32>()?;
                let want = kv.get(b)?.get(head / n_rep)?.to_vec2::<f32>()?;
                assert_eq!(got, want, "batch {b} head {head}");
            }
        }
        Ok(())
    }

    #[test]
    fn repeat_kv_edge_factors() -> Result<()> {
        let kv = Tensor::ones((1, 2, 3, 4), DType::F32, &Device::Cpu)?;
        assert_eq!(repeat_kv(&kv, 1)?.dims(), kv.dims());
        assert!(repeat_kv(&kv, 0).is_err());
        Ok(())
    }
}
