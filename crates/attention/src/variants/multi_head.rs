//! Multi-head attention.
//!
//! Projections map `[B, T, D]` to `[B, T, D]`, which is split into `H` heads
//! of width `d_k = D / H` laid out `[B, H, T, d_k]`. Every head attends
//! independently with scale `1/√d_k` under a mask shared by all heads; the
//! heads are then merged back to `[B, T, D]` and passed through the output
//! projection.

use candle_core::Tensor;
use layers::{checks, Mode, ParamInit};

use crate::core::{
    Attention, AttentionError, AttentionKind, AttentionModule, AttentionOutput, Config,
};
use crate::heads::{merge_heads, split_heads};
use crate::reference::ExactAttention;
use crate::variants::params::{ProjectionDims, ProjectionWeights};

#[derive(Debug)]
pub struct MultiHeadAttention {
    d_model: usize,
    num_heads: usize,
    weights: ProjectionWeights,
    kernel: ExactAttention,
}

impl MultiHeadAttention {
    /// Builds the module with freshly initialised projections.
    ///
    /// Fails with [`AttentionError::Config`] unless `d_model % num_heads == 0`.
    pub fn new(config: &Config, init: &mut ParamInit) -> Result<Self, AttentionError> {
        config.validate_multi_head()?;
        let weights = ProjectionWeights::init(Self::dims(config), config.bias, init)?;
        let seed = init.next_seed();
        Self::from_weights(config, weights, seed)
    }

    /// Builds the module around caller-supplied projections.
    pub fn from_weights(
        config: &Config,
        weights: ProjectionWeights,
        dropout_seed: u64,
    ) -> Result<Self, AttentionError> {
        config.validate_multi_head()?;
        weights.expect_dims(Self::dims(config))?;
        let kernel = super::build_kernel(config, dropout_seed)?;
        log::debug!(
            "attention::multi_head init d_model={} heads={} head_dim={} dropout_p={}",
            config.d_model,
            config.num_heads,
            config.head_dim(),
            kernel.dropout_p()
        );
        Ok(Self {
            d_model: config.d_model,
            num_heads: config.num_heads,
            weights,
            kernel,
        })
    }

    fn dims(config: &Config) -> ProjectionDims {
        ProjectionDims {
            d_model: config.d_model,
            q_dim: config.d_model,
            kv_dim: config.d_model,
            output: true,
        }
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn head_dim(&self) -> usize {
        self.d_model / self.num_heads
    }

    pub fn weights(&self) -> &ProjectionWeights {
        &self.weights
    }

    /// Attention with separate query and key/value sources.
    ///
    /// `query` is `[B, T_q, D]`, `key` and `value` are `[B, T_k, D]`. Returns
    /// context `[B, T_q, D]` and per-head weights `[B, H, T_q, T_k]`.
    pub fn forward_qkv(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        mask: Option<&Tensor>,
        mode: Mode,
    ) -> Result<AttentionOutput, AttentionError> {
        for (label, tensor) in [
            ("multi_head.query", query),
            ("multi_head.key", key),
            ("multi_head.value", value),
        ] {
            checks::expect_batch_seq_hidden(label, tensor, self.d_model)
                .map_err(|err| AttentionError::shape(err.to_string()))?;
        }

        let (q, k, v) = self.weights.project_qkv(query, key, value)?;
        let q = split_heads(&q, self.num_heads)?;
        let k = split_heads(&k, self.num_heads)?;
        let v = split_heads(&v, self.num_heads)?;

        let AttentionOutput { context, weights } = self.kernel.attend(&q, &k, &v, mask, mode)?;
        let context = self.weights.project_output(&merge_heads(&context)?)?;
        Ok(AttentionOutput { context, weights })
    }
}

impl AttentionModule for MultiHeadAttention {
    fn kind(&self) -> AttentionKind {
        AttentionKind::MultiHead
    }

    fn d_model(&self) -> usize {
        self.d_model
    }

    fn forward(
        &self,
        hidden: &Tensor,
        mask: Option<&Tensor>,
        mode: Mode,
    ) -> Result<AttentionOutput, AttentionError> {
        self.forward_qkv(hidden, hidden, hidden, mask, mode)
    }
}
