//! Causal (autoregressive) self-attention.
//!
//! Identical to [`SelfAttention`](super::SelfAttention) except that position
//! `i` may only attend to positions `j <= i`. The lower-triangular mask is
//! built per call from the sequence length; every row keeps at least its
//! diagonal entry, so each row normalises to a proper distribution and the
//! strictly upper triangle of the weights is exactly zero.

use candle_core::Tensor;
use layers::{checks, Mode, ParamInit};

use crate::core::{
    Attention, AttentionError, AttentionKind, AttentionModule, AttentionOutput, Config,
};
use crate::masks::{build_causal_mask, combine_masks};
use crate::reference::ExactAttention;
use crate::variants::params::{ProjectionDims, ProjectionWeights};

#[derive(Debug)]
pub struct CausalSelfAttention {
    d_model: usize,
    weights: ProjectionWeights,
    kernel: ExactAttention,
}

impl CausalSelfAttention {
    /// Builds the module with freshly initialised projections.
    pub fn new(config: &Config, init: &mut ParamInit) -> Result<Self, AttentionError> {
        config.validate_single_head()?;
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
        config.validate_single_head()?;
        weights.expect_dims(Self::dims(config))?;
        let kernel = super::build_kernel(config, dropout_seed)?;
        log::debug!(
            "attention::causal init d_model={} dropout_p={}",
            config.d_model,
            kernel.dropout_p()
        );
        Ok(Self {
            d_model: config.d_model,
            weights,
            kernel,
        })
    }

    fn dims(config: &Config) -> ProjectionDims {
        ProjectionDims {
            d_model: config.d_model,
            q_dim: config.d_model,
            kv_dim: config.d_model,
            output: false,
        }
    }

    pub fn weights(&self) -> &ProjectionWeights {
        &self.weights
    }
}

impl AttentionModule for CausalSelfAttention {
    fn kind(&self) -> AttentionKind {
        AttentionKind::Causal
    }

    fn d_model(&self) -> usize {
        self.d_model
    }

    /// `mask`, when given, is an extra allow-mask (typically padding) that is
    /// intersected with the causal mask.
    fn forward(
        &self,
        hidden: &Tensor,
        mask: Option<&Tensor>,
        mode: Mode,
    ) -> Result<AttentionOutput, AttentionError> {
        checks::expect_batch_seq_hidden("causal.input", hidden, self.d_model)
            .map_err(|err| AttentionError::shape(err.to_string()))?;
        let (_, seq_len, _) = hidden.dims3()?;

        let causal = build_causal_mask(hidden.device(), seq_len, seq_len)?;
        let mask = match mask {
            Some(extra) => combine_masks(&causal, extra).map_err(|err| {
                AttentionError::shape(format!("mask {:?}: {err}", extra.dims()))
            })?,
            None => causal,
        };

        let (q, k, v) = self.weights.project_qkv(hidden, hidden, hidden)?;
        self.kernel.attend(&q, &k, &v, Some(&mask), mode)
    }
}
