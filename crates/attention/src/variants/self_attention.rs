//! Single-head scaled dot-product self-attention.
//!
//! `Q`, `K` and `V` come from three independent `D -> D` projections of the
//! same token batch; scores are scaled by `1/√D`. There is no output
//! projection: the context is returned in the value space directly.

use candle_core::Tensor;
use layers::{checks, Mode, ParamInit};

use crate::core::{
    Attention, AttentionError, AttentionKind, AttentionModule, AttentionOutput, Config,
};
use crate::reference::ExactAttention;
use crate::variants::params::{ProjectionDims, ProjectionWeights};

/// Self-attention with a single head spanning the full model width.
#[derive(Debug)]
pub struct SelfAttention {
    d_model: usize,
    weights: ProjectionWeights,
    kernel: ExactAttention,
}

impl SelfAttention {
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
            "attention::self_attention init d_model={} dropout_p={}",
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

impl AttentionModule for SelfAttention {
    fn kind(&self) -> AttentionKind {
        AttentionKind::SelfAttention
    }

    fn d_model(&self) -> usize {
        self.d_model
    }

    /// Returns context `[B, T, D]` and weights `[B, T, T]`.
    fn forward(
        &self,
        hidden: &Tensor,
        mask: Option<&Tensor>,
        mode: Mode,
    ) -> Result<AttentionOutput, AttentionError> {
        checks::expect_batch_seq_hidden("self_attention.input", hidden, self.d_model)
            .map_err(|err| AttentionError::shape(err.to_string()))?;
        let (q, k, v) = self.weights.project_qkv(hidden, hidden, hidden)?;
        self.kernel.attend(&q, &k, &v, mask, mode)
    }
}
