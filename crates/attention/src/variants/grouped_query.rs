//! Grouped-query attention.
//!
//! Queries use `H_q` heads of width `d_k = D / H_q`; keys and values are
//! projected to only `H_kv * d_k` features and split into `H_kv` heads. Each
//! key/value head serves a group of `G = H_q / H_kv` consecutive query heads:
//! before the kernel runs, kv head `j` is duplicated into expanded heads
//! `j * G..(j + 1) * G`.

use candle_core::{Module, Tensor};
use layers::{checks, Mode, ParamInit};

use crate::core::{
    Attention, AttentionError, AttentionKind, AttentionModule, AttentionOutput, Config,
};
use crate::heads::{merge_heads, repeat_kv, split_heads};
use crate::reference::ExactAttention;
use crate::variants::params::{ProjectionDims, ProjectionWeights};

#[derive(Debug)]
pub struct GroupedQueryAttention {
    d_model: usize,
    num_heads: usize,
    num_kv_heads: usize,
    weights: ProjectionWeights,
    kernel: ExactAttention,
}

impl GroupedQueryAttention {
    /// Builds the module with freshly initialised projections.
    ///
    /// Fails with [`AttentionError::Config`] unless `d_model` is divisible by
    /// both head counts and `num_heads` is a multiple of `num_kv_heads`.
    pub fn new(config: &Config, init: &mut ParamInit) -> Result<Self, AttentionError> {
        config.validate_grouped()?;
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
        config.validate_grouped()?;
        weights.expect_dims(Self::dims(config))?;
        let kernel = super::build_kernel(config, dropout_seed)?;
        log::debug!(
            "attention::grouped_query init d_model={} heads={} kv_heads={} group_size={} head_dim={}",
            config.d_model,
            config.num_heads,
            config.kv_heads(),
            config.group_size(),
            config.head_dim()
        );
        Ok(Self {
            d_model: config.d_model,
            num_heads: config.num_heads,
            num_kv_heads: config.kv_heads(),
            weights,
            kernel,
        })
    }

    fn dims(config: &Config) -> ProjectionDims {
        ProjectionDims {
            d_model: config.d_model,
            q_dim: config.d_model,
            kv_dim: config.kv_dim(),
            output: true,
        }
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn num_kv_heads(&self) -> usize {
        self.num_kv_heads
    }

    pub fn head_dim(&self) -> usize {
        self.d_model / self.num_heads
    }

    /// Query heads sharing each key/value head.
    pub fn group_size(&self) -> usize {
        self.num_heads / self.num_kv_heads
    }

    pub fn weights(&self) -> &ProjectionWeights {
        &self.weights
    }

    /// Projected key/value heads before expansion, `[B, H_kv, T_k, d_k]` each.
    pub fn kv_heads(
        &self,
        key: &Tensor,
        value: &Tensor,
    ) -> Result<(Tensor, Tensor), AttentionError> {
        let k = self.weights.key().forward(key)?;
        let v = self.weights.value().forward(value)?;
        Ok((
            split_heads(&k, self.num_kv_heads)?,
            split_heads(&v, self.num_kv_heads)?,
        ))
    }

    /// Key/value heads duplicated up to the query head count, `[B, H_q, T_k, d_k]`.
    pub fn expanded_kv_heads(
        &self,
        key: &Tensor,
        value: &Tensor,
    ) -> Result<(Tensor, Tensor), AttentionError> {
        let (k, v) = self.kv_heads(key, value)?;
        let group = self.group_size();
        Ok((repeat_kv(&k, group)?, repeat_kv(&v, group)?))
    }

    /// Attention with separate query and key/value sources.
    ///
    /// Returns context `[B, T_q, D]` and weights `[B, H_q, T_q, T_k]`.
    pub fn forward_qkv(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        mask: Option<&Tensor>,
        mode: Mode,
    ) -> Result<AttentionOutput, AttentionError> {
        for (label, tensor) in [
            ("grouped_query.query", query),
            ("grouped_query.key", key),
            ("grouped_query.value", value),
        ] {
            checks::expect_batch_seq_hidden(label, tensor, self.d_model)
                .map_err(|err| AttentionError::shape(err.to_string()))?;
        }

        let q = self.weights.query().forward(query)?;
        let q = split_heads(&q, self.num_heads)?;
        let (k, v) = self.expanded_kv_heads(key, value)?;

        let AttentionOutput { context, weights } = self.kernel.attend(&q, &k, &v, mask, mode)?;
        let context = self.weights.project_output(&merge_heads(&context)?)?;
        Ok(AttentionOutput { context, weights })
    }
}

impl AttentionModule for GroupedQueryAttention {
    fn kind(&self) -> AttentionKind {
        AttentionKind::GroupedQuery
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
