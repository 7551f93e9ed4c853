//! The attention variants and their shared construction helpers.
//!
//! Every variant owns a [`ProjectionWeights`] bundle and an
//! [`ExactAttention`] kernel configured from the same [`Config`], and
//! implements [`AttentionModule`].

pub mod causal;
pub mod grouped_query;
pub mod multi_head;
pub mod params;
pub mod self_attention;

use layers::{Dropout, ParamInit};

use crate::core::{AttentionError, AttentionKind, AttentionModule, Config};
use crate::reference::ExactAttention;

pub use causal::CausalSelfAttention;
pub use grouped_query::GroupedQueryAttention;
pub use multi_head::MultiHeadAttention;
pub use params::{ProjectionDims, ProjectionWeights};
pub use self_attention::SelfAttention;

fn build_kernel(config: &Config, dropout_seed: u64) -> Result<ExactAttention, AttentionError> {
    let dropout = match config.dropout_p {
        Some(p) if p > 0.0 => Dropout::new(p, dropout_seed)?,
        _ => Dropout::disabled(),
    };
    Ok(ExactAttention::new()
        .with_mask_fill(config.mask_fill)
        .with_dropout(dropout))
}

/// Builds the requested variant with freshly initialised parameters.
pub fn build_module(
    kind: AttentionKind,
    config: &Config,
    init: &mut ParamInit,
) -> Result<Box<dyn AttentionModule>, AttentionError> {
    Ok(match kind {
        AttentionKind::SelfAttention => Box::new(SelfAttention::new(config, init)?),
        AttentionKind::MultiHead => Box::new(MultiHeadAttention::new(config, init)?),
        AttentionKind::GroupedQuery => Box::new(GroupedQueryAttention::new(config, init)?),
        AttentionKind::Causal => Box::new(CausalSelfAttention::new(config, init)?),
    })
}
