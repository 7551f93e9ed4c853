//! Core traits and types shared across attention implementations.
//!
//! Two seams are defined here. [`Attention`] is the kernel seam: it consumes
//! already projected `Q`, `K`, `V` tensors laid out `[batch, seq, dim]` or
//! `[batch, n_heads, seq, head_dim]`. [`AttentionModule`] is the module seam:
//! implementors own their projection weights and map a token batch
//! `[batch, seq, d_model]` to an [`AttentionOutput`].

pub mod config;
pub mod errors;

use std::{fmt, str::FromStr};

use candle_core::Tensor;
use serde::Deserialize;

pub use config::Config;
pub use errors::AttentionError;
pub use layers::Mode;

/// Context vectors together with the attention weights that produced them.
#[derive(Debug, Clone)]
pub struct AttentionOutput {
    /// Weighted combination of value vectors per query position.
    pub context: Tensor,
    /// Row-normalised weights, `[batch, (heads,) q_len, k_len]`.
    pub weights: Tensor,
}

impl AttentionOutput {
    pub fn into_parts(self) -> (Tensor, Tensor) {
        (self.context, self.weights)
    }
}

/// Unified interface for attention kernels.
///
/// * `q`, `k`, and `v` share a rank (3 or 4), batch, head count and head
///   dimension; `k` and `v` share a sequence length.
/// * Masks are allow-masks (non-zero = attend) broadcastable to the score
///   shape `[batch, (heads,) q_len, k_len]`.
/// * Dropout only fires in [`Mode::Train`].
pub trait Attention {
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
        mode: Mode,
    ) -> Result<AttentionOutput, AttentionError>;
}

/// A complete attention layer owning its projection parameters.
pub trait AttentionModule: fmt::Debug {
    /// Which variant this module implements.
    fn kind(&self) -> AttentionKind;

    /// Model dimension expected on the last axis of the input.
    fn d_model(&self) -> usize;

    /// Self-attention over `hidden` shaped `[batch, seq, d_model]`.
    fn forward(
        &self,
        hidden: &Tensor,
        mask: Option<&Tensor>,
        mode: Mode,
    ) -> Result<AttentionOutput, AttentionError>;
}

/// The attention variants provided by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttentionKind {
    SelfAttention,
    MultiHead,
    GroupedQuery,
    Causal,
}

impl AttentionKind {
    pub const ALL: [AttentionKind; 4] = [
        AttentionKind::SelfAttention,
        AttentionKind::MultiHead,
        AttentionKind::GroupedQuery,
        AttentionKind::Causal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AttentionKind::SelfAttention => "self-attention",
            AttentionKind::MultiHead => "multi-head",
            AttentionKind::GroupedQuery => "grouped-query",
            AttentionKind::Causal => "causal",
        }
    }
}

impl fmt::Display for AttentionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttentionKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "self-attention" | "self" | "single-head" => Ok(AttentionKind::SelfAttention),
            "multi-head" | "mha" => Ok(AttentionKind::MultiHead),
            "grouped-query" | "gqa" => Ok(AttentionKind::GroupedQuery),
            "causal" | "causal-self-attention" => Ok(AttentionKind::Causal),
            other => Err(format!("unknown attention kind '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_parse_from_names_and_aliases() {
        for kind in AttentionKind::ALL {
            assert_eq!(kind.as_str().parse::<AttentionKind>(), Ok(kind));
        }
        assert_eq!("GQA".parse::<AttentionKind>(), Ok(AttentionKind::GroupedQuery));
        assert_eq!("mha".parse::<AttentionKind>(), Ok(AttentionKind::MultiHead));
        assert!("sparse".parse::<AttentionKind>().is_err());
    }

    #[test]
    fn kinds_deserialise_kebab_case() {
        let kind: AttentionKind = serde_json::from_str("\"grouped-query\"").unwrap();
        assert_eq!(kind, AttentionKind::GroupedQuery);
    }
}
