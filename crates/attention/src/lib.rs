//! Scaled-dot-product attention variants on Candle tensors.
//!
//! The crate provides four attention modules over token batches laid out
//! `[batch, seq_len, d_model]`:
//!
//! * [`SelfAttention`]: one head spanning the full model width;
//! * [`MultiHeadAttention`]: `H` independent heads of width `d_model / H`;
//! * [`GroupedQueryAttention`]: `H_q` query heads sharing `H_kv` key/value heads;
//! * [`CausalSelfAttention`]: single-head attention restricted to the past.
//!
//! Each module returns an [`AttentionOutput`] holding the context and the
//! attention weights. Reductions run in `f32`; `bf16`, `f16` and `f32` inputs
//! are accepted and the outputs keep the input dtype.
//!
//! Dropout is an optional, train-only concern: it fires only when
//! [`Mode::Train`] is passed to the forward call, so [`Mode::Eval`] is always
//! deterministic. Masks are allow-masks (non-zero = attend) documented in
//! [`masks`]; disallowed scores are replaced with a large finite negative
//! value rather than `-inf`.

pub mod core;
pub mod heads;
pub mod masks;
pub mod reference;
pub mod variants;

pub use crate::core::{
    Attention, AttentionError, AttentionKind, AttentionModule, AttentionOutput, Config, Mode,
};
pub use crate::reference::ExactAttention;
pub use crate::variants::{
    build_module, CausalSelfAttention, GroupedQueryAttention, MultiHeadAttention,
    ProjectionWeights, SelfAttention,
};
