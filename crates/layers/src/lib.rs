//! Building blocks shared by the attention modules.
//!
//! The crate hosts the dense projections, dropout and validation helpers that
//! attention variants are assembled from. All layers operate on Candle tensors
//! and report contract violations through `candle_core::Result`.

pub mod checks;
pub mod dropout;
pub mod linear;

pub use dropout::{Dropout, Mode};
pub use linear::{Linear, LinearConfig, LinearInit, ParamInit};
