//! Portable, exact implementation of scaled-dot-product attention.
//!
//! This path favours clarity over absolute performance and is the kernel every
//! attention variant in the crate delegates to.

pub mod exact;

pub use exact::ExactAttention;
