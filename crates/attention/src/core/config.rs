//! Configuration options shared by all attention implementations.
//!
//! The [`Config`] struct captures the construction-time knobs (model width,
//! head counts, dropout, projection bias, mask fill value). Each variant
//! validates the subset of invariants it depends on when it is built; a
//! violation is reported as [`AttentionError::Config`] listing every problem.

use serde::Deserialize;

use crate::core::AttentionError;
use crate::masks::{DEFAULT_MASK_FILL, MAX_MASK_FILL};

/// Configuration driving attention behaviour.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    /// Model (embedding) dimension `D`.
    pub d_model: usize,
    /// Number of query heads.
    #[serde(default = "default_heads")]
    pub num_heads: usize,
    /// Number of key/value heads; `None` means one per query head.
    #[serde(default)]
    pub num_kv_heads: Option<usize>,
    /// Probability for dropout applied to attention weights during training.
    ///
    /// When `None`, dropout is disabled and the computation is deterministic.
    #[serde(default)]
    pub dropout_p: Option<f32>,
    /// Whether projections carry a bias vector.
    #[serde(default = "default_bias")]
    pub bias: bool,
    /// Score assigned to masked positions before the softmax; must not exceed
    /// [`MAX_MASK_FILL`].
    #[serde(default = "default_mask_fill")]
    pub mask_fill: f32,
}

fn default_heads() -> usize {
    1
}

fn default_bias() -> bool {
    true
}

fn default_mask_fill() -> f32 {
    DEFAULT_MASK_FILL
}

impl Config {
    /// Single-head configuration for a model of width `d_model`.
    pub fn new(d_model: usize) -> Self {
        Self {
            d_model,
            num_heads: default_heads(),
            num_kv_heads: None,
            dropout_p: None,
            bias: default_bias(),
            mask_fill: DEFAULT_MASK_FILL,
        }
    }

    pub fn with_heads(mut self, num_heads: usize) -> Self {
        self.num_heads = num_heads;
        self
    }

    pub fn with_kv_heads(mut self, num_kv_heads: usize) -> Self {
        self.num_kv_heads = Some(num_kv_heads);
        self
    }

    pub fn with_dropout(mut self, dropout_p: f32) -> Self {
        self.dropout_p = Some(dropout_p);
        self
    }

    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    pub fn with_mask_fill(mut self, mask_fill: f32) -> Self {
        self.mask_fill = mask_fill;
        self
    }

    /// Effective number of key/value heads.
    pub fn kv_heads(&self) -> usize {
        self.num_kv_heads.unwrap_or(self.num_heads)
    }

    /// Per-head dimension `D / num_heads` (zero when `num_heads` is zero).
    pub fn head_dim(&self) -> usize {
        self.d_model.checked_div(self.num_heads).unwrap_or(0)
    }

    /// Query heads sharing one key/value head.
    pub fn group_size(&self) -> usize {
        self.num_heads.checked_div(self.kv_heads()).unwrap_or(0)
    }

    /// Width of the key/value projections, `head_dim * kv_heads`.
    pub fn kv_dim(&self) -> usize {
        self.head_dim() * self.kv_heads()
    }

    /// Invariants shared by every variant.
    fn common_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.d_model == 0 {
            errors.push("d_model must be greater than zero".to_string());
        }
        if let Some(p) = self.dropout_p {
            if !(0.0..1.0).contains(&p) {
                errors.push(format!("dropout_p must be in [0, 1), got {p}"));
            }
        }
        if !self.mask_fill.is_finite() || self.mask_fill > MAX_MASK_FILL {
            errors.push(format!(
                "mask_fill must be finite and at most {MAX_MASK_FILL:e}, got {}",
                self.mask_fill
            ));
        }
        errors
    }

    /// Validation for the single-head variants; head counts are ignored.
    pub fn validate_single_head(&self) -> Result<(), AttentionError> {
        finish(self.common_errors())
    }

    /// Validation for multi-head attention: `d_model % num_heads == 0`.
    pub fn validate_multi_head(&self) -> Result<(), AttentionError> {
        let mut errors = self.common_errors();
        self.push_head_errors(&mut errors);
        finish(errors)
    }

    /// Validation for grouped-query attention.
    ///
    /// Requires `d_model` divisible by both head counts and the query head
    /// count to be a multiple of the key/value head count.
    pub fn validate_grouped(&self) -> Result<(), AttentionError> {
        let mut errors = self.common_errors();
        self.push_head_errors(&mut errors);
        let kv_heads = self.kv_heads();
        if kv_heads == 0 {
            errors.push("num_kv_heads must be greater than zero".to_string());
        } else {
            if self.d_model % kv_heads != 0 {
                errors.push(format!(
                    "d_model ({}) must be divisible by num_kv_heads ({})",
                    self.d_model, kv_heads
                ));
            }
            if self.num_heads % kv_heads != 0 {
                errors.push(format!(
                    "num_heads ({}) must be divisible by num_kv_heads ({})",
                    self.num_heads, kv_heads
                ));
            }
        }
        finish(errors)
    }

    fn push_head_errors(&self, errors: &mut Vec<String>) {
        if self.num_heads == 0 {
            errors.push("num_heads must be greater than zero".to_string());
        } else if self.d_model % self.num_heads != 0 {
            errors.push(format!(
                "d_model ({}) must be divisible by num_heads ({})",
                self.d_model, self.num_heads
            ));
        }
    }
}

fn finish(errors: Vec<String>) -> Result<(), AttentionError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AttentionError::config(errors.join("; ")))
    }
}
