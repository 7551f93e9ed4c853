//! Owned projection parameters of an attention module.
//!
//! The bundle is immutable once built: forward passes only read it, and the
//! per-call query/key/value tensors are produced fresh on every call.

use candle_core::{Module, Tensor};
use layers::{Linear, LinearConfig, ParamInit};

use crate::core::AttentionError;

/// Query, key, value and (optional) output projections.
#[derive(Debug, Clone)]
pub struct ProjectionWeights {
    query: Linear,
    key: Linear,
    value: Linear,
    output: Option<Linear>,
}

/// Expected widths of a [`ProjectionWeights`] bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectionDims {
    pub d_model: usize,
    /// Output width of the query projection.
    pub q_dim: usize,
    /// Output width of the key and value projections.
    pub kv_dim: usize,
    /// Whether a `q_dim -> d_model` output projection is present.
    pub output: bool,
}

impl ProjectionWeights {
    /// Assembles a bundle from existing layers, e.g. pre-trained weights.
    pub fn new(
        query: Linear,
        key: Linear,
        value: Linear,
        output: Option<Linear>,
    ) -> Result<Self, AttentionError> {
        let d_model = query.input_dim();
        if key.input_dim() != d_model || value.input_dim() != d_model {
            return Err(AttentionError::config(format!(
                "projections must share input width {d_model}, got key {} and value {}",
                key.input_dim(),
                value.input_dim()
            )));
        }
        if key.output_dim() != value.output_dim() {
            return Err(AttentionError::config(format!(
                "key and value projections must share output width, got {} and {}",
                key.output_dim(),
                value.output_dim()
            )));
        }
        if let Some(out) = &output {
            if out.input_dim() != query.output_dim() || out.output_dim() != d_model {
                return Err(AttentionError::config(format!(
                    "output projection must map {} -> {d_model}, got {} -> {}",
                    query.output_dim(),
                    out.input_dim(),
                    out.output_dim()
                )));
            }
        }
        Ok(Self {
            query,
            key,
            value,
            output,
        })
    }

    /// Draws a fresh bundle with the given widths from `init`.
    pub fn init(
        dims: ProjectionDims,
        bias: bool,
        init: &mut ParamInit,
    ) -> Result<Self, AttentionError> {
        let linear = |input: usize, output: usize| LinearConfig {
            input_dim: input,
            output_dim: output,
            bias,
        };
        let query = init.linear(linear(dims.d_model, dims.q_dim))?;
        let key = init.linear(linear(dims.d_model, dims.kv_dim))?;
        let value = init.linear(linear(dims.d_model, dims.kv_dim))?;
        let output = if dims.output {
            Some(init.linear(linear(dims.q_dim, dims.d_model))?)
        } else {
            None
        };
        Self::new(query, key, value, output)
    }

    /// Widths of this bundle.
    pub fn dims(&self) -> ProjectionDims {
        ProjectionDims {
            d_model: self.query.input_dim(),
            q_dim: self.query.output_dim(),
            kv_dim: self.key.output_dim(),
            output: self.output.is_some(),
        }
    }

    /// Fails unless the bundle has exactly the `expected` widths.
    pub fn expect_dims(&self, expected: ProjectionDims) -> Result<(), AttentionError> {
        let actual = self.dims();
        if actual == expected {
            Ok(())
        } else {
            Err(AttentionError::config(format!(
                "projection widths {actual:?} do not match the configuration {expected:?}"
            )))
        }
    }

    pub fn query(&self) -> &Linear {
        &self.query
    }

    pub fn key(&self) -> &Linear {
        &self.key
    }

    pub fn value(&self) -> &Linear {
        &self.value
    }

    pub fn output(&self) -> Option<&Linear> {
        self.output.as_ref()
    }

    /// Projects the three attention inputs.
    pub fn project_qkv(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
    ) -> Result<(Tensor, Tensor, Tensor), AttentionError> {
        let q = self.query.forward(query)?;
        let k = self.key.forward(key)?;
        let v = self.value.forward(value)?;
        Ok((q, k, v))
    }

    /// Applies the output projection, or passes `context` through when absent.
    pub fn project_output(&self, context: &Tensor) -> Result<Tensor, AttentionError> {
        match &self.output {
            Some(out) => Ok(out.forward(context)?),
            None => Ok(context.clone()),
        }
    }
}
