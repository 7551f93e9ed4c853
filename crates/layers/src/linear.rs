//! Linear and affine projection helpers.
//!
//! Linear layers expect inputs shaped `(batch, seq, in_dim)` (or a flat
//! `(rows, in_dim)`) and return tensors with `(batch, seq, out_dim)`. Weights
//! are stored `(out_dim, in_dim)` and applied as `x · Wᵀ + b`, the layout used
//! by candle's own `Linear`. Initialisation policies mirror common transformer
//! recipes (Glorot, Kaiming, LeCun) and draw from a seeded [`ParamInit`] so a
//! module built twice from the same seed is bit-identical.

use candle_core::{DType, Device, Error, Module, Result, Tensor};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::checks;

/// Configuration shared by dense projection layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConfig {
    /// Incoming feature dimension.
    pub input_dim: usize,
    /// Output feature dimension.
    pub output_dim: usize,
    /// Whether a learnable bias vector should be applied.
    pub bias: bool,
}

impl LinearConfig {
    /// Creates a configuration for a projection layer with bias.
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            bias: true,
        }
    }

    /// Same as [`LinearConfig::new`] but without a bias vector.
    pub fn no_bias(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            bias: false,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.input_dim == 0 || self.output_dim == 0 {
            return Err(Error::Msg(format!(
                "linear dimensions must be non-zero, got {} -> {}",
                self.input_dim, self.output_dim
            )));
        }
        Ok(())
    }
}

/// Supported weight initialisation policies for projections.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum LinearInit {
    /// Xavier/Glorot uniform initialisation.
    XavierUniform,
    /// Kaiming/He uniform initialisation.
    KaimingUniform { negative_slope: f64 },
    /// Uniform in `±1/√fan_in`, the default for freshly built dense layers.
    #[default]
    LecunUniform,
}

impl LinearInit {
    fn bound(&self, fan_in: f64, fan_out: f64) -> f64 {
        match self {
            LinearInit::XavierUniform => (6.0f64 / (fan_in + fan_out)).sqrt(),
            LinearInit::KaimingUniform { negative_slope } => {
                let gain = (2.0f64 / (1.0 + negative_slope.powi(2))).sqrt();
                (3.0f64).sqrt() * gain / fan_in.sqrt()
            }
            LinearInit::LecunUniform => 1.0 / fan_in.sqrt(),
        }
    }
}

/// Seeded source of fresh parameters.
///
/// Owns the RNG, the target device and dtype so that every projection in a
/// module is drawn from one reproducible stream.
#[derive(Debug)]
pub struct ParamInit {
    scheme: LinearInit,
    rng: StdRng,
    device: Device,
    dtype: DType,
}

impl ParamInit {
    /// Seeded initialiser producing `f32` parameters with the default scheme.
    pub fn seeded(seed: u64, device: &Device) -> Self {
        Self {
            scheme: LinearInit::default(),
            rng: StdRng::seed_from_u64(seed),
            device: device.clone(),
            dtype: DType::F32,
        }
    }

    /// Replaces the initialisation scheme.
    pub fn with_scheme(mut self, scheme: LinearInit) -> Self {
        self.scheme = scheme;
        self
    }

    /// Replaces the parameter dtype.
    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Draws a fresh seed from the stream, e.g. for a dropout layer.
    pub fn next_seed(&mut self) -> u64 {
        self.rng.gen()
    }

    /// Draws a `shape` tensor uniformly from `[-bound, bound)`.
    pub fn uniform(&mut self, shape: (usize, usize), bound: f64) -> Result<Tensor> {
        let bound = bound as f32;
        let total = shape.0 * shape.1;
        let data: Vec<f32> = if bound > 0.0 {
            (0..total).map(|_| self.rng.gen_range(-bound..bound)).collect()
        } else {
            vec![0.0; total]
        };
        Tensor::from_vec(data, shape, &self.device)?.to_dtype(self.dtype)
    }

    /// Builds a linear layer whose weights follow the configured scheme.
    pub fn linear(&mut self, config: LinearConfig) -> Result<Linear> {
        config.validate()?;
        let shape = (config.output_dim, config.input_dim);
        let bound = self
            .scheme
            .bound(config.input_dim as f64, config.output_dim as f64);
        let weight = self.uniform(shape, bound)?;
        let bias = if config.bias {
            Some(Tensor::zeros(config.output_dim, self.dtype, &self.device)?)
        } else {
            None
        };
        Linear::new(config, weight, bias)
    }
}

/// Dense affine projection with optional bias.
#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    weight: Tensor,
    bias: Option<Tensor>,
}

impl Linear {
    /// Constructs a linear layer from pre-existing parameters.
    pub fn new(config: LinearConfig, weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        config.validate()?;
        Self::validate_weight(&config, &weight)?;
        Self::validate_bias(&config, &weight, bias.as_ref())?;
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    pub fn config(&self) -> &LinearConfig {
        &self.config
    }

    pub fn input_dim(&self) -> usize {
        self.config.input_dim
    }

    pub fn output_dim(&self) -> usize {
        self.config.output_dim
    }

    /// Weight tensor shaped `(output_dim, input_dim)`.
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    fn validate_weight(config: &LinearConfig, weight: &Tensor) -> Result<()> {
        checks::expect_rank("linear.weight", weight, 2)?;
        checks::expect_shape(
            "linear.weight",
            weight,
            &[config.output_dim, config.input_dim],
        )?;
        checks::expect_dtype_in("linear.weight", weight, &checks::FLOAT_DTYPES)?;
        Ok(())
    }

    fn validate_bias(config: &LinearConfig, weight: &Tensor, bias: Option<&Tensor>) -> Result<()> {
        match (config.bias, bias) {
            (true, Some(tensor)) => {
                checks::expect_rank("linear.bias", tensor, 1)?;
                checks::expect_shape("linear.bias", tensor, &[config.output_dim])?;
                checks::expect_same_dtype("linear.bias", tensor, "linear.weight", weight)?;
                Ok(())
            }
            (false, Some(_)) => Err(Error::Msg("bias provided but config disables bias".into())),
            (true, None) => Err(Error::Msg("config expects bias but none supplied".into())),
            (false, None) => Ok(()),
        }
    }

    fn validate_input(&self, hidden: &Tensor) -> Result<()> {
        match hidden.dims() {
            [_, _, hidden_dim] | [_, hidden_dim] if *hidden_dim == self.config.input_dim => {
                checks::expect_same_dtype("linear.input", hidden, "linear.weight", &self.weight)
            }
            [_, _, hidden_dim] | [_, hidden_dim] => Err(Error::Msg(format!(
                "linear.input: expected last dim {} but received {}",
                self.config.input_dim, hidden_dim
            ))),
            dims => Err(Error::Msg(format!(
                "linear expects input shaped [B, T, H_in] or [T, H_in], got {:?}",
                dims
            ))),
        }
    }
}

impl Module for Linear {
    fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        self.validate_input(hidden)?;

        let weight_t = self.weight.t()?;
        let output = match *hidden.dims() {
            [batch, seq, _] => {
                let flat = hidden.reshape((batch * seq, self.config.input_dim))?;
                flat.matmul(&weight_t)?
                    .reshape((batch, seq, self.config.output_dim))?
            }
            [_, _] => hidden.matmul(&weight_t)?,
            _ => unreachable!("validated above"),
        };

        match &self.bias {
            Some(bias) => output.broadcast_add(bias),
            None => Ok(output),
        }
    }
}
