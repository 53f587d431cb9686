//! Frozen numeric building blocks operating on row-major batches.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Linear transformation: `y = x W^T + b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Linear {
    /// Shape `(output_dim, input_dim)`.
    weights: Array2<f32>,
    bias: Array1<f32>,
}

impl Linear {
    /// Xavier/Glorot uniform initialization.
    pub fn new<R: Rng>(input_dim: usize, output_dim: usize, rng: &mut R) -> Self {
        let limit = (6.0 / (input_dim + output_dim) as f32).sqrt();
        let weights = Array2::from_shape_fn((output_dim, input_dim), |_| {
            rng.gen_range(-limit..=limit)
        });
        Self {
            weights,
            bias: Array1::zeros(output_dim),
        }
    }

    pub fn from_parts(weights: Array2<f32>, bias: Array1<f32>) -> Self {
        Self { weights, bias }
    }

    pub fn input_dim(&self) -> usize {
        self.weights.ncols()
    }

    pub fn output_dim(&self) -> usize {
        self.weights.nrows()
    }

    /// Internal consistency of the stored shapes.
    pub fn is_well_formed(&self) -> bool {
        self.bias.len() == self.weights.nrows()
    }

    pub fn forward(&self, x: ArrayView2<f32>) -> Array2<f32> {
        x.dot(&self.weights.t()) + &self.bias
    }
}

/// Gated recurrent unit cell, PyTorch gate layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GruCell {
    // Reset gate
    w_r: Linear,
    u_r: Linear,

    // Update gate
    w_z: Linear,
    u_z: Linear,

    // Candidate state
    w_n: Linear,
    u_n: Linear,
}

impl GruCell {
    pub fn new<R: Rng>(input_dim: usize, hidden_dim: usize, rng: &mut R) -> Self {
        Self {
            w_r: Linear::new(input_dim, hidden_dim, rng),
            u_r: Linear::new(hidden_dim, hidden_dim, rng),
            w_z: Linear::new(input_dim, hidden_dim, rng),
            u_z: Linear::new(hidden_dim, hidden_dim, rng),
            w_n: Linear::new(input_dim, hidden_dim, rng),
            u_n: Linear::new(hidden_dim, hidden_dim, rng),
        }
    }

    pub fn input_dim(&self) -> usize {
        self.w_r.input_dim()
    }

    pub fn hidden_dim(&self) -> usize {
        self.u_r.output_dim()
    }

    pub fn is_well_formed(&self) -> bool {
        let (i, h) = (self.input_dim(), self.hidden_dim());
        [&self.w_r, &self.w_z, &self.w_n]
            .iter()
            .all(|l| l.is_well_formed() && l.input_dim() == i && l.output_dim() == h)
            && [&self.u_r, &self.u_z, &self.u_n]
                .iter()
                .all(|l| l.is_well_formed() && l.input_dim() == h && l.output_dim() == h)
    }

    /// `h' = (1 - z) * n + z * h`.
    pub fn forward(&self, input: ArrayView2<f32>, hidden: ArrayView2<f32>) -> Array2<f32> {
        let r = (self.w_r.forward(input) + self.u_r.forward(hidden)).mapv(sigmoid);
        let z = (self.w_z.forward(input) + self.u_z.forward(hidden)).mapv(sigmoid);
        let n = (self.w_n.forward(input) + r * self.u_n.forward(hidden)).mapv(f32::tanh);
        let keep = z.mapv(|v| 1.0 - v);
        keep * n + z * hidden
    }
}

/// Layer normalization over the feature axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerNorm {
    gamma: Array1<f32>,
    beta: Array1<f32>,
    eps: f32,
}

impl LayerNorm {
    pub fn new(dim: usize, eps: f32) -> Self {
        Self {
            gamma: Array1::ones(dim),
            beta: Array1::zeros(dim),
            eps,
        }
    }

    pub fn dim(&self) -> usize {
        self.gamma.len()
    }

    pub fn is_well_formed(&self) -> bool {
        self.beta.len() == self.gamma.len()
    }

    pub fn forward(&self, x: ArrayView2<f32>) -> Array2<f32> {
        let mut out = x.to_owned();
        for mut row in out.rows_mut() {
            let n = row.len().max(1) as f32;
            let mean = row.sum() / n;
            let var = row.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
            let denom = (var + self.eps).sqrt();
            row.mapv_inplace(|v| (v - mean) / denom);
        }
        out * &self.gamma + &self.beta
    }
}

/// Harmonic time encoding: `cos(dt * w + b)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEncoder {
    w: Array1<f32>,
    b: Array1<f32>,
}

impl TimeEncoder {
    /// Frequencies spread geometrically from 1 down to 1e-9.
    pub fn new(dim: usize) -> Self {
        let w = Array1::from_shape_fn(dim, |i| {
            let exponent = if dim > 1 {
                9.0 * i as f32 / (dim - 1) as f32
            } else {
                0.0
            };
            10f32.powf(-exponent)
        });
        Self {
            w,
            b: Array1::zeros(dim),
        }
    }

    pub fn dim(&self) -> usize {
        self.w.len()
    }

    pub fn is_well_formed(&self) -> bool {
        self.b.len() == self.w.len()
    }

    pub fn encode(&self, deltas: &[f32]) -> Array2<f32> {
        Array2::from_shape_fn((deltas.len(), self.dim()), |(r, c)| {
            (deltas[r] * self.w[c] + self.b[c]).cos()
        })
    }
}

pub fn sigmoid(x: f32) -> f32 {
    if x > 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let ex = x.exp();
        ex / (1.0 + ex)
    }
}

pub fn relu(x: f32) -> f32 {
    x.max(0.0)
}

pub fn leaky_relu(x: f32, slope: f32) -> f32 {
    if x >= 0.0 {
        x
    } else {
        x * slope
    }
}

/// Row-wise softmax with max subtraction.
pub fn softmax_rows(x: &mut Array2<f32>) {
    for mut row in x.rows_mut() {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum().max(1e-12);
        row.mapv_inplace(|v| v / sum);
    }
}

/// Horizontal concatenation of equally tall matrices.
pub fn hstack(parts: &[ArrayView2<f32>]) -> Array2<f32> {
    let rows = parts.first().map(|p| p.nrows()).unwrap_or(0);
    let cols: usize = parts.iter().map(|p| p.ncols()).sum();
    let mut out = Array2::zeros((rows, cols));
    let mut offset = 0;
    for part in parts {
        let width = part.ncols();
        out.slice_mut(ndarray::s![.., offset..offset + width])
            .assign(part);
        offset += width;
    }
    out
}

/// Gather rows by index into a new matrix.
pub fn gather_rows(x: ArrayView2<f32>, rows: &[usize]) -> Array2<f32> {
    x.select(Axis(0), rows)
}
