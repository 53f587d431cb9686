//! Frozen parameters for the memory updater, encoder and prediction head.

use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::nn::{GruCell, LayerNorm, Linear, TimeEncoder};
use crate::storage::{self, ArtifactKind};
use crate::types::{EngineError, EngineResult, CONTEXT_DIM, EDGE_FEATURE_DIM, OUTCOME_CLASSES};

/// Dimensions the parameters were built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDims {
    pub memory_dim: usize,
    pub time_dim: usize,
    pub edge_dim: usize,
    pub embedding_dim: usize,
    pub heads: usize,
    pub layers: usize,
}

impl ModelDims {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            memory_dim: config.memory.dim,
            time_dim: config.memory.time_dim,
            edge_dim: EDGE_FEATURE_DIM,
            embedding_dim: config.embedding_dim(),
            heads: config.encoder.heads,
            layers: config.encoder_layers(),
        }
    }

    /// Width of one mailbox entry: both memories plus the edge features.
    pub fn mail_dim(&self) -> usize {
        2 * self.memory_dim + self.edge_dim
    }
}

/// One attention layer, shared by every hop it is applied to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttentionLayerParams {
    pub time_encoder: TimeEncoder,
    pub w_q: Linear,
    pub w_k: Linear,
    pub w_v: Linear,
    pub w_out: Linear,
    pub norm: LayerNorm,
}

/// Maps two embeddings plus context to outcome logits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadParams {
    pub src: Linear,
    pub dst: Linear,
    pub context: Linear,
    pub out: Linear,
}

/// The complete frozen parameter set. Shared read-only by every query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub dims: ModelDims,
    pub memory_time_encoder: TimeEncoder,
    pub memory_updater: GruCell,
    pub layers: Vec<AttentionLayerParams>,
    pub head: HeadParams,
}

impl ModelParams {
    /// Seeded random parameters shaped for `config`.
    pub fn initialize(config: &EngineConfig, seed: u64) -> Self {
        let dims = ModelDims::from_config(config);
        let mut rng = StdRng::seed_from_u64(seed);

        let m = dims.memory_dim;
        let t = dims.time_dim;
        let e = dims.edge_dim;
        let d = dims.embedding_dim;

        let layers = (0..dims.layers)
            .map(|l| {
                let dim_in = if l == 0 { m } else { d };
                AttentionLayerParams {
                    time_encoder: TimeEncoder::new(t),
                    w_q: Linear::new(dim_in + t, d, &mut rng),
                    w_k: Linear::new(dim_in + e + t, d, &mut rng),
                    w_v: Linear::new(dim_in + e + t, d, &mut rng),
                    w_out: Linear::new(dim_in + d, d, &mut rng),
                    norm: LayerNorm::new(d, 1e-5),
                }
            })
            .collect();

        Self {
            dims,
            memory_time_encoder: TimeEncoder::new(t),
            memory_updater: GruCell::new(dims.mail_dim() + t, m, &mut rng),
            layers,
            head: HeadParams {
                src: Linear::new(d, d, &mut rng),
                dst: Linear::new(d, d, &mut rng),
                context: Linear::new(CONTEXT_DIM, d, &mut rng),
                out: Linear::new(d, OUTCOME_CLASSES, &mut rng),
            },
        }
    }

    /// Load a snapshot and check it against the configuration.
    pub fn load(path: &Path, config: &EngineConfig) -> EngineResult<Self> {
        let params: ModelParams = storage::read_artifact_file(ArtifactKind::Parameters, path)?;
        params.check_against(config)?;
        tracing::info!(
            "Loaded parameter snapshot from {} ({} attention layers, embedding dim {})",
            path.display(),
            params.layers.len(),
            params.dims.embedding_dim
        );
        Ok(params)
    }

    pub fn save(&self, path: &Path) -> EngineResult<()> {
        storage::write_artifact_file(ArtifactKind::Parameters, self.layers.len() as u64, self, path)
    }

    /// Verify declared dimensions and every tensor shape.
    pub fn check_against(&self, config: &EngineConfig) -> EngineResult<()> {
        let mismatch = |msg: String| Err(EngineError::ParameterMismatch(msg));

        let expected = ModelDims::from_config(config);
        if self.dims != expected {
            return mismatch(format!(
                "snapshot dims {:?}, configuration expects {:?}",
                self.dims, expected
            ));
        }

        let d = self.dims;
        let (m, t, e, k) = (d.memory_dim, d.time_dim, d.edge_dim, d.embedding_dim);

        if !self.memory_time_encoder.is_well_formed() || self.memory_time_encoder.dim() != t {
            return mismatch("memory time encoder".to_string());
        }
        if !self.memory_updater.is_well_formed()
            || self.memory_updater.input_dim() != d.mail_dim() + t
            || self.memory_updater.hidden_dim() != m
        {
            return mismatch("memory updater".to_string());
        }
        if self.layers.len() != d.layers {
            return mismatch(format!(
                "{} attention layers, expected {}",
                self.layers.len(),
                d.layers
            ));
        }
        for (l, layer) in self.layers.iter().enumerate() {
            let dim_in = if l == 0 { m } else { k };
            let shapes = [
                (&layer.w_q, dim_in + t, k),
                (&layer.w_k, dim_in + e + t, k),
                (&layer.w_v, dim_in + e + t, k),
                (&layer.w_out, dim_in + k, k),
            ];
            let linears_ok = shapes.iter().all(|(lin, i, o)| {
                lin.is_well_formed() && lin.input_dim() == *i && lin.output_dim() == *o
            });
            if !linears_ok
                || !layer.time_encoder.is_well_formed()
                || layer.time_encoder.dim() != t
                || !layer.norm.is_well_formed()
                || layer.norm.dim() != k
            {
                return mismatch(format!("attention layer {l}"));
            }
        }

        let head = [
            (&self.head.src, k, k),
            (&self.head.dst, k, k),
            (&self.head.context, CONTEXT_DIM, k),
            (&self.head.out, k, OUTCOME_CLASSES),
        ];
        if !head
            .iter()
            .all(|(lin, i, o)| lin.is_well_formed() && lin.input_dim() == *i && lin.output_dim() == *o)
        {
            return mismatch("prediction head".to_string());
        }

        Ok(())
    }
}
