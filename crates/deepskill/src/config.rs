//! Typed configuration document, validated once at load time.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{EngineError, EngineResult};

/// Which predictor backend to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    TemporalGraph,
    StaticLookup,
}

/// The full configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorConfig {
    #[serde(default = "default_backend")]
    pub backend: Backend,

    /// Required for the temporal graph backend.
    #[serde(default)]
    pub artifacts: Option<ArtifactPaths>,

    #[serde(flatten)]
    pub engine: EngineConfig,
}

/// Locations of the persisted artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactPaths {
    pub parameters: PathBuf,
    pub graph: PathBuf,
    pub entities: PathBuf,
}

impl ArtifactPaths {
    /// Resolve relative paths against `base`.
    pub fn resolved_against(&self, base: &Path) -> Self {
        let resolve = |p: &PathBuf| {
            if p.is_absolute() {
                p.clone()
            } else {
                base.join(p)
            }
        };
        Self {
            parameters: resolve(&self.parameters),
            graph: resolve(&self.graph),
            entities: resolve(&self.entities),
        }
    }
}

/// Engine configuration: sampling, memory, encoder and replay sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Structural sampling. `None` declares that no neighbors are sampled.
    #[serde(default)]
    pub sampling: Option<SamplingConfig>,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub encoder: EncoderConfig,

    #[serde(default)]
    pub replay: ReplayConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStrategy {
    /// Most recent K interactions, highest timestamp first.
    Recent,
    /// K interactions drawn uniformly from the causal history.
    Uniform,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Number of hops.
    #[serde(default = "default_layers")]
    pub layers: usize,

    /// Maximum neighbors per root, one entry per hop.
    #[serde(default = "default_neighbors")]
    pub neighbors: Vec<usize>,

    #[serde(default = "default_strategy")]
    pub strategy: SamplingStrategy,

    /// Seed for the uniform strategy.
    #[serde(default)]
    pub seed: u64,

    /// Sample deeper hops at the root's query time instead of the edge time.
    #[serde(default)]
    pub prop_time: bool,

    /// Causality window in seconds; 0 means the whole history.
    #[serde(default)]
    pub duration: i64,

    /// Worker threads for per-root sampling; 0 uses the global rayon pool.
    #[serde(default)]
    pub threads: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            layers: default_layers(),
            neighbors: default_neighbors(),
            strategy: default_strategy(),
            seed: 0,
            prop_time: false,
            duration: 0,
            threads: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverTo {
    /// Mail goes to the two participants only.
    #[serde(rename = "self")]
    SelfOnly,
    /// Mail also goes to the participants' one-hop sampled neighbors.
    Neighbors,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Memory state dimensionality.
    #[serde(default = "default_memory_dim")]
    pub dim: usize,

    /// Width of the time encoding.
    #[serde(default = "default_time_dim")]
    pub time_dim: usize,

    #[serde(default = "default_deliver_to")]
    pub deliver_to: DeliverTo,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            dim: default_memory_dim(),
            time_dim: default_time_dim(),
            deliver_to: default_deliver_to(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderArch {
    /// Attention-weighted aggregation over sampled neighbors.
    Attention,
    /// Encode a root from its own features only.
    Identity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfig {
    #[serde(default = "default_arch")]
    pub arch: EncoderArch,

    #[serde(default = "default_dim_out")]
    pub dim_out: usize,

    #[serde(default = "default_heads")]
    pub heads: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            arch: default_arch(),
            dim_out: default_dim_out(),
            heads: default_heads(),
        }
    }
}

/// What to do with a query older than the replayed history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingPolicy {
    Reject,
    ServeFromCursor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_ordering")]
    pub ordering: OrderingPolicy,

    /// Upper bound on a single catch-up, in milliseconds.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            ordering: default_ordering(),
            deadline_ms: None,
        }
    }
}

// Default value functions
fn default_backend() -> Backend {
    Backend::TemporalGraph
}

fn default_layers() -> usize {
    1
}

fn default_neighbors() -> Vec<usize> {
    vec![10]
}

fn default_strategy() -> SamplingStrategy {
    SamplingStrategy::Recent
}

fn default_memory_dim() -> usize {
    100
}

fn default_time_dim() -> usize {
    100
}

fn default_deliver_to() -> DeliverTo {
    DeliverTo::SelfOnly
}

fn default_arch() -> EncoderArch {
    EncoderArch::Attention
}

fn default_dim_out() -> usize {
    100
}

fn default_heads() -> usize {
    2
}

fn default_batch_size() -> usize {
    600
}

fn default_ordering() -> OrderingPolicy {
    OrderingPolicy::Reject
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sampling: Some(SamplingConfig::default()),
            memory: MemoryConfig::default(),
            encoder: EncoderConfig::default(),
            replay: ReplayConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Check every cross-field rule. Called once when the document is loaded.
    pub fn validate(&self) -> EngineResult<()> {
        let fail = |msg: String| Err(EngineError::Config(msg));

        if self.replay.batch_size == 0 {
            return fail("replay.batch_size must be at least 1".to_string());
        }
        if self.memory.dim == 0 {
            return fail("memory.dim must be at least 1".to_string());
        }
        if self.memory.time_dim == 0 {
            return fail("memory.time_dim must be at least 1".to_string());
        }

        if let Some(sampling) = &self.sampling {
            if sampling.layers == 0 {
                return fail("sampling.layers must be at least 1".to_string());
            }
            if sampling.neighbors.len() != sampling.layers {
                return fail(format!(
                    "sampling.neighbors has {} entries, expected one per layer ({})",
                    sampling.neighbors.len(),
                    sampling.layers
                ));
            }
            if sampling.neighbors.contains(&0) {
                return fail("sampling.neighbors entries must be at least 1".to_string());
            }
            if sampling.duration < 0 {
                return fail("sampling.duration must not be negative".to_string());
            }
        }

        match self.encoder.arch {
            EncoderArch::Attention => {
                if self.sampling.is_none() {
                    return fail("encoder.arch = attention requires a sampling section".to_string());
                }
                if self.encoder.heads == 0 || self.encoder.dim_out == 0 {
                    return fail("encoder.dim_out and encoder.heads must be at least 1".to_string());
                }
                if self.encoder.dim_out % self.encoder.heads != 0 {
                    return fail(format!(
                        "encoder.dim_out ({}) must be divisible by encoder.heads ({})",
                        self.encoder.dim_out, self.encoder.heads
                    ));
                }
            }
            EncoderArch::Identity => {}
        }

        if self.memory.deliver_to == DeliverTo::Neighbors && self.sampling.is_none() {
            return fail("memory.deliver_to = neighbors requires a sampling section".to_string());
        }

        Ok(())
    }

    /// Number of attention layers the encoder runs.
    pub fn encoder_layers(&self) -> usize {
        match (self.encoder.arch, &self.sampling) {
            (EncoderArch::Attention, Some(s)) => s.layers,
            _ => 0,
        }
    }

    /// Width of the embeddings handed to the prediction head.
    pub fn embedding_dim(&self) -> usize {
        match self.encoder.arch {
            EncoderArch::Attention => self.encoder.dim_out,
            EncoderArch::Identity => self.memory.dim,
        }
    }
}

impl PredictorConfig {
    /// Parse and validate a configuration document from JSON text.
    pub fn from_json(text: &str) -> EngineResult<Self> {
        let config: PredictorConfig = serde_json::from_str(text)
            .map_err(|e| EngineError::Config(format!("Failed to parse configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file. Relative artifact paths resolve against the file's directory.
    pub fn from_file(path: &Path) -> EngineResult<Self> {
        if !path.exists() {
            return Err(EngineError::MissingArtifact(format!(
                "configuration {}",
                path.display()
            )));
        }
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_json(&text)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.artifacts = config.artifacts.map(|a| a.resolved_against(base));
        tracing::info!(
            "Loaded configuration from {} (backend: {:?})",
            path.display(),
            config.backend
        );
        Ok(config)
    }

    /// The engine sections only matter for the temporal graph backend.
    pub fn validate(&self) -> EngineResult<()> {
        match self.backend {
            Backend::StaticLookup => Ok(()),
            Backend::TemporalGraph => {
                if self.artifacts.is_none() {
                    return Err(EngineError::Config(
                        "backend = temporal_graph requires an artifacts section".to_string(),
                    ));
                }
                self.engine.validate()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_parse_full_document() {
        let text = r#"{
            "backend": "temporal_graph",
            "artifacts": { "parameters": "p.dskp", "graph": "g.dskg", "entities": "e.dske" },
            "sampling": { "layers": 2, "neighbors": [5, 3], "strategy": "uniform", "seed": 7 },
            "memory": { "dim": 16, "time_dim": 8, "deliver_to": "neighbors" },
            "encoder": { "arch": "attention", "dim_out": 16, "heads": 4 },
            "replay": { "batch_size": 32, "ordering": "serve_from_cursor", "deadline_ms": 500 }
        }"#;
        let config = PredictorConfig::from_json(text).unwrap();
        let sampling = config.engine.sampling.as_ref().unwrap();
        assert_eq!(sampling.neighbors, vec![5, 3]);
        assert_eq!(sampling.strategy, SamplingStrategy::Uniform);
        assert_eq!(config.engine.memory.deliver_to, DeliverTo::Neighbors);
        assert_eq!(config.engine.replay.ordering, OrderingPolicy::ServeFromCursor);
        assert_eq!(config.engine.replay.deadline_ms, Some(500));
        assert_eq!(config.engine.encoder_layers(), 2);
    }

    #[test]
    fn test_identity_without_sampling() {
        let text = r#"{
            "backend": "temporal_graph",
            "artifacts": { "parameters": "p.dskp", "graph": "g.dskg", "entities": "e.dske" },
            "memory": { "dim": 4, "time_dim": 4 },
            "encoder": { "arch": "identity" }
        }"#;
        let config = PredictorConfig::from_json(text).unwrap();
        assert!(config.engine.sampling.is_none());
        assert_eq!(config.engine.encoder_layers(), 0);
        assert_eq!(config.engine.embedding_dim(), 4);
    }

    #[test]
    fn test_rejects_attention_without_sampling() {
        let mut config = EngineConfig::default();
        config.sampling = None;
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_rejects_indivisible_heads() {
        let mut config = EngineConfig::default();
        config.encoder.dim_out = 10;
        config.encoder.heads = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_neighbor_list_mismatch() {
        let mut config = EngineConfig::default();
        if let Some(s) = config.sampling.as_mut() {
            s.layers = 2;
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_neighbor_delivery_without_sampling() {
        let mut config = EngineConfig::default();
        config.encoder.arch = EncoderArch::Identity;
        config.sampling = None;
        config.memory.deliver_to = DeliverTo::Neighbors;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_static_lookup_needs_no_engine_sections() {
        let config = PredictorConfig::from_json(r#"{ "backend": "static_lookup" }"#).unwrap();
        assert_eq!(config.backend, Backend::StaticLookup);
        assert!(config.artifacts.is_none());
    }

    #[test]
    fn test_temporal_graph_requires_artifacts() {
        let err = PredictorConfig::from_json(r#"{ "backend": "temporal_graph" }"#).unwrap_err();
        assert!(err.to_string().contains("artifacts"));
    }

    #[test]
    fn test_artifact_paths_resolve_relative() {
        let paths = ArtifactPaths {
            parameters: PathBuf::from("p.dskp"),
            graph: PathBuf::from("/abs/g.dskg"),
            entities: PathBuf::from("e.dske"),
        };
        let resolved = paths.resolved_against(Path::new("/etc/deepskill"));
        assert_eq!(resolved.parameters, PathBuf::from("/etc/deepskill/p.dskp"));
        assert_eq!(resolved.graph, PathBuf::from("/abs/g.dskg"));
    }
}
