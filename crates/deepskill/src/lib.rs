//! DeepSkill: temporal graph memory and inference engine for head-to-head outcome prediction.

pub mod config;
pub mod encoder;
pub mod engine;
pub mod entities;
pub mod graph;
pub mod head;
pub mod memory;
pub mod nn;
pub mod params;
pub mod predictor;
pub mod replay;
pub mod sampler;
pub mod storage;
pub mod types;

pub use config::{
    ArtifactPaths, Backend, DeliverTo, EncoderArch, EngineConfig, OrderingPolicy,
    PredictorConfig, SamplingConfig, SamplingStrategy,
};
pub use engine::{EngineHandle, EngineStatus, TemporalGraphEngine};
pub use entities::EntityTable;
pub use graph::TemporalGraph;
pub use memory::{MemoryMailbox, MemoryState};
pub use params::ModelParams;
pub use predictor::{
    open_predictor, validate_query, LearnedTemporalGraph, OutcomePredictor, PredictorStatus,
    StaticLookup,
};
pub use replay::{CatchUp, ReplayState};
pub use sampler::{RootQuery, SubgraphBlock, TemporalSampler};
pub use types::*;
