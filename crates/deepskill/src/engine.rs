//! The temporal graph engine and its shared handle.

use std::sync::{Arc, Mutex};

use ndarray::Array2;
use serde::Serialize;

use crate::config::{ArtifactPaths, DeliverTo, EncoderArch, EngineConfig};
use crate::encoder::GraphEncoder;
use crate::graph::TemporalGraph;
use crate::head::{context_rows, distributions};
use crate::memory::{MemoryMailbox, MemoryState};
use crate::params::ModelParams;
use crate::replay::{CatchUp, ReplayController, ReplayState};
use crate::sampler::{RootQuery, SubgraphBlock, TemporalSampler};
use crate::types::{
    EngineError, EngineResult, EntityCode, Interaction, OutcomeDistribution, TimeControl,
    Timestamp,
};

/// Frozen parameters and graph, plus the mutable cursor and memory.
///
/// All mutation goes through `&mut self`; share it through [`EngineHandle`].
pub struct TemporalGraphEngine {
    config: EngineConfig,
    graph: Arc<TemporalGraph>,
    params: Arc<ModelParams>,
    sampler: Option<TemporalSampler>,
    encoder: GraphEncoder,
    memory: MemoryMailbox,
    replay: ReplayController,
}

/// Engine summary for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub entities: usize,
    pub interactions: usize,
    pub cursor: usize,
    pub replay: ReplayState,
    pub replayed_until: Option<Timestamp>,
    pub horizon: Timestamp,
    pub pending_mail: usize,
    pub encoder: EncoderArch,
    pub deliver_to: DeliverTo,
    pub batch_size: usize,
}

impl TemporalGraphEngine {
    pub fn new(
        config: EngineConfig,
        graph: Arc<TemporalGraph>,
        params: Arc<ModelParams>,
    ) -> EngineResult<Self> {
        config.validate()?;
        params.check_against(&config)?;

        let sampler = match &config.sampling {
            Some(sampling) => Some(TemporalSampler::new(graph.clone(), sampling.clone())?),
            None => None,
        };
        let memory = MemoryMailbox::new(graph.entity_count(), &params.dims, config.memory.deliver_to);

        Ok(Self {
            encoder: GraphEncoder::new(config.encoder.arch),
            replay: ReplayController::new(&config.replay),
            config,
            graph,
            params,
            sampler,
            memory,
        })
    }

    /// Load the graph and parameter artifacts.
    pub fn open(config: EngineConfig, artifacts: &ArtifactPaths) -> EngineResult<Self> {
        let graph = TemporalGraph::load(&artifacts.graph)?;
        let params = ModelParams::load(&artifacts.parameters, &config)?;
        Self::new(config, Arc::new(graph), Arc::new(params))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn graph(&self) -> &Arc<TemporalGraph> {
        &self.graph
    }

    pub fn params(&self) -> &Arc<ModelParams> {
        &self.params
    }

    pub fn cursor(&self) -> usize {
        self.replay.cursor()
    }

    pub fn replay_state(&self) -> ReplayState {
        self.replay.state(&self.graph)
    }

    /// Query time that lies after every interaction.
    pub fn now(&self) -> Timestamp {
        self.graph.horizon()
    }

    /// Fold in every interaction strictly before `ts`.
    pub fn advance_to(&mut self, ts: Timestamp) -> EngineResult<CatchUp> {
        self.replay.catch_up(&self.graph, ts, |batch| {
            apply_batch(&self.params, self.sampler.as_ref(), &mut self.memory, batch)
        })
    }

    /// Fold in the whole stream.
    pub fn replay_all(&mut self) -> EngineResult<CatchUp> {
        let horizon = self.graph.horizon();
        self.advance_to(horizon)
    }

    /// Embeddings of `codes` as of `ts`, one row per code.
    pub fn embed(&mut self, codes: &[EntityCode], ts: Timestamp) -> EngineResult<Array2<f32>> {
        for &code in codes {
            self.check_entity(code)?;
        }
        let query_ts = self.advance_to(ts)?.query_ts;
        self.embed_caught_up(codes, query_ts)
    }

    fn embed_caught_up(&self, codes: &[EntityCode], ts: Timestamp) -> EngineResult<Array2<f32>> {
        let roots: Vec<RootQuery> = codes.iter().map(|&code| RootQuery { code, ts }).collect();
        let depth = self.encoder.required_depth(&self.params);
        let block = match (&self.sampler, depth) {
            (Some(sampler), depth) if depth > 0 => sampler.sample_depth(roots, depth),
            _ => SubgraphBlock::roots_only(roots),
        };
        let nodes: Vec<EntityCode> = block.all_nodes().map(|q| q.code).collect();
        let snapshot = self.memory.prepare(&self.params, &nodes)?;
        self.encoder.encode(&self.params, &self.graph, &block, &snapshot)
    }

    /// Outcome distribution for `first` against `second` as of `ts`.
    pub fn predict(
        &mut self,
        first: EntityCode,
        second: EntityCode,
        time_control: Option<TimeControl>,
        ts: Timestamp,
    ) -> EngineResult<OutcomeDistribution> {
        let embeddings = self.embed(&[first, second], ts)?;
        let src = embeddings.slice(ndarray::s![0..1, ..]);
        let dst = embeddings.slice(ndarray::s![1..2, ..]);
        let context = context_rows(&[time_control]);
        let probs = self.params.head.forward(src, dst, context.view());
        distributions(&probs)
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Config("prediction head produced no output".to_string()))
    }

    /// Predict as of the end of the stream.
    pub fn predict_now(
        &mut self,
        first: EntityCode,
        second: EntityCode,
        time_control: Option<TimeControl>,
    ) -> EngineResult<OutcomeDistribution> {
        let now = self.now();
        self.predict(first, second, time_control, now)
    }

    /// Return memory, mailbox and cursor to the initial state.
    pub fn reset(&mut self) {
        self.memory.reset();
        self.replay.reset();
        tracing::info!("Engine reset: memory cleared, cursor at 0");
    }

    pub fn memory_state(&self, code: EntityCode) -> EngineResult<MemoryState> {
        self.memory.memory_state(code)
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            entities: self.graph.entity_count(),
            interactions: self.graph.len(),
            cursor: self.replay.cursor(),
            replay: self.replay_state(),
            replayed_until: self.replay.replayed_until(&self.graph),
            horizon: self.graph.horizon(),
            pending_mail: self.memory.pending_count(),
            encoder: self.config.encoder.arch,
            deliver_to: self.config.memory.deliver_to,
            batch_size: self.config.replay.batch_size,
        }
    }

    fn check_entity(&self, code: EntityCode) -> EngineResult<()> {
        if (code as usize) < self.graph.entity_count() {
            Ok(())
        } else {
            Err(EngineError::UnknownEntity(code))
        }
    }
}

/// Run one replay batch through the memory pipeline.
///
/// Replay has no use for embeddings: it only prepares memory for the batch
/// participants, writes their mail, then commits. Neighbors are sampled only
/// when mail is delivered to them.
fn apply_batch(
    params: &ModelParams,
    sampler: Option<&TemporalSampler>,
    memory: &mut MemoryMailbox,
    batch: &[Interaction],
) -> EngineResult<()> {
    let roots: Vec<RootQuery> = batch
        .iter()
        .map(|e| RootQuery {
            code: e.src,
            ts: e.ts,
        })
        .chain(batch.iter().map(|e| RootQuery {
            code: e.dst,
            ts: e.ts,
        }))
        .collect();
    let codes: Vec<EntityCode> = roots.iter().map(|q| q.code).collect();

    let hop = match (memory.deliver_to(), sampler) {
        (DeliverTo::Neighbors, Some(sampler)) => sampler.sample_depth(roots, 1).hops.into_iter().next(),
        _ => None,
    };

    if let Some(hop) = &hop {
        tracing::trace!(
            "Mail fans out to {} neighbors of {} roots",
            hop.fan_out(),
            hop.roots.len()
        );
    }

    let snapshot = memory.prepare(params, &codes)?;
    memory.update_mailbox(batch, &snapshot, hop.as_ref())?;
    let written = memory.update_memory(&snapshot)?;
    tracing::trace!(
        "Batch of {}: {} of {} memories updated, {} committed",
        batch.len(),
        snapshot.updated_count(),
        snapshot.len(),
        written
    );
    Ok(())
}

/// Shared, exclusively locked access to one engine.
///
/// Every call holds the lock across catch-up and query, so the cursor cannot
/// move between the two.
#[derive(Clone)]
pub struct EngineHandle {
    inner: Arc<Mutex<TemporalGraphEngine>>,
}

impl EngineHandle {
    pub fn new(engine: TemporalGraphEngine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    /// Run `f` with exclusive access to the engine.
    pub fn with<R>(
        &self,
        f: impl FnOnce(&mut TemporalGraphEngine) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let mut engine = self.inner.lock().map_err(|_| EngineError::Poisoned)?;
        f(&mut engine)
    }

    pub fn predict_now(
        &self,
        first: EntityCode,
        second: EntityCode,
        time_control: Option<TimeControl>,
    ) -> EngineResult<OutcomeDistribution> {
        self.with(|engine| engine.predict_now(first, second, time_control))
    }

    pub fn predict(
        &self,
        first: EntityCode,
        second: EntityCode,
        time_control: Option<TimeControl>,
        ts: Timestamp,
    ) -> EngineResult<OutcomeDistribution> {
        self.with(|engine| engine.predict(first, second, time_control, ts))
    }

    pub fn cursor(&self) -> EngineResult<usize> {
        self.with(|engine| Ok(engine.cursor()))
    }

    pub fn status(&self) -> EngineResult<EngineStatus> {
        self.with(|engine| Ok(engine.status()))
    }

    pub fn reset(&self) -> EngineResult<()> {
        self.with(|engine| {
            engine.reset();
            Ok(())
        })
    }
}
