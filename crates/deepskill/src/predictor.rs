//! The outcome predictor interface and its two backends.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::config::{ArtifactPaths, Backend, EngineConfig, PredictorConfig};
use crate::engine::{EngineHandle, EngineStatus, TemporalGraphEngine};
use crate::entities::EntityTable;
use crate::types::{
    EngineError, EngineResult, InvalidInput, MatchQuery, OutcomeDistribution, PredictError,
    PredictResult, QueryField, TimeControl,
};

/// Predicts the outcome of a pairing under a time control.
pub trait OutcomePredictor: Send + Sync {
    fn backend(&self) -> Backend;

    /// Whether `name` is a recognized entity.
    fn is_known(&self, name: &str) -> bool;

    /// Check every field of `query`, reporting all failures together.
    fn validate(&self, query: &MatchQuery) -> Result<TimeControl, InvalidInput> {
        validate_query(query, |name| self.is_known(name))
    }

    fn predict(&self, query: &MatchQuery) -> PredictResult<OutcomeDistribution>;

    fn status(&self) -> PredictResult<PredictorStatus>;
}

/// Backend summary for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct PredictorStatus {
    pub backend: Backend,
    pub entities: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineStatus>,
}

/// Validate a query against an entity membership test.
pub fn validate_query(
    query: &MatchQuery,
    is_known: impl Fn(&str) -> bool,
) -> Result<TimeControl, InvalidInput> {
    let mut fields = Vec::new();
    if !is_known(&query.first_party) {
        fields.push(QueryField::FirstParty);
    }
    if !is_known(&query.second_party) {
        fields.push(QueryField::SecondParty);
    }
    if query.base_minutes < 1 || u32::try_from(query.base_minutes).is_err() {
        fields.push(QueryField::TimeControlBase);
    }
    if query.increment_seconds < 0 || u32::try_from(query.increment_seconds).is_err() {
        fields.push(QueryField::TimeControlIncrement);
    }

    match query.time_control() {
        Some(tc) if fields.is_empty() => Ok(tc),
        _ => Err(InvalidInput { fields }),
    }
}

/// A fixed table of pairings.
#[derive(Debug, Clone)]
pub struct StaticLookup {
    entities: Vec<String>,
    table: HashMap<(String, String), OutcomeDistribution>,
}

impl StaticLookup {
    pub fn new(entities: Vec<String>) -> Self {
        Self {
            entities,
            table: HashMap::new(),
        }
    }

    pub fn with_pairing(
        mut self,
        first: &str,
        second: &str,
        probs: [f32; 3],
    ) -> Self {
        self.table.insert(
            (first.to_string(), second.to_string()),
            OutcomeDistribution::from_probs(probs),
        );
        self
    }

    /// The demonstration table served by the `static_lookup` backend.
    pub fn demo() -> Self {
        Self::new(vec!["John".into(), "Alice".into(), "Bobby".into()])
            .with_pairing("John", "Alice", [0.7, 0.2, 0.1])
            .with_pairing("Alice", "John", [0.3, 0.6, 0.1])
            .with_pairing("John", "Bobby", [0.55, 0.25, 0.2])
            .with_pairing("Bobby", "John", [0.35, 0.65, 0.0])
            .with_pairing("Alice", "Bobby", [0.0, 1.0, 0.0])
            .with_pairing("Bobby", "Alice", [1.0, 0.0, 0.0])
    }
}

impl OutcomePredictor for StaticLookup {
    fn backend(&self) -> Backend {
        Backend::StaticLookup
    }

    fn is_known(&self, name: &str) -> bool {
        self.entities.iter().any(|e| e == name)
    }

    fn predict(&self, query: &MatchQuery) -> PredictResult<OutcomeDistribution> {
        self.validate(query)?;
        self.table
            .get(&(query.first_party.clone(), query.second_party.clone()))
            .copied()
            .ok_or_else(|| PredictError::NoPrediction {
                first_party: query.first_party.clone(),
                second_party: query.second_party.clone(),
            })
    }

    fn status(&self) -> PredictResult<PredictorStatus> {
        Ok(PredictorStatus {
            backend: Backend::StaticLookup,
            entities: self.entities.len(),
            engine: None,
        })
    }
}

/// The learned temporal graph engine behind an entity table.
#[derive(Clone)]
pub struct LearnedTemporalGraph {
    entities: Arc<EntityTable>,
    engine: EngineHandle,
}

impl LearnedTemporalGraph {
    pub fn new(entities: EntityTable, engine: TemporalGraphEngine) -> EngineResult<Self> {
        let expected = engine.graph().entity_count();
        if entities.len() != expected {
            return Err(EngineError::CorruptArtifact(format!(
                "entity table has {} names, graph has {} entities",
                entities.len(),
                expected
            )));
        }
        Ok(Self {
            entities: Arc::new(entities),
            engine: EngineHandle::new(engine),
        })
    }

    /// Load the entity table, graph and parameters.
    pub fn open(config: EngineConfig, artifacts: &ArtifactPaths) -> EngineResult<Self> {
        let entities = EntityTable::load(&artifacts.entities)?;
        let engine = TemporalGraphEngine::open(config, artifacts)?;
        Self::new(entities, engine)
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    pub fn entities(&self) -> &EntityTable {
        &self.entities
    }
}

impl OutcomePredictor for LearnedTemporalGraph {
    fn backend(&self) -> Backend {
        Backend::TemporalGraph
    }

    fn is_known(&self, name: &str) -> bool {
        self.entities.contains(name)
    }

    fn predict(&self, query: &MatchQuery) -> PredictResult<OutcomeDistribution> {
        let time_control = self.validate(query)?;
        let (Some(first), Some(second)) = (
            self.entities.code(&query.first_party),
            self.entities.code(&query.second_party),
        ) else {
            return Err(PredictError::NoPrediction {
                first_party: query.first_party.clone(),
                second_party: query.second_party.clone(),
            });
        };
        Ok(self.engine.predict_now(first, second, Some(time_control))?)
    }

    fn status(&self) -> PredictResult<PredictorStatus> {
        Ok(PredictorStatus {
            backend: Backend::TemporalGraph,
            entities: self.entities.len(),
            engine: Some(self.engine.status()?),
        })
    }
}

/// Build the backend named in `config`.
pub fn open_predictor(config: &PredictorConfig) -> EngineResult<Arc<dyn OutcomePredictor>> {
    config.validate()?;
    match config.backend {
        Backend::StaticLookup => {
            tracing::info!("Serving the static lookup table");
            Ok(Arc::new(StaticLookup::demo()))
        }
        Backend::TemporalGraph => {
            let artifacts = config.artifacts.as_ref().ok_or_else(|| {
                EngineError::Config("backend = temporal_graph requires an artifacts section".to_string())
            })?;
            let predictor = LearnedTemporalGraph::open(config.engine.clone(), artifacts)?;
            tracing::info!(
                "Serving the temporal graph engine over {} entities",
                predictor.entities().len()
            );
            Ok(Arc::new(predictor))
        }
    }
}
