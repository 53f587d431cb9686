//! Core data types for the interaction stream, queries and predictions.

use serde::{Deserialize, Serialize};

/// Dense integer code assigned to an entity at ingestion.
pub type EntityCode = u32;

/// Seconds since the first interaction in the stream.
pub type Timestamp = i64;

/// Row index of an interaction in the time-ordered interaction table.
pub type EdgeId = u32;

/// Width of the per-interaction feature vector: outcome one-hot plus time control.
pub const EDGE_FEATURE_DIM: usize = 5;

/// Width of the contextual feature vector fed to the prediction head.
pub const CONTEXT_DIM: usize = 2;

/// Number of outcome classes.
pub const OUTCOME_CLASSES: usize = 3;

/// Result of a single interaction, seen from the first party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    FirstParty,
    SecondParty,
    Draw,
}

impl Outcome {
    pub fn class_index(self) -> usize {
        match self {
            Outcome::FirstParty => 0,
            Outcome::SecondParty => 1,
            Outcome::Draw => 2,
        }
    }

    pub fn one_hot(self) -> [f32; OUTCOME_CLASSES] {
        let mut v = [0.0; OUTCOME_CLASSES];
        v[self.class_index()] = 1.0;
        v
    }
}

/// Time-control setting of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeControl {
    pub base_minutes: u32,
    pub increment_seconds: u32,
}

impl TimeControl {
    /// Normalizer for the base time, in seconds.
    pub const BASE_SCALE_SECS: f32 = 1200.0;
    /// Normalizer for the increment, in seconds.
    pub const INCREMENT_SCALE_SECS: f32 = 10.0;
    /// Normalized features used for games without a clock.
    pub const UNLIMITED: [f32; CONTEXT_DIM] = [2.0, 0.0];

    pub fn new(base_minutes: u32, increment_seconds: u32) -> Self {
        Self {
            base_minutes,
            increment_seconds,
        }
    }

    /// Normalize to the same range used when the parameters were trained.
    pub fn normalized(&self) -> [f32; CONTEXT_DIM] {
        [
            (self.base_minutes as f32 * 60.0) / Self::BASE_SCALE_SECS,
            self.increment_seconds as f32 / Self::INCREMENT_SCALE_SECS,
        ]
    }

    /// Normalized features for an optional time control.
    pub fn features(tc: Option<&TimeControl>) -> [f32; CONTEXT_DIM] {
        tc.map(TimeControl::normalized).unwrap_or(Self::UNLIMITED)
    }
}

/// One immutable record of the interaction stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub src: EntityCode,
    pub dst: EntityCode,
    pub ts: Timestamp,
    pub outcome: Outcome,
    /// `None` for games played without a clock.
    #[serde(default)]
    pub time_control: Option<TimeControl>,
}

impl Interaction {
    /// Feature vector: `[one-hot outcome, base_norm, inc_norm]`.
    pub fn features(&self) -> [f32; EDGE_FEATURE_DIM] {
        let oh = self.outcome.one_hot();
        let tc = TimeControl::features(self.time_control.as_ref());
        [oh[0], oh[1], oh[2], tc[0], tc[1]]
    }
}

/// Three-way outcome distribution for a pairing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeDistribution {
    pub first_party: f32,
    pub second_party: f32,
    pub draw: f32,
}

impl OutcomeDistribution {
    pub fn from_probs(p: [f32; OUTCOME_CLASSES]) -> Self {
        Self {
            first_party: p[0],
            second_party: p[1],
            draw: p[2],
        }
    }

    pub fn as_array(&self) -> [f32; OUTCOME_CLASSES] {
        [self.first_party, self.second_party, self.draw]
    }

    pub fn total(&self) -> f32 {
        self.first_party + self.second_party + self.draw
    }
}

/// A prediction request as it arrives from the serving boundary.
///
/// Numbers are signed so that out-of-range values can be reported instead of
/// failing to parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchQuery {
    pub first_party: String,
    pub second_party: String,
    pub base_minutes: i64,
    pub increment_seconds: i64,
}

impl MatchQuery {
    pub fn new(
        first_party: impl Into<String>,
        second_party: impl Into<String>,
        base_minutes: i64,
        increment_seconds: i64,
    ) -> Self {
        Self {
            first_party: first_party.into(),
            second_party: second_party.into(),
            base_minutes,
            increment_seconds,
        }
    }

    /// The time control, if both parts are in range.
    pub fn time_control(&self) -> Option<TimeControl> {
        let base = u32::try_from(self.base_minutes).ok().filter(|b| *b >= 1)?;
        let inc = u32::try_from(self.increment_seconds).ok()?;
        Some(TimeControl::new(base, inc))
    }
}

/// A query field that can fail validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryField {
    #[serde(rename = "first-party")]
    FirstParty,
    #[serde(rename = "second-party")]
    SecondParty,
    #[serde(rename = "time-control-base")]
    TimeControlBase,
    #[serde(rename = "time-control-increment")]
    TimeControlIncrement,
}

impl QueryField {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryField::FirstParty => "first-party",
            QueryField::SecondParty => "second-party",
            QueryField::TimeControlBase => "time-control-base",
            QueryField::TimeControlIncrement => "time-control-increment",
        }
    }
}

impl std::fmt::Display for QueryField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation failure naming every offending field.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("Invalid input: {}", join_fields(.fields))]
pub struct InvalidInput {
    pub fields: Vec<QueryField>,
}

fn join_fields(fields: &[QueryField]) -> String {
    fields
        .iter()
        .map(QueryField::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors raised while loading or driving the engine.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing artifact: {0}")]
    MissingArtifact(String),

    #[error("Corrupt artifact: {0}")]
    CorruptArtifact(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Parameter snapshot does not match configuration: {0}")]
    ParameterMismatch(String),

    #[error("Unknown entity code: {0}")]
    UnknownEntity(EntityCode),

    #[error(
        "Replay ordering violation: query at {requested} is behind replayed interactions up to {replayed_until}"
    )]
    ReplayOrderingViolation {
        requested: Timestamp,
        replayed_until: Timestamp,
    },

    #[error("Replay deadline exceeded at cursor {cursor}")]
    DeadlineExceeded { cursor: usize },

    #[error("Engine lock poisoned")]
    Poisoned,
}

/// Convenience result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors returned by an outcome predictor.
#[derive(thiserror::Error, Debug)]
pub enum PredictError {
    #[error(transparent)]
    Invalid(#[from] InvalidInput),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("No prediction available for {first_party} vs {second_party}")]
    NoPrediction {
        first_party: String,
        second_party: String,
    },
}

/// Convenience result type for predictor calls.
pub type PredictResult<T> = Result<T, PredictError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_control_normalization() {
        let tc = TimeControl::new(10, 5);
        let n = tc.normalized();
        assert!((n[0] - 0.5).abs() < 1e-6);
        assert!((n[1] - 0.5).abs() < 1e-6);
        assert_eq!(TimeControl::features(None), TimeControl::UNLIMITED);
    }

    #[test]
    fn test_interaction_features() {
        let edge = Interaction {
            src: 0,
            dst: 1,
            ts: 3,
            outcome: Outcome::Draw,
            time_control: Some(TimeControl::new(20, 0)),
        };
        assert_eq!(edge.features(), [0.0, 0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_query_time_control_range() {
        assert_eq!(
            MatchQuery::new("a", "b", 3, 2).time_control(),
            Some(TimeControl::new(3, 2))
        );
        assert!(MatchQuery::new("a", "b", 0, 2).time_control().is_none());
        assert!(MatchQuery::new("a", "b", 3, -1).time_control().is_none());
    }

    #[test]
    fn test_invalid_input_message() {
        let err = InvalidInput {
            fields: vec![QueryField::FirstParty, QueryField::TimeControlBase],
        };
        assert_eq!(
            err.to_string(),
            "Invalid input: first-party, time-control-base"
        );
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["fields"][1], "time-control-base");
    }
}
