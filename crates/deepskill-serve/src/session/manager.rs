//! Prediction session: the configured backend plus request accounting.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use deepskill::{open_predictor, MatchQuery, OutcomeDistribution, OutcomePredictor, PredictorConfig};

use crate::types::{ServeError, ServeResult, StatusResponse};

/// Owns the predictor for the lifetime of the server.
pub struct PredictionSession {
    predictor: Arc<dyn OutcomePredictor>,
    config_path: Option<PathBuf>,
    served: AtomicU64,
    rejected: AtomicU64,
    started: Instant,
}

impl PredictionSession {
    /// Load the configuration at `path` and open its backend.
    ///
    /// Fails if any artifact is missing or corrupt; the server never starts
    /// with a partially loaded engine.
    pub fn open(path: &Path) -> ServeResult<Self> {
        let config = PredictorConfig::from_file(path)?;
        let predictor = open_predictor(&config)?;
        tracing::info!(
            "Session opened from {} (backend: {:?})",
            path.display(),
            predictor.backend()
        );
        let mut session = Self::with_predictor(predictor);
        session.config_path = Some(path.to_path_buf());
        Ok(session)
    }

    /// Wrap an already opened predictor.
    pub fn with_predictor(predictor: Arc<dyn OutcomePredictor>) -> Self {
        Self {
            predictor,
            config_path: None,
            served: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn predictor(&self) -> &Arc<dyn OutcomePredictor> {
        &self.predictor
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Run one prediction off the async runtime.
    ///
    /// A cold engine may replay a long stream before answering.
    pub async fn predict(&self, query: MatchQuery) -> ServeResult<OutcomeDistribution> {
        let predictor = Arc::clone(&self.predictor);
        let outcome = tokio::task::spawn_blocking(move || predictor.predict(&query))
            .await
            .map_err(|e| ServeError::InternalError(format!("Prediction task failed: {e}")))?;

        match outcome {
            Ok(distribution) => {
                self.served.fetch_add(1, Ordering::Relaxed);
                Ok(distribution)
            }
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Err(e.into())
            }
        }
    }

    pub fn served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> ServeResult<StatusResponse> {
        let status = self.predictor.status()?;
        Ok(StatusResponse {
            backend: status.backend,
            entities: status.entities,
            served: self.served(),
            rejected: self.rejected(),
            uptime_secs: self.started.elapsed().as_secs(),
            engine: status.engine,
        })
    }
}
