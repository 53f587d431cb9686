//! Method result types.

use serde::{Deserialize, Serialize};

use deepskill::{Backend, EngineStatus, OutcomeDistribution};

/// Result of `predict`: one probability per outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub first_party: f32,
    pub second_party: f32,
    pub draw: f32,
}

impl From<OutcomeDistribution> for PredictResponse {
    fn from(d: OutcomeDistribution) -> Self {
        Self {
            first_party: d.first_party,
            second_party: d.second_party,
            draw: d.draw,
        }
    }
}

/// Result of `status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub backend: Backend,
    pub entities: usize,
    pub served: u64,
    pub rejected: u64,
    pub uptime_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineStatus>,
}

/// Static description printed by `info`.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub methods: Vec<&'static str>,
    /// Backend named by the resolved configuration, if it could be read.
    pub backend: Option<Backend>,
}

impl ServerInfo {
    pub fn current(backend: Option<Backend>) -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            methods: crate::protocol::METHODS.to_vec(),
            backend,
        }
    }
}
