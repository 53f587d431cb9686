//! Server errors and their JSON-RPC codes.

use serde_json::json;

use deepskill::{EngineError, InvalidInput, PredictError};

use super::message::{JsonRpcError, RequestId};

/// Standard JSON-RPC 2.0 error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// Server-defined error codes.
pub mod server_error_codes {
    /// Both names are known but no prediction exists for the pairing.
    pub const NO_PREDICTION: i32 = -32010;
    /// The engine failed while catching up or predicting.
    pub const ENGINE_ERROR: i32 = -32011;
    /// Catch-up did not finish within the configured deadline.
    pub const DEADLINE_EXCEEDED: i32 = -32012;
}

#[derive(thiserror::Error, Debug)]
pub enum ServeError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    InvalidInput(#[from] InvalidInput),

    #[error("No prediction for {first_party} vs {second_party}")]
    NoPrediction {
        first_party: String,
        second_party: String,
    },

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ServeError {
    pub fn code(&self) -> i32 {
        use error_codes::*;
        use server_error_codes::*;
        match self {
            ServeError::ParseError(_) | ServeError::Json(_) => PARSE_ERROR,
            ServeError::InvalidRequest(_) => INVALID_REQUEST,
            ServeError::MethodNotFound(_) => METHOD_NOT_FOUND,
            ServeError::InvalidParams(_) | ServeError::InvalidInput(_) => INVALID_PARAMS,
            ServeError::NoPrediction { .. } => NO_PREDICTION,
            ServeError::Engine(EngineError::DeadlineExceeded { .. }) => DEADLINE_EXCEEDED,
            ServeError::Engine(_) => ENGINE_ERROR,
            ServeError::InternalError(_) | ServeError::Io(_) => INTERNAL_ERROR,
        }
    }

    /// Structured detail attached to the error response.
    pub fn data(&self) -> Option<serde_json::Value> {
        match self {
            ServeError::InvalidInput(invalid) => Some(json!({ "invalid": invalid.fields })),
            ServeError::Engine(EngineError::DeadlineExceeded { cursor }) => {
                Some(json!({ "cursor": cursor }))
            }
            _ => None,
        }
    }

    pub fn to_json_rpc_error(&self, id: RequestId) -> JsonRpcError {
        JsonRpcError::new(id, self.code(), self.to_string(), self.data())
    }
}

impl From<PredictError> for ServeError {
    fn from(e: PredictError) -> Self {
        match e {
            PredictError::Invalid(invalid) => ServeError::InvalidInput(invalid),
            PredictError::Engine(engine) => ServeError::Engine(engine),
            PredictError::NoPrediction {
                first_party,
                second_party,
            } => ServeError::NoPrediction {
                first_party,
                second_party,
            },
        }
    }
}

pub type ServeResult<T> = Result<T, ServeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use deepskill::QueryField;

    #[test]
    fn test_invalid_input_carries_fields() {
        let err = ServeError::from(PredictError::Invalid(InvalidInput {
            fields: vec![QueryField::TimeControlBase, QueryField::TimeControlIncrement],
        }));
        assert_eq!(err.code(), error_codes::INVALID_PARAMS);
        let data = err.data().unwrap();
        assert_eq!(
            data["invalid"],
            json!(["time-control-base", "time-control-increment"])
        );
    }

    #[test]
    fn test_deadline_code() {
        let err = ServeError::from(EngineError::DeadlineExceeded { cursor: 12 });
        assert_eq!(err.code(), server_error_codes::DEADLINE_EXCEEDED);
        assert_eq!(err.data().unwrap()["cursor"], 12);
    }
}
