//! Request dispatcher: routes JSON-RPC requests to the prediction session.

use std::sync::Arc;

use serde_json::Value;

use crate::session::PredictionSession;
use crate::types::*;

use super::validator::validate_request;

/// Methods the server answers.
pub const METHODS: &[&str] = &["predict", "status", "ping"];

/// Dispatches incoming messages to the session.
pub struct ProtocolHandler {
    session: Arc<PredictionSession>,
}

impl ProtocolHandler {
    pub fn new(session: Arc<PredictionSession>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<PredictionSession> {
        &self.session
    }

    /// Handle one message. Notifications produce no response.
    pub async fn handle_message(&self, msg: IncomingMessage) -> Option<Value> {
        match msg {
            IncomingMessage::Request(req) => Some(self.handle_request(req).await),
            IncomingMessage::Notification(notif) => {
                tracing::debug!("Ignoring notification: {}", notif.method);
                None
            }
        }
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> Value {
        if let Err(e) = validate_request(&request) {
            return serde_json::to_value(e.to_json_rpc_error(request.id)).unwrap_or_default();
        }

        let id = request.id.clone();
        match self.dispatch_request(&request).await {
            Ok(value) => serde_json::to_value(JsonRpcResponse::new(id, value)).unwrap_or_default(),
            Err(e) => {
                tracing::debug!("Request {id} ({}) failed: {e}", request.method);
                serde_json::to_value(e.to_json_rpc_error(id)).unwrap_or_default()
            }
        }
    }

    async fn dispatch_request(&self, request: &JsonRpcRequest) -> ServeResult<Value> {
        match request.method.as_str() {
            "predict" => self.handle_predict(request.params.clone()).await,
            "status" => self.handle_status(),
            "ping" => Ok(Value::Object(serde_json::Map::new())),
            _ => Err(ServeError::MethodNotFound(request.method.clone())),
        }
    }

    async fn handle_predict(&self, params: Option<Value>) -> ServeResult<Value> {
        let params = PredictParams::from_params(params)?;
        let distribution = self.session.predict(params.into()).await?;
        serde_json::to_value(PredictResponse::from(distribution))
            .map_err(|e| ServeError::InternalError(e.to_string()))
    }

    fn handle_status(&self) -> ServeResult<Value> {
        let status = self.session.status()?;
        serde_json::to_value(status).map_err(|e| ServeError::InternalError(e.to_string()))
    }
}
