//! JSON-RPC envelope validation.

use crate::types::{JsonRpcRequest, ServeError, ServeResult, JSONRPC_VERSION};

/// Validate that a request is well-formed before dispatch.
pub fn validate_request(request: &JsonRpcRequest) -> ServeResult<()> {
    if request.jsonrpc != JSONRPC_VERSION {
        return Err(ServeError::InvalidRequest(format!(
            "Expected jsonrpc version \"{JSONRPC_VERSION}\", got \"{}\"",
            request.jsonrpc
        )));
    }

    if request.method.is_empty() {
        return Err(ServeError::InvalidRequest(
            "Method name must not be empty".to_string(),
        ));
    }

    // Names starting with "rpc." are reserved for protocol extensions.
    if request.method.starts_with("rpc.") {
        return Err(ServeError::MethodNotFound(request.method.clone()));
    }

    if let Some(params) = &request.params {
        if !params.is_object() && !params.is_array() {
            return Err(ServeError::InvalidRequest(
                "params must be an object or an array".to_string(),
            ));
        }
    }

    Ok(())
}
