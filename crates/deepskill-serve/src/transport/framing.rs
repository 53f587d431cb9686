//! Message framing for newline-delimited JSON.

use crate::types::{IncomingMessage, ServeError, ServeResult};

/// Parse a single line of text as a JSON-RPC message.
pub fn parse_message(line: &str) -> ServeResult<IncomingMessage> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ServeError::ParseError("Empty message".to_string()));
    }

    serde_json::from_str(trimmed).map_err(|e| ServeError::ParseError(e.to_string()))
}

/// Serialize a value to a JSON line (with trailing newline).
pub fn frame_message(value: &serde_json::Value) -> ServeResult<String> {
    let mut json = serde_json::to_string(value).map_err(ServeError::Json)?;
    json.push('\n');
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_and_notification() {
        let req = parse_message(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
        assert!(matches!(req, IncomingMessage::Request(_)));

        let notif = parse_message(r#"{"jsonrpc":"2.0","method":"cancel"}"#).unwrap();
        assert!(matches!(notif, IncomingMessage::Notification(_)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_message("   "), Err(ServeError::ParseError(_))));
        assert!(matches!(parse_message("{not json"), Err(ServeError::ParseError(_))));
    }

    #[test]
    fn test_frame_ends_with_newline() {
        let framed = frame_message(&serde_json::json!({"ok": true})).unwrap();
        assert_eq!(framed, "{\"ok\":true}\n");
    }
}
