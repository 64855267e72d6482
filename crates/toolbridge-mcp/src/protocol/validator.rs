//! Envelope validation for incoming requests.

use crate::types::{JsonRpcRequest, McpError, McpResult, RequestId, JSONRPC_VERSION};

/// Validate that a JSON-RPC request is well-formed.
pub fn validate_request(request: &JsonRpcRequest) -> McpResult<()> {
    if request.jsonrpc != JSONRPC_VERSION {
        return Err(McpError::InvalidRequest(format!(
            "Expected jsonrpc version \"{JSONRPC_VERSION}\", got \"{}\"",
            request.jsonrpc
        )));
    }

    if request.method.is_empty() {
        return Err(McpError::InvalidRequest(
            "Method name must not be empty".to_string(),
        ));
    }

    if request.id == RequestId::Null {
        return Err(McpError::InvalidRequest(
            "Request id must not be null".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_envelopes() {
        let mut req = JsonRpcRequest::new(1u64, "ping", None);
        assert!(validate_request(&req).is_ok());

        req.jsonrpc = "1.0".to_string();
        assert_eq!(validate_request(&req).unwrap_err().code(), -32600);

        let mut req = JsonRpcRequest::new(1u64, "", None);
        assert!(validate_request(&req).is_err());

        req.method = "ping".to_string();
        req.id = RequestId::Null;
        assert!(validate_request(&req).is_err());
    }
}
