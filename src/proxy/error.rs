//! Responses the proxy writes itself when the upstream cannot answer
//!
//! These are the only bytes the proxy ever originates. Everything else it
//! writes to a client was received from the upstream service.

use std::time::Duration;

use axum::http::StatusCode;

/// Transport failure between the proxy and the upstream service
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Connect refused, reset, or closed before any response byte
    #[error("upstream {upstream} unavailable: {reason}")]
    Unreachable { upstream: String, reason: String },

    /// No response head within the exchange timeout
    #[error("upstream {upstream} did not respond within {}ms", .after.as_millis())]
    Timeout { upstream: String, after: Duration },
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Unreachable { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Complete HTTP/1.1 response; the connection is closed after it
    pub fn to_http(&self) -> Vec<u8> {
        let status = self.status();
        let body = format!("{}\n", self);
        format!(
            "HTTP/1.1 {} {}\r\ncontent-type: text/plain; charset=utf-8\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Error"),
            body.len(),
            body
        )
        .into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_gateway_response() {
        let err = GatewayError::Unreachable {
            upstream: "127.0.0.1:8080".into(),
            reason: "connection refused".into(),
        };
        let text = String::from_utf8(err.to_http()).unwrap();
        assert!(text.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
        assert!(text.contains("connection: close\r\n"));

        let (head, body) = text.split_once("\r\n\r\n").unwrap();
        assert!(head.contains(&format!("content-length: {}", body.len())));
    }

    #[test]
    fn test_timeout_maps_to_504() {
        let err = GatewayError::Timeout {
            upstream: "127.0.0.1:8080".into(),
            after: Duration::from_millis(250),
        };
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(err.to_string().contains("250ms"));
    }
}
