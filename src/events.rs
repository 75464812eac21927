// Events that flow from the diagnostic proxy to the capture sink
//
// Each relayed exchange produces a Request event once the request has been
// forwarded, then either a Response event or an Error event. Events carry the
// head text verbatim plus a bounded preview of the body, so the sink can print
// or persist exactly what crossed the wire without holding whole bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Observation emitted by a proxy relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")] // Creates JSON like {"type": "Request", ...}
pub enum RelayEvent {
    /// A request was forwarded upstream in full
    Request {
        /// `<connection>-<exchange>`, e.g. "3-1"
        id: String,
        timestamp: DateTime<Utc>,
        client: String,
        method: String,
        path: String,
        /// Request line and headers as received
        head: String,
        body_size: u64,
        body_preview: String,
    },

    /// The upstream response was forwarded back in full
    Response {
        request_id: String,
        timestamp: DateTime<Utc>,
        status: u16,
        head: String,
        body_size: u64,
        body_preview: String,
        duration: Duration,
    },

    /// An exchange failed before completing
    Error {
        request_id: Option<String>,
        timestamp: DateTime<Utc>,
        message: String,
        /// Status the proxy answered with itself, if it answered at all
        status: Option<u16>,
    },
}

impl RelayEvent {
    /// Identifier of the exchange this event belongs to
    pub fn exchange_id(&self) -> Option<&str> {
        match self {
            RelayEvent::Request { id, .. } => Some(id),
            RelayEvent::Response { request_id, .. } => Some(request_id),
            RelayEvent::Error { request_id, .. } => request_id.as_deref(),
        }
    }
}
