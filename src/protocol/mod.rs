//! HTTP protocol layer
//!
//! Scalar parameters travel as headers, structured payloads as JSON bodies.
//! Every operation is one `Endpoint`; a decoded request is one `Command`.
//! The server matches on `Command` exhaustively, and the admin client encodes
//! the same `Command` back into an exchange, so both sides share one table.

pub mod framing;
pub mod models;

use axum::http::{HeaderMap, Method};

use crate::error::EvalError;

pub use models::{
    AutofillResponse, FeedbackReport, FeedbackRecord, MetricEntry, MetricsRecord, MetricsReport,
    QueryId, QueryIdResponse, QueryRecord, SearchRecord, SearchResultReport,
};

/// Path prefix shared by every endpoint
pub const API_PREFIX: &str = "/v0/";

/// Header carrying the partial query for GetAutofill
pub const PARTIAL_QUERY: &str = "partial_query";
/// Header carrying the requested suggestion count for GetAutofill
pub const NUM_SUGGESTIONS: &str = "num_suggestions";
/// Header carrying the query ID for GetQueryData
pub const QUERY_ID: &str = "query_ID";
/// Header carrying the submitting component for ReportMetrics
pub const COMPONENT: &str = "component";

// ─────────────────────────────────────────────────────────────────────────────
// Endpoint table
// ─────────────────────────────────────────────────────────────────────────────

/// Every operation the evaluation component exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    GetAutofill,
    GetQueryId,
    ReportSearchResults,
    SubmitFeedback,
    GetQueryData,
    ReportMetrics,
}

impl Endpoint {
    pub const ALL: [Endpoint; 6] = [
        Endpoint::GetAutofill,
        Endpoint::GetQueryId,
        Endpoint::ReportSearchResults,
        Endpoint::SubmitFeedback,
        Endpoint::GetQueryData,
        Endpoint::ReportMetrics,
    ];

    /// Name as it appears in the path and on the admin CLI
    pub fn name(&self) -> &'static str {
        match self {
            Endpoint::GetAutofill => "GetAutofill",
            Endpoint::GetQueryId => "GetQueryID",
            Endpoint::ReportSearchResults => "ReportSearchResults",
            Endpoint::SubmitFeedback => "SubmitFeedback",
            Endpoint::GetQueryData => "GetQueryData",
            Endpoint::ReportMetrics => "ReportMetrics",
        }
    }

    pub fn method(&self) -> Method {
        match self {
            Endpoint::GetAutofill | Endpoint::GetQueryId | Endpoint::GetQueryData => Method::GET,
            Endpoint::ReportSearchResults | Endpoint::SubmitFeedback | Endpoint::ReportMetrics => {
                Method::POST
            }
        }
    }

    pub fn path(&self) -> String {
        format!("{}{}", API_PREFIX, self.name())
    }

    pub fn from_name(name: &str) -> Option<Endpoint> {
        Self::ALL.into_iter().find(|e| e.name() == name)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Typed commands
// ─────────────────────────────────────────────────────────────────────────────

/// A fully decoded request
#[derive(Debug, Clone)]
pub enum Command {
    GetAutofill {
        partial_query: String,
        /// Signed so a client can forward whatever it was given; the server
        /// rejects negative counts while decoding
        num_suggestions: i64,
    },
    GetQueryId,
    ReportSearchResults(SearchResultReport),
    SubmitFeedback(FeedbackReport),
    GetQueryData {
        query_id: QueryId,
    },
    ReportMetrics {
        component: String,
        report: MetricsReport,
    },
}

/// Wire shape of one request: method, path, header parameters and body
#[derive(Debug, Clone, PartialEq)]
pub struct RequestParts {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Option<Vec<u8>>,
}

impl Command {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            Command::GetAutofill { .. } => Endpoint::GetAutofill,
            Command::GetQueryId => Endpoint::GetQueryId,
            Command::ReportSearchResults(_) => Endpoint::ReportSearchResults,
            Command::SubmitFeedback(_) => Endpoint::SubmitFeedback,
            Command::GetQueryData { .. } => Endpoint::GetQueryData,
            Command::ReportMetrics { .. } => Endpoint::ReportMetrics,
        }
    }

    /// Decode a request addressed to `endpoint`
    pub fn decode(
        endpoint: Endpoint,
        method: &Method,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<Command, EvalError> {
        if *method != endpoint.method() {
            return Err(EvalError::MethodNotAllowed {
                endpoint: endpoint.name().to_string(),
                method: method.to_string(),
            });
        }

        match endpoint {
            Endpoint::GetAutofill => {
                let partial_query = header_param(headers, PARTIAL_QUERY).unwrap_or_default();
                let raw_count = header_param(headers, NUM_SUGGESTIONS)
                    .ok_or_else(|| EvalError::invalid("num_suggestions header is required"))?;
                let num_suggestions = raw_count
                    .trim()
                    .parse::<i64>()
                    .ok()
                    .filter(|count| *count >= 0)
                    .ok_or_else(|| {
                        EvalError::invalid(format!(
                            "num_suggestions must be a non-negative integer, got {:?}",
                            raw_count
                        ))
                    })?;
                Ok(Command::GetAutofill {
                    partial_query,
                    num_suggestions,
                })
            }
            Endpoint::GetQueryId => Ok(Command::GetQueryId),
            Endpoint::ReportSearchResults => {
                Ok(Command::ReportSearchResults(json_body(body, endpoint)?))
            }
            Endpoint::SubmitFeedback => Ok(Command::SubmitFeedback(json_body(body, endpoint)?)),
            Endpoint::GetQueryData => {
                let raw_id = header_param(headers, QUERY_ID)
                    .ok_or_else(|| EvalError::invalid("query_ID header is required"))?;
                let query_id = raw_id.trim().parse::<QueryId>().map_err(|_| {
                    EvalError::invalid(format!("query_ID must be an integer, got {:?}", raw_id))
                })?;
                Ok(Command::GetQueryData { query_id })
            }
            Endpoint::ReportMetrics => {
                let component = header_param(headers, COMPONENT).unwrap_or_default();
                Ok(Command::ReportMetrics {
                    component,
                    report: json_body(body, endpoint)?,
                })
            }
        }
    }

    /// Encode into the wire shape a client sends
    pub fn encode(&self) -> Result<RequestParts, EvalError> {
        let endpoint = self.endpoint();
        let mut headers = Vec::new();

        let body = match self {
            Command::GetAutofill {
                partial_query,
                num_suggestions,
            } => {
                headers.push((PARTIAL_QUERY, partial_query.clone()));
                headers.push((NUM_SUGGESTIONS, num_suggestions.to_string()));
                None
            }
            Command::GetQueryId => None,
            Command::ReportSearchResults(report) => Some(to_json(report)?),
            Command::SubmitFeedback(report) => Some(to_json(report)?),
            Command::GetQueryData { query_id } => {
                headers.push((QUERY_ID, query_id.to_string()));
                None
            }
            Command::ReportMetrics { component, report } => {
                headers.push((COMPONENT, component.clone()));
                Some(to_json(report)?)
            }
        };

        if body.is_some() {
            headers.push(("content-type", "application/json".to_string()));
        }

        Ok(RequestParts {
            method: endpoint.method(),
            path: endpoint.path(),
            headers,
            body,
        })
    }
}

/// Look up a header parameter by its underscore or hyphen spelling
///
/// Header names are case-insensitive; clients in the wild send both
/// `partial_query` and `Partial-Query`.
pub fn header_param(headers: &HeaderMap, name: &str) -> Option<String> {
    let hyphenated = name.replace('_', "-");
    headers
        .get(name.to_ascii_lowercase().as_str())
        .or_else(|| headers.get(hyphenated.to_ascii_lowercase().as_str()))
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
}

fn json_body<T: serde::de::DeserializeOwned>(
    body: &[u8],
    endpoint: Endpoint,
) -> Result<T, EvalError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(EvalError::invalid(format!("{} requires a JSON body", endpoint)));
    }
    serde_json::from_slice(body)
        .map_err(|e| EvalError::invalid(format!("malformed {} body: {}", endpoint, e)))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, EvalError> {
    serde_json::to_vec(value).map_err(|e| EvalError::invalid(format!("cannot encode body: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_endpoint_names_round_trip() {
        for endpoint in Endpoint::ALL {
            assert_eq!(Endpoint::from_name(endpoint.name()), Some(endpoint));
            assert!(endpoint.path().starts_with("/v0/"));
        }
        assert_eq!(Endpoint::GetQueryId.path(), "/v0/GetQueryID");
        assert_eq!(Endpoint::from_name("getqueryid"), None);
    }

    #[test]
    fn test_report_metrics_has_its_own_path() {
        assert_ne!(
            Endpoint::ReportMetrics.path(),
            Endpoint::SubmitFeedback.path()
        );
    }

    #[test]
    fn test_decode_autofill_accepts_hyphenated_headers() {
        let map = headers(&[("num-suggestions", "10"), ("partial-query", "How do I make")]);
        let command = Command::decode(Endpoint::GetAutofill, &Method::GET, &map, b"").unwrap();
        match command {
            Command::GetAutofill {
                partial_query,
                num_suggestions,
            } => {
                assert_eq!(partial_query, "How do I make");
                assert_eq!(num_suggestions, 10);
            }
            other => panic!("Expected GetAutofill, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_autofill_rejects_bad_counts() {
        for bad in ["-1", "three", ""] {
            let map = headers(&[("partial_query", "q"), ("num_suggestions", bad)]);
            let err = Command::decode(Endpoint::GetAutofill, &Method::GET, &map, b"").unwrap_err();
            assert!(matches!(err, EvalError::InvalidArgument(_)), "{:?}", bad);
        }
    }

    #[test]
    fn test_decode_wrong_method() {
        let err =
            Command::decode(Endpoint::GetQueryId, &Method::POST, &HeaderMap::new(), b"").unwrap_err();
        assert!(matches!(err, EvalError::MethodNotAllowed { .. }));
    }

    #[test]
    fn test_decode_requires_body() {
        let err = Command::decode(
            Endpoint::SubmitFeedback,
            &Method::POST,
            &HeaderMap::new(),
            b"  ",
        )
        .unwrap_err();
        assert!(err.to_string().contains("requires a JSON body"));
    }

    #[test]
    fn test_encode_metrics_puts_component_in_header() {
        let command = Command::ReportMetrics {
            component: "Document-Data-Store".into(),
            report: MetricsReport::Wrapped {
                metrics: vec![serde_json::json!({"label": "Bytes Used"})],
            },
        };
        let parts = command.encode().unwrap();
        assert_eq!(parts.method, Method::POST);
        assert_eq!(parts.path, "/v0/ReportMetrics");
        assert!(parts
            .headers
            .contains(&(COMPONENT, "Document-Data-Store".to_string())));
        let body: serde_json::Value = serde_json::from_slice(&parts.body.unwrap()).unwrap();
        assert_eq!(body["metrics"][0]["label"], "Bytes Used");
    }

    #[test]
    fn test_encoded_request_decodes_to_same_command() {
        let original = Command::GetQueryData { query_id: 12345 };
        let parts = original.encode().unwrap();
        let mut map = HeaderMap::new();
        for (name, value) in &parts.headers {
            let name = axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap();
            map.insert(name, HeaderValue::from_str(value).unwrap());
        }
        let decoded = Command::decode(Endpoint::GetQueryData, &parts.method, &map, b"").unwrap();
        assert!(matches!(decoded, Command::GetQueryData { query_id: 12345 }));
    }
}
