//! Wire models for request and response bodies
//!
//! Incoming reports are deserialized leniently (missing fields become
//! `None`/empty) and then validated into the record types the store keeps.
//! Validation is total: a report either becomes a record or an
//! `InvalidArgument`, never something in between.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EvalError;

/// Unique handle for one search-evaluation session
pub type QueryId = i64;

/// A single metric entry: open-ended name -> value pairs
pub type MetricEntry = serde_json::Map<String, serde_json::Value>;

// ─────────────────────────────────────────────────────────────────────────────
// Responses
// ─────────────────────────────────────────────────────────────────────────────

/// Body of a successful GetAutofill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutofillResponse {
    pub suggestions: Vec<String>,
}

/// Body of a successful GetQueryID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryIdResponse {
    #[serde(rename = "query_ID")]
    pub query_id: QueryId,
}

/// Everything recorded against one query ID (GetQueryData)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    #[serde(rename = "query_ID")]
    pub query_id: QueryId,
    /// Set when this process handed the ID out through GetQueryID
    pub allocated_at: Option<DateTime<Utc>>,
    /// Accepted search reports, in submission order
    pub search_results: Vec<SearchRecord>,
}

impl QueryRecord {
    pub fn new(query_id: QueryId) -> Self {
        Self {
            query_id,
            allocated_at: None,
            search_results: Vec::new(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ReportSearchResults
// ─────────────────────────────────────────────────────────────────────────────

/// Search result report as submitted by a client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResultReport {
    #[serde(rename = "query_ID", default)]
    pub query_id: Option<QueryId>,
    #[serde(default)]
    pub raw_query: String,
    #[serde(default)]
    pub results: Vec<String>,
    /// Index into `results`; absent, null or -1 means nothing was clicked
    #[serde(default)]
    pub clicked: Option<i64>,
    #[serde(default)]
    pub query_timestamp: Option<String>,
}

/// A validated search report as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRecord {
    #[serde(rename = "query_ID")]
    pub query_id: QueryId,
    pub raw_query: String,
    pub results: Vec<String>,
    pub clicked: Option<usize>,
    pub query_timestamp: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

impl SearchResultReport {
    pub fn validate(self) -> Result<SearchRecord, EvalError> {
        let query_id = self
            .query_id
            .ok_or_else(|| EvalError::invalid("query_ID is required"))?;

        let clicked = match self.clicked {
            None | Some(-1) => None,
            Some(index) if index < 0 => {
                return Err(EvalError::invalid(format!(
                    "clicked must be -1 or a result index, got {}",
                    index
                )))
            }
            Some(index) if self.results.is_empty() => {
                return Err(EvalError::invalid(format!(
                    "clicked references index {} but results is empty",
                    index
                )))
            }
            Some(index) => {
                let index = index as usize;
                if index >= self.results.len() {
                    return Err(EvalError::invalid(format!(
                        "clicked index {} out of range for {} results",
                        index,
                        self.results.len()
                    )));
                }
                Some(index)
            }
        };

        let raw_timestamp = self
            .query_timestamp
            .ok_or_else(|| EvalError::invalid("query_timestamp is required"))?;
        let query_timestamp = parse_timestamp(&raw_timestamp)?;

        Ok(SearchRecord {
            query_id,
            raw_query: self.raw_query,
            results: self.results,
            clicked,
            query_timestamp,
            received_at: Utc::now(),
        })
    }
}

/// Parse an ISO-8601 timestamp, falling back to RFC 2822 (HTTP date style)
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, EvalError> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::<FixedOffset>::parse_from_rfc2822(raw))
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| EvalError::invalid(format!("unparseable query_timestamp {:?}: {}", raw, e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// SubmitFeedback
// ─────────────────────────────────────────────────────────────────────────────

/// User feedback as submitted by a client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackReport {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub label: String,
    pub title: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl FeedbackReport {
    pub fn validate(self) -> Result<FeedbackRecord, EvalError> {
        if self.label.trim().is_empty() {
            return Err(EvalError::invalid("feedback label must not be empty"));
        }
        if self.text.trim().is_empty() {
            return Err(EvalError::invalid("feedback text must not be empty"));
        }
        Ok(FeedbackRecord {
            label: self.label,
            title: self.title,
            text: self.text,
            received_at: Utc::now(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ReportMetrics
// ─────────────────────────────────────────────────────────────────────────────

/// Metrics body: `{"metrics": [...]}` or a bare array
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricsReport {
    Wrapped { metrics: Vec<serde_json::Value> },
    Bare(Vec<serde_json::Value>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub component: String,
    pub metrics: Vec<MetricEntry>,
    pub received_at: DateTime<Utc>,
}

impl MetricsReport {
    pub fn validate(self, component: &str) -> Result<MetricsRecord, EvalError> {
        if component.trim().is_empty() {
            return Err(EvalError::invalid("component must not be empty"));
        }

        let raw = match self {
            MetricsReport::Wrapped { metrics } => metrics,
            MetricsReport::Bare(metrics) => metrics,
        };

        let metrics = raw
            .into_iter()
            .enumerate()
            .map(|(i, entry)| match entry {
                serde_json::Value::Object(map) => Ok(map),
                other => Err(EvalError::invalid(format!(
                    "metric entry {} must be an object, got {}",
                    i, other
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(MetricsRecord {
            component: component.to_string(),
            metrics,
            received_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn report(value: serde_json::Value) -> SearchResultReport {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_search_report_validates() {
        let record = report(json!({
            "query_ID": 12345,
            "raw_query": "best pizza places",
            "results": ["Pizza Palace", "Italian Bistro", "Gourmet Pizza Co."],
            "clicked": 1,
            "query_timestamp": "2024-12-08T12:34:56Z"
        }))
        .validate()
        .unwrap();

        assert_eq!(record.query_id, 12345);
        assert_eq!(record.clicked, Some(1));
        assert_eq!(record.query_timestamp.to_rfc3339(), "2024-12-08T12:34:56+00:00");
    }

    #[test]
    fn test_search_report_requires_query_id() {
        let err = report(json!({
            "raw_query": "q",
            "results": [],
            "query_timestamp": "2024-12-08T12:34:56Z"
        }))
        .validate()
        .unwrap_err();
        assert!(err.to_string().contains("query_ID"));
    }

    #[test]
    fn test_clicked_with_empty_results_is_rejected() {
        let err = report(json!({
            "query_ID": 1,
            "results": [],
            "clicked": 0,
            "query_timestamp": "2024-12-08T12:34:56Z"
        }))
        .validate()
        .unwrap_err();
        assert!(matches!(err, EvalError::InvalidArgument(_)));
    }

    #[test]
    fn test_clicked_sentinels_mean_no_click() {
        for clicked in [json!(-1), json!(null)] {
            let record = report(json!({
                "query_ID": 1,
                "results": [],
                "clicked": clicked,
                "query_timestamp": "2024-12-08T12:34:56Z"
            }))
            .validate()
            .unwrap();
            assert_eq!(record.clicked, None);
        }
    }

    #[test]
    fn test_clicked_out_of_range_is_rejected() {
        let err = report(json!({
            "query_ID": 1,
            "results": ["a", "b"],
            "clicked": 2,
            "query_timestamp": "2024-12-08T12:34:56Z"
        }))
        .validate()
        .unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_timestamp_formats() {
        assert!(parse_timestamp("2024-12-08T12:34:56Z").is_ok());
        assert!(parse_timestamp("2024-12-08T12:34:56.250+02:00").is_ok());
        let http_date = parse_timestamp("Tue, 29 Oct 2024 16:56:32 GMT").unwrap();
        assert_eq!(http_date.to_rfc3339(), "2024-10-29T16:56:32+00:00");
        assert!(parse_timestamp("yesterday-ish").is_err());
    }

    #[test]
    fn test_feedback_requires_label_and_text() {
        let ok = FeedbackReport {
            label: "Bug Report".into(),
            title: String::new(),
            text: "always the same".into(),
        };
        assert!(ok.validate().is_ok());

        let no_label = FeedbackReport {
            label: " ".into(),
            title: "t".into(),
            text: "x".into(),
        };
        assert!(no_label.validate().is_err());

        let no_text = FeedbackReport {
            label: "Bug Report".into(),
            title: "t".into(),
            text: String::new(),
        };
        assert!(no_text.validate().is_err());
    }

    #[test]
    fn test_metrics_body_shapes() {
        let wrapped: MetricsReport = serde_json::from_value(json!({
            "metrics": [{"label": "Bytes Used"}, {"value": 7295878476u64}]
        }))
        .unwrap();
        let record = wrapped.validate("Document-Data-Store").unwrap();
        assert_eq!(record.metrics.len(), 2);
        assert_eq!(record.metrics[1]["value"], json!(7295878476u64));

        let bare: MetricsReport = serde_json::from_value(json!([])).unwrap();
        assert!(bare.validate("indexer").unwrap().metrics.is_empty());
    }

    #[test]
    fn test_metrics_rejects_empty_component_and_scalars() {
        let report: MetricsReport = serde_json::from_value(json!({"metrics": []})).unwrap();
        assert!(report.clone().validate("").is_err());

        let scalar: MetricsReport = serde_json::from_value(json!({"metrics": [3]})).unwrap();
        assert!(scalar.validate("indexer").is_err());
    }
}
