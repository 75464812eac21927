//! Request dispatch: one handler decodes a typed command and matches on it

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use super::AppState;
use crate::error::EvalError;
use crate::protocol::{AutofillResponse, Command, Endpoint, QueryIdResponse};

/// Handles every `/v0/<Endpoint>` request
pub async fn dispatch(
    State(state): State<AppState>,
    Path(name): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, EvalError> {
    let endpoint = Endpoint::from_name(&name)
        .ok_or_else(|| EvalError::NotFound(format!("no endpoint named {:?}", name)))?;

    let command = Command::decode(endpoint, &method, &headers, &body)?;
    tracing::debug!("{} {}", method, endpoint);

    execute(&state, command)
}

/// Run one decoded command against the service state
pub fn execute(state: &AppState, command: Command) -> Result<Response, EvalError> {
    match command {
        Command::GetAutofill {
            partial_query,
            num_suggestions,
        } => {
            let count = usize::try_from(num_suggestions)
                .ok()
                .filter(|count| *count <= state.max_suggestions)
                .ok_or_else(|| {
                    EvalError::invalid(format!(
                        "num_suggestions must be between 0 and {}, got {}",
                        state.max_suggestions, num_suggestions
                    ))
                })?;
            let suggestions = state.autofill.suggest(&partial_query, count)?;
            Ok(Json(AutofillResponse { suggestions }).into_response())
        }

        Command::GetQueryId => {
            let query_id = state
                .allocator
                .allocate_with(|id| state.store.record_allocation(id))?;
            tracing::debug!("Allocated query_ID {}", query_id);
            Ok(Json(QueryIdResponse { query_id }).into_response())
        }

        Command::ReportSearchResults(report) => {
            let record = report.validate()?;
            tracing::info!(
                "Search results for query_ID {} ({} results)",
                record.query_id,
                record.results.len()
            );
            state.store.add_search_results(record)?;
            Ok(acknowledge())
        }

        Command::SubmitFeedback(report) => {
            let record = report.validate()?;
            tracing::info!("Feedback received: {}", record.label);
            state.store.add_feedback(record)?;
            Ok(acknowledge())
        }

        Command::GetQueryData { query_id } => {
            let record = state.store.query(query_id)?;
            Ok(Json(record).into_response())
        }

        Command::ReportMetrics { component, report } => {
            let record = report.validate(&component)?;
            tracing::info!(
                "Metrics from {} ({} entries)",
                record.component,
                record.metrics.len()
            );
            state.store.add_metrics(record)?;
            Ok(acknowledge())
        }
    }
}

/// Success with an empty JSON object
fn acknowledge() -> Response {
    (StatusCode::OK, Json(json!({}))).into_response()
}

/// Anything outside `/v0/<Endpoint>`
pub async fn not_found(method: Method, uri: Uri) -> EvalError {
    EvalError::NotFound(format!("no route for {} {}", method, uri.path()))
}
