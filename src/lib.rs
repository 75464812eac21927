// Evaluation - search-evaluation telemetry service
//
// The service issues query identifiers, serves autofill suggestions, and
// ingests search-result, feedback and metrics reports over a small HTTP API.
// The admin client (evaltool) talks to that API and can run a diagnostic
// proxy that relays the service's traffic byte for byte while printing it.
//
// Architecture:
// - Service (axum): one dispatch handler per /v0/<Endpoint>, typed commands
// - Allocator + store: the only shared state, owned by the service's AppState
// - Proxy (raw tokio TCP): per-connection relay tasks, events over mpsc
// - Capture: prints relay events and optionally writes them as JSON Lines

pub mod allocator;
pub mod autofill;
pub mod capture;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod protocol;
pub mod proxy;
pub mod service;
pub mod store;
pub mod util;
