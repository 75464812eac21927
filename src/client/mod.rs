// Client module - the evaltool admin client
//
// One subcommand per service endpoint, named exactly like the endpoint, plus
// `proxy <port>` which runs the diagnostic proxy in the foreground. Arguments
// are typed and JSON arguments are checked locally, so a malformed invocation
// never reaches the service.

mod render;

pub use render::RawResponse;

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use crate::capture::Capture;
use crate::config::{Config, VERSION};
use crate::error::EvalError;
use crate::protocol::{Command, RequestParts};
use crate::proxy;

/// Upper bound on one request/response exchange with the service
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Admin client for the evaluation service
#[derive(Parser, Debug)]
#[command(name = "evaltool")]
#[command(version = VERSION)]
#[command(about = "Send requests to the evaluation service or relay its traffic", long_about = None)]
pub struct EvalTool {
    /// Service IP address [default: 127.0.0.1]
    #[arg(long, global = true)]
    pub ip: Option<IpAddr>,

    /// Service port [default: 8080]
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub command: ToolCommand,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum ToolCommand {
    /// Fetch autofill suggestions for a partial query
    #[command(name = "GetAutofill")]
    GetAutofill {
        partial_query: String,
        #[arg(allow_negative_numbers = true)]
        num_suggestions: i64,
    },

    /// Allocate a new query ID
    #[command(name = "GetQueryID")]
    GetQueryId,

    /// Report the results of a search session (JSON object)
    #[command(name = "ReportSearchResults")]
    ReportSearchResults { results_json: String },

    /// Submit user feedback (JSON object with label, title, text)
    #[command(name = "SubmitFeedback")]
    SubmitFeedback { feedback_json: String },

    /// Show everything recorded against a query ID
    #[command(name = "GetQueryData")]
    GetQueryData {
        #[arg(allow_negative_numbers = true)]
        query_id: i64,
    },

    /// Report metrics for a component (JSON list or {"metrics": [...]})
    #[command(name = "ReportMetrics")]
    ReportMetrics {
        component: String,
        metrics_json: String,
    },

    /// Relay traffic from a local port to the service, printing every exchange
    Proxy { proxy_port: u16 },
}

impl ToolCommand {
    /// The protocol command to send, or None for `proxy`
    pub fn to_command(&self) -> Result<Option<Command>, EvalError> {
        let command = match self {
            ToolCommand::GetAutofill {
                partial_query,
                num_suggestions,
            } => Command::GetAutofill {
                partial_query: partial_query.clone(),
                num_suggestions: *num_suggestions,
            },
            ToolCommand::GetQueryId => Command::GetQueryId,
            ToolCommand::ReportSearchResults { results_json } => {
                Command::ReportSearchResults(parse_arg(results_json, "results")?)
            }
            ToolCommand::SubmitFeedback { feedback_json } => {
                Command::SubmitFeedback(parse_arg(feedback_json, "feedback")?)
            }
            ToolCommand::GetQueryData { query_id } => Command::GetQueryData {
                query_id: *query_id,
            },
            ToolCommand::ReportMetrics {
                component,
                metrics_json,
            } => Command::ReportMetrics {
                component: component.clone(),
                report: parse_arg(metrics_json, "metrics")?,
            },
            ToolCommand::Proxy { .. } => return Ok(None),
        };
        Ok(Some(command))
    }
}

fn parse_arg<T: serde::de::DeserializeOwned>(raw: &str, what: &str) -> Result<T, EvalError> {
    serde_json::from_str(raw)
        .map_err(|e| EvalError::invalid(format!("{} argument is not valid JSON: {}", what, e)))
}

impl EvalTool {
    /// Service address: flags over EVALUATION_UPSTREAM/config over the default
    pub fn upstream(&self, config: &Config) -> SocketAddr {
        SocketAddr::new(
            self.ip.unwrap_or(config.upstream.ip()),
            self.port.unwrap_or(config.upstream.port()),
        )
    }
}

/// Run the parsed invocation; returns the process exit code
pub async fn run(tool: EvalTool, config: Config) -> Result<i32> {
    let upstream = tool.upstream(&config);

    if let ToolCommand::Proxy { proxy_port } = tool.command {
        run_proxy(proxy_port, upstream, &config).await?;
        return Ok(0);
    }

    let command = match tool.command.to_command() {
        Ok(Some(command)) => command,
        Ok(None) => return Ok(0),
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(1);
        }
    };

    let parts = command.encode().context("Failed to encode request")?;
    let client = reqwest::Client::builder()
        .connect_timeout(config.proxy.connect_timeout())
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")?;

    match send(&client, upstream, parts).await {
        Ok(response) => {
            println!("{}", response.render());
            Ok(0)
        }
        Err(e) => {
            eprintln!("Error: could not reach {}: {}", upstream, e);
            Ok(1)
        }
    }
}

/// Send one request and read the complete response
pub async fn send(
    client: &reqwest::Client,
    upstream: SocketAddr,
    parts: RequestParts,
) -> Result<RawResponse, reqwest::Error> {
    let url = format!("http://{}{}", upstream, parts.path);
    tracing::debug!("{} {}", parts.method, url);

    let mut request = client.request(parts.method, url);
    for (name, value) in parts.headers {
        request = request.header(name, value);
    }
    if let Some(body) = parts.body {
        request = request.body(body);
    }

    let response = request.send().await?;
    RawResponse::read(response).await
}

/// Run the diagnostic proxy until Ctrl-C
async fn run_proxy(proxy_port: u16, upstream: SocketAddr, config: &Config) -> Result<()> {
    let bind_addr = SocketAddr::new(config.proxy.bind_ip, proxy_port);

    let (event_tx, event_rx) = mpsc::channel(1000);
    let capture = Capture::new(config.proxy.capture_file.as_deref(), true, event_rx)?;
    let capture_handle = tokio::spawn(capture.run());

    println!("Relaying {} -> {} (Ctrl-C to stop)", bind_addr, upstream);

    proxy::start_proxy(
        bind_addr,
        upstream,
        config.proxy.clone(),
        event_tx,
        async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Interrupt received, shutting down proxy");
        },
    )
    .await?;

    // All senders are gone once the proxy returns; the capture drains and exits
    capture_handle.await.context("Capture task failed")??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{self, AppState};
    use crate::store::Store;
    use std::sync::Arc;

    fn parse(args: &[&str]) -> EvalTool {
        EvalTool::try_parse_from(args).unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn test_parses_endpoint_subcommands() {
        let tool = parse(&["evaltool", "GetAutofill", "How do I?", "3"]);
        assert_eq!(
            tool.command,
            ToolCommand::GetAutofill {
                partial_query: "How do I?".into(),
                num_suggestions: 3
            }
        );

        let tool = parse(&["evaltool", "--ip", "10.0.0.2", "-p", "9000", "GetQueryID"]);
        assert_eq!(tool.command, ToolCommand::GetQueryId);
        assert_eq!(
            tool.upstream(&Config::default()),
            "10.0.0.2:9000".parse::<SocketAddr>().unwrap()
        );

        let tool = parse(&["evaltool", "proxy", "9090"]);
        assert_eq!(tool.command, ToolCommand::Proxy { proxy_port: 9090 });
        assert_eq!(
            tool.upstream(&Config::default()),
            "127.0.0.1:8080".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_negative_count_reaches_the_service() {
        let tool = parse(&["evaltool", "GetAutofill", "q", "-1"]);
        let command = tool.command.to_command().unwrap().unwrap();
        let parts = command.encode().unwrap();
        assert!(parts
            .headers
            .contains(&("num_suggestions", "-1".to_string())));
    }

    #[test]
    fn test_non_numeric_count_is_a_usage_error() {
        assert!(EvalTool::try_parse_from(["evaltool", "GetAutofill", "q", "three"]).is_err());
    }

    #[test]
    fn test_invalid_json_is_rejected_locally() {
        let tool = parse(&["evaltool", "SubmitFeedback", "{not json"]);
        assert!(matches!(
            tool.command.to_command(),
            Err(EvalError::InvalidArgument(_))
        ));

        let tool = parse(&["evaltool", "ReportMetrics", "Indexer", "[{\"docs\": 3}]"]);
        assert!(tool.command.to_command().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_send_renders_service_response() {
        let listener = service::bind("127.0.0.1:0".parse().unwrap(), 10).unwrap();
        let addr = listener.local_addr().unwrap();
        let state = AppState::new(Arc::new(Store::in_memory()), 1, 1000);
        tokio::spawn(service::serve(listener, state, std::future::pending()));

        let parts = Command::ReportMetrics {
            component: "Document-Data-Store".into(),
            report: serde_json::from_str(
                r#"{"metrics": [{"label": "Bytes Used"}, {"value": 7295878476}]}"#,
            )
            .unwrap(),
        }
        .encode()
        .unwrap();

        let response = send(&reqwest::Client::new(), addr, parts).await.unwrap();
        let text = response.render();
        assert!(text.starts_with("HTTP/1.1 200 OK\n"), "{text}");
        assert!(text.ends_with("\n\n{}"), "{text}");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_an_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let parts = Command::GetQueryId.encode().unwrap();
        assert!(send(&reqwest::Client::new(), addr, parts).await.is_err());
    }
}
