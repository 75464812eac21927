// evaltool - admin client for the evaluation service
//
// Logs go to stderr; stdout carries the rendered HTTP responses (and, for
// `proxy`, the relayed exchanges).

use clap::Parser;
use evaluation::client::{self, EvalTool};
use evaluation::config::Config;
use evaluation::logging::{self, Console};

#[tokio::main]
async fn main() {
    let tool = EvalTool::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    let log_guard = logging::init(&config.logging, Console::Stderr);

    let code = match client::run(tool, config).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            1
        }
    };

    // Flush file logs before exiting
    drop(log_guard);
    std::process::exit(code);
}
