// Capture module - consumes relay events from the diagnostic proxy
//
// Every event is printed to stdout as readable text (the proxy's whole point is
// letting someone watch the traffic), and optionally appended to a JSON Lines
// file so a session can be inspected later:
//
// Example: jq 'select(.type == "Response") | .status' capture.jsonl

use crate::events::RelayEvent;
use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// Prints relay events and optionally writes them to a JSONL file
pub struct Capture {
    file: Option<(PathBuf, File)>,
    print: bool,
    event_rx: mpsc::Receiver<RelayEvent>,
}

impl Capture {
    /// Create a capture sink; `capture_file` is created or appended to
    pub fn new(
        capture_file: Option<&Path>,
        print: bool,
        event_rx: mpsc::Receiver<RelayEvent>,
    ) -> Result<Self> {
        let file = match capture_file {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent).context("Failed to create capture directory")?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("Failed to open capture file {}", path.display()))?;
                Some((path.to_path_buf(), file))
            }
            None => None,
        };

        Ok(Self {
            file,
            print,
            event_rx,
        })
    }

    /// Run until every sender (the proxy and its relays) has been dropped
    pub async fn run(mut self) -> Result<()> {
        if let Some((path, _)) = &self.file {
            tracing::info!("Capturing exchanges to {}", path.display());
        }

        while let Some(event) = self.event_rx.recv().await {
            if self.print {
                println!("{}", render(&event));
            }
            if let Err(e) = self.write_event(&event) {
                tracing::error!("Failed to write capture event: {:?}", e);
                // Keep printing even if the file is unwritable
            }
        }

        tracing::debug!("Capture shutting down");
        Ok(())
    }

    fn write_event(&mut self, event: &RelayEvent) -> Result<()> {
        let Some((_, file)) = self.file.as_mut() else {
            return Ok(());
        };

        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        writeln!(file, "{}", json).context("Failed to write to capture file")?;

        // Flush immediately so captures are visible even if the process is killed
        file.flush().context("Failed to flush capture file")?;
        Ok(())
    }
}

/// Human-readable form of one event, as printed by the proxy
pub fn render(event: &RelayEvent) -> String {
    match event {
        RelayEvent::Request {
            id,
            client,
            head,
            body_preview,
            ..
        } => format!(
            "==> [{}] request from {}\n{}\n\n{}",
            id, client, head, body_preview
        ),
        RelayEvent::Response {
            request_id,
            head,
            body_preview,
            duration,
            ..
        } => format!(
            "<== [{}] response after {}ms\n{}\n\n{}",
            request_id,
            duration.as_millis(),
            head,
            body_preview
        ),
        RelayEvent::Error {
            request_id,
            message,
            status,
            ..
        } => {
            let id = request_id.as_deref().unwrap_or("-");
            match status {
                Some(code) => format!("!!! [{}] {} (answered {})", id, message, code),
                None => format!("!!! [{}] {}", id, message),
            }
        }
    }
}
