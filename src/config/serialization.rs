//! Config serialization to TOML
//!
//! Single source of truth for config file format.

use super::Config;

/// TOML basic string with escaping
fn quoted(value: &str) -> String {
    toml::Value::String(value.to_string()).to_string()
}

impl Config {
    /// Optional keys render as commented examples when unset
    fn optional_line(key: &str, value: Option<String>, example: &str) -> String {
        match value {
            Some(v) => format!("{} = {}", key, quoted(&v)),
            None => format!("# {} = {}", key, quoted(example)),
        }
    }

    /// Serialize config to TOML format
    pub fn to_toml(&self) -> String {
        let data_dir = Self::optional_line(
            "data_dir",
            self.data_dir.as_ref().map(|p| p.display().to_string()),
            "./data",
        );
        let capture_file = Self::optional_line(
            "capture_file",
            self.proxy
                .capture_file
                .as_ref()
                .map(|p| p.display().to_string()),
            "./log/capture.jsonl",
        );

        format!(
            r#"# evaluation configuration

# Service bind address (EVALUATION_BIND env var overrides)
bind_addr = {bind}

# Listen backlog, must be at least 1 (--backlog overrides)
backlog = {backlog}

# First identifier handed out by GetQueryID
first_query_id = {first_id}

# Largest num_suggestions GetAutofill accepts
max_suggestions = {max_suggestions}

# Report journal directory; unset keeps reports in memory only
# (EVALUATION_DATA_DIR env var overrides)
{data_dir}

# Service address used by evaltool and the proxy (EVALUATION_UPSTREAM overrides)
upstream = {upstream}

# Logging configuration (RUST_LOG env var overrides)
[logging]
level = {log_level}
# File logging (in addition to console output): <prefix>-info.log at INFO
# and <prefix>-trace.log at TRACE
file_enabled = {log_file_enabled}
file_dir = {log_file_dir}
file_rotation = {log_file_rotation}  # hourly, daily, never
file_prefix = {log_file_prefix}

# Diagnostic proxy (evaltool proxy <port>)
[proxy]
bind_ip = {proxy_ip}
connect_timeout_ms = {connect_timeout}
exchange_timeout_ms = {exchange_timeout}
# Abandon a body that stalls this long between reads
idle_timeout_ms = {idle_timeout}
max_head_bytes = {max_head}
log_body_bytes = {log_body}
# Append every observed exchange as JSON Lines
{capture_file}
"#,
            bind = quoted(&self.bind_addr.to_string()),
            backlog = self.backlog,
            first_id = self.first_query_id,
            max_suggestions = self.max_suggestions,
            data_dir = data_dir,
            upstream = quoted(&self.upstream.to_string()),
            log_level = quoted(&self.logging.level),
            log_file_enabled = self.logging.file_enabled,
            log_file_dir = quoted(&self.logging.file_dir.display().to_string()),
            log_file_rotation = quoted(self.logging.file_rotation.as_str()),
            log_file_prefix = quoted(&self.logging.file_prefix),
            proxy_ip = quoted(&self.proxy.bind_ip.to_string()),
            connect_timeout = self.proxy.connect_timeout_ms,
            exchange_timeout = self.proxy.exchange_timeout_ms,
            idle_timeout = self.proxy.idle_timeout_ms,
            max_head = self.proxy.max_head_bytes,
            log_body = self.proxy.log_body_bytes,
            capture_file = capture_file,
        )
    }
}
