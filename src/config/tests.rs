//! Configuration tests
//!
//! Round-trip tests guard the TOML writer: when a field is added to Config,
//! the full round-trip below fails until serialization learns about it.

use super::*;
use std::collections::HashMap;

fn no_env(_: &str) -> Option<String> {
    None
}

fn parse(toml_str: &str) -> FileConfig {
    toml::from_str(toml_str).expect("config should parse")
}

// ─────────────────────────────────────────────────────────────────────────────
// Round-trip tests
// ─────────────────────────────────────────────────────────────────────────────

/// Verify that serialized config can be parsed back.
#[test]
fn test_config_roundtrip_default() {
    let config = Config::default();
    let toml_str = config.to_toml();

    let parsed: Result<FileConfig, _> = toml::from_str(&toml_str);
    assert!(
        parsed.is_ok(),
        "Default config should round-trip.\nTOML:\n{}\nError: {:?}",
        toml_str,
        parsed.err()
    );

    let reloaded = Config::from_sources(parsed.unwrap(), no_env).unwrap();
    assert_eq!(reloaded, config);
}

/// Every non-default value survives serialization
#[test]
fn test_config_roundtrip_customized() {
    let mut config = Config::default();
    config.bind_addr = "0.0.0.0:9090".parse().unwrap();
    config.backlog = 64;
    config.first_query_id = 1000;
    config.max_suggestions = 25;
    config.data_dir = Some(PathBuf::from("/var/lib/evaluation"));
    config.upstream = "127.0.0.1:9090".parse().unwrap();
    config.logging.level = "debug".to_string();
    config.logging.file_enabled = true;
    config.logging.file_rotation = LogRotation::Hourly;
    config.logging.file_prefix = "eval-svc".to_string();
    config.proxy.connect_timeout_ms = 500;
    config.proxy.exchange_timeout_ms = 1500;
    config.proxy.idle_timeout_ms = 750;
    config.proxy.max_head_bytes = 8192;
    config.proxy.log_body_bytes = 0;
    config.proxy.capture_file = Some(PathBuf::from("capture \"quoted\".jsonl"));

    let reloaded = Config::from_sources(parse(&config.to_toml()), no_env).unwrap();
    assert_eq!(reloaded, config);
}

// ─────────────────────────────────────────────────────────────────────────────
// Precedence
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_env_overrides_file() {
    let file = parse(
        r#"
bind_addr = "127.0.0.1:7000"
data_dir = "/from/file"
"#,
    );
    let env: HashMap<&str, &str> = [
        ("EVALUATION_BIND", "127.0.0.1:7001"),
        ("EVALUATION_DATA_DIR", "/from/env"),
        ("EVALUATION_UPSTREAM", "127.0.0.1:7002"),
    ]
    .into_iter()
    .collect();

    let config = Config::from_sources(file, |k| env.get(k).map(|v| v.to_string())).unwrap();
    assert_eq!(config.bind_addr.port(), 7001);
    assert_eq!(config.data_dir, Some(PathBuf::from("/from/env")));
    assert_eq!(config.upstream.port(), 7002);
}

#[test]
fn test_missing_sections_use_defaults() {
    let config = Config::from_sources(parse("max_suggestions = 5"), no_env).unwrap();
    assert_eq!(config.max_suggestions, 5);
    assert_eq!(config.logging, LoggingConfig::default());
    assert_eq!(config.proxy, ProxyConfig::default());
    assert_eq!(config.backlog, 10);
}

#[test]
fn test_unknown_rotation_defaults_to_daily() {
    let config = Config::from_sources(
        parse("[logging]\nfile_rotation = \"weekly\""),
        no_env,
    )
    .unwrap();
    assert_eq!(config.logging.file_rotation, LogRotation::Daily);
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_backlog_must_be_positive() {
    assert!(validate_backlog(0).is_err());
    assert!(validate_backlog(-3).is_err());
    assert_eq!(validate_backlog(1).unwrap(), 1);
    assert!(Config::from_sources(parse("backlog = 0"), no_env).is_err());
}

#[test]
fn test_invalid_addresses_are_errors() {
    assert!(Config::from_sources(parse("bind_addr = \"not-an-addr\""), no_env).is_err());
    assert!(Config::from_sources(parse("[proxy]\nbind_ip = \"localhost\""), no_env).is_err());
}

#[test]
fn test_blank_data_dir_means_memory_only() {
    let config = Config::from_sources(parse("data_dir = \"  \""), no_env).unwrap();
    assert_eq!(config.data_dir, None);
}

#[test]
fn test_refresh_keeps_file_values_only() {
    std::env::set_var("EVALUATION_BIND", "127.0.0.1:7999");
    std::env::set_var("EVALUATION_DATA_DIR", "/from/env");

    let refreshed =
        Config::refresh_file_toml("bind_addr = \"127.0.0.1:7000\"\nbacklog = 3\n").unwrap();

    std::env::remove_var("EVALUATION_BIND");
    std::env::remove_var("EVALUATION_DATA_DIR");

    let reloaded = Config::from_sources(parse(&refreshed), no_env).unwrap();
    assert_eq!(reloaded.bind_addr.to_string(), "127.0.0.1:7000");
    assert_eq!(reloaded.backlog, 3);
    assert_eq!(reloaded.data_dir, None);
    assert!(!refreshed.contains("7999"));
}
