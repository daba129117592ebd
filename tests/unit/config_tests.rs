//! Unit tests for configuration parsing, defaults and validation.

use std::io::Write;
use std::time::Duration;

use tool_bridge::BridgeConfig;

#[test]
fn empty_document_uses_defaults() {
    let config = BridgeConfig::from_toml_str("").expect("empty config is valid");

    assert_eq!(config, BridgeConfig::default());
    assert_eq!(config.ipc_name, "tool-bridge");
    assert_eq!(config.limits.max_batch_size, 25);
    assert_eq!(config.limits.max_pending_calls, 256);
    assert_eq!(config.explore.max_steps, 16);
    assert_eq!(config.default_timeout(), Duration::from_secs(60));
    assert_eq!(config.max_timeout(), Duration::from_secs(1800));
    assert_eq!(config.grace_period(), Duration::from_secs(5));
    assert_eq!(config.sweep_interval(), Duration::from_millis(1000));
}

#[test]
fn sections_override_defaults() {
    let config = BridgeConfig::from_toml_str(
        r#"
ipc_name = "bridge-test"
sweep_interval_ms = 50

[timeouts]
default_seconds = 10
bash_seconds = 20
max_seconds = 30

[limits]
max_batch_size = 4

[rate_limit]
calls_per_window = 2
"#,
    )
    .expect("valid config");

    assert_eq!(config.ipc_name, "bridge-test");
    assert_eq!(config.timeouts.bash_seconds, 20);
    assert_eq!(config.timeouts.explore_seconds, 600);
    assert_eq!(config.limits.max_batch_size, 4);
    assert_eq!(config.limits.outbound_queue, 64);
    assert_eq!(config.rate_limit.calls_per_window, 2);
    assert_eq!(config.rate_limit.window_seconds, 60);
}

#[test]
fn zero_batch_size_is_rejected() {
    let err = BridgeConfig::from_toml_str("[limits]\nmax_batch_size = 0\n").expect_err("invalid");
    assert_eq!(err.kind(), "config_error");
    assert!(err.to_string().contains("max_batch_size"));
}

#[test]
fn default_above_maximum_is_rejected() {
    let err = BridgeConfig::from_toml_str("[timeouts]\ndefault_seconds = 100\nmax_seconds = 50\n")
        .expect_err("invalid");
    assert!(err.to_string().contains("max_seconds"));
}

#[test]
fn empty_ipc_name_is_rejected() {
    assert!(BridgeConfig::from_toml_str("ipc_name = \" \"\n").is_err());
}

#[test]
fn wrong_types_are_config_errors() {
    let err = BridgeConfig::from_toml_str("sweep_interval_ms = \"fast\"\n").expect_err("invalid");
    assert_eq!(err.kind(), "config_error");
}

#[test]
fn loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "ipc_name = \"from-file\"").expect("write");

    let config = BridgeConfig::load_from_path(file.path()).expect("load");
    assert_eq!(config.ipc_name, "from-file");
}

#[test]
fn missing_file_is_config_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = BridgeConfig::load_from_path(dir.path().join("absent.toml")).expect_err("missing");
    assert!(err.to_string().contains("failed to read config"));
}
