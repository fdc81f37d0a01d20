#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Configuration loading and validation tests.

use std::time::Duration;

use netframe::config::NetConfig;
use netframe::core::codec::DEFAULT_MAX_MESSAGE_LENGTH;
use netframe::error::NetError;

// ============================================================================
// DEFAULTS
// ============================================================================

#[test]
fn test_default_config_is_valid() {
    let config = NetConfig::default();
    let errors = config.validate();
    assert!(errors.is_empty(), "default config invalid: {errors:?}");
    config.validate_strict().expect("strict validation passes");
}

#[test]
fn test_default_values() {
    let config = NetConfig::default();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.transport.max_message_length, DEFAULT_MAX_MESSAGE_LENGTH);
    assert_eq!(config.transport.keep_alive_interval, Duration::from_secs(30));
    assert_eq!(config.client.connect_timeout, Duration::from_secs(5));
}

#[test]
fn test_default_with_overrides() {
    let config = NetConfig::default_with_overrides(|c| {
        c.server.port = 7500;
        c.transport.max_message_length = 64 * 1024;
    });
    assert_eq!(config.server.port, 7500);
    assert_eq!(config.transport.max_message_length, 64 * 1024);
    assert!(config.validate().is_empty());
}

// ============================================================================
// VALIDATION RULES
// ============================================================================

#[test]
fn test_empty_hosts_are_rejected() {
    let config = NetConfig::default_with_overrides(|c| {
        c.server.host = String::new();
        c.client.host = "   ".to_string();
    });
    let errors = config.validate();
    assert_eq!(errors.len(), 2, "got {errors:?}");
    assert!(errors.iter().any(|e| e.contains("Server host")));
    assert!(errors.iter().any(|e| e.contains("Client host")));
}

#[test]
fn test_client_port_zero_is_rejected() {
    let config = NetConfig::default_with_overrides(|c| c.client.port = 0);
    assert!(config.validate().iter().any(|e| e.contains("Client port")));
}

#[test]
fn test_connect_timeout_bounds() {
    let too_short = NetConfig::default_with_overrides(|c| {
        c.client.connect_timeout = Duration::from_millis(10);
    });
    assert!(too_short.validate().iter().any(|e| e.contains("too short")));

    let too_long = NetConfig::default_with_overrides(|c| {
        c.client.connect_timeout = Duration::from_secs(301);
    });
    assert!(too_long.validate().iter().any(|e| e.contains("too long")));
}

#[test]
fn test_max_message_length_bounds() {
    let zero = NetConfig::default_with_overrides(|c| c.transport.max_message_length = 0);
    assert!(zero.validate().iter().any(|e| e.contains("cannot be 0")));

    let beyond_wire = NetConfig::default_with_overrides(|c| {
        c.transport.max_message_length = (i32::MAX as usize) + 1;
    });
    assert!(beyond_wire.validate().iter().any(|e| e.contains("wire format")));

    let huge = NetConfig::default_with_overrides(|c| {
        c.transport.max_message_length = 200 * 1024 * 1024;
    });
    assert!(huge.validate().iter().any(|e| e.contains("very large")));
}

#[test]
fn test_keep_alive_interval_bounds() {
    let too_short = NetConfig::default_with_overrides(|c| {
        c.transport.keep_alive_interval = Duration::from_millis(50);
    });
    assert!(too_short
        .validate()
        .iter()
        .any(|e| e.contains("Keep-alive interval too short")));

    let too_long = NetConfig::default_with_overrides(|c| {
        c.transport.keep_alive_interval = Duration::from_secs(3601);
    });
    assert!(too_long
        .validate()
        .iter()
        .any(|e| e.contains("Keep-alive interval too long")));
}

#[test]
fn test_validate_strict_joins_all_errors() {
    let config = NetConfig::default_with_overrides(|c| {
        c.server.host = String::new();
        c.transport.max_message_length = 0;
    });
    match config.validate_strict() {
        Err(NetError::Configuration(message)) => {
            assert!(message.contains("Server host"), "got: {message}");
            assert!(message.contains("cannot be 0"), "got: {message}");
        }
        other => panic!("Expected Configuration error, got {other:?}"),
    }
}

// ============================================================================
// TOML
// ============================================================================

#[test]
fn test_from_toml() {
    let toml = r#"
        [server]
        host = "0.0.0.0"
        port = 7000

        [client]
        host = "peer.example"
        port = 7000
        connect_timeout = 2500

        [transport]
        max_message_length = 65536
        keep_alive_interval = 10000

        [logging]
        log_level = "debug"
        log_to_console = true
    "#;

    let config = NetConfig::from_toml(toml).expect("parse");
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 7000);
    assert_eq!(config.client.connect_timeout, Duration::from_millis(2500));
    assert_eq!(config.transport.max_message_length, 65536);
    assert_eq!(config.transport.keep_alive_interval, Duration::from_secs(10));
    assert!(config.validate().is_empty());
}

#[test]
fn test_invalid_toml_is_a_configuration_error() {
    assert!(matches!(
        NetConfig::from_toml("this is not toml ["),
        Err(NetError::Configuration(_))
    ));
}

#[test]
fn test_example_config_round_trips() {
    let example = NetConfig::example_config();
    let config = NetConfig::from_toml(&example).expect("example config parses");
    assert!(config.validate().is_empty());
}

#[test]
fn test_save_and_reload() {
    let dir = std::env::temp_dir().join("netframe-config-test");
    std::fs::create_dir_all(&dir).expect("create temp dir");
    let path = dir.join("roundtrip.toml");

    let config = NetConfig::default_with_overrides(|c| c.server.port = 4321);
    config.save_to_file(&path).expect("save");
    let reloaded = NetConfig::from_file(&path).expect("reload");
    assert_eq!(reloaded.server.port, 4321);

    let _ = std::fs::remove_file(&path);
}

// ============================================================================
// ENVIRONMENT
// ============================================================================

#[test]
fn test_from_env_overrides_defaults() {
    std::env::set_var("NETFRAME_SERVER_HOST", "0.0.0.0");
    std::env::set_var("NETFRAME_SERVER_PORT", "6100");
    std::env::set_var("NETFRAME_MAX_MESSAGE_LENGTH", "1048576");
    std::env::set_var("NETFRAME_CONNECT_TIMEOUT_MS", "750");

    let config = NetConfig::from_env().expect("from_env");
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.server.port, 6100);
    assert_eq!(config.transport.max_message_length, 1_048_576);
    assert_eq!(config.client.connect_timeout, Duration::from_millis(750));
    // Untouched variables keep their defaults.
    assert_eq!(config.client.host, NetConfig::default().client.host);

    std::env::remove_var("NETFRAME_SERVER_HOST");
    std::env::remove_var("NETFRAME_SERVER_PORT");
    std::env::remove_var("NETFRAME_MAX_MESSAGE_LENGTH");
    std::env::remove_var("NETFRAME_CONNECT_TIMEOUT_MS");
}

#[test]
fn test_from_env_ignores_unparsable_values() {
    std::env::set_var("NETFRAME_CLIENT_PORT", "not-a-port");
    let config = NetConfig::from_env().expect("from_env");
    assert_eq!(config.client.port, NetConfig::default().client.port);
    std::env::remove_var("NETFRAME_CLIENT_PORT");
}
