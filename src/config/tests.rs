use super::load_config;
use super::settings::{OverflowPolicy, Settings};
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 8080);
    assert_eq!(settings.server.max_connections, 1000);
    assert_eq!(settings.broker.outbound_queue_capacity, 256);
    assert_eq!(settings.broker.overflow_policy, OverflowPolicy::Shed);
    assert!(settings.broker.enable_device_support);
    assert_eq!(settings.client.client_header, "x-client-id");
    assert_eq!(settings.client.device_header, "x-device-id");
    assert!(settings.client.device_attribute_headers.is_empty());
    assert_eq!(settings.logging.level, "info");
}

#[test]
#[serial]
fn load_config_from_file_overrides_defaults() {
    // load_config reads config/default.toml relative to the working directory
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    fs::create_dir_all("config").expect("create config dir");
    let toml = r#"
        [server]
        host = "0.0.0.0"
        port = 9000

        [broker]
        outbound_queue_capacity = 8
        overflow_policy = "block"

        [client]
        device_attribute_headers = ["x-app-version", "x-os"]
    "#;
    fs::write("config/default.toml", toml).expect("write config file");

    let cfg = load_config();
    env::set_current_dir(orig).expect("restore cwd");
    let cfg = cfg.expect("load_config failed");

    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.server.max_connections, 1000);
    assert_eq!(cfg.broker.outbound_queue_capacity, 8);
    assert_eq!(cfg.broker.overflow_policy, OverflowPolicy::Block);
    assert_eq!(
        cfg.client.device_attribute_headers,
        vec!["x-app-version".to_string(), "x-os".to_string()]
    );
    assert_eq!(cfg.client.client_header, "x-client-id");
}

#[test]
#[serial]
fn load_config_from_env_overrides_defaults() {
    temp_env::with_vars(
        [
            ("PUSHLINE_SERVER__PORT", Some("9100")),
            ("PUSHLINE_BROKER__ENABLE_DEVICE_SUPPORT", Some("false")),
            ("PUSHLINE_CLIENT__CLIENT_HEADER", Some("x-user-id")),
            ("PUSHLINE_LOGGING__LEVEL", Some("debug")),
        ],
        || {
            let cfg = load_config().expect("load_config failed");
            assert_eq!(cfg.server.port, 9100);
            assert!(!cfg.broker.enable_device_support);
            assert_eq!(cfg.client.client_header, "x-user-id");
            assert_eq!(cfg.logging.level, "debug");
            assert_eq!(cfg.server.host, "127.0.0.1");
        },
    );
}
