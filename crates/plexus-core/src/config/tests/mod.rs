use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use tempfile::{Builder, TempDir};

use crate::config::{ConfigError, ConfigFormat, KernelConfig};
use crate::event::BusMode;

fn write_config(dir: &TempDir, file: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(file);
    std::fs::write(&path, contents).unwrap();
    path
}

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |key: &str| vars.get(key).cloned()
}

#[test]
fn test_defaults_are_valid_in_process() {
    let config = KernelConfig::default();
    assert_eq!(config.service_name, "plexus");
    assert_eq!(config.bus.mode, BusMode::InProcess);
    assert_eq!(config.bus.subject_prefix, "plexus");
    assert_eq!(config.bus.handler_timeout(), Duration::from_secs(5));
    assert_eq!(config.lifecycle.stop_timeout(), Duration::from_secs(30));
    assert_eq!(config.lifecycle.health_timeout(), Duration::from_secs(5));
    assert!(config.plugins.is_enabled("anything"));
    config.validate().unwrap();
}

#[test]
fn test_load_json() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "kernel.json",
        r#"{
            "service_name": "transcoder",
            "bus": {"mode": "networked", "broker_endpoint": "127.0.0.1:4222"},
            "plugins": {"enabled": ["core-logging"]}
        }"#,
    );

    let config = KernelConfig::load(&path).unwrap();
    assert_eq!(config.service_name, "transcoder");
    assert_eq!(config.bus.mode, BusMode::Networked);
    assert_eq!(config.bus.broker_endpoint.as_deref(), Some("127.0.0.1:4222"));
    assert_eq!(config.bus.max_reconnects, 10, "unspecified fields keep defaults");
    assert!(config.plugins.is_enabled("core-logging"));
    assert!(!config.plugins.is_enabled("core-heartbeat"));
}

#[cfg(feature = "toml-config")]
#[test]
fn test_load_toml() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "kernel.toml",
        r#"
service_name = "catalog"

[bus]
mode = "microservice"
broker_endpoint = "broker:4222"
subject_prefix = "media"

[lifecycle]
stop_timeout_ms = 1500
"#,
    );

    let config = KernelConfig::load(&path).unwrap();
    assert_eq!(config.bus.mode, BusMode::Networked);
    assert_eq!(config.bus.subject_prefix, "media");
    assert_eq!(config.lifecycle.stop_timeout(), Duration::from_millis(1500));
    assert_eq!(config.lifecycle.health_timeout_ms, 5000);
}

#[cfg(feature = "yaml-config")]
#[test]
fn test_load_yaml_and_empty_document() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "kernel.yml", "bus:\n  mode: monolithic\n  handler_timeout_ms: 250\n");
    let config = KernelConfig::load(&path).unwrap();
    assert_eq!(config.bus.mode, BusMode::InProcess);
    assert_eq!(config.bus.handler_timeout(), Duration::from_millis(250));

    let empty = write_config(&dir, "empty.yaml", "");
    assert_eq!(KernelConfig::load(&empty).unwrap(), KernelConfig::default());
}

#[test]
fn test_unsupported_extension() {
    let mut file = Builder::new().suffix(".ini").tempfile().unwrap();
    writeln!(file, "mode=networked").unwrap();
    let err = KernelConfig::load(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::UnsupportedFormat { .. }));
}

#[test]
fn test_missing_file() {
    let err = KernelConfig::load(Path::new("/definitely/not/here/kernel.json")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
    assert!(err.to_string().contains("/definitely/not/here/kernel.json"));
}

#[test]
fn test_parse_error() {
    let err = KernelConfig::parse_as("{ not json", ConfigFormat::Json).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { ref format, .. } if format == "JSON"));

    let err = KernelConfig::parse_as(r#"{"bus": {"mode": "pigeon"}}"#, ConfigFormat::Json).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
}

#[test]
fn test_load_validates() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "kernel.json", r#"{"bus": {"mode": "networked"}}"#);
    let err = KernelConfig::load(&path).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Invalid configuration value for 'bus.broker_endpoint': required when bus.mode is networked"
    );
}

#[test]
fn test_validation_rules() {
    let mut config = KernelConfig::default();
    config.service_name = "  ".to_string();
    assert!(matches!(config.validate(), Err(ConfigError::Invalid { ref field, .. }) if field == "service_name"));

    let mut config = KernelConfig::default();
    config.bus.subject_prefix = "has space".to_string();
    assert!(config.validate().is_err());

    let mut config = KernelConfig::default();
    config.bus.handler_timeout_ms = 0;
    assert!(config.validate().is_err());

    let mut config = KernelConfig::default();
    config.lifecycle.stop_timeout_ms = 0;
    assert!(config.validate().is_err());

    let mut config = KernelConfig::default();
    config.lifecycle.health_timeout_ms = 0;
    assert!(config.validate().is_err());

    let mut config = KernelConfig::default();
    config.bus.mode = BusMode::Networked;
    config.bus.broker_endpoint = Some(" ".to_string());
    assert!(config.validate().is_err());
}

#[test]
fn test_environment_overrides() {
    let mut config = KernelConfig::default();
    config
        .apply_overrides(env(&[
            ("PLEXUS_BUS_MODE", "networked"),
            ("PLEXUS_BROKER_ENDPOINT", "10.0.0.5:4222"),
            ("PLEXUS_SERVICE_NAME", "edge-streamer"),
        ]))
        .unwrap();
    assert_eq!(config.bus.mode, BusMode::Networked);
    assert_eq!(config.bus.broker_endpoint.as_deref(), Some("10.0.0.5:4222"));
    assert_eq!(config.service_name, "edge-streamer");
    config.validate().unwrap();

    let untouched = {
        let mut c = KernelConfig::default();
        c.apply_overrides(env(&[])).unwrap();
        c
    };
    assert_eq!(untouched, KernelConfig::default());

    let err = KernelConfig::default()
        .apply_overrides(env(&[("PLEXUS_BUS_MODE", "smoke-signals")]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "PLEXUS_BUS_MODE"));
}

#[test]
fn test_render_round_trips_through_json() {
    let mut config = KernelConfig::default();
    config.plugins.enabled = vec!["core-heartbeat".to_string()];
    let rendered = config.render(ConfigFormat::Json).unwrap();
    assert_eq!(KernelConfig::parse_as(&rendered, ConfigFormat::Json).unwrap(), config);
    assert_eq!(ConfigFormat::from_path(Path::new("x.JSON")), Some(ConfigFormat::Json));
}
