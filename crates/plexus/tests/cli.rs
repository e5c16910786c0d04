use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::Builder;

fn plexus() -> Command {
    let mut cmd = Command::cargo_bin("plexus").unwrap();
    for var in ["PLEXUS_BUS_MODE", "PLEXUS_BROKER_ENDPOINT", "PLEXUS_SERVICE_NAME", "RUST_LOG"] {
        cmd.env_remove(var);
    }
    cmd.args(["--log-level", "error"]);
    cmd
}

#[test]
fn test_ping_command() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = plexus();
    cmd.arg("--ping");
    cmd.assert().success().stdout(predicate::str::contains("pong"));
    Ok(())
}

#[test]
fn test_no_command_prints_hint() {
    plexus()
        .assert()
        .success()
        .stdout(predicate::str::contains("No command given"))
        .stdout(predicate::str::contains("pong").not());
}

#[test]
fn test_health_reports_bundled_plugins() {
    plexus()
        .arg("health")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\": \"healthy\""))
        .stdout(predicate::str::contains("\"core-logging\""))
        .stdout(predicate::str::contains("\"core-heartbeat\""));
}

#[test]
fn test_run_for_a_fixed_duration() {
    plexus()
        .args(["run", "--duration", "0", "--heartbeat-ms", "50"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"plugins\""))
        .stdout(predicate::str::contains("Shutting down..."))
        .stdout(predicate::str::contains("Stopped cleanly."));
}

#[test]
fn test_config_file_filters_plugins() -> Result<(), Box<dyn std::error::Error>> {
    let mut file = Builder::new().suffix(".json").tempfile()?;
    write!(file, r#"{{"service_name": "edge", "plugins": {{"enabled": ["core-logging"]}}}}"#)?;

    plexus()
        .args(["health", "--config"])
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"core-logging\""))
        .stdout(predicate::str::contains("core-heartbeat").not());
    Ok(())
}

#[test]
fn test_networked_mode_requires_broker() {
    plexus()
        .args(["health", "--mode", "networked"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("bus.broker_endpoint"));
}

#[test]
fn test_unreachable_broker_is_reported() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    plexus()
        .args(["health", "--mode", "networked", "--broker"])
        .arg(format!("127.0.0.1:{}", port))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Event bus unavailable"));
}

#[test]
fn test_unsupported_config_format() -> Result<(), Box<dyn std::error::Error>> {
    let file = Builder::new().suffix(".ini").tempfile()?;
    plexus()
        .args(["health", "--config"])
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unsupported configuration format"));
    Ok(())
}
