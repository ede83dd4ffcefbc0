use std::fs;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn meshreg() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("meshreg"));
    cmd.env_remove("DISCOVERY_ADDRESS")
        .env_remove("PROBE_POLARITY")
        .env_remove("MESHREG_URL");
    cmd
}

fn write_manifest(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("web-0.yaml");
    fs::write(&path, body).expect("write manifest");
    path
}

const MANIFEST: &str = r#"
name: web-0
namespace: shop
resource_version: "12"
phase: Running
pod_ip: 10.4.0.7
containers:
  - name: app
    env:
      - { name: IDG_UNIQUEID, value: svc1 }
      - { name: IDG_WEIGHT, value: "20" }
  - name: sidecar
    env:
      - { name: IDG_WEIGHT, value: "5" }
container_statuses:
  - { name: app, ready: true }
  - { name: sidecar, ready: false }
"#;

#[test]
fn help_lists_commands() {
    meshreg()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("run").and(contains("describe")).and(contains("pods")));
}

#[test]
fn describe_prints_descriptor_json() {
    let tmp = TempDir::new().expect("tempdir");
    let manifest = write_manifest(tmp.path(), MANIFEST);

    let output = meshreg()
        .arg("describe")
        .arg(&manifest)
        .output()
        .expect("run describe");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let descriptor: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(descriptor["hostname"], "web-0");
    assert_eq!(descriptor["addrs"][0], "http://10.4.0.7:80");
    assert_eq!(descriptor["app_id"], "svc1");
    assert_eq!(descriptor["metadata"]["weight"], "5");
    assert_eq!(descriptor["metadata"]["cert_sn"], "");
    assert_eq!(descriptor["status"], "not_receiving");
}

#[test]
fn describe_missing_manifest_fails_with_path() {
    let tmp = TempDir::new().expect("tempdir");
    let missing = tmp.path().join("absent.yaml");

    meshreg()
        .arg("describe")
        .arg(&missing)
        .assert()
        .failure()
        .stderr(contains("failed to load manifest").and(contains("absent.yaml")));
}

#[test]
fn unknown_probe_polarity_is_rejected() {
    let tmp = TempDir::new().expect("tempdir");
    let manifest = write_manifest(tmp.path(), MANIFEST);

    meshreg()
        .args(["describe", "--probe-polarity", "inverted"])
        .arg(&manifest)
        .assert()
        .failure()
        .stderr(contains("unknown probe polarity"));
}

#[test]
fn run_without_discovery_nodes_fails_fast() {
    let tmp = TempDir::new().expect("tempdir");

    meshreg()
        .args(["run", "--discovery-address", " , "])
        .arg("--manifests")
        .arg(tmp.path())
        .assert()
        .failure()
        .stderr(contains("no discovery nodes configured"));
}

#[test]
fn run_rejects_zero_retry_rate() {
    let tmp = TempDir::new().expect("tempdir");

    meshreg()
        .args(["run", "--dry-run", "--retry-qps", "0"])
        .arg("--manifests")
        .arg(tmp.path())
        .assert()
        .failure()
        .stderr(contains("qps must be positive"));
}

#[test]
fn pods_reports_unreachable_status_api() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };

    meshreg()
        .args(["pods", "--url", &format!("http://127.0.0.1:{port}")])
        .assert()
        .failure()
        .stderr(contains("failed to reach status api"));
}
