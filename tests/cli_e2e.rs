//! End-to-end CLI tests for the harvester binary.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A command isolated from the user's config file and `HARVESTER_*` variables.
fn harvester(config_home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.env("XDG_CONFIG_HOME", config_home.path())
        .env("HOME", config_home.path())
        .env_remove("RUST_LOG");
    for (name, _) in std::env::vars_os() {
        if name.to_string_lossy().starts_with("HARVESTER_") {
            cmd.env_remove(name);
        }
    }
    cmd
}

#[test]
fn test_binary_help_displays_usage() {
    let home = TempDir::new().unwrap();
    harvester(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Harvest paginated seller-platform listings"));
}

#[test]
fn test_binary_version_displays_version() {
    let home = TempDir::new().unwrap();
    harvester(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("harvester"));
}

#[test]
fn test_binary_missing_subcommand_fails() {
    let home = TempDir::new().unwrap();
    harvester(&home).assert().failure();
}

#[test]
fn test_binary_empty_session_fails_validation() {
    let home = TempDir::new().unwrap();
    harvester(&home)
        .args(["product-ids", "--shop-id", "1001", "--region", "SG"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cookies"));
}

#[test]
fn test_binary_rejects_bad_config_file() {
    let home = TempDir::new().unwrap();
    let config = home.path().join("custom.toml");
    std::fs::write(&config, "topic_concurrency = \"many\"\n").unwrap();

    harvester(&home)
        .args(["discounts", "--config"])
        .arg(&config)
        .args(["--cookies", "a=1", "--shop-id", "1001", "--region", "SG"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("topic_concurrency"));
}

#[test]
fn test_binary_proxy_without_credentials_fails() {
    let home = TempDir::new().unwrap();
    harvester(&home)
        .args(["products", "--proxy", "--cookies", "a=1", "--shop-id", "1", "--region", "SG"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("proxy_host"));
}

#[tokio::test]
async fn test_binary_prints_discounts_as_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/marketing/v3/public/discount/list/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": {
                "discounts": [{"discount_type": 1, "seller_discount": {"discount_id": 42, "name": "flash"}}],
                "total_count": 1
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let home = TempDir::new().unwrap();
    let uri = server.uri();
    let output = tokio::task::spawn_blocking(move || {
        harvester(&home)
            .args(["discounts", "-q", "--retry-delay-ms", "0", "--base-url"])
            .arg(&uri)
            .args(["--cookies", "a=1", "--shop-id", "1001", "--region", "SG"])
            .assert()
            .success()
            .get_output()
            .stdout
            .clone()
    })
    .await
    .unwrap();

    let parsed: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(parsed["records"][0]["seller_discount"]["discount_id"], 42);
    assert_eq!(parsed["report"]["total_reported"], 1);
}

#[tokio::test]
async fn test_binary_prints_oldest_inactive_product_ids() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/mpsku/list/v2/get_product_list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": {
                "products": [
                    {"id": 1, "create_time": 300},
                    {"id": 2, "create_time": 100, "statistics": {"sold_count": 4}},
                    {"id": 3, "create_time": 200},
                    {"id": 4, "create_time": 50}
                ],
                "page_info": {"page_size": 48, "total": 4}
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let home = TempDir::new().unwrap();
    let uri = server.uri();
    let output = tokio::task::spawn_blocking(move || {
        harvester(&home)
            .args(["inactive-products", "--limit", "2", "-q", "--base-url"])
            .arg(&uri)
            .args(["--cookies", "a=1", "--shop-id", "1001", "--region", "SG"])
            .assert()
            .success()
            .get_output()
            .stdout
            .clone()
    })
    .await
    .unwrap();

    let parsed: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(parsed["records"], json!([4, 3]));
}
