//! Built-in tool catalog through the engine

use ledgerview_core::prelude::*;
use serde_json::json;
use std::fs;
use std::sync::Arc;

fn server(collector: Arc<InMemoryCollector>) -> LedgerviewServer {
    LedgerviewServer::builder(LedgerviewConfig::default())
        .collector(collector)
        .build()
        .expect("default configuration is valid")
}

#[tokio::test]
async fn test_listing_exposes_schemas_and_pricing() {
    let server = server(Arc::new(InMemoryCollector::new()));

    let listing = server.registry().list();
    let names: Vec<&str> = listing.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "analyze_daml_safety",
            "check_server_status",
            "generate_canton_deployment_script",
            "get_project_summary"
        ]
    );

    let analyze = &listing[0];
    assert_eq!(analyze.input_schema["required"], json!(["source"]));
    assert_eq!(analyze.pricing, PricingPolicy::PerCall { units: 1 });

    let encoded = serde_json::to_value(analyze).unwrap();
    assert!(encoded.get("inputSchema").is_some());
}

#[tokio::test]
async fn test_deployment_script_defaults_to_dev() {
    let collector = Arc::new(InMemoryCollector::new());
    let server = server(collector.clone());

    let dev = server
        .engine()
        .call("generate_canton_deployment_script", json!({}))
        .await;
    let prod = server
        .engine()
        .call(
            "generate_canton_deployment_script",
            json!({ "network_type": "prod" }),
        )
        .await;

    let dev = dev.terminal.payload().unwrap();
    assert_eq!(dev["network_type"], "dev");
    assert!(dev["script"].as_str().unwrap().starts_with("# DEV DEPLOYMENT"));
    assert_eq!(prod.terminal.payload().unwrap()["network_type"], "prod");

    server.shutdown().await;
    let records = collector.records().await;
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.success));
}

#[tokio::test]
async fn test_unknown_network_is_rejected_by_schema() {
    let server = server(Arc::new(InMemoryCollector::new()));

    let outcome = server
        .engine()
        .call(
            "generate_canton_deployment_script",
            json!({ "network_type": "staging" }),
        )
        .await;

    assert_eq!(outcome.terminal.failure_kind(), Some(ErrorKind::Validation));
}

#[tokio::test]
async fn test_project_summary_reads_manifest() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("package.json"),
        r#"{"name": "canton-dapp", "dependencies": {"@daml/types": "2.9.0"}}"#,
    )
    .unwrap();
    fs::write(dir.path().join("README.md"), "# dapp").unwrap();

    let server = server(Arc::new(InMemoryCollector::new()));
    let outcome = server
        .engine()
        .call(
            "get_project_summary",
            json!({ "project_path": dir.path().to_string_lossy() }),
        )
        .await;

    let payload = outcome.terminal.payload().unwrap();
    assert_eq!(payload["name"], "canton-dapp");
    assert_eq!(payload["total_files"], 2);
    assert_eq!(
        payload["summary"],
        "Project: canton-dapp\nDependencies: @daml/types\nEstimated Files: 2"
    );
}

#[tokio::test]
async fn test_project_summary_without_manifest_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let collector = Arc::new(InMemoryCollector::new());
    let server = server(collector.clone());

    let outcome = server
        .engine()
        .call(
            "get_project_summary",
            json!({ "project_path": dir.path().to_string_lossy() }),
        )
        .await;

    assert_eq!(outcome.terminal.failure_kind(), Some(ErrorKind::NotFound));

    server.shutdown().await;
    let records = collector.records().await;
    assert!(!records[0].success);
    assert_eq!(records[0].failure_kind.as_deref(), Some("not_found"));
}

#[tokio::test]
async fn test_status_reports_version() {
    let server = server(Arc::new(InMemoryCollector::new()));

    let outcome = server.engine().call("check_server_status", json!({})).await;

    let payload = outcome.terminal.payload().unwrap();
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["version"], ledgerview_core::VERSION);
}

#[tokio::test]
async fn test_unknown_tool() {
    let server = server(Arc::new(InMemoryCollector::new()));

    let outcome = server.engine().call("deploy_everything", json!({})).await;

    assert_eq!(outcome.terminal.failure_kind(), Some(ErrorKind::UnknownTool));
}
