use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{Value, json};
use switchyard_config::AppConfig;
use switchyard_core::ServiceRegistry;
use switchyard_server::{
    AppState,
    bootstrap::{Stores, build_registry},
    create_router,
};

const WORKER: &str = "http://worker:8080";
const ENCODE: &str = "org.example.encode";

fn registry() -> Arc<ServiceRegistry> {
    let mut config = AppConfig::default();
    config.server.public_url = "http://registry:8080".into();
    build_registry(&Stores::in_memory(), &config)
}

fn server(registry: Arc<ServiceRegistry>) -> TestServer {
    TestServer::new(create_router(AppState::new(registry))).unwrap()
}

async fn register_worker(server: &TestServer) {
    server
        .post("/services/hosts")
        .json(&json!({
            "base_url": WORKER,
            "ip_address": "10.0.0.2",
            "node_name": "worker",
            "cores": 8,
            "max_load": 4.0
        }))
        .await
        .assert_status(StatusCode::CREATED);
    server
        .post("/services/services")
        .json(&json!({
            "service_type": ENCODE,
            "host": WORKER,
            "path": "/encode/",
            "job_producer": true
        }))
        .await
        .assert_status(StatusCode::CREATED);
}

async fn create_job(server: &TestServer, load: f32) -> Value {
    let response = server
        .post("/services/jobs")
        .json(&json!({
            "type": ENCODE,
            "operation": "transcode",
            "arguments": ["in.mov"],
            "job_load": load,
            "creator": "admin",
            "organization": "acme",
            "created_host": WORKER
        }))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json()
}

fn error_status(body: &Value) -> u64 {
    body["error"]["status"].as_u64().unwrap_or_default()
}

#[tokio::test]
async fn hosts_and_services_can_be_registered_and_listed() {
    let server = server(registry());
    register_worker(&server).await;

    let hosts: Value = server.get("/services/hosts").await.json();
    let hosts = hosts.as_array().unwrap();
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0]["base_url"], WORKER);
    assert_eq!(hosts[0]["online"], true);

    let services: Value = server
        .get("/services/services")
        .add_query_param("type", ENCODE)
        .await
        .json();
    assert_eq!(services.as_array().unwrap().len(), 1);
    assert_eq!(services[0]["state"], "NORMAL");

    server
        .post("/services/hosts/maintenance")
        .json(&json!({ "host": WORKER, "maintenance": true }))
        .await
        .assert_status(StatusCode::NO_CONTENT);
    let hosts: Value = server.get("/services/hosts").await.json();
    assert_eq!(hosts[0]["maintenance_mode"], true);

    let health: Value = server.get("/services/health").await.json();
    assert_eq!(health, json!({ "normal": 1, "warning": 0, "error": 0 }));
}

#[tokio::test]
async fn service_on_unknown_host_is_not_found() {
    let server = server(registry());
    let response = server
        .post("/services/services")
        .json(&json!({
            "service_type": ENCODE,
            "host": "http://ghost:8080",
            "path": "/encode/"
        }))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(error_status(&body), 404);
    assert!(
        body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("http://ghost:8080")
    );
}

#[tokio::test]
async fn job_lifecycle_over_http() {
    let registry = registry();
    let server = server(Arc::clone(&registry));
    register_worker(&server).await;

    let job = create_job(&server, 1.5).await;
    assert_eq!(job["status"], "QUEUED");
    let id = job["id"].as_str().unwrap().to_string();

    let fetched: Value = server.get(&format!("/services/jobs/{id}")).await.json();
    assert_eq!(fetched["operation"], "transcode");

    let mut running = fetched.clone();
    running["status"] = json!("RUNNING");
    running["processor_host"] = json!(WORKER);
    let updated = server
        .put(&format!("/services/jobs/{id}"))
        .json(&running)
        .await;
    updated.assert_status_ok();
    let updated: Value = updated.json();
    assert_eq!(updated["status"], "RUNNING");
    assert!(updated["date_started"].is_string());

    let load: Value = server.get("/services/load/current").await.json();
    assert_eq!(load["nodes"][WORKER]["current_load"], 1.5);

    let canceled: Value = server
        .post(&format!("/services/jobs/{id}/cancel"))
        .await
        .json();
    assert_eq!(canceled["status"], "CANCELED");

    let count: Value = server
        .get("/services/jobs/count")
        .add_query_param("status", "canceled")
        .await
        .json();
    assert_eq!(count["count"], 1);

    server
        .delete(&format!("/services/jobs/{id}"))
        .await
        .assert_status(StatusCode::NO_CONTENT);
    server
        .get(&format!("/services/jobs/{id}"))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn update_with_mismatched_id_is_rejected() {
    let server = server(registry());
    register_worker(&server).await;
    let first = create_job(&server, 0.5).await;
    let second = create_job(&server, 0.5).await;

    let response = server
        .put(&format!("/services/jobs/{}", first["id"].as_str().unwrap()))
        .json(&second)
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(error_status(&response.json()), 400);
}

#[tokio::test]
async fn stale_update_conflicts() {
    let server = server(registry());
    register_worker(&server).await;
    let job = create_job(&server, 0.5).await;
    let path = format!("/services/jobs/{}", job["id"].as_str().unwrap());

    let mut paused = job.clone();
    paused["status"] = json!("PAUSED");
    server.put(&path).json(&paused).await.assert_status_ok();

    server
        .put(&path)
        .json(&paused)
        .await
        .assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn bad_queries_and_missing_dispatcher_are_reported() {
    let server = server(registry());

    server
        .get("/services/jobs/count")
        .add_query_param("status", "sleeping")
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    server
        .get(&format!("/services/jobs/{}", switchyard_core::JobId::new()))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    server
        .get("/services/jobs/priority")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn own_load_and_max_loads_are_reported() {
    let server = server(registry());
    register_worker(&server).await;

    let max: Value = server.get("/services/load/max").await.json();
    assert_eq!(max[WORKER], 4.0);

    let own: Value = server.get("/services/load/own").await.json();
    assert_eq!(own["host"], "http://registry:8080");
    assert_eq!(own["load"], 0.0);
}
