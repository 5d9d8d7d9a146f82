// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use metrics_server::server::serve;
use metricstore::manager::Manager;
use metricstore::storage::memory::MemoryStorage;
use metricstore::storage::Storage;
use metricstore::wire::{ErrorResponse, MetricPayload};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct TestServer {
    base: String,
    client: reqwest::Client,
    storage: Arc<MemoryStorage>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let storage = Arc::new(MemoryStorage::new());
        let manager = Arc::new(Manager::new(storage.clone()));
        let shutdown = CancellationToken::new();
        let task = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { serve(listener, manager, shutdown).await.unwrap() })
        };
        Self {
            base,
            client: reqwest::Client::new(),
            storage,
            shutdown,
            task,
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .unwrap()
    }

    async fn stop(self) {
        self.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server did not stop")
            .unwrap();
    }
}

#[tokio::test]
async fn test_update_merges_counters() {
    let server = TestServer::start().await;

    let first: MetricPayload = server
        .post("/update/", json!({"id": "PollCount", "type": "counter", "delta": 5}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(first.delta, Some(5));

    let second = server
        .post("/update/", json!({"id": "PollCount", "type": "counter", "delta": 3}))
        .await;
    assert_eq!(second.status(), 200);
    let second: MetricPayload = second.json().await.unwrap();
    assert_eq!(second.delta, Some(8));

    let gauge: MetricPayload = server
        .post("/update/", json!({"id": "Alloc", "type": "gauge", "value": 36.6}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(gauge.value, Some(36.6));

    server.stop().await;
}

#[tokio::test]
async fn test_updates_batch_preserves_order() {
    let server = TestServer::start().await;

    let response = server
        .post(
            "/updates/",
            json!([
                {"id": "hits", "type": "counter", "delta": 1},
                {"id": "temp", "type": "gauge", "value": 20.5},
                {"id": "hits", "type": "counter", "delta": 2},
            ]),
        )
        .await;
    assert_eq!(response.status(), 200);
    let saved: Vec<MetricPayload> = response.json().await.unwrap();
    let deltas: Vec<Option<i64>> = saved.iter().map(|p| p.delta).collect();
    assert_eq!(deltas, vec![Some(1), None, Some(3)]);

    server.stop().await;
}

#[tokio::test]
async fn test_invalid_batch_is_rejected_whole() {
    let server = TestServer::start().await;

    let response = server
        .post(
            "/updates/",
            json!([
                {"id": "ok", "type": "counter", "delta": 1},
                {"id": "bad", "type": "histogram", "value": 1.0},
                {"id": "bad", "type": "histogram", "value": 1.0},
                {"id": "nodelta", "type": "counter"},
            ]),
        )
        .await;
    assert_eq!(response.status(), 400);
    let error: ErrorResponse = response.json().await.unwrap();
    assert_eq!(error.code, 400);
    assert_eq!(error.details.len(), 2);
    let mut sorted = error.details.clone();
    sorted.sort();
    assert_eq!(error.details, sorted);

    // nothing from the rejected batch was stored
    let response = server
        .post("/value/", json!({"id": "ok", "type": "counter"}))
        .await;
    assert_eq!(response.status(), 404);

    server.stop().await;
}

#[tokio::test]
async fn test_value_lookup() {
    let server = TestServer::start().await;
    server
        .post("/update/", json!({"id": "temp", "type": "gauge", "value": 1.5}))
        .await;

    let found = server
        .post("/value/", json!({"id": "temp", "type": "gauge"}))
        .await;
    assert_eq!(found.status(), 200);
    let found: MetricPayload = found.json().await.unwrap();
    assert_eq!(found.value, Some(1.5));

    // same name, other kind
    let mismatch = server
        .post("/value/", json!({"id": "temp", "type": "counter"}))
        .await;
    assert_eq!(mismatch.status(), 404);

    let unknown_kind = server
        .post("/value/", json!({"id": "temp", "type": "summary"}))
        .await;
    assert_eq!(unknown_kind.status(), 400);

    server.stop().await;
}

#[tokio::test]
async fn test_malformed_json_and_unknown_route() {
    let server = TestServer::start().await;

    let response = server
        .client
        .post(format!("{}/update/", server.base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let error: ErrorResponse = response.json().await.unwrap();
    assert_eq!(error.message, "Malformed JSON body");

    assert_eq!(server.get("/metrics").await.status(), 404);

    server.stop().await;
}

#[tokio::test]
async fn test_index_lists_metrics_sorted() {
    let server = TestServer::start().await;
    server
        .post(
            "/updates/",
            json!([
                {"id": "b", "type": "gauge", "value": 0.5},
                {"id": "a", "type": "counter", "delta": 7},
            ]),
        )
        .await;

    let response = server.get("/").await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "a 7\nb 0.5\n");

    server.stop().await;
}

#[tokio::test]
async fn test_ping_reflects_storage_state() {
    let server = TestServer::start().await;
    assert_eq!(server.get("/ping").await.status(), 200);

    server.storage.close().await.unwrap();
    assert_eq!(server.get("/ping").await.status(), 500);

    let response = server
        .post("/update/", json!({"id": "hits", "type": "counter", "delta": 1}))
        .await;
    assert_eq!(response.status(), 500);

    server.stop().await;
}
