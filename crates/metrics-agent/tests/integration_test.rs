// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use metrics_agent::collector::{Collector, CollectorSet};
use metrics_agent::config::Config;
use metrics_agent::errors::{CollectError, DeliveryError};
use metrics_agent::pipeline::{Agent, AgentState};
use metrics_agent::transport::{HttpTransport, Transport};
use metricstore::metric::Metric;
use metricstore::wire::MetricPayload;
use tokio_util::sync::CancellationToken;

/// Slow transport that tracks how many sends overlap.
#[derive(Default)]
struct SlowTransport {
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delivered: Mutex<Vec<String>>,
}

#[async_trait]
impl Transport for SlowTransport {
    async fn send(&self, batch: &[MetricPayload]) -> Result<(), DeliveryError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.delivered
            .lock()
            .unwrap()
            .extend(batch.iter().map(|p| p.id.clone()));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fails every other send with a 503.
#[derive(Default)]
struct FlakyTransport {
    calls: AtomicUsize,
    delivered: AtomicUsize,
}

#[async_trait]
impl Transport for FlakyTransport {
    async fn send(&self, batch: &[MetricPayload]) -> Result<(), DeliveryError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
            return Err(DeliveryError::Status {
                status: 503,
                body: "busy".to_string(),
            });
        }
        self.delivered.fetch_add(batch.len(), Ordering::SeqCst);
        Ok(())
    }
}

struct StaticCollector;

#[async_trait]
impl Collector for StaticCollector {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn collect(&self) -> Result<Vec<Metric>, CollectError> {
        Ok(vec![
            Metric::gauge("Alloc", 1024.0),
            Metric::counter("PollCount", 1),
        ])
    }
}

fn gauges(n: usize) -> Vec<Metric> {
    (0..n).map(|i| Metric::gauge(format!("g{i}"), i as f64)).collect()
}

#[tokio::test(start_paused = true)]
async fn test_drain_delivers_every_queued_metric() {
    let transport = Arc::new(SlowTransport {
        delay: Duration::from_millis(500),
        ..Default::default()
    });
    let config = Config {
        batch_size: 3,
        rate_limit: 2,
        shutdown_timeout: Duration::from_secs(10),
        ..Default::default()
    };
    let agent = Agent::new(&config, CollectorSet::default(), transport.clone());
    agent
        .queue()
        .push_batch(&gauges(10), &CancellationToken::new())
        .await
        .unwrap();

    agent.handle().shutdown();
    agent.run().await;

    assert_eq!(agent.state(), AgentState::Terminated);
    let mut delivered = transport.delivered.lock().unwrap().clone();
    delivered.sort();
    let mut expected: Vec<String> = (0..10).map(|i| format!("g{i}")).collect();
    expected.sort();
    assert_eq!(delivered, expected);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_deliveries_respect_rate_limit() {
    let transport = Arc::new(SlowTransport {
        delay: Duration::from_millis(200),
        ..Default::default()
    });
    let config = Config {
        batch_size: 1,
        rate_limit: 2,
        ..Default::default()
    };
    let agent = Agent::new(&config, CollectorSet::default(), transport.clone());
    agent
        .queue()
        .push_batch(&gauges(12), &CancellationToken::new())
        .await
        .unwrap();

    agent.handle().shutdown();
    agent.run().await;

    assert_eq!(transport.delivered.lock().unwrap().len(), 12);
    assert_eq!(transport.max_in_flight.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried() {
    let transport = Arc::new(FlakyTransport::default());
    let config = Config {
        batch_size: 5,
        retry_base_delay: Duration::from_millis(100),
        retry_max_delay: Duration::from_millis(400),
        ..Default::default()
    };
    let agent = Agent::new(&config, CollectorSet::default(), transport.clone());
    agent
        .queue()
        .push_batch(&gauges(5), &CancellationToken::new())
        .await
        .unwrap();

    agent.handle().shutdown();
    agent.run().await;

    assert_eq!(transport.delivered.load(Ordering::SeqCst), 5);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_agent_pushes_to_collector_over_http() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/updates/")
        .match_body(mockito::Matcher::Regex(
            r#"\{"id":"Alloc","type":"gauge","value":1024\.0\}"#.to_string(),
        ))
        .with_status(200)
        .expect_at_least(1)
        .create_async()
        .await;

    let config = Config {
        address: server.url(),
        poll_interval: Duration::from_millis(50),
        report_interval: Duration::from_millis(100),
        ..Default::default()
    };
    let transport = HttpTransport::new(&config.address, config.send_timeout).unwrap();
    let agent = Arc::new(Agent::new(
        &config,
        CollectorSet::new(vec![Arc::new(StaticCollector)]),
        Arc::new(transport),
    ));

    let runner = {
        let agent = Arc::clone(&agent);
        tokio::spawn(async move { agent.run().await })
    };
    tokio::time::sleep(Duration::from_millis(400)).await;
    agent.handle().shutdown();
    runner.await.unwrap();

    mock.assert_async().await;
    assert_eq!(agent.state(), AgentState::Terminated);
}
