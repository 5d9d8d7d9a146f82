// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use async_trait::async_trait;
use metricstore::wire::MetricPayload;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::errors::DeliveryError;

const BATCH_ENDPOINT: &str = "/updates/";

/// Ships one batch of metrics to the collector.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, batch: &[MetricPayload]) -> Result<(), DeliveryError>;
}

/// Posts batches as a JSON array to `<address>/updates/`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(address: &str, timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Connection(format!("failed to build client: {e}")))?;
        Ok(Self {
            client,
            url: endpoint_url(address),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Accepts `host:port` as well as full URLs.
fn endpoint_url(address: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        format!("{address}{BATCH_ENDPOINT}")
    } else {
        format!("http://{address}{BATCH_ENDPOINT}")
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, batch: &[MetricPayload]) -> Result<(), DeliveryError> {
        let body = serde_json::to_vec(batch).map_err(|e| DeliveryError::Payload(e.to_string()))?;

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout(self.timeout)
                } else {
                    DeliveryError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            debug!("Delivered {} metrics: {status}", batch.len());
            return Ok(());
        }
        Err(DeliveryError::Status {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }
}
