// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP surface of the collector.
//!
//! | route            | body                  | response                         |
//! |------------------|-----------------------|----------------------------------|
//! | `POST /update/`  | one `MetricPayload`   | the merged metric                |
//! | `POST /updates/` | array of payloads     | merged metrics, in request order |
//! | `POST /value/`   | `{"id":..,"type":..}` | the stored metric or 404         |
//! | `GET /ping`      |                       | 200 if storage answers, else 500 |
//! | `GET /`          |                       | `name value` lines, sorted       |

use std::convert::Infallible;
use std::io;
use std::sync::Arc;

use http_body_util::{BodyExt, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Method, Request, StatusCode};
use metricstore::errors::StorageError;
use metricstore::manager::Manager;
use metricstore::metric::{Metric, MetricKind};
use metricstore::wire::{MetricPayload, MetricQuery};
use serde::de::DeserializeOwned;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::http_utils::{
    json_response, log_and_create_error_response, payload_too_large, text_response,
    verify_request_content_length, HttpResponse,
};

/// Largest accepted request body.
pub const MAX_CONTENT_LENGTH: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Server I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Accepts connections until `shutdown` fires, then lets in-flight requests finish.
pub async fn serve(
    listener: TcpListener,
    manager: Arc<Manager>,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    if let Ok(addr) = listener.local_addr() {
        info!("Collector listening on {addr}");
    }
    let server = hyper::server::conn::http1::Builder::new();
    let mut joinset = tokio::task::JoinSet::new();

    loop {
        let conn = tokio::select! {
            con_res = listener.accept() => match con_res {
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    error!("Server error: {e}");
                    return Err(e.into());
                }
                Ok((conn, _)) => conn,
            },
            finished = async {
                match joinset.join_next().await {
                    Some(finished) => finished,
                    None => std::future::pending().await,
                }
            } => match finished {
                Err(e) if e.is_panic() => {
                    error!("Connection handler panicked: {e:?}");
                    continue;
                },
                Ok(()) | Err(_) => continue,
            },
            () = shutdown.cancelled() => break,
        };

        let conn = hyper_util::rt::TokioIo::new(conn);
        let server = server.clone();
        let manager = Arc::clone(&manager);
        let shutdown = shutdown.clone();
        joinset.spawn(async move {
            let service = service_fn(move |req| {
                let manager = Arc::clone(&manager);
                async move { Ok::<_, Infallible>(handle(&manager, req).await) }
            });
            let connection = server.serve_connection(conn, service);
            tokio::pin!(connection);
            let result = tokio::select! {
                result = connection.as_mut() => result,
                () = shutdown.cancelled() => {
                    connection.as_mut().graceful_shutdown();
                    connection.await
                }
            };
            if let Err(e) = result {
                debug!("Connection error: {e}");
            }
        });
    }

    debug!("Waiting for {} open connections", joinset.len());
    while joinset.join_next().await.is_some() {}
    info!("Collector stopped accepting requests");
    Ok(())
}

/// Routes one request.
pub async fn handle(manager: &Manager, req: Request<Incoming>) -> HttpResponse {
    match (req.method(), req.uri().path()) {
        (&Method::POST, "/update/") => update(manager, req).await,
        (&Method::POST, "/updates/") => updates(manager, req).await,
        (&Method::POST, "/value/") => value(manager, req).await,
        (&Method::GET, "/ping") => ping(manager).await,
        (&Method::GET, "/") => index(manager).await,
        (method, path) => log_and_create_error_response(
            StatusCode::NOT_FOUND,
            "Not found",
            [format!("no route for {method} {path}")],
        ),
    }
}

async fn update(manager: &Manager, req: Request<Incoming>) -> HttpResponse {
    let payload: MetricPayload = match read_json(req).await {
        Ok(payload) => payload,
        Err(response) => return response,
    };
    let metric = match Metric::try_from(&payload) {
        Ok(metric) => metric,
        Err(e) => {
            return log_and_create_error_response(
                StatusCode::BAD_REQUEST,
                "Invalid metric",
                [e.to_string()],
            )
        }
    };
    match manager.save(metric).await {
        Ok(saved) => json_response(StatusCode::OK, &MetricPayload::from(&saved)),
        Err(e) => storage_failure(&e),
    }
}

async fn updates(manager: &Manager, req: Request<Incoming>) -> HttpResponse {
    let payloads: Vec<MetricPayload> = match read_json(req).await {
        Ok(payloads) => payloads,
        Err(response) => return response,
    };

    // reject the whole batch if any item is invalid
    let mut metrics = Vec::with_capacity(payloads.len());
    let mut invalid = Vec::new();
    for payload in &payloads {
        match Metric::try_from(payload) {
            Ok(metric) => metrics.push(metric),
            Err(e) => invalid.push(e.to_string()),
        }
    }
    if !invalid.is_empty() {
        return log_and_create_error_response(StatusCode::BAD_REQUEST, "Invalid metrics", invalid);
    }

    match manager.save_batch(metrics).await {
        Ok(saved) => {
            debug!("Saved batch of {} metrics", saved.len());
            let body: Vec<MetricPayload> = saved.iter().map(MetricPayload::from).collect();
            json_response(StatusCode::OK, &body)
        }
        Err(e) => storage_failure(&e),
    }
}

async fn value(manager: &Manager, req: Request<Incoming>) -> HttpResponse {
    let query: MetricQuery = match read_json(req).await {
        Ok(query) => query,
        Err(response) => return response,
    };
    let kind = match query.kind.parse::<MetricKind>() {
        Ok(kind) => kind,
        Err(e) => {
            return log_and_create_error_response(
                StatusCode::BAD_REQUEST,
                "Invalid metric query",
                [e.to_string()],
            )
        }
    };
    match manager.get(kind, &query.id).await {
        Ok(Some(metric)) => json_response(StatusCode::OK, &MetricPayload::from(&metric)),
        Ok(None) => log_and_create_error_response(
            StatusCode::NOT_FOUND,
            "Metric not found",
            [format!("no {kind} named {}", query.id)],
        ),
        Err(e) => storage_failure(&e),
    }
}

async fn ping(manager: &Manager) -> HttpResponse {
    match manager.ping_storage().await {
        Ok(()) => text_response(StatusCode::OK, "OK".to_string()),
        Err(e) => storage_failure(&e),
    }
}

async fn index(manager: &Manager) -> HttpResponse {
    let metrics = match manager.get_all().await {
        Ok(stream) => stream.try_collect().await,
        Err(e) => Err(e),
    };
    match metrics {
        Ok(mut metrics) => {
            metrics.sort_by(|a, b| a.name().cmp(b.name()));
            let listing: String = metrics
                .iter()
                .map(|m| format!("{} {}\n", m.name(), m.string_value()))
                .collect();
            text_response(StatusCode::OK, listing)
        }
        Err(e) => storage_failure(&e),
    }
}

/// Reads a capped body and decodes it as JSON, or returns the error response to send.
async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T, HttpResponse> {
    if let Some(response) = verify_request_content_length(req.headers(), MAX_CONTENT_LENGTH) {
        return Err(response);
    }
    let body = match Limited::new(req.into_body(), MAX_CONTENT_LENGTH).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            if e.downcast_ref::<http_body_util::LengthLimitError>().is_some() {
                return Err(payload_too_large(MAX_CONTENT_LENGTH));
            }
            return Err(log_and_create_error_response(
                StatusCode::BAD_REQUEST,
                "Failed to read request body",
                [e.to_string()],
            ));
        }
    };
    decode(&body)
}

fn decode<T: DeserializeOwned>(body: &Bytes) -> Result<T, HttpResponse> {
    serde_json::from_slice(body).map_err(|e| {
        log_and_create_error_response(StatusCode::BAD_REQUEST, "Malformed JSON body", [e.to_string()])
    })
}

fn storage_failure(e: &StorageError) -> HttpResponse {
    log_and_create_error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Storage failure",
        [e.to_string()],
    )
}
