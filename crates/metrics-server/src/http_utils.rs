// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{header, http::HeaderMap, Response, StatusCode};
use metricstore::wire::ErrorResponse;
use serde::Serialize;
use tracing::{debug, error, warn};

pub type HttpResponse = Response<Full<Bytes>>;

/// Serializes `body` as the JSON payload of a response with the given status.
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> HttpResponse {
    match serde_json::to_vec(body) {
        Ok(bytes) => with_body(status, "application/json", bytes),
        Err(e) => {
            error!("Failed to serialize response: {e}");
            with_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain",
                b"failed to serialize response".to_vec(),
            )
        }
    }
}

pub fn text_response(status: StatusCode, body: String) -> HttpResponse {
    with_body(status, "text/plain; charset=utf-8", body.into_bytes())
}

/// Does two things:
/// 1. Logs the given message, as a warning for client errors and an error otherwise.
/// 2. Returns an [`ErrorResponse`] JSON body with the given status code.
pub fn log_and_create_error_response<I, S>(status: StatusCode, message: &str, details: I) -> HttpResponse
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let body = ErrorResponse::new(status.as_u16(), message, details);
    if status.is_client_error() {
        warn!("{message}: {:?}", body.details);
    } else {
        error!("{message}: {:?}", body.details);
    }
    json_response(status, &body)
}

/// Takes a request's header map and checks that a declared content length does not exceed
/// `max_content_length`.
///
/// Returns `None` if no issues are found, otherwise the error response to send back.
pub fn verify_request_content_length(
    header_map: &HeaderMap,
    max_content_length: usize,
) -> Option<HttpResponse> {
    let Some(content_length_header) = header_map.get(header::CONTENT_LENGTH) else {
        if let Some(transfer_encoding_header) = header_map.get(header::TRANSFER_ENCODING) {
            debug!("Transfer-Encoding header is present: {transfer_encoding_header:?}");
        }
        // the body is still capped while it is read
        return None;
    };
    let content_length = match content_length_header
        .to_str()
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
    {
        Some(length) => length,
        None => {
            return Some(log_and_create_error_response(
                StatusCode::BAD_REQUEST,
                "Invalid Content-Length header",
                Vec::<String>::new(),
            ));
        }
    };
    if content_length > max_content_length {
        return Some(payload_too_large(max_content_length));
    }
    None
}

pub fn payload_too_large(max_content_length: usize) -> HttpResponse {
    log_and_create_error_response(
        StatusCode::PAYLOAD_TOO_LARGE,
        "Payload too large",
        [format!("body exceeds {max_content_length} bytes")],
    )
}

fn with_body(status: StatusCode, content_type: &'static str, body: Vec<u8>) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, header::HeaderValue::from_static(content_type));
    response
}
