//! Response shapes shared by every route.
//!
//! Domain errors are answered with HTTP 200 and a `{"message": "Error : ..."}`
//! body; clients tell success from failure by the body alone.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use foundation::{ServiceError, ServiceResult};
use serde_json::json;
use tracing::warn;

pub fn geojson(body: String) -> Response {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        )],
        body,
    )
        .into_response()
}

pub fn error(err: ServiceError) -> Response {
    warn!(kind = err.kind(), "request failed: {err}");
    let body = json!({ "message": err.envelope_message() }).to_string();
    geojson(body)
}

pub fn reply(result: ServiceResult<String>) -> Response {
    match result {
        Ok(body) => geojson(body),
        Err(err) => error(err),
    }
}

pub async fn not_found() -> Response {
    (StatusCode::OK, "ERROR 404 !").into_response()
}
