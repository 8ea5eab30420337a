//! The Decision HTTP Surface: a single `POST /v1/check/{algorithm}` route.
//!
//! Grounded in the teacher's axum integration (`middleware/layer.rs`) for
//! how request/response headers are built, but shaped as a plain handler
//! rather than a `tower::Layer` — the decider is consulted directly by the
//! caller's own request, not inserted transparently in front of another
//! service.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::decision::{DecisionEngine, DecisionEnvelope};
use crate::error::DeciderError;
use crate::store::Store;

/// Request body for `POST /v1/check/{algorithm}`.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckRequest {
    pub subject: String,
    pub capacity: f64,
    #[serde(default)]
    pub refill_rate: Option<f64>,
    #[serde(default)]
    pub leak_rate: Option<f64>,
    #[serde(default)]
    pub window_size: Option<f64>,
}

/// Response body, identical on allow and deny.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CheckResponse {
    pub allowed: bool,
    pub remaining: f64,
}

impl From<DecisionEnvelope> for CheckResponse {
    fn from(envelope: DecisionEnvelope) -> Self {
        Self {
            allowed: envelope.allowed,
            remaining: envelope.remaining,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Build the router for the decision HTTP surface, mounting it under
/// `/v1/check/:algorithm`.
pub fn router<S: Store>(engine: Arc<DecisionEngine<S>>) -> Router {
    Router::new()
        .route("/v1/check/{algorithm}", post(check_handler::<S>))
        .with_state(engine)
}

async fn check_handler<S: Store>(
    State(engine): State<Arc<DecisionEngine<S>>>,
    Path(algorithm): Path<String>,
    Json(request): Json<CheckRequest>,
) -> Response {
    let outcome = match algorithm.as_str() {
        "token_bucket" => {
            dispatch(
                request.refill_rate,
                "refill_rate",
                |rate| (1.0 / rate).ceil().max(1.0) as u64,
                |rate| engine.decide_token_bucket(&request.subject, request.capacity, rate),
            )
            .await
        }
        "leaky_bucket" => {
            dispatch(
                request.leak_rate,
                "leak_rate",
                |rate| (1.0 / rate).ceil().max(1.0) as u64,
                |rate| engine.decide_leaky_bucket(&request.subject, request.capacity, rate),
            )
            .await
        }
        "sliding_window" => {
            dispatch(
                request.window_size,
                "window_size",
                |rate| rate.ceil().max(1.0) as u64,
                |rate| engine.decide_sliding_window(&request.subject, request.capacity, rate),
            )
            .await
        }
        other => Err(DeciderError::BadRequest(format!(
            "unknown algorithm: {other}"
        ))),
    };

    match outcome {
        Ok((envelope, retry_after_secs)) => build_response(&request, envelope, retry_after_secs),
        Err(err) => error_response(err),
    }
}

/// Validates the algorithm-specific rate parameter is present, then runs the
/// decision and pairs it with the `Retry-After` value that would apply on a
/// deny (`spec.md` §4.5) — computed by `retry_after`, which differs per
/// algorithm (`ceil(1/rate)` for token/leaky bucket, `ceil(window_size)` for
/// sliding window).
async fn dispatch<F, Fut, R>(
    rate: Option<f64>,
    field: &str,
    retry_after: R,
    call: F,
) -> crate::error::Result<(DecisionEnvelope, u64)>
where
    F: FnOnce(f64) -> Fut,
    Fut: std::future::Future<Output = crate::error::Result<DecisionEnvelope>>,
    R: FnOnce(f64) -> u64,
{
    let rate = rate.ok_or_else(|| DeciderError::BadRequest(format!("{field} is required")))?;
    if !rate.is_finite() || rate <= 0.0 {
        return Err(DeciderError::BadRequest(format!(
            "{field} must be a positive number"
        )));
    }

    let envelope = call(rate).await?;
    Ok((envelope, retry_after(rate)))
}

fn build_response(
    request: &CheckRequest,
    envelope: DecisionEnvelope,
    retry_after_secs: u64,
) -> Response {
    let body = CheckResponse::from(envelope);

    if envelope.allowed {
        return (StatusCode::OK, Json(body)).into_response();
    }

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    headers.insert(
        "Retry-After",
        HeaderValue::from_str(&retry_after_secs.to_string()).expect("digits are valid ascii"),
    );
    headers.insert(
        "X-RateLimit-Remaining",
        HeaderValue::from_str(&envelope.remaining.to_string()).expect("formatted remaining"),
    );
    headers.insert(
        "X-RateLimit-Limit",
        HeaderValue::from_str(&request.capacity.to_string()).expect("formatted capacity"),
    );
    response
}

fn error_response(err: DeciderError) -> Response {
    let status = match &err {
        DeciderError::BadRequest(_) => StatusCode::BAD_REQUEST,
        DeciderError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        DeciderError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
        .into_response()
}
