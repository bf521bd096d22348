use crate::error::OverlayError;
use crate::rate_limiter::{Decision, RateLimiter};
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Per-client throttle wrapped around every route.
///
/// Requests over quota never reach the handler. A store failure fails closed.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let client_ip = get_client_ip(&request);

    match limiter.check(&client_ip).await {
        Ok(Decision::Allowed { .. }) => next.run(request).await,
        Ok(Decision::Rejected {
            count,
            limit,
            retry_after_secs,
        }) => {
            warn!(
                target: "overlay_throttle::middleware",
                client_ip = %client_ip,
                count,
                limit,
                "Rate limit exceeded"
            );
            OverlayError::RateLimitExceeded { retry_after_secs }.into_response()
        }
        Err(err) => {
            error!(
                target: "overlay_throttle::middleware",
                client_ip = %client_ip,
                error = %err,
                "Rate limit check failed, rejecting request"
            );
            err.into_response()
        }
    }
}

/// Logging middleware for request/response tracking
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = get_client_ip(&request);

    info!(
        target: "overlay_throttle::middleware",
        %request_id,
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        "Incoming request"
    );

    let response = next.run(request).await;

    info!(
        target: "overlay_throttle::middleware",
        %request_id,
        method = %method,
        uri = %uri,
        status = %response.status(),
        "Request completed"
    );

    response
}

/// Peer address of the connection. Forwarding headers are ignored since
/// clients control them.
pub fn get_client_ip(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
