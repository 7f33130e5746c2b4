use axum::{body::Body, extract::Request, http::HeaderValue, middleware::Next, response::Response};
use uuid::Uuid;

use crate::routes::auth::ACCOUNT_HEADER;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Correlation id of one RPC call, echoed back in the response headers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestId(pub Uuid);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Reuses a well-formed incoming `x-request-id`, otherwise assigns a fresh v4 id
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .map_or_else(|| RequestId(Uuid::new_v4()), RequestId);
    request.extensions_mut().insert(request_id);

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Span for `TraceLayer` carrying the request id and the calling account
pub fn make_span_with_request_id(request: &Request<Body>) -> tracing::Span {
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(ToString::to_string)
        .unwrap_or_else(|| "unknown".to_string());
    let account = request
        .headers()
        .get(ACCOUNT_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("-");

    tracing::info_span!(
        "rpc",
        method = %request.method(),
        uri = %request.uri(),
        request_id = %request_id,
        account = %account,
    )
}
