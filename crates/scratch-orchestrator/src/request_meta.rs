use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-request context available to handlers as an `Extension`.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub request_id: String,
}

/// Reuses a caller-supplied `x-request-id` or mints a v4 uuid, echoes it on
/// the response and wraps the handler in a span carrying it.
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path()
    );
    req.extensions_mut().insert(RequestMeta {
        request_id: request_id.clone(),
    });

    let mut res = next.run(req).instrument(span).await;
    if let Ok(v) = HeaderValue::from_str(&request_id) {
        res.headers_mut().insert(REQUEST_ID_HEADER, v);
    }
    res
}
