use crate::tracing::RequestId;
use axum::{
    extract::Request,
    http::{header::HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

/// Header name for the request ID
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Stamps every request with an id, scopes it into the task-local used by
/// response metadata, and echoes it back on the response. Also feeds the
/// request counters. Runs outermost so the span maker sees the extension.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    // Reuse a caller-supplied id so log lines line up across systems
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(RequestId::new)
        .unwrap_or_default();

    // to_str() above guarantees visible ASCII, so from_str cannot fail here
    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        request
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }

    // Make request id available to handlers
    request.extensions_mut().insert(request_id.clone());

    let start = Instant::now();
    let mut response =
        crate::tracing::scope_request_id(request_id.clone(), async move {
            next.run(request).await
        })
        .await;

    crate::metrics::APP_METRICS.record_request(start.elapsed(), response.status().as_u16());

    // Add request ID to response headers
    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }

    response
}
