//! HTTP application assembly: API routes plus the service-wide layers.

use axum::{
    body::Body,
    http::{header, HeaderName, HeaderValue, Method, Request},
    Router,
};
use m365_api::{api_router, ApiState};
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Build the service router.
///
/// Every request gets an `X-Request-ID` (generated unless the caller sent
/// one) that is echoed on the response and recorded on the request span.
pub fn build_app(state: ApiState, cors_origins: &[String]) -> Router {
    api_router(state)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }),
        )
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(build_cors_layer(cors_origins))
}

/// Build the CORS layer from the configured origins.
///
/// `*` alone allows any origin without credentials. Otherwise only the listed
/// origins are allowed and rejections are logged.
pub fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let is_wildcard = origins.len() == 1 && origins[0] == "*";

    let allow_origin = if is_wildcard {
        AllowOrigin::any()
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        AllowOrigin::predicate(
            move |origin: &HeaderValue, _req: &axum::http::request::Parts| {
                let is_allowed = allowed.contains(origin);
                if !is_allowed {
                    tracing::warn!(
                        target: "security",
                        event_type = "cors_rejected",
                        origin = %origin.to_str().unwrap_or("<non-utf8>"),
                        "CORS origin rejected"
                    );
                }
                is_allowed
            },
        )
    };

    let layer = CorsLayer::new()
        .allow_origin(allow_origin)
        .max_age(Duration::from_secs(3600));

    if is_wildcard {
        layer.allow_methods(Any).allow_headers(Any)
    } else {
        layer
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([
                header::AUTHORIZATION,
                header::CONTENT_TYPE,
                header::ACCEPT,
                header::ORIGIN,
                HeaderName::from_static(REQUEST_ID_HEADER),
            ])
            .allow_credentials(true)
    }
}
