use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use mcu_core::McuError;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::rate_governor::Admission;
use crate::routes::ApiState;

pub async fn request_logging(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = tokio::time::Instant::now();

    let response = next.run(request).await;

    info!(
        %method,
        %uri,
        status = response.status().as_u16(),
        elapsed = ?start.elapsed(),
        "request handled"
    );

    response
}

/// 限流中间件，被限流的请求直接返回429
///
/// 限流存储不可用时放行请求。
pub async fn rate_limit(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    match state.governor.admit(1).await {
        Ok(Admission::Admitted { .. }) => next.run(request).await,
        Ok(Admission::Throttled { count, limit }) => {
            ApiError::from(McuError::RateLimitExceeded {
                observed: count,
                limit,
            })
            .into_response()
        }
        Err(e) => {
            warn!(error = %e, "rate store unavailable, admitting request");
            next.run(request).await
        }
    }
}

pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

pub fn trace_layer(
) -> TraceLayer<tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>>
{
    TraceLayer::new_for_http()
}
