use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mcu_core::McuError;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("录制服务错误: {0}")]
    Mcu(#[from] McuError),

    #[error("队列 {0} 不存在或未启用")]
    QueueNotFound(String),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("服务暂时不可用: {0}")]
    Unavailable(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::QueueNotFound(_) => (StatusCode::NOT_FOUND, "QUEUE_NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
            ApiError::Mcu(McuError::RateLimitExceeded { .. }) => {
                (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED")
            }
            ApiError::Mcu(McuError::QueueNotFound(_)) => (StatusCode::NOT_FOUND, "QUEUE_NOT_FOUND"),
            ApiError::Mcu(McuError::Serialization(_)) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Mcu(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        if status.is_server_error() {
            error!(code, error = %self, "request failed");
        }

        let body = Json(json!({
            "success": false,
            "error": {
                "code": code,
                "message": self.to_string(),
            },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
