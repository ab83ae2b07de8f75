//! # MCU API 前端
//!
//! 录制集群的HTTP入口，只负责接收录制任务并把它们投递到消息队列。
//!
//! ## 路由
//!
//! - `GET /health`: 健康检查，不经过限流
//! - `POST /api/v1/jobs/{queue}`: 提交录制任务，请求体为任务payload
//!
//! ## 限流
//!
//! 任务提交接口由 [`RateGovernor`] 把关。所有API副本共享同一个固定窗口计数，
//! 每个窗口的上限随录制节点上报的积压深度放大：
//!
//! ```text
//! limit = qps × 窗口秒数 × (1 + qlCoefficient × queue_depth)
//! ```
//!
//! 超过上限的请求返回 `429 Too Many Requests`：
//!
//! ```json
//! {
//!   "success": false,
//!   "error": { "code": "RATE_LIMITED", "message": "请求过于频繁: 当前 11, 上限 10" },
//!   "timestamp": "2024-01-01T00:00:00Z"
//! }
//! ```

pub mod error;
pub mod middleware;
pub mod rate_governor;
pub mod response;
pub mod routes;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

use mcu_core::{McuError, McuResult};

pub use error::{ApiError, ApiResult};
pub use rate_governor::{Admission, RateGovernor};
pub use response::ApiResponse;
pub use routes::{create_routes, ApiState, SubmittedJob};

/// 监听 `bind_address` 直到收到停机信号
pub async fn serve(
    bind_address: &str,
    state: ApiState,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> McuResult<()> {
    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(|e| McuError::Network(format!("绑定地址 {bind_address} 失败: {e}")))?;
    info!(address = %bind_address, "API server listening");

    axum::serve(listener, create_routes(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("API server shutting down");
        })
        .await
        .map_err(|e| McuError::Network(format!("API服务异常退出: {e}")))
}
