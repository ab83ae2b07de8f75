use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use metrics::counter;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::timeout;
use tower::ServiceBuilder;
use tracing::{info, warn};

use mcu_core::{AppConfig, BrokerClient, Job, QueueSpec};

use crate::error::{ApiError, ApiResult};
use crate::middleware::{cors_layer, rate_limit, request_logging, trace_layer};
use crate::rate_governor::RateGovernor;
use crate::response::ApiResponse;

/// API应用状态
#[derive(Clone)]
pub struct ApiState {
    pub service: String,
    pub queues: Arc<HashMap<String, QueueSpec>>,
    pub broker: Arc<dyn BrokerClient>,
    pub governor: Arc<RateGovernor>,
    pub publish_timeout: Duration,
}

impl ApiState {
    pub fn new(
        config: &AppConfig,
        broker: Arc<dyn BrokerClient>,
        governor: Arc<RateGovernor>,
    ) -> Self {
        let queues = config
            .queues
            .iter()
            .filter(|q| q.enabled)
            .map(|q| (q.name.clone(), q.clone()))
            .collect();
        Self {
            service: config.service.clone(),
            queues: Arc::new(queues),
            broker,
            governor,
            publish_timeout: Duration::from_secs(config.api.request_timeout_seconds),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubmittedJob {
    pub job_id: String,
    pub queue: String,
    pub endpoint: String,
}

/// 创建API路由
///
/// 只有任务提交接口经过限流，健康检查不计数。
pub fn create_routes(state: ApiState) -> Router {
    let jobs = Router::new()
        .route("/api/v1/jobs/{queue}", post(submit_job))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .route("/health", get(health_check))
        .merge(jobs)
        .layer(
            ServiceBuilder::new()
                .layer(trace_layer())
                .layer(cors_layer())
                .layer(middleware::from_fn(request_logging)),
        )
        .with_state(state)
}

pub async fn health_check(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": state.service,
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// 把请求体作为任务payload发布到队列，依次尝试各个端点
pub async fn submit_job(
    State(state): State<ApiState>,
    Path(queue): Path<String>,
    Json(payload): Json<Value>,
) -> ApiResult<(StatusCode, ApiResponse<SubmittedJob>)> {
    let target = state
        .queues
        .get(&queue)
        .ok_or_else(|| ApiError::QueueNotFound(queue.clone()))?;
    if !payload.is_object() {
        return Err(ApiError::BadRequest("任务内容必须是JSON对象".to_string()));
    }

    let job = Job::new(&target.name, payload);
    let body = job.to_bytes()?;

    for endpoint in &target.endpoints {
        match timeout(
            state.publish_timeout,
            state.broker.publish(endpoint, &target.name, &body),
        )
        .await
        {
            Ok(Ok(())) => {
                counter!("mcu_api_jobs_submitted_total", "queue" => target.name.clone()).increment(1);
                info!(job_id = %job.id, queue = %target.name, endpoint = %endpoint.id(), "job submitted");
                let submitted = SubmittedJob {
                    job_id: job.id.clone(),
                    queue: target.name.clone(),
                    endpoint: endpoint.id().to_string(),
                };
                return Ok((StatusCode::ACCEPTED, ApiResponse::success(submitted)));
            }
            Ok(Err(e)) => {
                warn!(queue = %target.name, endpoint = %endpoint.id(), error = %e, "publish failed, trying next endpoint");
            }
            Err(_) => {
                warn!(queue = %target.name, endpoint = %endpoint.id(), timeout = ?state.publish_timeout, "publish timed out, trying next endpoint");
            }
        }
    }

    Err(ApiError::Unavailable(format!("队列 {} 的所有端点都不可用", target.name)))
}
