use thiserror::Error;

/// 录制调度引擎错误类型定义
#[derive(Debug, Error)]
pub enum McuError {
    /// 消息代理不可达，端点会被标记为不健康并在下次轮询时重试
    #[error("队列 {queue} 的代理端点 {endpoint} 暂时不可用: {message}")]
    TransientQueue {
        queue: String,
        endpoint: String,
        message: String,
    },

    /// 录制执行失败，交给重试控制器
    #[error("任务 {job_id} 执行失败: {message}")]
    JobExecution { job_id: String, message: String },

    /// 重试预算耗尽
    #[error("任务 {job_id} 执行 {attempts} 次后终止")]
    JobTerminal { job_id: String, attempts: u32 },

    #[error("加入集群失败: {0}")]
    ClusterJoin(String),

    #[error("上报负载失败: {0}")]
    ClusterLoadReport(String),

    #[error("集群注册信息已丢失: {0}")]
    ClusterMembershipLost(String),

    #[error("请求被限流: 当前 {observed}, 上限 {limit}")]
    RateLimitExceeded { observed: i64, limit: i64 },

    #[error("队列未找到: {0}")]
    QueueNotFound(String),

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("限流存储错误: {0}")]
    RateStore(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl McuError {
    pub fn job_execution(job_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::JobExecution {
            job_id: job_id.into(),
            message: message.into(),
        }
    }

    /// 是否属于组件内部自行重试的可恢复错误
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TransientQueue { .. }
                | Self::ClusterJoin(_)
                | Self::ClusterLoadReport(_)
                | Self::Network(_)
                | Self::MessageQueue(_)
        )
    }
}

/// 统一的Result类型
pub type McuResult<T> = std::result::Result<T, McuError>;
