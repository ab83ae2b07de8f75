use async_trait::async_trait;

use crate::{
    models::{BrokerEndpoint, Job},
    McuError, McuResult,
};

/// 消息代理抽象接口
///
/// 真实实现连接RabbitMQ，mock模式下使用进程内模拟器。
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// 从指定端点的队列取出一个任务，取出即确认
    async fn fetch(&self, endpoint: &BrokerEndpoint, queue: &str) -> McuResult<Option<Job>>;

    /// 发布消息到指定端点的队列
    async fn publish(&self, endpoint: &BrokerEndpoint, queue: &str, body: &[u8]) -> McuResult<()>;

    /// 获取队列中的消息数量
    async fn queue_depth(&self, endpoint: &BrokerEndpoint, queue: &str) -> McuResult<u32>;
}

/// 代理端点健康检查
#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check(&self, endpoint: &BrokerEndpoint) -> bool;
}

/// 把任务投递回来源队列
#[async_trait]
pub trait JobSink: Send + Sync {
    async fn requeue(&self, job: Job) -> McuResult<()>;
}

/// 任务的终态失败出口：死信日志与失败事件
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// `attempts` 为该任务的总执行次数
    async fn dead_letter(&self, job: &Job, attempts: u32, cause: &McuError);
}
