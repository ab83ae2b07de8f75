use async_trait::async_trait;

use crate::{
    models::{Job, JobOutcome},
    McuResult,
};

/// 一个槽位持有的录制会话资源，例如录制子进程
#[async_trait]
pub trait RecordingSession: Send {
    async fn record(&mut self, job: &Job) -> McuResult<JobOutcome>;

    /// 释放底层资源
    async fn close(&mut self);
}

/// 按槽位创建录制会话
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, slot_id: usize) -> McuResult<Box<dyn RecordingSession>>;
}
