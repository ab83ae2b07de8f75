use std::sync::Arc;

use metrics::counter;
use tracing::info;

use mcu_core::{DeadLetterSink, Job, JobOutcome, McuError, McuResult};
use mcu_dispatcher::{RetryController, RetryDecision};

use crate::notifier::PostProcessNotifier;

/// 根据执行结果决定任务的去向：后处理、重试或死信
pub struct CompletionRouter {
    retry: Arc<RetryController>,
    notifier: Arc<PostProcessNotifier>,
}

impl CompletionRouter {
    pub fn new(retry: Arc<RetryController>, notifier: Arc<PostProcessNotifier>) -> Self {
        Self { retry, notifier }
    }

    pub async fn route(&self, job: Job, result: McuResult<JobOutcome>) {
        match result {
            Ok(outcome) => {
                counter!("mcu_jobs_completed_total", "queue" => job.queue.clone()).increment(1);
                info!(
                    job_id = %job.id,
                    queue = %job.queue,
                    attempt = job.attempt,
                    duration_ms = outcome.duration_ms,
                    "job completed"
                );
                self.notifier.notify_success(&job, &outcome).await;
            }
            Err(cause) => {
                if let RetryDecision::Terminal { attempts } = self.retry.on_failure(job.clone()) {
                    self.dead_letter(&job, attempts, &cause).await;
                }
            }
        }
    }

    pub async fn dead_letter(&self, job: &Job, attempts: u32, cause: &McuError) {
        self.notifier.dead_letter(job, attempts, cause).await;
    }
}
