use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use metrics::counter;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use mcu_core::{DeadLetterSink, Job, JobSink, McuError};

/// 一次失败之后的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// 在 `delay` 之后以第 `attempt` 次重试重新入队
    Retry { attempt: u32, delay: Duration },
    /// 重试次数用尽，`attempts` 为总执行次数
    Terminal { attempts: u32 },
}

impl RetryDecision {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RetryDecision::Terminal { .. })
    }
}

type PendingRetries = Arc<Mutex<HashMap<String, Job>>>;

/// 固定退避表的重试控制
///
/// 第 `n` 次重试等待 `schedule[n]`，超出表长度后不再重试。
/// 等待中的重试由 [`flush`](Self::flush) 在停机时立即投递。
pub struct RetryController {
    schedule: Vec<Duration>,
    sink: Arc<dyn JobSink>,
    dead_letters: Arc<dyn DeadLetterSink>,
    timers: TaskTracker,
    flush: CancellationToken,
    pending: PendingRetries,
}

impl RetryController {
    pub fn new(
        schedule: Vec<Duration>,
        sink: Arc<dyn JobSink>,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        Self {
            schedule,
            sink,
            dead_letters,
            timers: TaskTracker::new(),
            flush: CancellationToken::new(),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 尚未投递回队列的重试数量
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// 只计算决策，不产生副作用
    pub fn decide(&self, job: &Job) -> RetryDecision {
        let attempt = job.attempt as usize;
        match self.schedule.get(attempt) {
            Some(&delay) => RetryDecision::Retry {
                attempt: job.attempt + 1,
                delay,
            },
            None => RetryDecision::Terminal {
                attempts: job.attempt + 1,
            },
        }
    }

    /// 处理一次执行失败
    ///
    /// 需要重试时由定时任务在延迟之后投递回来源队列，调用方不会被阻塞。
    /// 返回 `Terminal` 时由调用方走死信路径。
    pub fn on_failure(&self, job: Job) -> RetryDecision {
        let decision = self.decide(&job);
        match decision {
            RetryDecision::Retry { attempt, delay } => {
                counter!("mcu_jobs_retried_total", "queue" => job.queue.clone()).increment(1);
                info!(
                    "任务 {} 将在 {:?} 后进行第 {} 次重试",
                    job.id, delay, attempt
                );
                self.schedule_retry(job.next_attempt(), delay);
            }
            RetryDecision::Terminal { attempts } => {
                debug!("任务 {} 已执行 {} 次，不再重试", job.id, attempts);
            }
        }
        decision
    }

    fn schedule_retry(&self, retry: Job, delay: Duration) {
        let id = retry.id.clone();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), retry.clone());

        let sink = self.sink.clone();
        let dead_letters = self.dead_letters.clone();
        let pending = self.pending.clone();
        let flush = self.flush.clone();
        self.timers.spawn(async move {
            tokio::select! {
                _ = sleep(delay) => {}
                _ = flush.cancelled() => debug!(job_id = %id, "flushing pending retry"),
            }

            let result = sink.requeue(retry.clone()).await;
            // 已被 flush 超时转入死信的任务不再重复处理
            let owned = pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id)
                .is_some();
            match result {
                Ok(()) => debug!(job_id = %id, attempt = retry.attempt, "retry enqueued"),
                Err(e) if owned => {
                    dead_letters.dead_letter(&retry, retry.attempt, &e).await;
                }
                Err(e) => warn!(job_id = %id, error = %e, "late requeue failure ignored"),
            }
        });
    }

    /// 停机时立即投递所有等待中的重试
    ///
    /// 在 `deadline` 内未能投递的任务转入死信。全部投递完成时返回 `true`。
    pub async fn flush(&self, deadline: Duration) -> bool {
        self.flush.cancel();
        self.timers.close();
        let flushed = timeout(deadline, self.timers.wait()).await.is_ok();

        if !flushed {
            let stranded: Vec<Job> = self
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .drain()
                .map(|(_, job)| job)
                .collect();
            for job in stranded {
                let cause = McuError::Internal("停机前未能重新入队".to_string());
                self.dead_letters.dead_letter(&job, job.attempt, &cause).await;
            }
        }
        info!(flushed, "pending retries flushed");
        flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mcu_core::McuResult;
    use serde_json::json;
    use tokio::sync::Mutex as AsyncMutex;
    use tokio::time::Instant;

    #[derive(Default)]
    struct RecordingSink {
        received: AsyncMutex<Vec<(Instant, Job)>>,
    }

    #[async_trait]
    impl JobSink for RecordingSink {
        async fn requeue(&self, job: Job) -> McuResult<()> {
            self.received.lock().await.push((Instant::now(), job));
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl JobSink for FailingSink {
        async fn requeue(&self, job: Job) -> McuResult<()> {
            Err(McuError::QueueNotFound(job.queue))
        }
    }

    /// 投递永远不返回
    struct StuckSink;

    #[async_trait]
    impl JobSink for StuckSink {
        async fn requeue(&self, _job: Job) -> McuResult<()> {
            std::future::pending().await
        }
    }

    #[derive(Default)]
    struct RecordingDeadLetters {
        received: AsyncMutex<Vec<(Job, u32)>>,
    }

    #[async_trait]
    impl DeadLetterSink for RecordingDeadLetters {
        async fn dead_letter(&self, job: &Job, attempts: u32, _cause: &McuError) {
            self.received.lock().await.push((job.clone(), attempts));
        }
    }

    fn default_schedule() -> Vec<Duration> {
        [100, 500, 1000].into_iter().map(Duration::from_millis).collect()
    }

    fn controller(sink: Arc<dyn JobSink>) -> (RetryController, Arc<RecordingDeadLetters>) {
        let dead_letters = Arc::new(RecordingDeadLetters::default());
        let controller = RetryController::new(default_schedule(), sink, dead_letters.clone());
        (controller, dead_letters)
    }

    fn job_at(attempt: u32) -> Job {
        let mut job = Job::new("live", json!({"room": 1}));
        job.attempt = attempt;
        job
    }

    #[test]
    fn test_decide_follows_schedule() {
        let (controller, _) = controller(Arc::new(RecordingSink::default()));

        assert_eq!(
            controller.decide(&job_at(0)),
            RetryDecision::Retry { attempt: 1, delay: Duration::from_millis(100) }
        );
        assert_eq!(
            controller.decide(&job_at(1)),
            RetryDecision::Retry { attempt: 2, delay: Duration::from_millis(500) }
        );
        assert_eq!(
            controller.decide(&job_at(2)),
            RetryDecision::Retry { attempt: 3, delay: Duration::from_millis(1000) }
        );
        assert_eq!(
            controller.decide(&job_at(3)),
            RetryDecision::Terminal { attempts: 4 }
        );
    }

    #[test]
    fn test_empty_schedule_is_terminal() {
        let controller = RetryController::new(
            Vec::new(),
            Arc::new(RecordingSink::default()),
            Arc::new(RecordingDeadLetters::default()),
        );
        assert!(controller.decide(&job_at(0)).is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_waits_for_delay() {
        let sink = Arc::new(RecordingSink::default());
        let (controller, _) = controller(sink.clone());
        let start = Instant::now();

        let job = job_at(1);
        let decision = controller.on_failure(job.clone());
        assert!(!decision.is_terminal());
        assert_eq!(controller.pending(), 1);

        sleep(Duration::from_millis(499)).await;
        assert!(sink.received.lock().await.is_empty());

        sleep(Duration::from_millis(2)).await;
        let received = sink.received.lock().await;
        assert_eq!(received.len(), 1);
        let (at, retried) = &received[0];
        assert!(*at - start >= Duration::from_millis(500));
        assert_eq!(retried.id, job.id);
        assert_eq!(retried.attempt, 2);
        assert_eq!(retried.queue, "live");
        assert_eq!(controller.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_failure_is_not_requeued() {
        let sink = Arc::new(RecordingSink::default());
        let (controller, _) = controller(sink.clone());

        let decision = controller.on_failure(job_at(3));
        assert_eq!(decision, RetryDecision::Terminal { attempts: 4 });

        sleep(Duration::from_secs(5)).await;
        assert!(sink.received.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_requeue_is_dead_lettered() {
        let (controller, dead_letters) = controller(Arc::new(FailingSink));

        let job = job_at(0);
        controller.on_failure(job.clone());
        sleep(Duration::from_millis(150)).await;

        let received = dead_letters.received.lock().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0.id, job.id);
        assert_eq!(received[0].1, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_requeues_without_waiting_for_delay() {
        let sink = Arc::new(RecordingSink::default());
        let dead_letters = Arc::new(RecordingDeadLetters::default());
        let controller = RetryController::new(
            vec![Duration::from_secs(5)],
            sink.clone(),
            dead_letters.clone(),
        );
        let start = Instant::now();

        let job = job_at(0);
        controller.on_failure(job.clone());
        sleep(Duration::from_secs(1)).await;

        assert!(controller.flush(Duration::from_secs(1)).await);
        assert!(Instant::now() - start < Duration::from_secs(5));

        let received = sink.received.lock().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].1.id, job.id);
        assert_eq!(received[0].1.attempt, 1);
        assert!(dead_letters.received.lock().await.is_empty());
        assert_eq!(controller.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_dead_letters_what_cannot_be_requeued() {
        let (controller, dead_letters) = controller(Arc::new(StuckSink));

        let job = job_at(0);
        controller.on_failure(job.clone());

        assert!(!controller.flush(Duration::from_secs(1)).await);

        let received = dead_letters.received.lock().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0.id, job.id);
        assert_eq!(received[0].1, 1);
        assert_eq!(controller.pending(), 0);
    }
}
