use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use serde::Serialize;
use tracing::{debug, error, warn};

use mcu_core::{
    BrokerClient, BrokerEndpoint, DeadLetterSink, Job, JobOutcome, McuError, MonitorEvent,
    PostProcessTask,
};

/// 任务结束后通知下游
///
/// 成功时投递后处理任务并发送监控事件，失败时只发送监控事件。
/// 发布失败只记录日志，不重试。
pub struct PostProcessNotifier {
    broker: Arc<dyn BrokerClient>,
    endpoints: Vec<BrokerEndpoint>,
    post_process_queue: String,
    monitor_queue: String,
    node: String,
}

impl PostProcessNotifier {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        endpoints: Vec<BrokerEndpoint>,
        post_process_queue: impl Into<String>,
        monitor_queue: impl Into<String>,
        node: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            endpoints,
            post_process_queue: post_process_queue.into(),
            monitor_queue: monitor_queue.into(),
            node: node.into(),
        }
    }

    pub async fn notify_success(&self, job: &Job, outcome: &JobOutcome) {
        let task = PostProcessTask::from_job(
            job,
            outcome.output.clone(),
            self.node.as_str(),
            outcome.duration_ms,
        );
        self.publish(&self.post_process_queue, &task).await;

        let event = MonitorEvent::job_succeeded(&self.node, job, outcome.duration_ms);
        self.publish(&self.monitor_queue, &event).await;
    }

    pub async fn notify_failure(&self, job: &Job, attempts: u32, error: &str) {
        let event = MonitorEvent::job_failed(&self.node, job, attempts, error);
        self.publish(&self.monitor_queue, &event).await;
    }

    pub async fn publish_event(&self, event: &MonitorEvent) {
        self.publish(&self.monitor_queue, event).await;
    }

    /// 依次尝试各端点，第一个成功即返回
    async fn publish<T: Serialize>(&self, queue: &str, message: &T) -> bool {
        let body = match serde_json::to_vec(message) {
            Ok(body) => body,
            Err(e) => {
                warn!(queue, error = %e, "failed to serialize notification");
                return false;
            }
        };

        for endpoint in &self.endpoints {
            match self.broker.publish(endpoint, queue, &body).await {
                Ok(()) => {
                    debug!(queue, endpoint = endpoint.id(), "notification published");
                    return true;
                }
                Err(e) => {
                    warn!(queue, endpoint = endpoint.id(), error = %e, "failed to publish notification");
                }
            }
        }

        if self.endpoints.is_empty() {
            warn!(queue, "no endpoint configured for notifications, message dropped");
        }
        false
    }
}

/// 记录死信并发送失败事件，任务不再重试
#[async_trait]
impl DeadLetterSink for PostProcessNotifier {
    async fn dead_letter(&self, job: &Job, attempts: u32, cause: &McuError) {
        counter!("mcu_jobs_dead_lettered_total", "queue" => job.queue.clone()).increment(1);
        let terminal = McuError::JobTerminal {
            job_id: job.id.clone(),
            attempts,
        };
        error!(
            job_id = %job.id,
            queue = %job.queue,
            attempts,
            payload = %job.payload,
            error = %cause,
            "dead letter: {}",
            terminal
        );
        self.notify_failure(job, attempts, &format!("{terminal}: {cause}"))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcu_infrastructure::SimulatedBroker;
    use serde_json::json;
    use std::time::Duration;

    fn endpoint(host: &str) -> BrokerEndpoint {
        BrokerEndpoint::new(
            "guest:guest",
            format!("amqp://{host}:5672"),
            format!("http://{host}:15672/api/health/checks/port-listener/5672"),
        )
    }

    #[tokio::test]
    async fn test_success_publishes_task_and_event() {
        let broker = Arc::new(SimulatedBroker::new(Duration::ZERO));
        let notifier = PostProcessNotifier::new(
            broker.clone(),
            vec![endpoint("a")],
            "cloudproc",
            "monitor",
            "10.0.0.1:12009",
        );
        let job = Job::new("live", json!({"room": 7}));
        let outcome = JobOutcome {
            output: Some(json!({"file": "/data/7.mp4"})),
            duration_ms: 1200,
        };

        notifier.notify_success(&job, &outcome).await;

        let tasks = broker.published("cloudproc").await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0]["job_id"], job.id.as_str());
        assert_eq!(tasks[0]["output"]["file"], "/data/7.mp4");

        let events = broker.published("monitor").await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["event"]["type"], "job_succeeded");
    }

    #[tokio::test]
    async fn test_publish_falls_back_to_next_endpoint() {
        let broker = Arc::new(SimulatedBroker::new(Duration::ZERO));
        let down = endpoint("down");
        broker.set_failing(&down, true);
        let notifier = PostProcessNotifier::new(
            broker.clone(),
            vec![down, endpoint("up")],
            "cloudproc",
            "monitor",
            "node",
        );

        notifier
            .notify_failure(&Job::new("live", json!({})), 1, "recorder crashed")
            .await;

        let events = broker.published("monitor").await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["event"]["type"], "job_failed");
        assert_eq!(events[0]["event"]["error"], "recorder crashed");
        assert!(broker.published("cloudproc").await.is_empty());
    }

    #[tokio::test]
    async fn test_all_endpoints_down_is_not_fatal() {
        let broker = Arc::new(SimulatedBroker::new(Duration::ZERO));
        let down = endpoint("down");
        broker.set_failing(&down, true);
        let notifier =
            PostProcessNotifier::new(broker.clone(), vec![down], "cloudproc", "monitor", "node");

        notifier
            .notify_success(&Job::new("live", json!({})), &JobOutcome::default())
            .await;
        assert!(broker.published("monitor").await.is_empty());
    }

    #[tokio::test]
    async fn test_dead_letter_emits_job_failed() {
        let broker = Arc::new(SimulatedBroker::new(Duration::ZERO));
        let notifier =
            PostProcessNotifier::new(broker.clone(), vec![endpoint("a")], "cloudproc", "monitor", "node");
        let job = Job::new("live", json!({"room": 9}));

        notifier
            .dead_letter(&job, 2, &McuError::job_execution(&job.id, "exit status 1"))
            .await;

        let events = broker.published("monitor").await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["event"]["type"], "job_failed");
        assert_eq!(events[0]["event"]["attempts"], 2);
        assert!(broker.published("cloudproc").await.is_empty());
    }
}
