use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use rand::Rng;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use mcu_core::{
    BrokerClient, BrokerEndpoint, ClusterState, Job, JobSink, McuError, McuResult, QueueSpec,
};
use mcu_infrastructure::EndpointHealth;

/// 空轮询时两次尝试之间的间隔上限
const IDLE_STEP: Duration = Duration::from_millis(100);

/// 任务执行期间占用的队列名额，释放时归还
#[derive(Debug)]
pub struct QueuePermit {
    queue: String,
    in_flight: Arc<AtomicUsize>,
}

impl QueuePermit {
    pub fn queue(&self) -> &str {
        &self.queue
    }
}

impl Drop for QueuePermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 已出队的任务及其队列名额
#[derive(Debug)]
pub struct DispatchedJob {
    pub job: Job,
    pub permit: QueuePermit,
}

struct QueueSlot {
    spec: QueueSpec,
    in_flight: Arc<AtomicUsize>,
    last_served: Mutex<Option<Instant>>,
}

impl QueueSlot {
    fn new(spec: QueueSpec) -> Self {
        Self {
            spec,
            in_flight: Arc::new(AtomicUsize::new(0)),
            last_served: Mutex::new(None),
        }
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn last_served(&self) -> Option<Instant> {
        self.last_served.lock().ok().and_then(|served| *served)
    }

    fn mark_served(&self) {
        if let Ok(mut served) = self.last_served.lock() {
            *served = Some(Instant::now());
        }
    }

    /// 名额检查与占用是同一个原子操作
    fn try_acquire(&self) -> Option<QueuePermit> {
        self.in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                self.spec.has_capacity(n).then_some(n + 1)
            })
            .ok()
            .map(|_| QueuePermit {
                queue: self.spec.name.clone(),
                in_flight: self.in_flight.clone(),
            })
    }
}

/// 按优先级从各逻辑队列拉取任务
///
/// 优先级高的队列先服务；同优先级内等待最久的先服务。
/// 停用、名额用满或所有端点都不健康的队列会被跳过。
pub struct PriorityDispatcher {
    queues: Vec<QueueSlot>,
    index: HashMap<String, usize>,
    broker: Arc<dyn BrokerClient>,
    health: EndpointHealth,
    cluster_state: watch::Receiver<ClusterState>,
    poll_interval: Duration,
}

impl PriorityDispatcher {
    pub fn new(
        queues: Vec<QueueSpec>,
        broker: Arc<dyn BrokerClient>,
        health: EndpointHealth,
        cluster_state: watch::Receiver<ClusterState>,
        poll_interval: Duration,
    ) -> Self {
        let index = queues
            .iter()
            .enumerate()
            .map(|(i, spec)| (spec.name.clone(), i))
            .collect();
        Self {
            queues: queues.into_iter().map(QueueSlot::new).collect(),
            index,
            broker,
            health,
            cluster_state,
            poll_interval,
        }
    }

    /// 当前执行中的任务数，未知队列返回0
    pub fn in_flight(&self, queue: &str) -> usize {
        self.index
            .get(queue)
            .map_or(0, |&i| self.queues[i].in_flight())
    }

    pub fn queue(&self, name: &str) -> Option<&QueueSpec> {
        self.index.get(name).map(|&i| &self.queues[i].spec)
    }

    /// 拉取下一个任务
    ///
    /// 节点未加入集群时不拉取。在一个轮询周期内没有拿到任务则返回 `None`，
    /// 调用方借此检查停机信号。
    pub async fn next(&self) -> Option<DispatchedJob> {
        let deadline = Instant::now() + self.poll_interval;

        if !self.cluster_state.borrow().is_joined() {
            let mut state = self.cluster_state.clone();
            let joined = timeout(self.poll_interval, state.wait_for(|s| s.is_joined()))
                .await
                .is_ok_and(|r| r.is_ok());
            if !joined {
                return None;
            }
        }

        loop {
            if let Some(dispatched) = self.try_dispatch().await {
                return Some(dispatched);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            sleep(IDLE_STEP.min(deadline - now)).await;
        }
    }

    /// 按选择顺序排列的可用队列下标
    fn selection_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = self
            .queues
            .iter()
            .enumerate()
            .filter(|(_, q)| q.spec.enabled && q.spec.has_capacity(q.in_flight()))
            .map(|(i, _)| i)
            .collect();
        order.sort_by_key(|&i| {
            let q = &self.queues[i];
            (Reverse(q.spec.priority), q.last_served())
        });
        order
    }

    fn healthy_endpoints<'a>(&self, spec: &'a QueueSpec) -> Vec<&'a BrokerEndpoint> {
        spec.endpoints
            .iter()
            .filter(|e| self.health.is_healthy(e))
            .collect()
    }

    /// 按顺序尝试每个可用队列一次
    pub async fn try_dispatch(&self) -> Option<DispatchedJob> {
        for i in self.selection_order() {
            let slot = &self.queues[i];
            let endpoints = self.healthy_endpoints(&slot.spec);
            if endpoints.is_empty() {
                debug!(queue = %slot.spec.name, "no healthy endpoint, skipping queue");
                continue;
            }

            let Some(permit) = slot.try_acquire() else {
                continue;
            };

            let pick = rand::rng().random_range(0..endpoints.len());
            let endpoint = endpoints[pick];

            match self.broker.fetch(endpoint, &slot.spec.name).await {
                Ok(Some(job)) => {
                    slot.mark_served();
                    counter!("mcu_jobs_dispatched_total", "queue" => slot.spec.name.clone())
                        .increment(1);
                    debug!(
                        job_id = %job.id,
                        queue = %slot.spec.name,
                        attempt = job.attempt,
                        "dispatched job"
                    );
                    return Some(DispatchedJob { job, permit });
                }
                Ok(None) => {}
                Err(e) if e.is_recoverable() => {
                    warn!(
                        queue = %slot.spec.name,
                        endpoint = endpoint.id(),
                        error = %e,
                        "broker endpoint unavailable, marking unhealthy"
                    );
                    self.health.mark(endpoint, false);
                }
                Err(e) => {
                    warn!(queue = %slot.spec.name, error = %e, "failed to fetch job");
                }
            }
        }
        None
    }
}

#[async_trait]
impl JobSink for PriorityDispatcher {
    async fn requeue(&self, job: Job) -> McuResult<()> {
        let spec = self
            .queue(&job.queue)
            .ok_or_else(|| McuError::QueueNotFound(job.queue.clone()))?;

        let mut endpoints = self.healthy_endpoints(spec);
        if endpoints.is_empty() {
            endpoints = spec.endpoints.iter().collect();
        }

        let body = job.to_bytes()?;
        let mut last_error = McuError::MessageQueue(format!("队列 {} 没有可用端点", spec.name));
        for endpoint in endpoints {
            match self.broker.publish(endpoint, &spec.name, &body).await {
                Ok(()) => {
                    debug!(job_id = %job.id, queue = %spec.name, attempt = job.attempt, "job requeued");
                    return Ok(());
                }
                Err(e) => {
                    warn!(queue = %spec.name, endpoint = endpoint.id(), error = %e, "requeue attempt failed");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcu_infrastructure::SimulatedBroker;
    use serde_json::json;

    fn endpoint(host: &str) -> BrokerEndpoint {
        BrokerEndpoint::new(
            "guest:guest",
            format!("amqp://{host}:5672"),
            format!("http://{host}:15672/api/health/checks/port-listener/5672"),
        )
    }

    fn joined() -> watch::Receiver<ClusterState> {
        let (_tx, rx) = watch::channel(ClusterState::Joined);
        rx
    }

    fn dispatcher(queues: Vec<QueueSpec>, broker: Arc<SimulatedBroker>) -> PriorityDispatcher {
        PriorityDispatcher::new(
            queues,
            broker,
            EndpointHealth::new(),
            joined(),
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn test_limit_is_enforced_until_permit_released() {
        let broker = Arc::new(SimulatedBroker::new(Duration::ZERO));
        broker.seed("live", 5).await;
        let d = dispatcher(
            vec![QueueSpec::new("live", 2, 0).with_endpoint(endpoint("a"))],
            broker.clone(),
        );

        let first = d.try_dispatch().await.unwrap();
        let _second = d.try_dispatch().await.unwrap();
        assert_eq!(d.in_flight("live"), 2);
        assert!(d.try_dispatch().await.is_none());

        drop(first);
        assert_eq!(d.in_flight("live"), 1);
        assert!(d.try_dispatch().await.is_some());
        assert_eq!(broker.fetch_count("live").await, 3);
    }

    #[tokio::test]
    async fn test_equal_priority_prefers_longest_wait() {
        let broker = Arc::new(SimulatedBroker::new(Duration::ZERO));
        broker.seed("a", 3).await;
        broker.seed("b", 3).await;
        let d = dispatcher(
            vec![
                QueueSpec::new("a", -1, 1).with_endpoint(endpoint("x")),
                QueueSpec::new("b", -1, 1).with_endpoint(endpoint("x")),
            ],
            broker,
        );

        let queues: Vec<String> = [
            d.try_dispatch().await.unwrap(),
            d.try_dispatch().await.unwrap(),
            d.try_dispatch().await.unwrap(),
        ]
        .iter()
        .map(|j| j.job.queue.clone())
        .collect();
        assert_eq!(queues, vec!["a", "b", "a"]);
    }

    #[tokio::test]
    async fn test_transient_failure_marks_endpoint_unhealthy() {
        let broker = Arc::new(SimulatedBroker::new(Duration::ZERO));
        broker.seed("live", 1).await;
        let down = endpoint("down");
        broker.set_failing(&down, true);
        let d = dispatcher(
            vec![QueueSpec::new("live", -1, 0).with_endpoint(down.clone())],
            broker,
        );

        assert!(d.try_dispatch().await.is_none());
        assert!(!d.health.is_healthy(&down));
        assert_eq!(d.in_flight("live"), 0);
    }

    #[tokio::test]
    async fn test_next_waits_for_cluster_join() {
        let broker = Arc::new(SimulatedBroker::new(Duration::ZERO));
        broker.seed("live", 1).await;
        let (tx, rx) = watch::channel(ClusterState::Joining);
        let d = PriorityDispatcher::new(
            vec![QueueSpec::new("live", -1, 0).with_endpoint(endpoint("a"))],
            broker.clone(),
            EndpointHealth::new(),
            rx,
            Duration::from_millis(500),
        );

        assert!(d.next().await.is_none());
        assert_eq!(broker.fetch_count("live").await, 0);

        let join = tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            tx.send_replace(ClusterState::Joined);
            tx
        });
        let dispatched = d.next().await.expect("job after join");
        assert_eq!(dispatched.job.queue, "live");
        drop(join.await.unwrap());
    }

    #[tokio::test]
    async fn test_requeue_unknown_queue() {
        let broker = Arc::new(SimulatedBroker::new(Duration::ZERO));
        let d = dispatcher(vec![], broker);
        let err = d
            .requeue(Job::new("missing", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, McuError::QueueNotFound(_)));
    }
}
