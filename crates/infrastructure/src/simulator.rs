//! 进程内模拟器
//!
//! mock模式下替代RabbitMQ、注册中心和Redis，按配置的延迟返回预置响应。
//! 测试中也作为替身使用。

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use mcu_core::{
    BrokerClient, BrokerEndpoint, ClusterNode, HealthChecker, Job, LoadSample, McuError, McuResult,
    RateStore, RegistryClient,
};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

async fn respond_after(delay: Duration) {
    if !delay.is_zero() {
        sleep(delay).await;
    }
}

/// 模拟消息代理
#[derive(Default)]
pub struct SimulatedBroker {
    response_delay: Duration,
    queues: Mutex<HashMap<String, VecDeque<Job>>>,
    published: Mutex<HashMap<String, Vec<serde_json::Value>>>,
    fetches: Mutex<HashMap<String, usize>>,
    failing: StdMutex<HashSet<String>>,
}

impl SimulatedBroker {
    pub fn new(response_delay: Duration) -> Self {
        Self {
            response_delay,
            ..Default::default()
        }
    }

    /// 向队列预置 `count` 个录制任务
    pub async fn seed(&self, queue: &str, count: usize) {
        let mut queues = self.queues.lock().await;
        let pending = queues.entry(queue.to_string()).or_default();
        for index in 0..count {
            pending.push_back(Job::new(
                queue,
                json!({ "room": format!("mock-room-{index}"), "mock": true }),
            ));
        }
    }

    pub async fn push(&self, job: Job) {
        let mut queues = self.queues.lock().await;
        queues.entry(job.queue.clone()).or_default().push_back(job);
    }

    pub async fn pending(&self, queue: &str) -> usize {
        self.queues.lock().await.get(queue).map_or(0, VecDeque::len)
    }

    /// 发布到某个队列的原始消息
    pub async fn published(&self, queue: &str) -> Vec<serde_json::Value> {
        self.published
            .lock()
            .await
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }

    /// 成功取出任务的次数
    pub async fn fetch_count(&self, queue: &str) -> usize {
        self.fetches.lock().await.get(queue).copied().unwrap_or(0)
    }

    /// 让端点的所有调用失败，健康检查也返回不健康
    pub fn set_failing(&self, endpoint: &BrokerEndpoint, failing: bool) {
        if let Ok(mut set) = self.failing.lock() {
            if failing {
                set.insert(endpoint.id().to_string());
            } else {
                set.remove(endpoint.id());
            }
        }
    }

    fn is_failing(&self, endpoint: &BrokerEndpoint) -> bool {
        self.failing
            .lock()
            .map(|set| set.contains(endpoint.id()))
            .unwrap_or(false)
    }

    fn ensure_reachable(&self, endpoint: &BrokerEndpoint, queue: &str) -> McuResult<()> {
        if self.is_failing(endpoint) {
            return Err(McuError::TransientQueue {
                queue: queue.to_string(),
                endpoint: endpoint.id().to_string(),
                message: "simulated outage".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerClient for SimulatedBroker {
    async fn fetch(&self, endpoint: &BrokerEndpoint, queue: &str) -> McuResult<Option<Job>> {
        respond_after(self.response_delay).await;
        self.ensure_reachable(endpoint, queue)?;

        let job = self
            .queues
            .lock()
            .await
            .get_mut(queue)
            .and_then(VecDeque::pop_front);
        if job.is_some() {
            *self.fetches.lock().await.entry(queue.to_string()).or_default() += 1;
        }
        Ok(job)
    }

    async fn publish(&self, endpoint: &BrokerEndpoint, queue: &str, body: &[u8]) -> McuResult<()> {
        respond_after(self.response_delay).await;
        self.ensure_reachable(endpoint, queue)?;

        let value: serde_json::Value = serde_json::from_slice(body)?;
        self.published
            .lock()
            .await
            .entry(queue.to_string())
            .or_default()
            .push(value);

        let job = Job::from_delivery(queue, body)?;
        self.push(job).await;
        debug!(queue, "simulated publish");
        Ok(())
    }

    async fn queue_depth(&self, endpoint: &BrokerEndpoint, queue: &str) -> McuResult<u32> {
        respond_after(self.response_delay).await;
        self.ensure_reachable(endpoint, queue)?;
        Ok(self.pending(queue).await as u32)
    }
}

#[async_trait]
impl HealthChecker for SimulatedBroker {
    async fn check(&self, endpoint: &BrokerEndpoint) -> bool {
        !self.is_failing(endpoint)
    }
}

/// 模拟注册中心
#[derive(Default)]
pub struct SimulatedRegistry {
    response_delay: Duration,
    join_failures: AtomicU32,
    report_failures: AtomicU32,
    forgotten: AtomicBool,
    joined: AtomicBool,
    join_attempts: Mutex<Vec<Instant>>,
    reports: Mutex<Vec<LoadSample>>,
    departures: AtomicU32,
}

impl SimulatedRegistry {
    pub fn new(response_delay: Duration) -> Self {
        Self {
            response_delay,
            ..Default::default()
        }
    }

    /// 接下来的 `count` 次加入请求失败
    pub fn fail_next_joins(&self, count: u32) {
        self.join_failures.store(count, Ordering::SeqCst);
    }

    /// 接下来的 `count` 次负载上报失败
    pub fn fail_next_reports(&self, count: u32) {
        self.report_failures.store(count, Ordering::SeqCst);
    }

    /// 模拟注册中心丢失本节点
    pub fn forget_node(&self) {
        self.forgotten.store(true, Ordering::SeqCst);
        self.joined.store(false, Ordering::SeqCst);
    }

    pub fn is_joined(&self) -> bool {
        self.joined.load(Ordering::SeqCst)
    }

    pub async fn join_attempts(&self) -> Vec<Instant> {
        self.join_attempts.lock().await.clone()
    }

    pub async fn reports(&self) -> Vec<LoadSample> {
        self.reports.lock().await.clone()
    }

    pub fn departures(&self) -> u32 {
        self.departures.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl RegistryClient for SimulatedRegistry {
    async fn join(&self, node: &ClusterNode) -> McuResult<()> {
        respond_after(self.response_delay).await;
        self.join_attempts.lock().await.push(Instant::now());

        if Self::take_failure(&self.join_failures) {
            return Err(McuError::ClusterJoin(format!(
                "simulated registry refused {}",
                node.node_key()
            )));
        }

        self.forgotten.store(false, Ordering::SeqCst);
        self.joined.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn report_load(&self, node: &ClusterNode, sample: &LoadSample) -> McuResult<()> {
        respond_after(self.response_delay).await;

        if self.forgotten.load(Ordering::SeqCst) {
            return Err(McuError::ClusterMembershipLost(node.node_key()));
        }

        if Self::take_failure(&self.report_failures) {
            return Err(McuError::ClusterLoadReport("simulated timeout".to_string()));
        }

        self.reports.lock().await.push(sample.clone());
        Ok(())
    }

    async fn leave(&self, _node: &ClusterNode) -> McuResult<()> {
        respond_after(self.response_delay).await;
        self.joined.store(false, Ordering::SeqCst);
        self.departures.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 进程内限流计数，只在单进程内共享
#[derive(Default)]
pub struct InMemoryRateStore {
    counters: StdMutex<HashMap<String, (i64, Instant)>>,
    depths: StdMutex<HashMap<String, (u64, Instant)>>,
}

impl InMemoryRateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateStore for InMemoryRateStore {
    async fn incr_window(&self, key: &str, weight: i64, ttl: Duration) -> McuResult<i64> {
        let now = Instant::now();
        let mut counters = self
            .counters
            .lock()
            .map_err(|e| McuError::RateStore(e.to_string()))?;
        let entry = counters.entry(key.to_string()).or_insert((0, now + ttl));
        if entry.1 <= now {
            *entry = (0, now + ttl);
        }
        entry.0 += weight;
        entry.1 = now + ttl;
        Ok(entry.0)
    }

    async fn queue_depth(&self, key: &str) -> McuResult<u64> {
        let now = Instant::now();
        let depths = self
            .depths
            .lock()
            .map_err(|e| McuError::RateStore(e.to_string()))?;
        Ok(depths
            .get(key)
            .filter(|(_, expires)| *expires > now)
            .map_or(0, |(depth, _)| *depth))
    }

    async fn set_queue_depth(&self, key: &str, depth: u64, ttl: Duration) -> McuResult<()> {
        let mut depths = self
            .depths
            .lock()
            .map_err(|e| McuError::RateStore(e.to_string()))?;
        depths.insert(key.to_string(), (depth, Instant::now() + ttl));
        Ok(())
    }
}
