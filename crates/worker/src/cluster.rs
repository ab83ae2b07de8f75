use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::gauge;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{error, info, warn};

use mcu_core::{
    config::ClusterConfig, ClusterNode, ClusterState, LoadSample, LoadSampler, McuError,
    McuResult, MonitorEvent, RegistryClient,
};

use crate::notifier::PostProcessNotifier;
use crate::pool::WorkerPool;

/// 集群成员代理
///
/// 状态变化：`UNJOINED → JOINING → JOINED → LOST → JOINING`。
/// 只有在 `JOINED` 状态下调度器才会拉取任务。
pub struct ClusterAgent {
    node: RwLock<ClusterNode>,
    registry: Arc<dyn RegistryClient>,
    sampler: Arc<dyn LoadSampler>,
    join_retry: Duration,
    load_period: Duration,
    heartbeat_tolerance: u32,
    state_tx: watch::Sender<ClusterState>,
    pool: Option<Arc<WorkerPool>>,
    notifier: Option<Arc<PostProcessNotifier>>,
}

impl ClusterAgent {
    pub fn new(
        config: &ClusterConfig,
        hostname: impl Into<String>,
        registry: Arc<dyn RegistryClient>,
        sampler: Arc<dyn LoadSampler>,
    ) -> Self {
        let node = ClusterNode {
            purpose: config.purpose.clone(),
            ip: config.ip.clone(),
            port: config.port,
            hostname: hostname.into(),
            load_item: sampler.item().to_string(),
            last_heartbeat: None,
        };
        let (state_tx, _) = watch::channel(ClusterState::Unjoined);
        Self {
            node: RwLock::new(node),
            registry,
            sampler,
            join_retry: config.join_retry_interval(),
            load_period: config.load_period(),
            heartbeat_tolerance: config.heartbeat_tolerance,
            state_tx,
            pool: None,
            notifier: None,
        }
    }

    /// 负载上报中附带工作池的忙碌槽位数
    pub fn with_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// 加入和丢失集群时发送监控事件
    pub fn with_notifier(mut self, notifier: Arc<PostProcessNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn node(&self) -> ClusterNode {
        self.node
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 最近一次成功上报负载的时间
    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        self.node
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last_heartbeat
    }

    fn record_heartbeat(&self, at: DateTime<Utc>) {
        self.node
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .last_heartbeat = Some(at);
    }

    pub fn state(&self) -> ClusterState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ClusterState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: ClusterState) {
        let previous = self.state_tx.send_replace(state);
        gauge!("mcu_cluster_state").set(state.as_gauge());
        if previous != state {
            info!(node = %self.node().node_key(), from = %previous, to = %state, "cluster state changed");
        }
    }

    async fn emit(&self, event: MonitorEvent) {
        if let Some(notifier) = &self.notifier {
            notifier.publish_event(&event).await;
        }
    }

    /// 加入集群，失败后每隔 `join_retry` 重试，直到成功或停机
    ///
    /// 停机时返回 `false`。
    pub async fn join(&self, shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
        self.set_state(ClusterState::Joining);
        let node = self.node();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.registry.join(&node).await {
                Ok(()) => {
                    self.set_state(ClusterState::Joined);
                    info!(node = %node.node_key(), attempt, "joined cluster");
                    self.emit(MonitorEvent::node_joined(&node.node_key(), &node.purpose))
                        .await;
                    return true;
                }
                Err(e) => {
                    warn!(
                        node = %node.node_key(),
                        attempt,
                        retry_in = ?self.join_retry,
                        error = %e,
                        "failed to join cluster"
                    );
                }
            }

            tokio::select! {
                _ = sleep(self.join_retry) => {}
                _ = shutdown_rx.recv() => {
                    info!("Shutdown received while joining cluster");
                    self.set_state(ClusterState::Unjoined);
                    return false;
                }
            }
        }
    }

    /// 采样并上报一次负载，成功后记录心跳时间
    pub async fn report_load(&self) -> McuResult<()> {
        let sample = LoadSample {
            item: self.sampler.item().to_string(),
            value: self.sampler.sample(),
            busy_workers: self.pool.as_ref().map_or(0, |pool| pool.busy_count()),
            timestamp: Utc::now(),
        };
        self.registry.report_load(&self.node(), &sample).await?;
        self.record_heartbeat(sample.timestamp);
        Ok(())
    }

    async fn mark_lost(&self, reason: String) {
        self.set_state(ClusterState::Lost);
        let node = self.node();
        error!(node = %node.node_key(), reason = %reason, "lost cluster membership");
        self.emit(MonitorEvent::node_lost(&node.node_key(), &node.purpose, reason))
            .await;
    }

    /// 加入集群并周期上报负载，停机时注销
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        if !self.join(&mut shutdown_rx).await {
            return;
        }

        let mut ticker = interval(self.load_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = 0u32;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let lost = match self.report_load().await {
                        Ok(()) => {
                            failures = 0;
                            None
                        }
                        Err(McuError::ClusterMembershipLost(reason)) => Some(reason),
                        Err(e) => {
                            failures += 1;
                            warn!(failures, tolerance = self.heartbeat_tolerance, error = %e, "load report failed");
                            (failures >= self.heartbeat_tolerance)
                                .then(|| format!("{failures} 次负载上报连续失败"))
                        }
                    };

                    if let Some(reason) = lost {
                        self.mark_lost(reason).await;
                        if !self.join(&mut shutdown_rx).await {
                            return;
                        }
                        failures = 0;
                        ticker.reset();
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Cluster agent shutting down");
                    break;
                }
            }
        }

        self.leave().await;
    }

    /// 尽力注销本节点
    pub async fn leave(&self) {
        let node = self.node();
        if let Err(e) = self.registry.leave(&node).await {
            warn!(node = %node.node_key(), error = %e, "failed to leave cluster");
        }
        self.set_state(ClusterState::Unjoined);
    }
}
