use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use mcu_core::{AppConfig, McuResult, RateStore, SessionFactory};
use mcu_dispatcher::{BacklogPublisher, PriorityDispatcher, RetryController};
use mcu_infrastructure::{ClusterClients, EndpointHealth, EndpointHealthMonitor};

use crate::cluster::ClusterAgent;
use crate::completion::CompletionRouter;
use crate::notifier::PostProcessNotifier;
use crate::pool::WorkerPool;
use crate::reaper::IdleReaper;

/// 停机时把等待中的重试投递回队列的时限
const RETRY_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

pub fn local_hostname() -> String {
    hostname::get()
        .unwrap_or_else(|_| "unknown".into())
        .to_string_lossy()
        .to_string()
}

/// 录制节点：集群成员、调度循环、工作池以及各后台任务
pub struct RecorderNode {
    config: Arc<AppConfig>,
    health: EndpointHealth,
    agent: Arc<ClusterAgent>,
    dispatcher: Arc<PriorityDispatcher>,
    pool: Arc<WorkerPool>,
    retry: Arc<RetryController>,
    reaper: Arc<IdleReaper>,
    monitor: Arc<EndpointHealthMonitor>,
    backlog: Option<Arc<BacklogPublisher>>,
}

impl RecorderNode {
    pub fn new(
        config: Arc<AppConfig>,
        clients: ClusterClients,
        sessions: Arc<dyn SessionFactory>,
        rate_store: Option<Arc<dyn RateStore>>,
    ) -> Self {
        let node_key = format!("{}:{}", config.cluster.ip, config.cluster.port);
        let notifier = Arc::new(PostProcessNotifier::new(
            clients.broker.clone(),
            config.notify_endpoints(),
            config.notify.post_process_queue.clone(),
            config.notify.monitor_notify.clone(),
            node_key,
        ));

        let agent = ClusterAgent::new(
            &config.cluster,
            local_hostname(),
            clients.registry.clone(),
            clients.sampler.clone(),
        )
        .with_notifier(notifier.clone());

        let health = EndpointHealth::new();
        let dispatcher = Arc::new(PriorityDispatcher::new(
            config.queues.clone(),
            clients.broker.clone(),
            health.clone(),
            agent.subscribe(),
            config.worker.poll_interval(),
        ));

        let retry = Arc::new(RetryController::new(
            config.worker.retry_schedule(),
            dispatcher.clone(),
            notifier.clone(),
        ));
        let router = Arc::new(CompletionRouter::new(retry.clone(), notifier));
        let pool = Arc::new(WorkerPool::new(config.worker.num_workers, sessions, router));
        let agent = Arc::new(agent.with_pool(pool.clone()));

        let reaper = Arc::new(IdleReaper::new(
            pool.clone(),
            config.worker.task_idle_time(),
            config.worker.reaper_interval(),
        ));

        let endpoints = config
            .queues
            .iter()
            .filter(|q| q.enabled)
            .flat_map(|q| q.endpoints.iter().cloned())
            .collect();
        let monitor = Arc::new(EndpointHealthMonitor::new(
            endpoints,
            clients.health_checker.clone(),
            health.clone(),
            config.worker.health_check_interval(),
        ));

        let backlog = rate_store.map(|store| {
            Arc::new(BacklogPublisher::new(
                &config.service,
                config.queues.clone(),
                clients.broker.clone(),
                store,
                config.rate.window(),
            ))
        });

        Self {
            config,
            health,
            agent,
            dispatcher,
            pool,
            retry,
            reaper,
            monitor,
            backlog,
        }
    }

    pub fn agent(&self) -> &Arc<ClusterAgent> {
        &self.agent
    }

    pub fn dispatcher(&self) -> &Arc<PriorityDispatcher> {
        &self.dispatcher
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn retry(&self) -> &Arc<RetryController> {
        &self.retry
    }

    pub fn health(&self) -> &EndpointHealth {
        &self.health
    }

    /// 运行到停机信号，然后排空工作池并投递等待中的重试
    pub async fn run(&self, shutdown: &broadcast::Sender<()>) -> McuResult<()> {
        info!(
            node = %self.agent.node().node_key(),
            workers = self.pool.capacity(),
            queues = self.config.queues.len(),
            "Starting recorder node"
        );

        let mut background: Vec<JoinHandle<()>> = Vec::new();

        let monitor = self.monitor.clone();
        let rx = shutdown.subscribe();
        background.push(tokio::spawn(async move { monitor.run(rx).await }));

        let agent = self.agent.clone();
        let rx = shutdown.subscribe();
        background.push(tokio::spawn(async move { agent.run(rx).await }));

        let reaper = self.reaper.clone();
        let rx = shutdown.subscribe();
        background.push(tokio::spawn(async move { reaper.run(rx).await }));

        if let Some(backlog) = self.backlog.clone() {
            let rx = shutdown.subscribe();
            background.push(tokio::spawn(async move { backlog.run(rx).await }));
        }

        self.dispatch_loop(shutdown.subscribe()).await;

        let drained = self.pool.drain(self.config.worker.drain_timeout()).await;
        if !drained {
            warn!("drain deadline reached, remaining jobs were aborted");
        }
        if !self.retry.flush(RETRY_FLUSH_TIMEOUT).await {
            warn!("some pending retries could not be requeued before exit");
        }

        for handle in background {
            if let Err(e) = handle.await {
                error!(error = %e, "background task ended abnormally");
            }
        }

        info!("Recorder node stopped");
        Ok(())
    }

    /// 先占槽位再拉取任务，工作池满时不会从队列取出任务
    async fn dispatch_loop(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            let reservation = tokio::select! {
                reserved = self.pool.reserve() => match reserved {
                    Ok(reservation) => reservation,
                    Err(e) => {
                        error!(error = %e, "worker pool unavailable, stopping dispatch");
                        break;
                    }
                },
                _ = shutdown_rx.recv() => break,
            };

            let dispatched = tokio::select! {
                dispatched = self.dispatcher.next() => dispatched,
                _ = shutdown_rx.recv() => break,
            };

            if let Some(dispatched) = dispatched {
                self.pool.start(reservation, dispatched);
            }
        }
        info!("Dispatch loop stopped");
    }
}
