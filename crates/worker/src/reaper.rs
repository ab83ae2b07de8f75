use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info};

use crate::pool::WorkerPool;

/// 定期回收长时间空闲的槽位资源
pub struct IdleReaper {
    pool: Arc<WorkerPool>,
    idle_time: Duration,
    period: Duration,
}

impl IdleReaper {
    pub fn new(pool: Arc<WorkerPool>, idle_time: Duration, period: Duration) -> Self {
        Self {
            pool,
            idle_time,
            period,
        }
    }

    pub async fn reap_once(&self) -> usize {
        let reaped = self.pool.reap_idle(self.idle_time).await;
        if reaped > 0 {
            info!(reaped, "idle reaper recycled worker sessions");
        } else {
            debug!("idle reaper found nothing to recycle");
        }
        reaped
    }

    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = interval(self.period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.reap_once().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Idle reaper shutting down");
                    break;
                }
            }
        }
    }
}
