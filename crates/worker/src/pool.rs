use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::gauge;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::AbortHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use mcu_core::{Job, McuError, McuResult, RecordingSession, SessionFactory, SlotSnapshot};
use mcu_dispatcher::DispatchedJob;

use crate::completion::CompletionRouter;

struct SlotState {
    job: Option<Job>,
    /// 每次启动任务递增，用于识别执行任务与槽位的对应关系
    run: u64,
    last_active: DateTime<Utc>,
    idle_since: Instant,
    session: Option<Box<dyn RecordingSession>>,
    task: Option<AbortHandle>,
}

impl SlotState {
    fn new() -> Self {
        Self {
            job: None,
            run: 0,
            last_active: Utc::now(),
            idle_since: Instant::now(),
            session: None,
            task: None,
        }
    }

    /// 仅当槽位仍在执行第 `run` 次任务时记录其中止句柄
    fn attach(&mut self, run: u64, task: AbortHandle) -> bool {
        if self.run != run || self.job.is_none() {
            return false;
        }
        self.task = Some(task);
        true
    }

    /// 结束第 `run` 次任务，槽位已被强制释放或已开始下一次任务时返回 `false`
    fn finish(&mut self, run: u64) -> bool {
        if self.run != run || self.job.is_none() {
            return false;
        }
        self.job = None;
        self.task = None;
        self.last_active = Utc::now();
        self.idle_since = Instant::now();
        true
    }
}

struct PoolInner {
    slots: Vec<Mutex<SlotState>>,
    factory: Arc<dyn SessionFactory>,
    router: Arc<CompletionRouter>,
}

impl PoolInner {
    fn slot(&self, slot_id: usize) -> MutexGuard<'_, SlotState> {
        self.slots[slot_id]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn busy_count(&self) -> usize {
        (0..self.slots.len())
            .filter(|&i| self.slot(i).job.is_some())
            .count()
    }

    fn publish_busy(&self) {
        gauge!("mcu_worker_busy_slots").set(self.busy_count() as f64);
    }

    /// 槽位回到空闲状态
    ///
    /// 槽位已被强制释放时返回 `Err`，会话交还给调用方关闭。
    fn release(
        &self,
        slot_id: usize,
        run: u64,
        session: Option<Box<dyn RecordingSession>>,
    ) -> Result<(), Option<Box<dyn RecordingSession>>> {
        {
            let mut slot = self.slot(slot_id);
            if !slot.finish(run) {
                return Err(session);
            }
            if session.is_some() {
                slot.session = session;
            }
        }
        self.publish_busy();
        Ok(())
    }
}

/// 占用的空闲槽位，释放时归还
pub struct SlotReservation {
    slot_id: usize,
    free: Arc<Mutex<Vec<usize>>>,
    _permit: OwnedSemaphorePermit,
}

impl SlotReservation {
    pub fn slot_id(&self) -> usize {
        self.slot_id
    }
}

impl Drop for SlotReservation {
    fn drop(&mut self) {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.slot_id);
    }
}

/// 固定容量的工作池
///
/// 每个槽位同一时间最多执行一个任务。调度循环先 [`reserve`](Self::reserve)
/// 一个槽位再拉取任务，没有空闲槽位时就不会从队列取出任务。
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    semaphore: Arc<Semaphore>,
    free: Arc<Mutex<Vec<usize>>>,
    capacity: usize,
}

impl WorkerPool {
    pub fn new(
        capacity: usize,
        factory: Arc<dyn SessionFactory>,
        router: Arc<CompletionRouter>,
    ) -> Self {
        let slots = (0..capacity).map(|_| Mutex::new(SlotState::new())).collect();
        Self {
            inner: Arc::new(PoolInner {
                slots,
                factory,
                router,
            }),
            semaphore: Arc::new(Semaphore::new(capacity)),
            // 倒序存放，先分配编号小的槽位
            free: Arc::new(Mutex::new((0..capacity).rev().collect())),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 等待一个空闲槽位
    pub async fn reserve(&self) -> McuResult<SlotReservation> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| McuError::Internal(format!("工作池已关闭: {e}")))?;
        let slot_id = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .ok_or_else(|| McuError::Internal("信号量与空闲槽位不一致".to_string()))?;
        Ok(SlotReservation {
            slot_id,
            free: self.free.clone(),
            _permit: permit,
        })
    }

    /// 在预留的槽位上执行任务
    pub fn start(&self, reservation: SlotReservation, dispatched: DispatchedJob) {
        let slot_id = reservation.slot_id;
        let run = {
            let mut slot = self.inner.slot(slot_id);
            slot.run += 1;
            slot.job = Some(dispatched.job.clone());
            slot.run
        };
        self.inner.publish_busy();

        let inner = self.inner.clone();
        let handle = tokio::spawn(execute(inner, reservation, run, dispatched));

        self.inner.slot(slot_id).attach(run, handle.abort_handle());
    }

    /// 等待空闲槽位后执行任务
    pub async fn submit(&self, dispatched: DispatchedJob) -> McuResult<()> {
        let reservation = self.reserve().await?;
        self.start(reservation, dispatched);
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<SlotSnapshot> {
        (0..self.capacity)
            .map(|slot_id| {
                let slot = self.inner.slot(slot_id);
                SlotSnapshot {
                    slot_id,
                    job_id: slot.job.as_ref().map(|job| job.id.clone()),
                    last_active: slot.last_active,
                    warm: slot.session.is_some() || slot.job.is_some(),
                }
            })
            .collect()
    }

    pub fn busy_count(&self) -> usize {
        self.inner.busy_count()
    }

    /// 释放空闲超过 `idle_time` 的槽位持有的会话，返回回收数量
    ///
    /// 正在执行任务的槽位不会被回收。
    pub async fn reap_idle(&self, idle_time: Duration) -> usize {
        let now = Instant::now();
        let mut expired = Vec::new();
        for slot_id in 0..self.capacity {
            let mut slot = self.inner.slot(slot_id);
            if slot.job.is_none() && now.duration_since(slot.idle_since) >= idle_time {
                if let Some(session) = slot.session.take() {
                    expired.push((slot_id, session));
                }
            }
        }

        let reaped = expired.len();
        for (slot_id, mut session) in expired {
            session.close().await;
            info!(slot_id, "recycled idle worker session");
        }
        reaped
    }

    /// 停止接收新任务并等待执行中的任务结束
    ///
    /// 超过 `deadline` 后强制终止剩余任务、释放槽位并把任务转入死信。
    /// 全部正常结束时返回 `true`。
    pub async fn drain(&self, deadline: Duration) -> bool {
        let total = u32::try_from(self.capacity).unwrap_or(u32::MAX);
        let drained = match timeout(deadline, self.semaphore.acquire_many(total)).await {
            Ok(Ok(_permits)) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "worker pool semaphore closed while draining");
                false
            }
            Err(_) => false,
        };

        if !drained {
            self.force_release().await;
        }

        let sessions: Vec<Box<dyn RecordingSession>> = (0..self.capacity)
            .filter_map(|slot_id| self.inner.slot(slot_id).session.take())
            .collect();
        for mut session in sessions {
            session.close().await;
        }

        info!(drained, "worker pool drained");
        drained
    }

    async fn force_release(&self) {
        let mut aborted = Vec::new();
        for slot_id in 0..self.capacity {
            let mut slot = self.inner.slot(slot_id);
            if let Some(job) = slot.job.take() {
                if let Some(task) = slot.task.take() {
                    task.abort();
                }
                warn!(slot_id, job_id = %job.id, "job aborted after drain deadline");
                aborted.push(job);
            }
        }
        self.inner.publish_busy();

        for job in aborted {
            let cause = McuError::job_execution(&job.id, "排空超时被强制终止");
            self.inner
                .router
                .dead_letter(&job, job.attempt + 1, &cause)
                .await;
        }
    }
}

async fn execute(
    inner: Arc<PoolInner>,
    reservation: SlotReservation,
    run: u64,
    dispatched: DispatchedJob,
) {
    let slot_id = reservation.slot_id;
    let DispatchedJob { job, permit } = dispatched;

    let cached = inner.slot(slot_id).session.take();
    let session = match cached {
        Some(session) => Ok(session),
        None => inner.factory.open(slot_id).await,
    };

    let started = Instant::now();
    let (result, session) = match session {
        Ok(mut session) => {
            let result = session.record(&job).await;
            if result.is_ok() {
                (result, Some(session))
            } else {
                session.close().await;
                (result, None)
            }
        }
        Err(e) => (Err(e), None),
    };
    let result = result.map(|mut outcome| {
        if outcome.duration_ms == 0 {
            outcome.duration_ms = started.elapsed().as_millis() as u64;
        }
        outcome
    });

    debug!(slot_id, job_id = %job.id, ok = result.is_ok(), "slot finished job");
    drop(permit);
    if let Err(orphaned) = inner.release(slot_id, run, session) {
        // 已被强制释放并转入死信
        if let Some(mut session) = orphaned {
            session.close().await;
        }
        return;
    }

    inner.router.route(job, result).await;
    drop(reservation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handle() -> AbortHandle {
        tokio::spawn(std::future::pending::<()>()).abort_handle()
    }

    fn running(slot: &mut SlotState) -> u64 {
        slot.run += 1;
        slot.job = Some(Job::new("live", json!({})));
        slot.run
    }

    #[tokio::test]
    async fn test_stale_run_cannot_touch_restarted_slot() {
        let mut slot = SlotState::new();
        let first = running(&mut slot);
        assert!(slot.finish(first));

        let second = running(&mut slot);
        let current = handle();
        assert!(slot.attach(second, current.clone()));

        let stale = handle();
        assert!(!slot.attach(first, stale.clone()));
        assert!(!slot.finish(first));
        assert!(slot.job.is_some());
        assert!(slot.task.take().is_some_and(|task| task.id() == current.id()));

        stale.abort();
        current.abort();
    }

    #[tokio::test]
    async fn test_finished_run_does_not_keep_handle() {
        let mut slot = SlotState::new();
        let run = running(&mut slot);
        assert!(slot.finish(run));

        let late = handle();
        assert!(!slot.attach(run, late.clone()));
        assert!(slot.task.is_none());
        late.abort();
    }
}
