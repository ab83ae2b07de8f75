use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use mcu_core::{
    config::RecorderConfig, Job, JobOutcome, McuError, McuResult, RecordingSession, SessionFactory,
};

/// 录制进程对每个任务回复的一行JSON
#[derive(Debug, Deserialize)]
struct RecorderReply {
    ok: bool,
    #[serde(default)]
    output: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// 每个槽位启动一个外部录制进程
///
/// 任务以一行JSON写入进程stdin，进程在stdout回复一行结果。
pub struct ProcessSessionFactory {
    program: String,
    args: Vec<String>,
}

impl ProcessSessionFactory {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &RecorderConfig) -> Self {
        let mut args = vec![
            "--record-path-prefix".to_string(),
            config.record_path_prefix.clone(),
            "--saas-record-path-prefix".to_string(),
            config.saas_record_path_prefix.clone(),
            "--signal-server".to_string(),
            config.signal_server.clone(),
            "--app-id".to_string(),
            config.app_id.clone(),
            "--water-mark-font".to_string(),
            config.water_mark_font.clone(),
            "--cover-path".to_string(),
            config.cover_path.clone(),
        ];
        if config.log_to_debug {
            args.push("--log-to-debug".to_string());
        }
        if config.enable_webrtc_log {
            args.push("--enable-webrtc-log".to_string());
        }
        Self::new(config.program.clone(), args)
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait]
impl SessionFactory for ProcessSessionFactory {
    async fn open(&self, slot_id: usize) -> McuResult<Box<dyn RecordingSession>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("MCU_SLOT_ID", slot_id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McuError::Internal(format!("启动录制进程 {} 失败: {e}", self.program)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McuError::Internal("无法获取录制进程stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McuError::Internal("无法获取录制进程stdout".to_string()))?;

        info!(slot_id, pid = ?child.id(), program = %self.program, "recorder process started");
        Ok(Box::new(ProcessSession {
            slot_id,
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        }))
    }
}

pub struct ProcessSession {
    slot_id: usize,
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

#[async_trait]
impl RecordingSession for ProcessSession {
    async fn record(&mut self, job: &Job) -> McuResult<JobOutcome> {
        let mut request = serde_json::to_vec(job)?;
        request.push(b'\n');
        self.stdin
            .write_all(&request)
            .await
            .map_err(|e| McuError::job_execution(&job.id, format!("写入录制进程失败: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| McuError::job_execution(&job.id, format!("写入录制进程失败: {e}")))?;

        let line = self
            .stdout
            .next_line()
            .await
            .map_err(|e| McuError::job_execution(&job.id, format!("读取录制进程输出失败: {e}")))?
            .ok_or_else(|| McuError::job_execution(&job.id, "录制进程已退出"))?;

        let reply: RecorderReply = serde_json::from_str(&line).map_err(|e| {
            McuError::job_execution(&job.id, format!("无法解析录制进程输出 {line:?}: {e}"))
        })?;

        if reply.ok {
            Ok(JobOutcome {
                output: reply.output,
                duration_ms: 0,
            })
        } else {
            Err(McuError::job_execution(
                &job.id,
                reply.error.unwrap_or_else(|| "录制失败".to_string()),
            ))
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!(slot_id = self.slot_id, error = %e, "recorder process already exited");
        }
        match self.child.wait().await {
            Ok(status) => debug!(slot_id = self.slot_id, %status, "recorder process stopped"),
            Err(e) => warn!(slot_id = self.slot_id, error = %e, "failed to reap recorder process"),
        }
    }
}

/// mock模式的会话，按配置延迟后返回成功
///
/// payload中 `"fail": true` 的任务会执行失败。
#[derive(Default)]
pub struct SimulatedSessionFactory {
    response_delay: Duration,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl SimulatedSessionFactory {
    pub fn new(response_delay: Duration) -> Self {
        Self {
            response_delay,
            ..Default::default()
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for SimulatedSessionFactory {
    async fn open(&self, slot_id: usize) -> McuResult<Box<dyn RecordingSession>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimulatedSession {
            slot_id,
            response_delay: self.response_delay,
            closed: self.closed.clone(),
        }))
    }
}

struct SimulatedSession {
    slot_id: usize,
    response_delay: Duration,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl RecordingSession for SimulatedSession {
    async fn record(&mut self, job: &Job) -> McuResult<JobOutcome> {
        if !self.response_delay.is_zero() {
            sleep(self.response_delay).await;
        }
        if job.payload.get("fail").and_then(|v| v.as_bool()) == Some(true) {
            return Err(McuError::job_execution(&job.id, "simulated recording failure"));
        }
        Ok(JobOutcome {
            output: Some(json!({
                "slot": self.slot_id,
                "file": format!("mock/{}.mp4", job.id),
            })),
            duration_ms: self.response_delay.as_millis() as u64,
        })
    }

    async fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str) -> ProcessSessionFactory {
        ProcessSessionFactory::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[test]
    fn test_args_from_config() {
        let config = RecorderConfig {
            enable_webrtc_log: true,
            ..RecorderConfig::default()
        };
        let factory = ProcessSessionFactory::from_config(&config);
        let args = factory.args();
        assert!(args.windows(2).any(|w| w[0] == "--signal-server" && w[1] == config.signal_server));
        assert!(args.contains(&"--log-to-debug".to_string()));
        assert!(args.contains(&"--enable-webrtc-log".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_session_records_jobs() {
        let factory =
            shell(r#"while read line; do echo '{"ok":true,"output":{"recorded":true}}'; done"#);
        let mut session = factory.open(0).await.unwrap();

        for _ in 0..2 {
            let outcome = session
                .record(&Job::new("live", json!({"room": 1})))
                .await
                .unwrap();
            assert_eq!(outcome.output, Some(json!({"recorded": true})));
        }
        session.close().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_session_reports_failure() {
        let factory = shell(r#"read line; echo '{"ok":false,"error":"no stream"}'"#);
        let mut session = factory.open(1).await.unwrap();

        let err = session
            .record(&Job::new("live", json!({})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no stream"));
        session.close().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_exit_is_job_error() {
        let factory = shell("exit 3");
        let mut session = factory.open(2).await.unwrap();

        let err = session
            .record(&Job::new("live", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, McuError::JobExecution { .. }));
        session.close().await;
    }

    #[tokio::test]
    async fn test_simulated_session_failure_flag() {
        let factory = SimulatedSessionFactory::new(Duration::ZERO);
        let mut session = factory.open(0).await.unwrap();

        assert!(session.record(&Job::new("live", json!({}))).await.is_ok());
        assert!(session
            .record(&Job::new("live", json!({"fail": true})))
            .await
            .is_err());
        session.close().await;
        assert_eq!(factory.opened(), 1);
        assert_eq!(factory.closed(), 1);
    }
}
