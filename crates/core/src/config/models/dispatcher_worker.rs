use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 工作池、重试与回收配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    #[serde(alias = "numWorkers")]
    pub num_workers: usize,
    /// 重试延迟表（毫秒），按重试次数索引
    #[serde(alias = "retryDelayPolicy")]
    pub retry_delay_policy: Vec<u64>,
    /// 槽位空闲多久后回收（毫秒）
    #[serde(alias = "taskIdleTime")]
    pub task_idle_time_ms: u64,
    pub reaper_interval_seconds: u64,
    /// 派发器单次拉取等待的上限
    pub poll_interval_ms: u64,
    pub health_check_interval_seconds: u64,
    /// 关闭时等待在途任务的时间
    pub drain_timeout_seconds: u64,
    pub recorder: RecorderConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            num_workers: 1,
            retry_delay_policy: vec![100, 500, 1000],
            task_idle_time_ms: 1000 * 60 * 60 * 3,
            reaper_interval_seconds: 60,
            poll_interval_ms: 1000,
            health_check_interval_seconds: 10,
            drain_timeout_seconds: 30,
            recorder: RecorderConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.num_workers == 0 {
            return Err(anyhow::anyhow!("工作槽位数必须大于0"));
        }

        if self.retry_delay_policy.is_empty() {
            return Err(anyhow::anyhow!("重试延迟表不能为空"));
        }

        if self.task_idle_time_ms == 0 {
            return Err(anyhow::anyhow!("空闲回收时间必须大于0"));
        }

        if self.reaper_interval_seconds == 0 {
            return Err(anyhow::anyhow!("回收检查间隔必须大于0"));
        }

        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("拉取间隔必须大于0"));
        }

        if self.health_check_interval_seconds == 0 {
            return Err(anyhow::anyhow!("健康检查间隔必须大于0"));
        }

        if self.recorder.program.is_empty() {
            return Err(anyhow::anyhow!("录制程序路径不能为空"));
        }

        Ok(())
    }

    pub fn retry_schedule(&self) -> Vec<Duration> {
        self.retry_delay_policy
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }

    pub fn task_idle_time(&self) -> Duration {
        Duration::from_millis(self.task_idle_time_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_seconds)
    }
}

/// 录制进程参数，原样传给外部录制程序
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub program: String,
    #[serde(alias = "recordPathPrefix")]
    pub record_path_prefix: String,
    #[serde(alias = "sasssRecordPathPrefix")]
    pub saas_record_path_prefix: String,
    #[serde(alias = "trtcSignalServer")]
    pub signal_server: String,
    #[serde(alias = "brtcVloudBrtcAppId")]
    pub app_id: String,
    #[serde(alias = "log2debug")]
    pub log_to_debug: bool,
    #[serde(alias = "enableWebrtcLog")]
    pub enable_webrtc_log: bool,
    #[serde(alias = "waterMarkFont")]
    pub water_mark_font: String,
    #[serde(alias = "coverPath")]
    pub cover_path: String,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            program: "mcu-record".to_string(),
            record_path_prefix: "/record".to_string(),
            saas_record_path_prefix: "/bjy".to_string(),
            signal_server: "wss://signaling.rtc.qq.com".to_string(),
            app_id: String::new(),
            log_to_debug: true,
            enable_webrtc_log: false,
            water_mark_font: "fonts/font.ttf".to_string(),
            cover_path: "fonts/640x360.png".to_string(),
        }
    }
}

/// 模拟模式
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    #[serde(rename = "use", alias = "enabled")]
    pub enabled: bool,
    /// 模拟代理预置的任务数
    pub count: usize,
    #[serde(alias = "responseDelay")]
    pub response_delay_ms: u64,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            count: 25,
            response_delay_ms: 0,
        }
    }
}

impl MockConfig {
    pub fn response_delay(&self) -> Duration {
        Duration::from_millis(self.response_delay_ms)
    }
}
