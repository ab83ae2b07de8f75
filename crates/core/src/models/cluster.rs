use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 本进程在集群中的身份
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterNode {
    pub purpose: String,
    pub ip: String,
    pub port: u16,
    pub hostname: String,
    /// 上报的负载指标名，例如 `cpu`
    pub load_item: String,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl ClusterNode {
    /// 注册中心使用的节点键
    pub fn node_key(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// 集群成员状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterState {
    Unjoined,
    Joining,
    Joined,
    Lost,
}

impl ClusterState {
    pub fn is_joined(self) -> bool {
        self == Self::Joined
    }

    pub fn as_gauge(self) -> f64 {
        match self {
            Self::Unjoined => 0.0,
            Self::Joining => 1.0,
            Self::Joined => 2.0,
            Self::Lost => 3.0,
        }
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unjoined => "UNJOINED",
            Self::Joining => "JOINING",
            Self::Joined => "JOINED",
            Self::Lost => "LOST",
        };
        f.write_str(s)
    }
}

/// 一次负载采样
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadSample {
    pub item: String,
    pub value: f64,
    /// 当前正在执行的任务数
    pub busy_workers: usize,
    pub timestamp: DateTime<Utc>,
}
