use async_trait::async_trait;

use crate::{
    models::{ClusterNode, LoadSample},
    McuResult,
};

/// 集群注册中心/调度中心客户端
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// 注册节点，失败返回 `ClusterJoin`
    async fn join(&self, node: &ClusterNode) -> McuResult<()>;

    /// 上报负载。注册中心不认识该节点时返回 `ClusterMembershipLost`
    async fn report_load(&self, node: &ClusterNode, sample: &LoadSample) -> McuResult<()>;

    async fn leave(&self, node: &ClusterNode) -> McuResult<()>;
}

/// 负载指标采样
pub trait LoadSampler: Send + Sync {
    fn item(&self) -> &str;

    fn sample(&self) -> f64;
}
