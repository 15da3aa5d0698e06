use crate::{
    error::Error,
    models::{DeviceInfo, NodeId, NodeInfo, VolumeCreateRequest, VolumeId, VolumeInfo},
};
use async_trait::async_trait;

/// Result wrapper for orchestrator operations.
pub type OrchResult<T> = Result<T, Error>;

/// The heketi operations the functional suite relies on.
/// Implemented by the REST client, the command line client and the simulated cluster.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Ids of all nodes, across all clusters.
    async fn list_nodes(&self) -> OrchResult<Vec<NodeId>>;
    async fn node_info(&self, id: &str) -> OrchResult<NodeInfo>;
    async fn node_enable(&self, id: &str) -> OrchResult<()>;
    async fn node_disable(&self, id: &str) -> OrchResult<()>;

    /// Add the device `name`, eg: `/dev/sdd`, to the node `node`.
    async fn device_add(&self, node: &str, name: &str) -> OrchResult<()>;
    async fn device_info(&self, id: &str) -> OrchResult<DeviceInfo>;
    async fn device_enable(&self, id: &str) -> OrchResult<()>;
    async fn device_disable(&self, id: &str) -> OrchResult<()>;
    /// Move the bricks away from the device and mark it as failed.
    async fn device_remove(&self, id: &str) -> OrchResult<()>;
    async fn device_delete(&self, id: &str) -> OrchResult<()>;

    async fn volume_create(&self, request: &VolumeCreateRequest) -> OrchResult<VolumeInfo>;
    async fn volume_info(&self, id: &str) -> OrchResult<VolumeInfo>;
    async fn volume_list(&self) -> OrchResult<Vec<VolumeId>>;
    /// Grow the volume by `expand_size` GiB.
    async fn volume_expand(&self, id: &str, expand_size: u64) -> OrchResult<VolumeInfo>;
    async fn volume_delete(&self, id: &str) -> OrchResult<()>;
}

/// Enabling or disabling a node or a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum StateToggle {
    Enable,
    Disable,
}

impl StateToggle {
    /// Apply the toggle to the device `id`.
    pub async fn device(&self, orchestrator: &dyn Orchestrator, id: &str) -> OrchResult<()> {
        match self {
            Self::Enable => orchestrator.device_enable(id).await,
            Self::Disable => orchestrator.device_disable(id).await,
        }
    }
    /// Apply the toggle to the node `id`.
    pub async fn node(&self, orchestrator: &dyn Orchestrator, id: &str) -> OrchResult<()> {
        match self {
            Self::Enable => orchestrator.node_enable(id).await,
            Self::Disable => orchestrator.node_disable(id).await,
        }
    }
    /// Past tense, for log messages.
    pub fn done(&self) -> &'static str {
        match self {
            Self::Enable => "enabled",
            Self::Disable => "disabled",
        }
    }
}
