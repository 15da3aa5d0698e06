//! An in-memory heketi cluster with the gluster volumes it manages.
//!
//! [`SimCluster`] implements both the heketi [`Orchestrator`] and the gluster [`Adapter`] over
//! the same state, and [`SimHost`] serves the command lines of the cluster (`heketi-cli`, the
//! gluster command line and the cluster client entering the gluster pods) so the command line
//! transports can be exercised as well. Failures can be injected to drive the error paths of
//! the functional scenarios.

pub mod host;
mod placement;
mod render;
mod state;

pub use host::SimHost;

use async_trait::async_trait;
use gluster::{
    adapter::{wait_for_rebalance, RebalanceWait},
    error::VolumeNotFoundSnafu,
    models::{BrickAddr, BrickStatus, RebalanceStatus, VolumeStatus},
    Adapter,
};
use heketi::{
    error::ExecutionSnafu,
    models::{DeviceInfo, EntryState, NodeId, NodeInfo, VolumeCreateRequest, VolumeId, VolumeInfo},
    OrchResult, Orchestrator,
};
use parking_lot::Mutex;
use state::{new_id, Node, State};
use std::{collections::BTreeMap, sync::Arc, time::Duration};

/// Operations whose next call can be made to fail.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display, strum_macros::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum SimOp {
    ListNodes,
    NodeInfo,
    NodeEnable,
    NodeDisable,
    DeviceAdd,
    DeviceInfo,
    DeviceEnable,
    DeviceDisable,
    DeviceRemove,
    DeviceDelete,
    VolumeCreate,
    VolumeInfo,
    VolumeList,
    VolumeExpand,
    VolumeDelete,
}

/// A gluster server of the simulated cluster, as an inventory would describe it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimServer {
    pub name: String,
    pub manage: String,
    pub storage: String,
    /// Devices handed to heketi when the cluster is built.
    pub devices: Vec<String>,
    /// Disks present on the server which heketi does not know about yet.
    pub additional_devices: Vec<String>,
}

/// Builds a [`SimCluster`].
#[derive(Debug, Clone)]
pub struct ClusterBuilder {
    nodes: usize,
    devices: Vec<(String, u64)>,
    additional: Vec<(String, u64)>,
    rebalance_polls: u32,
    rebalance_wait: RebalanceWait,
    pods: bool,
}

impl Default for ClusterBuilder {
    fn default() -> Self {
        Self {
            nodes: 3,
            devices: vec![("/dev/sdb".to_string(), 500)],
            additional: vec![("/dev/sdd".to_string(), 500)],
            rebalance_polls: 1,
            rebalance_wait: RebalanceWait {
                timeout: Duration::from_secs(5),
                poll_period: Duration::from_millis(5),
            },
            pods: true,
        }
    }
}

impl ClusterBuilder {
    /// Number of gluster servers.
    #[must_use]
    pub fn with_nodes(mut self, nodes: usize) -> Self {
        self.nodes = nodes;
        self
    }
    /// Devices handed to heketi on every node, replacing the defaults.
    /// Sizes are in GiB.
    #[must_use]
    pub fn with_devices(mut self, devices: &[(&str, u64)]) -> Self {
        self.devices = devices
            .iter()
            .map(|(name, size)| (name.to_string(), *size))
            .collect();
        self
    }
    /// Spare disks present on every node, replacing the defaults.
    /// Sizes are in GiB.
    #[must_use]
    pub fn with_additional_devices(mut self, devices: &[(&str, u64)]) -> Self {
        self.additional = devices
            .iter()
            .map(|(name, size)| (name.to_string(), *size))
            .collect();
        self
    }
    /// Number of status polls a rebalance stays in progress for.
    #[must_use]
    pub fn with_rebalance_polls(mut self, polls: u32) -> Self {
        self.rebalance_polls = polls;
        self
    }
    /// Bounded wait used by the cluster's own [`Adapter::rebalance_wait`].
    #[must_use]
    pub fn with_rebalance_wait(mut self, wait: RebalanceWait) -> Self {
        self.rebalance_wait = wait;
        self
    }
    /// Whether the gluster servers run in pods.
    #[must_use]
    pub fn with_pods(mut self, pods: bool) -> Self {
        self.pods = pods;
        self
    }

    pub fn build(self) -> SimCluster {
        let mut devices = BTreeMap::new();
        let nodes = (1 ..= self.nodes)
            .map(|index| {
                let id = new_id();
                let node_devices = self
                    .devices
                    .iter()
                    .map(|(name, size)| {
                        let device = state::Device {
                            id: new_id(),
                            node: id.clone(),
                            name: name.clone(),
                            state: EntryState::Online,
                            total: utils::bytes::gib_to_kib(*size),
                        };
                        let device_id = device.id.clone();
                        devices.insert(device_id.clone(), device);
                        device_id
                    })
                    .collect();
                Node {
                    name: format!("gluster{index}"),
                    manage: format!("gluster{index}.sim"),
                    storage: format!("10.0.0.{index}"),
                    pod: format!("glusterfs-storage-{}", &id[.. 5]),
                    state: EntryState::Online,
                    devices: node_devices,
                    spare: self
                        .additional
                        .iter()
                        .map(|(name, size)| (name.clone(), utils::bytes::gib_to_kib(*size)))
                        .collect(),
                    id,
                }
            })
            .collect();
        SimCluster {
            state: Arc::new(Mutex::new(State {
                cluster: new_id(),
                nodes,
                devices,
                volumes: BTreeMap::new(),
                faults: Default::default(),
                rebalance_polls: self.rebalance_polls,
                pods: self.pods,
            })),
            rebalance_wait: self.rebalance_wait,
        }
    }
}

/// In-memory heketi cluster.
#[derive(Debug, Clone)]
pub struct SimCluster {
    state: Arc<Mutex<State>>,
    rebalance_wait: RebalanceWait,
}

/// Node from which the simulated cluster is driven.
const CONTROL_NODE: &str = "master.sim";

impl SimCluster {
    /// Cluster builder with 3 nodes, each with one 500GiB device and one 500GiB spare disk.
    pub fn builder() -> ClusterBuilder {
        ClusterBuilder::default()
    }

    /// Runner for the command lines of this cluster.
    pub fn host(&self) -> SimHost {
        SimHost::new(self.clone())
    }

    /// The node from which heketi-cli, gluster and the cluster client are run.
    pub fn control_node(&self) -> &'static str {
        CONTROL_NODE
    }

    pub fn cluster_id(&self) -> String {
        self.state.lock().cluster.clone()
    }

    /// The gluster servers, as an inventory would describe them.
    pub fn inventory(&self) -> Vec<SimServer> {
        let state = self.state.lock();
        state
            .nodes
            .iter()
            .map(|node| SimServer {
                name: node.name.clone(),
                manage: node.manage.clone(),
                storage: node.storage.clone(),
                devices: node
                    .devices
                    .iter()
                    .filter_map(|id| state.devices.get(id))
                    .map(|device| device.name.clone())
                    .collect(),
                additional_devices: node.spare.iter().map(|(name, _)| name.clone()).collect(),
            })
            .collect()
    }

    /// Names of the running gluster pods.
    pub fn pods(&self) -> Vec<String> {
        let state = self.state.lock();
        if !state.pods {
            return Vec::new();
        }
        state.nodes.iter().map(|node| node.pod.clone()).collect()
    }

    /// Make the next call of `op` fail with `reason`.
    pub fn fail_next(&self, op: SimOp, reason: impl Into<String>) {
        self.state.lock().faults.fail_next.insert(op, reason.into());
    }

    /// Report the brick at `index` of the gluster volume `volume` as down.
    /// Returns false if there is no such brick.
    pub fn take_brick_offline(&self, volume: &str, index: usize) -> bool {
        let mut state = self.state.lock();
        let path = state
            .volumes
            .values()
            .find(|candidate| candidate.name == volume)
            .and_then(|volume| volume.bricks.get(index))
            .map(|brick| brick.path());
        match path {
            Some(path) => state.faults.offline_bricks.insert(path),
            None => false,
        }
    }

    /// Keep any rebalance of the gluster volume `volume` in progress.
    pub fn hold_rebalance(&self, volume: &str) {
        self.state
            .lock()
            .faults
            .held_rebalances
            .insert(volume.to_string());
    }

    /// Free space over all devices, in KiB.
    pub fn free_kib(&self) -> u64 {
        let state = self.state.lock();
        state
            .devices
            .values()
            .map(|device| device.total - state.used(&device.id))
            .sum()
    }

    fn op<T>(
        &self,
        op: SimOp,
        operation: String,
        apply: impl FnOnce(&mut State) -> Result<T, String>,
    ) -> OrchResult<T> {
        let mut state = self.state.lock();
        if let Some(reason) = state.faults.fail_next.remove(&op) {
            tracing::debug!(%op, %reason, "Injected failure");
            return ExecutionSnafu { operation, reason }.fail();
        }
        apply(&mut state).map_err(|reason| ExecutionSnafu { operation, reason }.build())
    }

    pub(crate) fn gluster_volume(&self, name: &str) -> Option<(gluster::models::VolumeInfo, String)> {
        let state = self.state.lock();
        let info = state.gluster_volume(name)?;
        let id = state
            .volumes
            .values()
            .find(|volume| volume.name == name)
            .map(|volume| volume.id.clone())
            .unwrap_or_default();
        Some((info, id))
    }

    pub(crate) fn gluster_bricks(&self, name: &str) -> Option<Vec<(BrickAddr, BrickStatus)>> {
        self.state.lock().gluster_bricks(name)
    }

    pub(crate) fn rebalance_poll(&self, name: &str) -> Option<RebalanceStatus> {
        self.state.lock().rebalance_poll(name)
    }
}

#[async_trait]
impl Orchestrator for SimCluster {
    async fn list_nodes(&self) -> OrchResult<Vec<NodeId>> {
        self.op(SimOp::ListNodes, "list nodes".to_string(), |state| {
            Ok(state.nodes.iter().map(|node| node.id.clone()).collect())
        })
    }

    async fn node_info(&self, id: &str) -> OrchResult<NodeInfo> {
        self.op(SimOp::NodeInfo, format!("get node {id}"), |state| {
            state.node_info(id)
        })
    }

    async fn node_enable(&self, id: &str) -> OrchResult<()> {
        self.op(SimOp::NodeEnable, format!("enable node {id}"), |state| {
            state.set_node_state(id, EntryState::Online)
        })
    }

    async fn node_disable(&self, id: &str) -> OrchResult<()> {
        self.op(SimOp::NodeDisable, format!("disable node {id}"), |state| {
            state.set_node_state(id, EntryState::Offline)
        })
    }

    async fn device_add(&self, node: &str, name: &str) -> OrchResult<()> {
        let operation = format!("add device {name} to node {node}");
        self.op(SimOp::DeviceAdd, operation, |state| {
            state.device_add(node, name)
        })
    }

    async fn device_info(&self, id: &str) -> OrchResult<DeviceInfo> {
        self.op(SimOp::DeviceInfo, format!("get device {id}"), |state| {
            state.device(id)
        })
    }

    async fn device_enable(&self, id: &str) -> OrchResult<()> {
        self.op(SimOp::DeviceEnable, format!("enable device {id}"), |state| {
            state.set_device_state(id, EntryState::Online)
        })
    }

    async fn device_disable(&self, id: &str) -> OrchResult<()> {
        self.op(SimOp::DeviceDisable, format!("disable device {id}"), |state| {
            state.set_device_state(id, EntryState::Offline)
        })
    }

    async fn device_remove(&self, id: &str) -> OrchResult<()> {
        self.op(SimOp::DeviceRemove, format!("remove device {id}"), |state| {
            state.set_device_state(id, EntryState::Failed)
        })
    }

    async fn device_delete(&self, id: &str) -> OrchResult<()> {
        self.op(SimOp::DeviceDelete, format!("delete device {id}"), |state| {
            state.device_delete(id)
        })
    }

    async fn volume_create(&self, request: &VolumeCreateRequest) -> OrchResult<VolumeInfo> {
        let operation = format!("create volume of {}GiB", request.size);
        self.op(SimOp::VolumeCreate, operation, |state| {
            state.volume_create(request)
        })
    }

    async fn volume_info(&self, id: &str) -> OrchResult<VolumeInfo> {
        self.op(SimOp::VolumeInfo, format!("get volume {id}"), |state| {
            state.volume_info(id)
        })
    }

    async fn volume_list(&self) -> OrchResult<Vec<VolumeId>> {
        self.op(SimOp::VolumeList, "list volumes".to_string(), |state| {
            Ok(state.volumes.keys().cloned().collect())
        })
    }

    async fn volume_expand(&self, id: &str, expand_size: u64) -> OrchResult<VolumeInfo> {
        let operation = format!("expand volume {id} by {expand_size}GiB");
        self.op(SimOp::VolumeExpand, operation, |state| {
            state.volume_expand(id, expand_size)
        })
    }

    async fn volume_delete(&self, id: &str) -> OrchResult<()> {
        self.op(SimOp::VolumeDelete, format!("delete volume {id}"), |state| {
            state.volume_delete(id)
        })
    }
}

#[async_trait]
impl Adapter for SimCluster {
    async fn volume_info(&self, volume: &str) -> Result<gluster::models::VolumeInfo, gluster::Error> {
        self.state
            .lock()
            .gluster_volume(volume)
            .ok_or_else(|| VolumeNotFoundSnafu { volume }.build())
    }

    async fn volume_status(&self, volume: &str) -> Result<VolumeStatus, gluster::Error> {
        let bricks = self
            .gluster_bricks(volume)
            .ok_or_else(|| VolumeNotFoundSnafu { volume }.build())?;
        let mut status = VolumeStatus {
            name: volume.to_string(),
            ..Default::default()
        };
        for (brick, brick_status) in bricks {
            status.insert(brick, brick_status);
        }
        Ok(status)
    }

    async fn rebalance_status(&self, volume: &str) -> Result<RebalanceStatus, gluster::Error> {
        self.rebalance_poll(volume)
            .ok_or_else(|| VolumeNotFoundSnafu { volume }.build())
    }

    async fn rebalance_wait(&self, volume: &str) -> Result<RebalanceStatus, gluster::Error> {
        wait_for_rebalance(self, volume, self.rebalance_wait).await
    }
}
