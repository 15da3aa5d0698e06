//! Heketi api objects, as returned by the REST api and by `heketi-cli --json`.
//! Device and brick sizes are in KiB, volume sizes in GiB.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type ClusterId = String;
pub type NodeId = String;
pub type DeviceId = String;
pub type VolumeId = String;
pub type BrickId = String;

/// State of a node or of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntryState {
    Online,
    Offline,
    Failed,
    Other(String),
}

impl From<String> for EntryState {
    fn from(state: String) -> Self {
        match state.trim().to_lowercase().as_str() {
            "online" => Self::Online,
            "offline" => Self::Offline,
            "failed" => Self::Failed,
            _ => Self::Other(state),
        }
    }
}

impl From<EntryState> for String {
    fn from(state: EntryState) -> Self {
        state.to_string()
    }
}

impl std::fmt::Display for EntryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
            Self::Failed => write!(f, "failed"),
            Self::Other(state) => write!(f, "{state}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hostnames {
    #[serde(default)]
    pub manage: Vec<String>,
    #[serde(default)]
    pub storage: Vec<String>,
}

/// Storage accounting of a device, in KiB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Storage {
    pub total: u64,
    pub free: u64,
    pub used: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrickInfo {
    pub id: BrickId,
    pub path: String,
    pub device: DeviceId,
    pub node: NodeId,
    #[serde(default)]
    pub volume: VolumeId,
    /// Size in KiB.
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub state: EntryState,
    pub storage: Storage,
    #[serde(default)]
    pub bricks: Vec<BrickInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    #[serde(default)]
    pub zone: i64,
    #[serde(default)]
    pub cluster: ClusterId,
    pub hostnames: Hostnames,
    pub state: EntryState,
    #[serde(default)]
    pub devices: Vec<DeviceInfo>,
}

impl NodeInfo {
    /// Find the device with the given name, eg: `/dev/sdd`.
    pub fn device_named(&self, name: &str) -> Option<&DeviceInfo> {
        self.devices.iter().find(|device| device.name == name)
    }
    /// Free space across all devices of this node, in KiB.
    pub fn free_kib(&self) -> u64 {
        self.devices.iter().map(|device| device.storage.free).sum()
    }
    /// Check whether this node is reachable at the given management or storage address.
    pub fn has_address(&self, manage: &str, storage: &str) -> bool {
        self.hostnames.manage.iter().any(|m| m == manage)
            || self.hostnames.storage.iter().any(|s| s == storage)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurabilityType {
    None,
    Replicate,
    Disperse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaDurability {
    pub replica: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisperseDurability {
    pub data: usize,
    pub redundancy: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Durability {
    #[serde(rename = "type")]
    pub kind: DurabilityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicate: Option<ReplicaDurability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disperse: Option<DisperseDurability>,
}

impl Durability {
    /// N-way replication.
    pub fn replicate(replica: usize) -> Self {
        Self {
            kind: DurabilityType::Replicate,
            replicate: Some(ReplicaDurability { replica }),
            disperse: None,
        }
    }
    /// Number of bricks which make up a single brick set.
    pub fn brick_set_size(&self) -> usize {
        match self.kind {
            DurabilityType::None => 1,
            DurabilityType::Replicate => self.replicate.map(|r| r.replica).unwrap_or(1),
            DurabilityType::Disperse => self
                .disperse
                .map(|d| d.data + d.redundancy)
                .unwrap_or(1),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlusterMount {
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Primary mount point, as `host:volume`.
    pub device: String,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub glusterfs: GlusterMount,
}

/// Mount option listing the volfile servers to fall back to.
pub const BACKUP_VOLFILE_SERVERS: &str = "backup-volfile-servers";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub id: VolumeId,
    pub name: String,
    /// Size in GiB.
    pub size: u64,
    pub durability: Durability,
    #[serde(default)]
    pub cluster: ClusterId,
    #[serde(default)]
    pub mount: Mount,
    #[serde(default)]
    pub bricks: Vec<BrickInfo>,
}

impl VolumeInfo {
    /// The replica count, if this is a replicated volume.
    pub fn replica_count(&self) -> Option<usize> {
        self.durability.replicate.map(|r| r.replica)
    }
    /// The primary mount host followed by the backup volfile servers.
    pub fn mount_hosts(&self) -> Vec<String> {
        let glusterfs = &self.mount.glusterfs;
        let primary = glusterfs
            .device
            .trim()
            .split(':')
            .next()
            .unwrap_or_default()
            .to_string();
        let backups = glusterfs
            .options
            .get(BACKUP_VOLFILE_SERVERS)
            .map(|servers| {
                servers
                    .trim()
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        std::iter::once(primary)
            .filter(|p| !p.is_empty())
            .chain(backups)
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeList {
    #[serde(default)]
    pub volumes: Vec<VolumeId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterList {
    #[serde(default)]
    pub clusters: Vec<ClusterId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub id: ClusterId,
    #[serde(default)]
    pub nodes: Vec<NodeId>,
    #[serde(default)]
    pub volumes: Vec<VolumeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeCreateRequest {
    /// Size in GiB.
    pub size: u64,
    pub durability: Durability,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl VolumeCreateRequest {
    /// A replica 3 volume of `size` GiB.
    pub fn replica3(size: u64) -> Self {
        Self {
            size,
            durability: Durability::replicate(utils::REPLICA_COUNT),
            name: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeExpandRequest {
    /// Additional size in GiB.
    pub expand_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAddRequest {
    pub node: NodeId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRequest {
    pub state: EntryState,
}
