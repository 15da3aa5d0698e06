//! The simulated cluster state and the heketi operations over it.
//! Operations fail with the reason heketi would report, the caller wraps it into an error.

use crate::placement;
use gluster::models::{
    BrickAddr, BrickStatus, RebalanceNode, RebalanceState, RebalanceStatus, VolumeState,
};
use heketi::models::{
    BrickInfo, DeviceInfo, Durability, EntryState, GlusterMount, Hostnames, Mount, NodeInfo,
    Storage, VolumeCreateRequest, VolumeInfo, BACKUP_VOLFILE_SERVERS,
};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Heketi's reply to an unknown id.
pub(crate) const NOT_FOUND: &str = "Id not found";

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) manage: String,
    pub(crate) storage: String,
    pub(crate) pod: String,
    pub(crate) state: EntryState,
    pub(crate) devices: Vec<String>,
    /// Disks present on the node but not handed to heketi, name and size in KiB.
    pub(crate) spare: Vec<(String, u64)>,
}

#[derive(Debug)]
pub(crate) struct Device {
    pub(crate) id: String,
    pub(crate) node: String,
    pub(crate) name: String,
    pub(crate) state: EntryState,
    pub(crate) total: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct Brick {
    pub(crate) id: String,
    pub(crate) node: String,
    pub(crate) device: String,
    pub(crate) size: u64,
}

impl Brick {
    pub(crate) fn new(node: &str, device: &str, size: u64) -> Self {
        Self {
            id: new_id(),
            node: node.to_string(),
            device: device.to_string(),
            size,
        }
    }
    pub(crate) fn path(&self) -> String {
        format!(
            "/var/lib/heketi/mounts/vg_{}/brick_{}/brick",
            self.device, self.id
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rebalance {
    NotStarted,
    Running { polls_left: u32 },
    Held,
    Completed,
}

#[derive(Debug)]
pub(crate) struct Volume {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) size: u64,
    pub(crate) durability: Durability,
    /// Bricks in brick set order, each set made of `durability.brick_set_size()` bricks.
    pub(crate) bricks: Vec<Brick>,
    pub(crate) rebalance: Rebalance,
}

#[derive(Debug, Default)]
pub(crate) struct Faults {
    pub(crate) fail_next: HashMap<crate::SimOp, String>,
    pub(crate) offline_bricks: HashSet<String>,
    pub(crate) held_rebalances: HashSet<String>,
}

#[derive(Debug)]
pub(crate) struct State {
    pub(crate) cluster: String,
    pub(crate) nodes: Vec<Node>,
    pub(crate) devices: BTreeMap<String, Device>,
    pub(crate) volumes: BTreeMap<String, Volume>,
    pub(crate) faults: Faults,
    /// Number of status polls a rebalance stays in progress for.
    pub(crate) rebalance_polls: u32,
    pub(crate) pods: bool,
}

impl State {
    pub(crate) fn node(&self, id: &str) -> Result<&Node, String> {
        self.nodes
            .iter()
            .find(|node| node.id == id)
            .ok_or_else(|| NOT_FOUND.to_string())
    }
    fn node_mut(&mut self, id: &str) -> Result<&mut Node, String> {
        self.nodes
            .iter_mut()
            .find(|node| node.id == id)
            .ok_or_else(|| NOT_FOUND.to_string())
    }
    fn device_mut(&mut self, id: &str) -> Result<&mut Device, String> {
        self.devices.get_mut(id).ok_or_else(|| NOT_FOUND.to_string())
    }

    pub(crate) fn bricks(&self) -> impl Iterator<Item = (&Volume, &Brick)> {
        self.volumes
            .values()
            .flat_map(|volume| volume.bricks.iter().map(move |brick| (volume, brick)))
    }

    /// KiB consumed by bricks on the device.
    pub(crate) fn used(&self, device: &str) -> u64 {
        self.bricks()
            .filter(|(_, brick)| brick.device == device)
            .map(|(_, brick)| brick.size)
            .sum()
    }

    /// Devices which can take new bricks, with their free KiB.
    pub(crate) fn allocatable(&self) -> Vec<(&Node, &Device, u64)> {
        let devices = &self.devices;
        self.nodes
            .iter()
            .filter(|node| node.state == EntryState::Online)
            .flat_map(move |node| {
                node.devices
                    .iter()
                    .filter_map(move |id| devices.get(id))
                    .filter(|device| device.state == EntryState::Online)
                    .map(move |device| (node, device))
            })
            .map(|(node, device)| (node, device, device.total - self.used(&device.id)))
            .collect()
    }

    fn device_info(&self, device: &Device) -> DeviceInfo {
        let bricks = self
            .bricks()
            .filter(|(_, brick)| brick.device == device.id)
            .map(|(volume, brick)| brick_info(volume, brick))
            .collect::<Vec<_>>();
        let used = bricks.iter().map(|brick| brick.size).sum::<u64>();
        DeviceInfo {
            id: device.id.clone(),
            name: device.name.clone(),
            state: device.state.clone(),
            storage: Storage {
                total: device.total,
                free: device.total - used,
                used,
            },
            bricks,
        }
    }

    pub(crate) fn node_info(&self, id: &str) -> Result<NodeInfo, String> {
        let node = self.node(id)?;
        Ok(NodeInfo {
            id: node.id.clone(),
            zone: 1,
            cluster: self.cluster.clone(),
            hostnames: Hostnames {
                manage: vec![node.manage.clone()],
                storage: vec![node.storage.clone()],
            },
            state: node.state.clone(),
            devices: node
                .devices
                .iter()
                .filter_map(|id| self.devices.get(id))
                .map(|device| self.device_info(device))
                .collect(),
        })
    }

    pub(crate) fn set_node_state(&mut self, id: &str, state: EntryState) -> Result<(), String> {
        self.node_mut(id)?.state = state;
        Ok(())
    }

    pub(crate) fn device_add(&mut self, node: &str, name: &str) -> Result<(), String> {
        let cluster_has = self
            .devices
            .values()
            .any(|device| device.node == node && device.name == name);
        let node = self.node_mut(node)?;
        if cluster_has {
            return Err(format!("Device {name} is already in use on node {}", node.id));
        }
        let Some(index) = node.spare.iter().position(|(spare, _)| spare == name) else {
            return Err(format!("Unable to open device {name} on node {}", node.manage));
        };
        let (name, total) = node.spare.remove(index);
        let device = Device {
            id: new_id(),
            node: node.id.clone(),
            name,
            state: EntryState::Online,
            total,
        };
        node.devices.push(device.id.clone());
        tracing::debug!(
            device = %device.id,
            name = %device.name,
            node = %device.node,
            "Device added"
        );
        self.devices.insert(device.id.clone(), device);
        Ok(())
    }

    pub(crate) fn device(&self, id: &str) -> Result<DeviceInfo, String> {
        let device = self.devices.get(id).ok_or_else(|| NOT_FOUND.to_string())?;
        Ok(self.device_info(device))
    }

    pub(crate) fn set_device_state(&mut self, id: &str, state: EntryState) -> Result<(), String> {
        let current = self.device_mut(id)?.state.clone();
        match (&current, &state) {
            (from, to) if from == to => Ok(()),
            (EntryState::Online, EntryState::Offline)
            | (EntryState::Offline, EntryState::Online)
            | (EntryState::Failed, EntryState::Offline) => {
                self.device_mut(id)?.state = state.clone();
                Ok(())
            }
            (EntryState::Offline, EntryState::Failed) => {
                self.evacuate(id)?;
                self.device_mut(id)?.state = state.clone();
                Ok(())
            }
            (EntryState::Online, EntryState::Failed) => {
                Err(format!("Device {id} must be offline before it is removed"))
            }
            (from, to) => Err(format!("Unable to set device {id} from {from} to {to}")),
        }
    }

    /// Move every brick of the device onto other devices, keeping each brick set on distinct
    /// nodes. Nothing moves unless every brick finds a new home.
    fn evacuate(&mut self, device: &str) -> Result<(), String> {
        let mut free = self
            .allocatable()
            .into_iter()
            .filter(|(_, candidate, _)| candidate.id != device)
            .map(|(node, candidate, free)| (node.id.clone(), candidate.id.clone(), free))
            .collect::<Vec<_>>();
        let mut moves = Vec::new();
        for volume in self.volumes.values() {
            let set_size = volume.durability.brick_set_size().max(1);
            for (index, brick) in volume.bricks.iter().enumerate() {
                if brick.device != device {
                    continue;
                }
                let set = index / set_size;
                let siblings = volume
                    .bricks
                    .iter()
                    .skip(set * set_size)
                    .take(set_size)
                    .filter(|sibling| sibling.id != brick.id)
                    .map(|sibling| sibling.node.as_str())
                    .collect::<HashSet<_>>();
                let target = free
                    .iter_mut()
                    .filter(|(node, _, space)| {
                        !siblings.contains(node.as_str()) && *space >= brick.size
                    })
                    .max_by_key(|(_, _, space)| *space)
                    .ok_or_else(|| {
                        format!("No space to replace brick {} of device {device}", brick.id)
                    })?;
                target.2 -= brick.size;
                moves.push((
                    volume.id.clone(),
                    index,
                    Brick::new(&target.0, &target.1, brick.size),
                ));
            }
        }
        for (volume, index, brick) in moves {
            if let Some(volume) = self.volumes.get_mut(&volume) {
                volume.bricks[index] = brick;
            }
        }
        Ok(())
    }

    pub(crate) fn device_delete(&mut self, id: &str) -> Result<(), String> {
        let device = self.devices.get(id).ok_or_else(|| NOT_FOUND.to_string())?;
        if device.state != EntryState::Failed {
            return Err(format!(
                "Device {id} is {}, it must be removed before it is deleted",
                device.state
            ));
        }
        if self.used(id) > 0 {
            return Err(format!("Device {id} still has bricks"));
        }
        let Some(device) = self.devices.remove(id) else {
            return Err(NOT_FOUND.to_string());
        };
        let node = self.node_mut(&device.node)?;
        node.devices.retain(|other| other != id);
        node.spare.push((device.name, device.total));
        Ok(())
    }

    pub(crate) fn volume_create(&mut self, request: &VolumeCreateRequest) -> Result<VolumeInfo, String> {
        if request.size == 0 {
            return Err("Invalid volume size".to_string());
        }
        let set_size = request.durability.brick_set_size();
        let bricks = placement::allocate(self, utils::bytes::gib_to_kib(request.size), set_size)
            .ok_or_else(|| "No space".to_string())?;
        let id = new_id();
        let volume = Volume {
            name: request.name.clone().unwrap_or_else(|| format!("vol_{id}")),
            id: id.clone(),
            size: request.size,
            durability: request.durability.clone(),
            bricks,
            rebalance: Rebalance::NotStarted,
        };
        tracing::debug!(
            volume = %volume.name,
            bricks = volume.bricks.len(),
            "Volume created"
        );
        self.volumes.insert(id.clone(), volume);
        self.volume_info(&id)
    }

    pub(crate) fn volume_expand(&mut self, id: &str, expand_size: u64) -> Result<VolumeInfo, String> {
        if expand_size == 0 {
            return Err("Invalid volume expansion size".to_string());
        }
        let volume = self.volumes.get(id).ok_or_else(|| NOT_FOUND.to_string())?;
        let set_size = volume.durability.brick_set_size();
        let bricks = placement::allocate(self, utils::bytes::gib_to_kib(expand_size), set_size)
            .ok_or_else(|| "No space".to_string())?;
        let polls = self.rebalance_polls;
        let held = self.faults.held_rebalances.clone();
        let volume = self.volumes.get_mut(id).ok_or_else(|| NOT_FOUND.to_string())?;
        volume.size += expand_size;
        volume.bricks.extend(bricks);
        volume.rebalance = if held.contains(&volume.name) {
            Rebalance::Held
        } else {
            Rebalance::Running { polls_left: polls }
        };
        self.volume_info(id)
    }

    pub(crate) fn volume_delete(&mut self, id: &str) -> Result<(), String> {
        self.volumes
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| NOT_FOUND.to_string())
    }

    pub(crate) fn volume_info(&self, id: &str) -> Result<VolumeInfo, String> {
        let volume = self.volumes.get(id).ok_or_else(|| NOT_FOUND.to_string())?;
        let hosts = self
            .nodes
            .iter()
            .map(|node| node.storage.clone())
            .collect::<Vec<_>>();
        let mut options = HashMap::new();
        if hosts.len() > 1 {
            options.insert(BACKUP_VOLFILE_SERVERS.to_string(), hosts[1 ..].join(","));
        }
        Ok(VolumeInfo {
            id: volume.id.clone(),
            name: volume.name.clone(),
            size: volume.size,
            durability: volume.durability.clone(),
            cluster: self.cluster.clone(),
            mount: Mount {
                glusterfs: GlusterMount {
                    device: format!(
                        "{}:{}",
                        hosts.first().cloned().unwrap_or_default(),
                        volume.name
                    ),
                    hosts,
                    options,
                },
            },
            bricks: volume
                .bricks
                .iter()
                .map(|brick| brick_info(volume, brick))
                .collect(),
        })
    }

    fn volume_named(&self, name: &str) -> Option<&Volume> {
        self.volumes.values().find(|volume| volume.name == name)
    }

    fn storage_of(&self, node: &str) -> String {
        self.node(node)
            .map(|node| node.storage.clone())
            .unwrap_or_default()
    }

    /// Gluster's view of the volume bricks.
    pub(crate) fn gluster_volume(&self, name: &str) -> Option<gluster::models::VolumeInfo> {
        let volume = self.volume_named(name)?;
        let sets = volume.bricks.len() / volume.durability.brick_set_size().max(1);
        Some(gluster::models::VolumeInfo {
            name: volume.name.clone(),
            kind: if sets > 1 {
                "Distributed-Replicate".to_string()
            } else {
                "Replicate".to_string()
            },
            state: VolumeState::Started,
            bricks: volume
                .bricks
                .iter()
                .map(|brick| BrickAddr {
                    host: self.storage_of(&brick.node),
                    path: brick.path(),
                })
                .collect(),
        })
    }

    /// Gluster's view of the brick processes, in brick order.
    pub(crate) fn gluster_bricks(&self, name: &str) -> Option<Vec<(BrickAddr, BrickStatus)>> {
        let volume = self.volume_named(name)?;
        let bricks = volume
            .bricks
            .iter()
            .enumerate()
            .map(|(index, brick)| {
                let online = !self.faults.offline_bricks.contains(&brick.path());
                let addr = BrickAddr {
                    host: self.storage_of(&brick.node),
                    path: brick.path(),
                };
                let index = index as u32;
                let status = BrickStatus {
                    port: online.then_some(49152 + index as u16),
                    online,
                    pid: online.then_some(1000 + index),
                };
                (addr, status)
            })
            .collect();
        Some(bricks)
    }

    /// Rebalance status of the volume, each poll moves a running rebalance forward.
    pub(crate) fn rebalance_poll(&mut self, name: &str) -> Option<RebalanceStatus> {
        let held = self.faults.held_rebalances.contains(name);
        let volume = self.volumes.values_mut().find(|volume| volume.name == name)?;
        let state = match volume.rebalance {
            Rebalance::NotStarted => RebalanceState::NotStarted,
            Rebalance::Held => RebalanceState::InProgress,
            Rebalance::Running { .. } if held => {
                volume.rebalance = Rebalance::Held;
                RebalanceState::InProgress
            }
            Rebalance::Running { polls_left: 0 } | Rebalance::Completed => {
                volume.rebalance = Rebalance::Completed;
                RebalanceState::Completed
            }
            Rebalance::Running { polls_left } => {
                volume.rebalance = Rebalance::Running {
                    polls_left: polls_left - 1,
                };
                RebalanceState::InProgress
            }
        };
        let hosts = volume
            .bricks
            .iter()
            .map(|brick| brick.node.clone())
            .collect::<HashSet<_>>();
        let nodes = self
            .nodes
            .iter()
            .filter(|node| hosts.contains(&node.id))
            .enumerate()
            .map(|(index, node)| RebalanceNode {
                node: if index == 0 {
                    "localhost".to_string()
                } else {
                    node.storage.clone()
                },
                state: state.clone(),
            })
            .collect();
        Some(RebalanceStatus {
            volume: name.to_string(),
            nodes,
        })
    }
}

fn brick_info(volume: &Volume, brick: &Brick) -> BrickInfo {
    BrickInfo {
        id: brick.id.clone(),
        path: brick.path(),
        device: brick.device.clone(),
        node: brick.node.clone(),
        volume: volume.id.clone(),
        size: brick.size,
    }
}
