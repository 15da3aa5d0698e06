use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Status code gluster reports for a volume or a brick which is up.
pub const STATUS_UP: i32 = 1;

/// Volume state as reported by `gluster volume info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeState {
    Created,
    Started,
    Stopped,
    Unknown(String),
}

impl VolumeState {
    /// The numeric status code gluster uses for this state, `1` being up.
    pub fn code(&self) -> i32 {
        match self {
            Self::Created => 0,
            Self::Started => STATUS_UP,
            Self::Stopped => 2,
            Self::Unknown(_) => -1,
        }
    }
}

impl From<&str> for VolumeState {
    fn from(state: &str) -> Self {
        match state.trim() {
            "Created" => Self::Created,
            "Started" => Self::Started,
            "Stopped" => Self::Stopped,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// A brick as named by gluster, `host:path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BrickAddr {
    pub host: String,
    pub path: String,
}

impl BrickAddr {
    /// Parse a `host:path` brick name.
    pub fn parse(name: &str) -> Option<Self> {
        let (host, path) = name.trim().split_once(':')?;
        if host.is_empty() || path.is_empty() {
            return None;
        }
        Some(Self {
            host: host.to_string(),
            path: path.to_string(),
        })
    }
}

impl std::fmt::Display for BrickAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub name: String,
    /// Volume type, eg: `Distributed-Replicate`.
    pub kind: String,
    pub state: VolumeState,
    pub bricks: Vec<BrickAddr>,
}

impl VolumeInfo {
    /// Numeric volume status, `1` when up.
    pub fn status(&self) -> i32 {
        self.state.code()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrickStatus {
    pub port: Option<u16>,
    pub online: bool,
    pub pid: Option<u32>,
}

impl BrickStatus {
    /// Numeric brick status, `1` when up.
    pub fn status(&self) -> i32 {
        if self.online {
            STATUS_UP
        } else {
            0
        }
    }
}

/// Per brick status of a volume, keyed by brick host and then by brick path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeStatus {
    pub name: String,
    pub bricks: HashMap<String, HashMap<String, BrickStatus>>,
}

impl VolumeStatus {
    /// Status of a single brick.
    pub fn brick(&self, brick: &BrickAddr) -> Option<&BrickStatus> {
        self.bricks
            .get(&brick.host)
            .and_then(|paths| paths.get(&brick.path))
    }
    /// Record the status of a brick.
    pub fn insert(&mut self, brick: BrickAddr, status: BrickStatus) {
        self.bricks
            .entry(brick.host)
            .or_default()
            .insert(brick.path, status);
    }
}

/// Rebalance state of a node, or the aggregate over all nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebalanceState {
    NotStarted,
    InProgress,
    Stopped,
    Completed,
    Failed,
    Other(String),
}

impl From<&str> for RebalanceState {
    fn from(state: &str) -> Self {
        match state.trim().to_lowercase().as_str() {
            "not started" => Self::NotStarted,
            "in progress" => Self::InProgress,
            "stopped" => Self::Stopped,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Other(state.trim().to_string()),
        }
    }
}

impl std::fmt::Display for RebalanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::InProgress => write!(f, "in progress"),
            Self::Stopped => write!(f, "stopped"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Other(state) => write!(f, "{state}"),
        }
    }
}

impl RebalanceState {
    /// Whether the rebalance will not make any further progress on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceNode {
    pub node: String,
    pub state: RebalanceState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceStatus {
    pub volume: String,
    pub nodes: Vec<RebalanceNode>,
}

impl RebalanceStatus {
    /// The volume wide state: completed only once every node completed, otherwise the most
    /// significant of the node states.
    pub fn aggregate(&self) -> RebalanceState {
        let states = self.nodes.iter().map(|n| &n.state).collect::<Vec<_>>();
        if states.is_empty() {
            return RebalanceState::NotStarted;
        }
        if states.iter().all(|s| **s == RebalanceState::Completed) {
            return RebalanceState::Completed;
        }
        for state in [
            RebalanceState::Failed,
            RebalanceState::InProgress,
            RebalanceState::Stopped,
        ] {
            if states.contains(&&state) {
                return state;
            }
        }
        states
            .into_iter()
            .find(|s| matches!(s, RebalanceState::Other(_)))
            .cloned()
            .unwrap_or(RebalanceState::NotStarted)
    }
    /// The aggregate status string, eg: `completed`.
    pub fn status_str(&self) -> String {
        self.aggregate().to_string()
    }
}
