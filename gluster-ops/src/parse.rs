//! Parsers for the plain text output of the gluster command line.

use crate::{
    error::{Error, ParseSnafu, VolumeNotFoundSnafu},
    models::{
        BrickAddr, BrickStatus, RebalanceNode, RebalanceState, RebalanceStatus, VolumeInfo,
        VolumeState, VolumeStatus,
    },
};
use once_cell::sync::Lazy;
use regex::Regex;

static BRICK_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Brick\d+:\s*(\S+)").expect("valid brick regex"));

static BRICK_STATUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Brick\s+(?P<name>\S+)\s+(?P<tcp>N/A|\d+)\s+(?P<rdma>N/A|\d+)\s+(?P<online>[YN])\s+(?P<pid>N/A|\d+)\s*$")
        .expect("valid brick status regex")
});

static REBALANCE_ROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?P<node>\S+)\s+(?P<files>\d+)\s+(?P<size>\S+)\s+(?P<scanned>\d+)\s+(?P<failures>\d+)\s+(?P<skipped>\d+)\s+(?P<status>.+?)\s+(?P<runtime>[\d:.]+)\s*$",
    )
    .expect("valid rebalance regex")
});

/// Parse `gluster volume info <volume>`.
pub fn volume_info(stdout: &str, volume: &str) -> Result<VolumeInfo, Error> {
    let mut info: Option<VolumeInfo> = None;
    for line in stdout.lines().map(str::trim) {
        if let Some(name) = line.strip_prefix("Volume Name:") {
            if info.is_some() {
                break;
            }
            if name.trim() == volume {
                info = Some(VolumeInfo {
                    name: volume.to_string(),
                    kind: String::new(),
                    state: VolumeState::Unknown(String::new()),
                    bricks: Vec::new(),
                });
            }
            continue;
        }
        let Some(info) = info.as_mut() else {
            continue;
        };
        if let Some(kind) = line.strip_prefix("Type:") {
            info.kind = kind.trim().to_string();
        } else if let Some(state) = line.strip_prefix("Status:") {
            info.state = VolumeState::from(state);
        } else if let Some(captures) = BRICK_LINE.captures(line) {
            let name = &captures[1];
            let brick = BrickAddr::parse(name).ok_or_else(|| {
                ParseSnafu {
                    operation: format!("volume info {volume}"),
                    reason: format!("invalid brick name '{name}'"),
                }
                .build()
            })?;
            info.bricks.push(brick);
        }
    }
    info.ok_or_else(|| VolumeNotFoundSnafu { volume }.build())
}

fn optional<T: std::str::FromStr>(value: &str) -> Option<T> {
    value.parse().ok()
}

/// Parse `gluster volume status <volume>`.
/// Long brick names wrap onto the following line, which carries the remaining columns.
pub fn volume_status(stdout: &str, volume: &str) -> Result<VolumeStatus, Error> {
    let mut status = VolumeStatus {
        name: volume.to_string(),
        ..Default::default()
    };
    let mut pending: Option<String> = None;
    for line in stdout.lines() {
        let row = match pending.take() {
            Some(start) => format!("{start}{}", line.trim()),
            None if line.starts_with("Brick ") => line.trim_end().to_string(),
            None => continue,
        };
        let Some(captures) = BRICK_STATUS.captures(&row) else {
            if row.len() > 4096 {
                return ParseSnafu {
                    operation: format!("volume status {volume}"),
                    reason: "unterminated brick row".to_string(),
                }
                .fail();
            }
            pending = Some(row);
            continue;
        };
        let name = &captures["name"];
        let brick = BrickAddr::parse(name).ok_or_else(|| {
            ParseSnafu {
                operation: format!("volume status {volume}"),
                reason: format!("invalid brick name '{name}'"),
            }
            .build()
        })?;
        status.insert(
            brick,
            BrickStatus {
                port: optional(&captures["tcp"]),
                online: &captures["online"] == "Y",
                pid: optional(&captures["pid"]),
            },
        );
    }
    if let Some(row) = pending {
        return ParseSnafu {
            operation: format!("volume status {volume}"),
            reason: format!("incomplete brick row '{row}'"),
        }
        .fail();
    }
    Ok(status)
}

/// Parse `gluster volume rebalance <volume> status`.
pub fn rebalance_status(stdout: &str, volume: &str) -> Result<RebalanceStatus, Error> {
    let nodes = stdout
        .lines()
        .filter_map(|line| REBALANCE_ROW.captures(line))
        .map(|captures| RebalanceNode {
            node: captures["node"].to_string(),
            state: RebalanceState::from(&captures["status"]),
        })
        .collect::<Vec<_>>();
    if nodes.is_empty() {
        return ParseSnafu {
            operation: format!("rebalance status {volume}"),
            reason: "no node rows".to_string(),
        }
        .fail();
    }
    Ok(RebalanceStatus {
        volume: volume.to_string(),
        nodes,
    })
}
