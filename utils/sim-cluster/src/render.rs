//! Plain text output of the gluster command line, as printed by gluster itself.

use gluster::models::{BrickAddr, BrickStatus, RebalanceStatus, VolumeInfo};
use std::fmt::Write;

/// Width of the `Gluster process` column, longer brick names wrap.
const PROCESS_WIDTH: usize = 45;

pub(crate) fn volume_info(info: &VolumeInfo, id: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out);
    let _ = writeln!(out, "Volume Name: {}", info.name);
    let _ = writeln!(out, "Type: {}", info.kind);
    let _ = writeln!(out, "Volume ID: {id}");
    let _ = writeln!(out, "Status: {:?}", info.state);
    let _ = writeln!(out, "Snapshot Count: 0");
    let _ = writeln!(
        out,
        "Number of Bricks: {} x 3 = {}",
        info.bricks.len() / 3,
        info.bricks.len()
    );
    let _ = writeln!(out, "Transport-type: tcp");
    let _ = writeln!(out, "Bricks:");
    for (index, brick) in info.bricks.iter().enumerate() {
        let _ = writeln!(out, "Brick{}: {brick}", index + 1);
    }
    let _ = writeln!(out, "Options Reconfigured:");
    let _ = writeln!(out, "transport.address-family: inet");
    let _ = writeln!(out, "nfs.disable: on");
    out
}

fn column<T: ToString>(value: Option<T>) -> String {
    value
        .map(|value| value.to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

pub(crate) fn volume_status(name: &str, bricks: &[(BrickAddr, BrickStatus)]) -> String {
    let mut out = format!("Status of volume: {name}\n");
    let _ = writeln!(
        out,
        "{:<PROCESS_WIDTH$}TCP Port  RDMA Port  Online  Pid",
        "Gluster process"
    );
    let _ = writeln!(out, "{}", "-".repeat(78));
    for (brick, status) in bricks {
        let mut process = format!("Brick {brick}");
        while process.len() >= PROCESS_WIDTH {
            let rest = process.split_off(PROCESS_WIDTH);
            let _ = writeln!(out, "{process}");
            process = rest;
        }
        let _ = writeln!(
            out,
            "{process:<PROCESS_WIDTH$}{:<10}{:<11}{:<8}{}",
            column(status.port),
            if status.online { "0" } else { "N/A" },
            if status.online { "Y" } else { "N" },
            column(status.pid)
        );
    }
    let _ = writeln!(
        out,
        "{:<PROCESS_WIDTH$}{:<10}{:<11}{:<8}{}",
        "Self-heal Daemon on localhost", "N/A", "N/A", "Y", 7001
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "Task Status of Volume {name}");
    let _ = writeln!(out, "{}", "-".repeat(78));
    let _ = writeln!(out, "There are no active volume tasks");
    out
}

pub(crate) fn rebalance_status(status: &RebalanceStatus) -> String {
    let mut out = format!(
        "{:>40} {:>16} {:>13} {:>13} {:>13} {:>13} {:>20} {:>18}\n",
        "Node",
        "Rebalanced-files",
        "size",
        "scanned",
        "failures",
        "skipped",
        "status",
        "run time in h:m:s"
    );
    let _ = writeln!(
        out,
        "{:>40} {:>16} {:>13} {:>13} {:>13} {:>13} {:>20} {:>18}",
        "---------",
        "-----------",
        "-----------",
        "-----------",
        "-----------",
        "-----------",
        "------------",
        "--------------"
    );
    for node in &status.nodes {
        let _ = writeln!(
            out,
            "{:>40} {:>16} {:>13} {:>13} {:>13} {:>13} {:>20} {:>18}",
            node.node, 0, "0Bytes", 0, 0, 0, node.state, "0:00:01"
        );
    }
    let _ = writeln!(out, "volume rebalance: {}: success", status.volume);
    out
}
