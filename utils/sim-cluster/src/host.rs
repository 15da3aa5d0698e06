//! The command lines of the simulated cluster: the cluster client listing and entering the
//! gluster pods, the gluster command line, and `heketi-cli`.

use crate::{render, SimCluster};
use async_trait::async_trait;
use heketi::{
    models::{Durability, VolumeCreateRequest, VolumeList},
    Orchestrator,
};
use utils::exec::{CmdOutput, CommandRunner, ExecError};

/// Runs commands on the hosts of a [`SimCluster`].
#[derive(Debug, Clone)]
pub struct SimHost {
    cluster: SimCluster,
}

impl SimHost {
    pub(crate) fn new(cluster: SimCluster) -> Self {
        Self { cluster }
    }
}

fn ok(stdout: impl Into<String>) -> CmdOutput {
    CmdOutput {
        code: 0,
        stdout: stdout.into(),
        stderr: String::new(),
    }
}

fn failed(code: i32, stderr: impl Into<String>) -> CmdOutput {
    CmdOutput {
        code,
        stdout: String::new(),
        stderr: stderr.into(),
    }
}

/// Value of a `--flag=value` argument.
fn flag<'a>(args: &'a [&str], name: &str) -> Option<&'a str> {
    let prefix = format!("--{name}=");
    args.iter().find_map(|arg| arg.strip_prefix(prefix.as_str()))
}

fn missing(volume: &str) -> CmdOutput {
    failed(1, format!("Volume {volume} does not exist"))
}

fn json<T: serde::Serialize>(value: &T) -> CmdOutput {
    match serde_json::to_string(value) {
        Ok(json) => ok(json),
        Err(error) => failed(1, error.to_string()),
    }
}

/// Exit code of a failed `heketi-cli` command.
const HEKETI_CLI_FAILURE: i32 = 255;

impl SimHost {
    fn known(&self, host: &str) -> bool {
        host == self.cluster.control_node()
            || self
                .cluster
                .inventory()
                .iter()
                .any(|server| server.manage == host || server.storage == host)
    }

    fn cluster_cli(&self, args: &[&str]) -> CmdOutput {
        match args {
            ["get", "pods", ..] => ok(self
                .cluster
                .pods()
                .into_iter()
                .map(|pod| format!("{pod}   Running\n"))
                .collect::<String>()),
            ["rsh", pod, rest @ ..] | ["exec", pod, "--", rest @ ..] => {
                if !self.cluster.pods().iter().any(|known| known == pod) {
                    return failed(
                        1,
                        format!("Error from server (NotFound): pods \"{pod}\" not found"),
                    );
                }
                match rest {
                    ["gluster", gluster @ ..] => self.gluster(gluster),
                    _ => failed(127, "command not found"),
                }
            }
            _ => failed(1, format!("unknown command {args:?}")),
        }
    }

    fn gluster(&self, args: &[&str]) -> CmdOutput {
        let args = args
            .iter()
            .copied()
            .filter(|arg| !arg.starts_with("--mode"))
            .collect::<Vec<_>>();
        match args.as_slice() {
            ["volume", "info", name] => match self.cluster.gluster_volume(name) {
                Some((info, id)) => ok(render::volume_info(&info, &id)),
                None => missing(name),
            },
            ["volume", "status", name] => match self.cluster.gluster_bricks(name) {
                Some(bricks) => ok(render::volume_status(name, &bricks)),
                None => missing(name),
            },
            ["volume", "rebalance", name, "status"] => match self.cluster.rebalance_poll(name) {
                Some(status) => ok(render::rebalance_status(&status)),
                None => missing(name),
            },
            _ => failed(1, format!("unrecognized word: {args:?}")),
        }
    }

    async fn heketi_cli(&self, args: &[&str]) -> CmdOutput {
        let mut rest = Vec::new();
        let mut iter = args.iter().copied();
        while let Some(arg) = iter.next() {
            match arg {
                "--server" | "--user" | "--secret" => {
                    iter.next();
                }
                "--json" => {}
                arg => rest.push(arg),
            }
        }
        let cluster = &self.cluster;
        let result = match rest.as_slice() {
            ["node", "list"] => cluster.list_nodes().await.map(|nodes| {
                ok(nodes
                    .iter()
                    .map(|id| format!("Id:{id}\tCluster:{}\n", cluster.cluster_id()))
                    .collect::<String>())
            }),
            ["node", "info", id] => cluster.node_info(id).await.map(|node| json(&node)),
            ["node", "enable", id] => cluster
                .node_enable(id)
                .await
                .map(|_| ok(format!("Node {id} is now online\n"))),
            ["node", "disable", id] => cluster
                .node_disable(id)
                .await
                .map(|_| ok(format!("Node {id} is now offline\n"))),
            ["device", "add", flags @ ..] => {
                let (Some(name), Some(node)) = (flag(flags, "name"), flag(flags, "node")) else {
                    return failed(HEKETI_CLI_FAILURE, "Error: missing --name or --node");
                };
                cluster
                    .device_add(node, name)
                    .await
                    .map(|_| ok("Device added successfully\n"))
            }
            ["device", "info", id] => cluster.device_info(id).await.map(|device| json(&device)),
            ["device", "enable", id] => cluster
                .device_enable(id)
                .await
                .map(|_| ok(format!("Device {id} is now online\n"))),
            ["device", "disable", id] => cluster
                .device_disable(id)
                .await
                .map(|_| ok(format!("Device {id} is now offline\n"))),
            ["device", "remove", id] => cluster
                .device_remove(id)
                .await
                .map(|_| ok(format!("Device {id} is now removed\n"))),
            ["device", "delete", id] => cluster
                .device_delete(id)
                .await
                .map(|_| ok(format!("Device {id} deleted\n"))),
            ["volume", "create", flags @ ..] => {
                let Some(size) = flag(flags, "size").and_then(|size| size.parse().ok()) else {
                    return failed(HEKETI_CLI_FAILURE, "Error: invalid --size");
                };
                let replica = flag(flags, "replica")
                    .and_then(|replica| replica.parse().ok())
                    .unwrap_or(utils::REPLICA_COUNT);
                let request = VolumeCreateRequest {
                    size,
                    durability: Durability::replicate(replica),
                    name: flag(flags, "name").map(ToString::to_string),
                };
                cluster.volume_create(&request).await.map(|volume| json(&volume))
            }
            ["volume", "info", id] => cluster.volume_info(id).await.map(|volume| json(&volume)),
            ["volume", "list"] => cluster
                .volume_list()
                .await
                .map(|volumes| json(&VolumeList { volumes })),
            ["volume", "expand", flags @ ..] => {
                let (Some(id), Some(size)) = (
                    flag(flags, "volume"),
                    flag(flags, "expand-size").and_then(|size| size.parse().ok()),
                ) else {
                    return failed(HEKETI_CLI_FAILURE, "Error: missing --volume or --expand-size");
                };
                cluster
                    .volume_expand(id, size)
                    .await
                    .map(|volume| json(&volume))
            }
            ["volume", "delete", id] => cluster
                .volume_delete(id)
                .await
                .map(|_| ok(format!("Volume {id} deleted\n"))),
            _ => return failed(HEKETI_CLI_FAILURE, format!("Error: unknown command {rest:?}")),
        };
        result.unwrap_or_else(|error| {
            let reason = match error {
                heketi::Error::Execution { reason, .. } => reason,
                error => error.to_string(),
            };
            failed(HEKETI_CLI_FAILURE, format!("Error: {reason}"))
        })
    }
}

#[async_trait]
impl CommandRunner for SimHost {
    async fn run(&self, host: &str, command: &[String]) -> Result<CmdOutput, ExecError> {
        if !self.known(host) {
            return Err(ExecError::Unreachable {
                host: host.to_string(),
                stderr: format!("ssh: Could not resolve hostname {host}"),
            });
        }
        let Some((program, args)) = command.split_first() else {
            return Err(ExecError::EmptyCommand {
                host: host.to_string(),
            });
        };
        let args = args.iter().map(String::as_str).collect::<Vec<_>>();
        let output = match program.rsplit('/').next().unwrap_or_default() {
            "oc" | "kubectl" => self.cluster_cli(&args),
            "gluster" => self.gluster(&args),
            "heketi-cli" => self.heketi_cli(&args).await,
            _ => failed(127, format!("{program}: command not found")),
        };
        tracing::trace!(
            host,
            command = %utils::exec::display_line(command),
            code = output.code,
            "Simulated command"
        );
        Ok(output)
    }
}
