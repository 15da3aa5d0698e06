//! Heketi command line transport: `heketi-cli` run on the control node.

use crate::{
    error::{DecodeSnafu, ExecSnafu, ExecutionSnafu},
    models::{DeviceInfo, NodeId, NodeInfo, VolumeCreateRequest, VolumeId, VolumeInfo, VolumeList},
    operations::{OrchResult, Orchestrator},
    rest::Credentials,
};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use snafu::ResultExt;
use std::sync::Arc;
use utils::exec::{CmdOutput, CommandRunner};

static NODE_LIST_ID: Lazy<regex::Regex> =
    Lazy::new(|| regex::Regex::new(r"Id:(\S+)").expect("valid node list regex"));

/// Heketi command line client.
#[derive(Debug, Clone)]
pub struct CliClient {
    runner: Arc<dyn CommandRunner>,
    node: String,
    binary: String,
    server: String,
    credentials: Option<Credentials>,
}

impl CliClient {
    /// New `Self` running `heketi-cli` on `node` against the heketi server at `server`.
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        node: impl Into<String>,
        server: impl Into<String>,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            runner,
            node: node.into(),
            binary: utils::DEFAULT_HEKETI_CLI.to_string(),
            server: server.into(),
            credentials,
        }
    }

    /// Specify the path of the `heketi-cli` binary on the control node.
    pub fn with_binary(self, binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            ..self
        }
    }

    fn command(&self, args: &[String], json: bool) -> Vec<String> {
        let mut command = vec![self.binary.clone(), "--server".to_string(), self.server.clone()];
        if let Some(credentials) = &self.credentials {
            command.extend([
                "--user".to_string(),
                credentials.user.clone(),
                "--secret".to_string(),
                credentials.secret.clone(),
            ]);
        }
        command.extend(args.iter().cloned());
        if json {
            command.push("--json".to_string());
        }
        command
    }

    /// Run a heketi-cli command and hand back its raw output, whatever its exit code.
    pub async fn run_raw(&self, args: &[String], json: bool, operation: &str) -> OrchResult<CmdOutput> {
        self.runner
            .run(&self.node, &self.command(args, json))
            .await
            .context(ExecSnafu { operation })
    }

    async fn run(&self, args: &[String], json: bool, operation: &str) -> OrchResult<String> {
        let output = self.run_raw(args, json, operation).await?;
        if !output.success() {
            let stderr = output.stderr.trim();
            let reason = if stderr.is_empty() {
                output.stdout.trim()
            } else {
                stderr
            };
            return ExecutionSnafu {
                operation,
                reason: format!("exit code {}: {reason}", output.code),
            }
            .fail();
        }
        Ok(output.stdout)
    }

    async fn run_json<T: DeserializeOwned>(&self, args: &[String], operation: &str) -> OrchResult<T> {
        let stdout = self.run(args, true, operation).await?;
        serde_json::from_str(&stdout).context(DecodeSnafu { operation })
    }

    /// Create a volume without interpreting the outcome, so the exit code and the error stream
    /// of a rejected request can be inspected.
    pub async fn volume_create_raw(&self, request: &VolumeCreateRequest) -> OrchResult<CmdOutput> {
        self.run_raw(
            &volume_create_args(request),
            true,
            &format!("create volume of {}GiB", request.size),
        )
        .await
    }
}

fn args(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| arg.to_string()).collect()
}

fn volume_create_args(request: &VolumeCreateRequest) -> Vec<String> {
    let mut args = args(&["volume", "create"]);
    args.push(format!("--size={}", request.size));
    args.push(format!(
        "--durability={}",
        serde_json::to_value(request.durability.kind)
            .ok()
            .and_then(|kind| kind.as_str().map(ToString::to_string))
            .unwrap_or_else(|| "replicate".to_string())
    ));
    if let Some(replicate) = request.durability.replicate {
        args.push(format!("--replica={}", replicate.replica));
    }
    if let Some(disperse) = request.durability.disperse {
        args.push(format!("--disperse-data={}", disperse.data));
        args.push(format!("--redundancy={}", disperse.redundancy));
    }
    if let Some(name) = &request.name {
        args.push(format!("--name={name}"));
    }
    args
}

/// Parse the ids out of `heketi-cli node list`, whose lines read `Id:<node>\tCluster:<cluster>`.
pub(crate) fn parse_node_list(stdout: &str) -> Vec<NodeId> {
    stdout
        .lines()
        .filter_map(|line| NODE_LIST_ID.captures(line))
        .filter_map(|captures| captures.get(1).map(|id| id.as_str().to_string()))
        .collect()
}

#[async_trait]
impl Orchestrator for CliClient {
    #[tracing::instrument(skip(self), err)]
    async fn list_nodes(&self) -> OrchResult<Vec<NodeId>> {
        let stdout = self.run(&args(&["node", "list"]), false, "list nodes").await?;
        Ok(parse_node_list(&stdout))
    }

    #[tracing::instrument(skip(self), err)]
    async fn node_info(&self, id: &str) -> OrchResult<NodeInfo> {
        self.run_json(&args(&["node", "info", id]), &format!("get node {id}"))
            .await
    }

    #[tracing::instrument(skip(self), err)]
    async fn node_enable(&self, id: &str) -> OrchResult<()> {
        self.run(&args(&["node", "enable", id]), false, &format!("enable node {id}"))
            .await
            .map(|_| ())
    }

    #[tracing::instrument(skip(self), err)]
    async fn node_disable(&self, id: &str) -> OrchResult<()> {
        self.run(&args(&["node", "disable", id]), false, &format!("disable node {id}"))
            .await
            .map(|_| ())
    }

    #[tracing::instrument(skip(self), err)]
    async fn device_add(&self, node: &str, name: &str) -> OrchResult<()> {
        let args = vec![
            "device".to_string(),
            "add".to_string(),
            format!("--name={name}"),
            format!("--node={node}"),
        ];
        self.run(&args, false, &format!("add device {name} to node {node}"))
            .await
            .map(|_| ())
    }

    #[tracing::instrument(skip(self), err)]
    async fn device_info(&self, id: &str) -> OrchResult<DeviceInfo> {
        self.run_json(&args(&["device", "info", id]), &format!("get device {id}"))
            .await
    }

    #[tracing::instrument(skip(self), err)]
    async fn device_enable(&self, id: &str) -> OrchResult<()> {
        self.run(&args(&["device", "enable", id]), false, &format!("enable device {id}"))
            .await
            .map(|_| ())
    }

    #[tracing::instrument(skip(self), err)]
    async fn device_disable(&self, id: &str) -> OrchResult<()> {
        self.run(&args(&["device", "disable", id]), false, &format!("disable device {id}"))
            .await
            .map(|_| ())
    }

    #[tracing::instrument(skip(self), err)]
    async fn device_remove(&self, id: &str) -> OrchResult<()> {
        self.run(&args(&["device", "remove", id]), false, &format!("remove device {id}"))
            .await
            .map(|_| ())
    }

    #[tracing::instrument(skip(self), err)]
    async fn device_delete(&self, id: &str) -> OrchResult<()> {
        self.run(&args(&["device", "delete", id]), false, &format!("delete device {id}"))
            .await
            .map(|_| ())
    }

    #[tracing::instrument(skip(self), err)]
    async fn volume_create(&self, request: &VolumeCreateRequest) -> OrchResult<VolumeInfo> {
        self.run_json(
            &volume_create_args(request),
            &format!("create volume of {}GiB", request.size),
        )
        .await
    }

    #[tracing::instrument(skip(self), err)]
    async fn volume_info(&self, id: &str) -> OrchResult<VolumeInfo> {
        self.run_json(&args(&["volume", "info", id]), &format!("get volume {id}"))
            .await
    }

    #[tracing::instrument(skip(self), err)]
    async fn volume_list(&self) -> OrchResult<Vec<VolumeId>> {
        let list: VolumeList = self
            .run_json(&args(&["volume", "list"]), "list volumes")
            .await?;
        Ok(list.volumes)
    }

    #[tracing::instrument(skip(self), err)]
    async fn volume_expand(&self, id: &str, expand_size: u64) -> OrchResult<VolumeInfo> {
        let args = vec![
            "volume".to_string(),
            "expand".to_string(),
            format!("--volume={id}"),
            format!("--expand-size={expand_size}"),
        ];
        self.run_json(&args, &format!("expand volume {id} by {expand_size}GiB"))
            .await
    }

    #[tracing::instrument(skip(self), err)]
    async fn volume_delete(&self, id: &str) -> OrchResult<()> {
        self.run(&args(&["volume", "delete", id]), false, &format!("delete volume {id}"))
            .await
            .map(|_| ())
    }
}
