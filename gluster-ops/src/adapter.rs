//! Reaching gluster in the different deployment topologies.
//!
//! In a containerized deployment (`cns`) gluster runs in pods, so the gluster commands are run
//! through the cluster client on the control node, inside a running gluster pod. In a bare-metal
//! deployment (`crs`) they run on the control node directly. The topology is resolved once, when
//! the adapter is built.

use crate::{
    error::{CommandFailedSnafu, Error, ExecSnafu, NoPodFoundSnafu, RebalanceTimeoutSnafu},
    models::{RebalanceState, RebalanceStatus, VolumeInfo, VolumeStatus},
    parse,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::{sync::Arc, time::Duration};
use utils::exec::CommandRunner;

/// Read only views of gluster volumes.
#[async_trait]
pub trait Adapter: Send + Sync {
    async fn volume_info(&self, volume: &str) -> Result<VolumeInfo, Error>;
    async fn volume_status(&self, volume: &str) -> Result<VolumeStatus, Error>;
    async fn rebalance_status(&self, volume: &str) -> Result<RebalanceStatus, Error>;
    /// Wait for the rebalance of `volume` to stop making progress, returning its last status.
    /// Fails if it is still running once the adapter's rebalance timeout expires.
    async fn rebalance_wait(&self, volume: &str) -> Result<RebalanceStatus, Error>;
}

/// The deployment topology.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::EnumString,
    strum_macros::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeploymentKind {
    /// Containerized, gluster runs in pods.
    Cns,
    /// Bare-metal, gluster runs on the nodes.
    Crs,
}

/// How the containerized gluster pods are found and entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodOptions {
    /// Cluster client on the control node, `oc` or `kubectl`.
    pub cluster_cli: String,
    /// Label selector of the gluster pods.
    pub selector: String,
}

impl Default for PodOptions {
    fn default() -> Self {
        Self {
            cluster_cli: utils::DEFAULT_CLUSTER_CLI.to_string(),
            selector: utils::DEFAULT_GLUSTER_POD_SELECTOR.to_string(),
        }
    }
}

/// Bounded wait for a rebalance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebalanceWait {
    pub timeout: Duration,
    pub poll_period: Duration,
}

impl Default for RebalanceWait {
    fn default() -> Self {
        Self {
            timeout: humantime::parse_duration(utils::DEFAULT_REBALANCE_TIMEOUT)
                .unwrap_or(Duration::from_secs(300)),
            poll_period: humantime::parse_duration(utils::DEFAULT_REBALANCE_POLL_PERIOD)
                .unwrap_or(Duration::from_secs(5)),
        }
    }
}

/// A running gluster pod, entered from the control node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodTarget {
    pub node: String,
    pub pod: String,
    pub cluster_cli: String,
}

/// A gluster node reached directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTarget {
    pub node: String,
}

/// Where the gluster commands run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deployment {
    Containerized(PodTarget),
    BareMetal(NodeTarget),
}

impl Deployment {
    /// Host on which the command line is executed.
    pub fn host(&self) -> &str {
        match self {
            Self::Containerized(target) => &target.node,
            Self::BareMetal(target) => &target.node,
        }
    }

    /// The command line running `gluster` with the given arguments on this target.
    pub fn command(&self, args: &[&str]) -> Vec<String> {
        let gluster = std::iter::once("gluster")
            .chain(std::iter::once("--mode=script"))
            .chain(args.iter().copied())
            .map(ToString::to_string);
        match self {
            Self::Containerized(target) => {
                let pod = target.pod.as_str();
                let enter = if target.cluster_cli.ends_with("kubectl") {
                    vec!["exec", pod, "--"]
                } else {
                    vec!["rsh", pod]
                };
                std::iter::once(target.cluster_cli.clone())
                    .chain(enter.into_iter().map(ToString::to_string))
                    .chain(gluster)
                    .collect()
            }
            Self::BareMetal(_) => gluster.collect(),
        }
    }
}

/// Parse the `name phase` lines of the pod listing into the name of the first running pod.
pub(crate) fn first_running_pod(stdout: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        let mut columns = line.split_whitespace();
        match (columns.next(), columns.next()) {
            (Some(name), Some("Running")) => Some(name.to_string()),
            _ => None,
        }
    })
}

/// Gluster adapter running the gluster command line on the resolved deployment target.
#[derive(Debug, Clone)]
pub struct GlusterAdapter {
    runner: Arc<dyn CommandRunner>,
    deployment: Deployment,
    rebalance: RebalanceWait,
}

impl GlusterAdapter {
    /// New `Self` for an already resolved deployment.
    pub fn new(runner: Arc<dyn CommandRunner>, deployment: Deployment) -> Self {
        Self {
            runner,
            deployment,
            rebalance: RebalanceWait::default(),
        }
    }

    /// Resolve the deployment target for `kind`, using `control_node` as the node from which
    /// gluster is reached.
    #[tracing::instrument(skip(runner, pods), err)]
    pub async fn resolve(
        kind: DeploymentKind,
        control_node: &str,
        runner: Arc<dyn CommandRunner>,
        pods: &PodOptions,
    ) -> Result<Self, Error> {
        let deployment = match kind {
            DeploymentKind::Crs => Deployment::BareMetal(NodeTarget {
                node: control_node.to_string(),
            }),
            DeploymentKind::Cns => {
                let pod = Self::discover_pod(runner.as_ref(), control_node, pods).await?;
                tracing::info!(%pod, "Using gluster pod");
                Deployment::Containerized(PodTarget {
                    node: control_node.to_string(),
                    pod,
                    cluster_cli: pods.cluster_cli.clone(),
                })
            }
        };
        Ok(Self::new(runner, deployment))
    }

    async fn discover_pod(
        runner: &dyn CommandRunner,
        node: &str,
        pods: &PodOptions,
    ) -> Result<String, Error> {
        let operation = "list the gluster pods";
        let command = vec![
            pods.cluster_cli.clone(),
            "get".to_string(),
            "pods".to_string(),
            "--no-headers".to_string(),
            "-o=custom-columns=:.metadata.name,:.status.phase".to_string(),
            format!("--selector={}", pods.selector),
        ];
        let output = runner
            .run(node, &command)
            .await
            .context(ExecSnafu { operation })?;
        if !output.success() {
            return CommandFailedSnafu {
                operation,
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            }
            .fail();
        }
        first_running_pod(&output.stdout).ok_or_else(|| {
            NoPodFoundSnafu {
                node,
                selector: pods.selector.as_str(),
            }
            .build()
        })
    }

    /// Specify the bounded wait used for rebalances.
    pub fn with_rebalance_wait(self, rebalance: RebalanceWait) -> Self {
        Self { rebalance, ..self }
    }

    /// The resolved deployment target.
    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    async fn gluster(&self, args: &[&str], operation: &str) -> Result<String, Error> {
        let command = self.deployment.command(args);
        let output = self
            .runner
            .run(self.deployment.host(), &command)
            .await
            .context(ExecSnafu { operation })?;
        if !output.success() {
            let stderr = match output.stderr.trim() {
                "" => output.stdout.trim().to_string(),
                stderr => stderr.to_string(),
            };
            return CommandFailedSnafu {
                operation,
                code: output.code,
                stderr,
            }
            .fail();
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl Adapter for GlusterAdapter {
    #[tracing::instrument(skip(self), err)]
    async fn volume_info(&self, volume: &str) -> Result<VolumeInfo, Error> {
        let stdout = self
            .gluster(&["volume", "info", volume], &format!("get volume info of {volume}"))
            .await?;
        parse::volume_info(&stdout, volume)
    }

    #[tracing::instrument(skip(self), err)]
    async fn volume_status(&self, volume: &str) -> Result<VolumeStatus, Error> {
        let stdout = self
            .gluster(
                &["volume", "status", volume],
                &format!("get volume status of {volume}"),
            )
            .await?;
        parse::volume_status(&stdout, volume)
    }

    #[tracing::instrument(skip(self), err)]
    async fn rebalance_status(&self, volume: &str) -> Result<RebalanceStatus, Error> {
        let stdout = self
            .gluster(
                &["volume", "rebalance", volume, "status"],
                &format!("get rebalance status of {volume}"),
            )
            .await?;
        parse::rebalance_status(&stdout, volume)
    }

    #[tracing::instrument(skip(self), err)]
    async fn rebalance_wait(&self, volume: &str) -> Result<RebalanceStatus, Error> {
        wait_for_rebalance(self, volume, self.rebalance).await
    }
}

/// Poll the rebalance status of `volume` until it reaches a terminal state.
pub async fn wait_for_rebalance(
    adapter: &dyn Adapter,
    volume: &str,
    wait: RebalanceWait,
) -> Result<RebalanceStatus, Error> {
    let deadline = tokio::time::Instant::now() + wait.timeout;
    loop {
        let status = adapter.rebalance_status(volume).await?;
        let aggregate = status.aggregate();
        if aggregate.is_terminal() {
            tracing::debug!(volume, status = %aggregate, "Rebalance finished");
            return Ok(status);
        }
        if tokio::time::Instant::now() + wait.poll_period > deadline {
            return RebalanceTimeoutSnafu {
                volume,
                status: aggregate.to_string(),
                timeout: wait.timeout,
            }
            .fail();
        }
        if aggregate != RebalanceState::InProgress {
            tracing::debug!(volume, status = %aggregate, "Waiting for the rebalance to start");
        }
        tokio::time::sleep(wait.poll_period).await;
    }
}
