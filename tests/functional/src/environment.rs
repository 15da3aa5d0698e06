use crate::{
    config::{TestConfig, Transport},
    error::{OrchestratorSnafu, ScenarioError, SetupSnafu},
};
use gluster::{Adapter, GlusterAdapter};
use heketi::{CliClient, Orchestrator, RestClient};
use sim_cluster::SimCluster;
use snafu::ResultExt;
use std::sync::Arc;
use utils::exec::{CommandRunner, LocalRunner, SshRunner};

/// Handles on the heketi service and on gluster, shared by all scenarios.
#[derive(Clone)]
pub struct Environment {
    pub orchestrator: Arc<dyn Orchestrator>,
    pub adapter: Arc<dyn Adapter>,
    /// `heketi-cli` on the client node, for the checks on its exit codes.
    pub cli: CliClient,
}

impl Environment {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, adapter: Arc<dyn Adapter>, cli: CliClient) -> Self {
        Self {
            orchestrator,
            adapter,
            cli,
        }
    }

    /// Connect to the environment described by `config`.
    /// Fails if gluster cannot be reached from the client node.
    #[tracing::instrument(skip(config), fields(url = %config.heketi.url), err)]
    pub async fn connect(config: &TestConfig) -> Result<Self, ScenarioError> {
        let runner: Arc<dyn CommandRunner> = if config.ssh.enabled {
            Arc::new(SshRunner::new(config.ssh.user.clone()))
        } else {
            Arc::new(LocalRunner::default())
        };
        let cli = Self::cli_client(config, runner.clone());
        let orchestrator: Arc<dyn Orchestrator> = match config.heketi.transport {
            Transport::Rest => Arc::new(
                RestClient::new(&config.heketi.url, config.credentials(), config.heketi.timeout)
                    .context(OrchestratorSnafu {
                        op: "connect to heketi at",
                        id: config.heketi.url.as_str(),
                    })?,
            ),
            Transport::Cli => Arc::new(cli.clone()),
        };
        let adapter = Self::gluster_adapter(config, runner).await?;
        Ok(Self::new(orchestrator, Arc::new(adapter), cli))
    }

    /// The simulated `cluster`, driven through its command lines wherever the real
    /// environment would be: gluster always, heketi when the transport is `cli`.
    pub async fn simulated(cluster: &SimCluster, config: &TestConfig) -> Result<Self, ScenarioError> {
        let runner: Arc<dyn CommandRunner> = Arc::new(cluster.host());
        let cli = Self::cli_client(config, runner.clone());
        let orchestrator: Arc<dyn Orchestrator> = match config.heketi.transport {
            Transport::Rest => Arc::new(cluster.clone()),
            Transport::Cli => Arc::new(cli.clone()),
        };
        let adapter = Self::gluster_adapter(config, runner).await?;
        Ok(Self::new(orchestrator, Arc::new(adapter), cli))
    }

    fn cli_client(config: &TestConfig, runner: Arc<dyn CommandRunner>) -> CliClient {
        CliClient::new(
            runner,
            config.heketi.client_node.as_str(),
            config.heketi.url.as_str(),
            config.credentials(),
        )
        .with_binary(config.heketi.cli_path.as_str())
    }

    async fn gluster_adapter(
        config: &TestConfig,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<GlusterAdapter, ScenarioError> {
        let adapter = GlusterAdapter::resolve(
            config.deployment.kind,
            &config.heketi.client_node,
            runner,
            &config.pod_options(),
        )
        .await
        .map_err(|error| {
            SetupSnafu {
                reason: error.to_string(),
            }
            .build()
        })?;
        Ok(adapter.with_rebalance_wait(config.rebalance_wait()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gluster::{Deployment, DeploymentKind};

    #[tokio::test]
    async fn simulated() {
        let cluster = SimCluster::builder().build();
        let mut config = TestConfig::simulated(&cluster);
        config.heketi.transport = Transport::Cli;
        let environment = Environment::simulated(&cluster, &config).await.unwrap();
        assert_eq!(
            environment.orchestrator.list_nodes().await.unwrap().len(),
            3
        );

        config.deployment.kind = DeploymentKind::Crs;
        let environment = Environment::simulated(&cluster, &config).await.unwrap();
        let nodes = environment.orchestrator.list_nodes().await.unwrap();
        assert_eq!(nodes.len(), 3);

        let cluster = SimCluster::builder().with_pods(false).build();
        let config = TestConfig::simulated(&cluster);
        let error = Environment::simulated(&cluster, &config)
            .await
            .err()
            .unwrap();
        assert!(matches!(error, ScenarioError::Setup { .. }), "{error}");
    }

    #[tokio::test]
    async fn containerized_target() {
        let cluster = SimCluster::builder().build();
        let config = TestConfig::simulated(&cluster);
        let adapter = Environment::gluster_adapter(&config, Arc::new(cluster.host()))
            .await
            .unwrap();
        match adapter.deployment() {
            Deployment::Containerized(target) => {
                assert!(cluster.pods().contains(&target.pod));
                assert_eq!(target.node, cluster.control_node());
            }
            other => panic!("unexpected deployment {other:?}"),
        }
    }
}
