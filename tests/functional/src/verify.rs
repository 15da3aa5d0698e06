//! Assertions over the gluster views and the heketi topology.

use crate::error::{AdapterSnafu, InvariantSnafu, OrchestratorSnafu, ScenarioError};
use gluster::{models::STATUS_UP, Adapter};
use heketi::Orchestrator;
use snafu::{ensure, ResultExt};
use std::sync::Arc;

/// Snapshot of the free space of the cluster, in whole GiB.
/// Only meaningful when compared with another snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FreeSpace(pub u64);

impl std::fmt::Display for FreeSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}GiB", self.0)
    }
}

/// Verification engine.
#[derive(Clone)]
pub struct Verifier {
    orchestrator: Arc<dyn Orchestrator>,
    adapter: Arc<dyn Adapter>,
}

impl Verifier {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, adapter: Arc<dyn Adapter>) -> Self {
        Self {
            orchestrator,
            adapter,
        }
    }

    /// Number of bricks of the gluster volume `volume`.
    pub async fn count_bricks(&self, volume: &str) -> Result<usize, ScenarioError> {
        let info = self
            .adapter
            .volume_info(volume)
            .await
            .context(AdapterSnafu { volume })?;
        Ok(info.bricks.len())
    }

    /// Check that the gluster volume `volume` and every one of its bricks are up.
    #[tracing::instrument(skip(self), err)]
    pub async fn brick_and_volume_healthy(&self, volume: &str) -> Result<(), ScenarioError> {
        let info = self
            .adapter
            .volume_info(volume)
            .await
            .context(AdapterSnafu { volume })?;
        ensure!(
            info.status() == STATUS_UP,
            InvariantSnafu {
                message: format!("Volume {volume} is {:?}, not up", info.state),
            }
        );
        ensure!(
            !info.bricks.is_empty(),
            InvariantSnafu {
                message: format!("Volume {volume} has no bricks"),
            }
        );
        let status = self
            .adapter
            .volume_status(volume)
            .await
            .context(AdapterSnafu { volume })?;
        for brick in &info.bricks {
            let Some(brick_status) = status.brick(brick) else {
                return InvariantSnafu {
                    message: format!("Brick {brick} of volume {volume} is missing from its status"),
                }
                .fail();
            };
            ensure!(
                brick_status.status() == STATUS_UP,
                InvariantSnafu {
                    message: format!("Brick {brick} of volume {volume} is not up"),
                }
            );
        }
        tracing::debug!(volume, bricks = info.bricks.len(), "Volume and bricks are up");
        Ok(())
    }

    /// Wait for the rebalance of the gluster volume `volume` and check that it completed.
    #[tracing::instrument(skip(self), err)]
    pub async fn rebalance_completed(&self, volume: &str) -> Result<(), ScenarioError> {
        let status = match self.adapter.rebalance_wait(volume).await {
            Ok(status) => status,
            Err(gluster::Error::RebalanceTimeout {
                status, timeout, ..
            }) => {
                return InvariantSnafu {
                    message: format!(
                        "Rebalance of volume {volume} still '{status}' after {}",
                        humantime::format_duration(timeout)
                    ),
                }
                .fail()
            }
            Err(source) => return Err(source).context(AdapterSnafu { volume }),
        };
        let aggregate = status.status_str();
        ensure!(
            aggregate == "completed",
            InvariantSnafu {
                message: format!("Rebalance of volume {volume} is '{aggregate}', not 'completed'"),
            }
        );
        Ok(())
    }

    /// Free space over all devices of all nodes, floored to whole GiB.
    pub async fn total_free_space(&self) -> Result<FreeSpace, ScenarioError> {
        let nodes = self
            .orchestrator
            .list_nodes()
            .await
            .context(OrchestratorSnafu {
                op: "list",
                id: "nodes",
            })?;
        let mut free_kib = 0;
        for id in &nodes {
            let node = self
                .orchestrator
                .node_info(id)
                .await
                .context(OrchestratorSnafu {
                    op: "get info of node",
                    id,
                })?;
            free_kib += node.free_kib();
        }
        let free = FreeSpace(utils::bytes::kib_to_gib_floor(free_kib));
        tracing::debug!(%free, "Free space");
        Ok(free)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heketi::models::VolumeCreateRequest;
    use sim_cluster::SimCluster;

    fn verifier(cluster: &SimCluster) -> Verifier {
        Verifier::new(Arc::new(cluster.clone()), Arc::new(cluster.clone()))
    }

    #[tokio::test]
    async fn healthy_volume() {
        let cluster = SimCluster::builder().build();
        let verifier = verifier(&cluster);
        assert_eq!(verifier.total_free_space().await.unwrap(), FreeSpace(1500));

        let volume = cluster
            .volume_create(&VolumeCreateRequest::replica3(10))
            .await
            .unwrap();
        assert_eq!(verifier.total_free_space().await.unwrap(), FreeSpace(1470));
        assert_eq!(verifier.count_bricks(&volume.name).await.unwrap(), 3);
        verifier.brick_and_volume_healthy(&volume.name).await.unwrap();

        assert!(cluster.take_brick_offline(&volume.name, 1));
        let error = verifier
            .brick_and_volume_healthy(&volume.name)
            .await
            .unwrap_err();
        assert!(matches!(error, ScenarioError::Invariant { .. }), "{error}");
        assert!(error.to_string().contains("is not up"), "{error}");
    }

    #[tokio::test]
    async fn rebalance() {
        let cluster = SimCluster::builder()
            .with_rebalance_polls(2)
            .with_rebalance_wait(gluster::RebalanceWait {
                timeout: std::time::Duration::from_millis(200),
                poll_period: std::time::Duration::from_millis(5),
            })
            .build();
        let verifier = verifier(&cluster);
        let volume = cluster
            .volume_create(&VolumeCreateRequest::replica3(10))
            .await
            .unwrap();
        cluster.volume_expand(&volume.id, 3).await.unwrap();
        verifier.rebalance_completed(&volume.name).await.unwrap();

        cluster.volume_expand(&volume.id, 3).await.unwrap();
        cluster.hold_rebalance(&volume.name);
        let error = verifier.rebalance_completed(&volume.name).await.unwrap_err();
        assert!(error.to_string().contains("in progress"), "{error}");

        let error = verifier.count_bricks("vol_missing").await.unwrap_err();
        assert!(matches!(error, ScenarioError::Adapter { .. }), "{error}");
    }
}
