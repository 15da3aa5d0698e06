//! End to end scenarios over volume expansion and device management.

use crate::{
    cleanup::CleanupStack,
    config::TestConfig,
    devices::{self, DeviceSelection},
    environment::Environment,
    error::{
        CleanupSnafu, InvariantSnafu, OrchestratorSnafu, Outcome, PanickedSnafu, ScenarioError,
        SkippedSnafu, UnexpectedSuccessSnafu,
    },
    verify::{FreeSpace, Verifier},
};
use futures::FutureExt;
use heketi::{
    models::{EntryState, NodeId, NodeInfo, VolumeCreateRequest, VolumeInfo},
    Orchestrator, StateToggle,
};
use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt};
use std::{collections::BTreeSet, panic::AssertUnwindSafe, time::Duration};
use strum::IntoEnumIterator;
use utils::REPLICA_COUNT;

/// The scenarios of the suite.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::EnumIter,
    strum_macros::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Scenario {
    ExpansionExpandedVolume,
    ExpansionNoFreeSpace,
    ExpansionRebalanceBrick,
    AddDeviceHeketiCli,
    FreeSpaceRoundTrip,
    DeviceToggleAccounting,
}

impl Scenario {
    pub fn description(&self) -> &'static str {
        match self {
            Self::ExpansionExpandedVolume => "create 10GiB, expand twice by 3GiB, delete",
            Self::ExpansionNoFreeSpace => {
                "expansion fails without free space, succeeds once devices are enabled"
            }
            Self::ExpansionRebalanceBrick => "expand by 5GiB, check the rebalance and the bricks",
            Self::AddDeviceHeketiCli => "620GiB only fits once a device is added to every node",
            Self::FreeSpaceRoundTrip => "create then delete restores the free space",
            Self::DeviceToggleAccounting => "disabling then enabling devices leaves the free space as is",
        }
    }

    /// Whether the scenario runs when none is selected explicitly.
    /// Adding devices through heketi-cli is blocked by BZ-1629889.
    pub fn by_default(&self) -> bool {
        !matches!(self, Self::AddDeviceHeketiCli)
    }

    /// The scenarios run when none is selected explicitly.
    pub fn defaults() -> Vec<Self> {
        Self::iter().filter(Self::by_default).collect()
    }
}

/// Result of a scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub outcome: Outcome,
    #[serde(serialize_with = "crate::config::duration::serialize")]
    pub duration: Duration,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cleanup_errors: Vec<String>,
}

/// Size of the expansion which cannot fit before more devices are enabled.
const NO_SPACE_EXPAND_SIZE: u64 = 10;

/// Size which does not fit on the stock devices of the legacy add device scenario.
const ADD_DEVICE_VOLUME_SIZE: u64 = 620;

/// Exit code of a failed `heketi-cli` command.
const CLI_FAILURE_CODE: i32 = 255;

/// Runs the scenarios against an environment, one at a time.
pub struct ScenarioDriver {
    env: Environment,
    config: TestConfig,
    verifier: Verifier,
}

fn describe(selection: &DeviceSelection) -> String {
    selection
        .iter()
        .map(|(node, name)| format!("{name} of node {node}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl ScenarioDriver {
    pub fn new(env: Environment, config: TestConfig) -> Self {
        let verifier = Verifier::new(env.orchestrator.clone(), env.adapter.clone());
        Self {
            env,
            config,
            verifier,
        }
    }

    /// Run `scenario`, then its cleanups whatever the way it ended.
    /// A scenario which passed or was skipped is failed if any of its cleanups fails.
    #[tracing::instrument(skip_all, fields(scenario = %scenario))]
    pub async fn run(&self, scenario: Scenario) -> ScenarioReport {
        let started = tokio::time::Instant::now();
        tracing::info!(description = scenario.description(), "Running scenario");

        let mut cleanups = CleanupStack::new();
        let result = AssertUnwindSafe(self.execute(scenario, &mut cleanups))
            .catch_unwind()
            .await;
        let cleanup_errors = cleanups.run().await;

        let outcome = match result {
            Ok(Ok(())) => Outcome::Passed,
            Ok(Err(ScenarioError::Skipped { reason })) => Outcome::Skipped(reason),
            Ok(Err(error)) => Outcome::Failed(error.to_string()),
            Err(panic) => Outcome::Failed(
                PanickedSnafu {
                    message: crate::panic_message(panic.as_ref()),
                }
                .build()
                .to_string(),
            ),
        };
        let outcome = if !outcome.failed() && !cleanup_errors.is_empty() {
            Outcome::Failed(
                CleanupSnafu {
                    errors: cleanup_errors.clone(),
                }
                .build()
                .to_string(),
            )
        } else {
            outcome
        };
        match &outcome {
            Outcome::Passed => tracing::info!("Scenario passed"),
            Outcome::Skipped(reason) => tracing::warn!(%reason, "Scenario skipped"),
            Outcome::Failed(reason) => tracing::error!(%reason, "Scenario failed"),
        }
        let elapsed = started.elapsed();
        ScenarioReport {
            scenario,
            outcome,
            duration: Duration::from_millis(elapsed.as_millis().try_into().unwrap_or(u64::MAX)),
            cleanup_errors,
        }
    }

    async fn execute(
        &self,
        scenario: Scenario,
        cleanups: &mut CleanupStack,
    ) -> Result<(), ScenarioError> {
        match scenario {
            Scenario::ExpansionExpandedVolume => self.expanded_volume(cleanups).await,
            Scenario::ExpansionNoFreeSpace => self.no_free_space(cleanups).await,
            Scenario::ExpansionRebalanceBrick => self.rebalance_brick(cleanups).await,
            Scenario::AddDeviceHeketiCli => self.add_device_heketi_cli(cleanups).await,
            Scenario::FreeSpaceRoundTrip => self.free_space_round_trip(cleanups).await,
            Scenario::DeviceToggleAccounting => self.device_toggle_accounting(cleanups).await,
        }
    }

    fn orchestrator(&self) -> &dyn Orchestrator {
        self.env.orchestrator.as_ref()
    }

    async fn list_nodes(&self) -> Result<Vec<NodeId>, ScenarioError> {
        self.orchestrator()
            .list_nodes()
            .await
            .context(OrchestratorSnafu {
                op: "list",
                id: "nodes",
            })
    }

    async fn node_info(&self, node: &str) -> Result<NodeInfo, ScenarioError> {
        self.orchestrator()
            .node_info(node)
            .await
            .context(OrchestratorSnafu {
                op: "get info of node",
                id: node,
            })
    }

    async fn volume_info(&self, id: &str) -> Result<VolumeInfo, ScenarioError> {
        self.orchestrator()
            .volume_info(id)
            .await
            .context(OrchestratorSnafu {
                op: "get info of volume",
                id,
            })
    }

    fn delete_on_cleanup(&self, id: &str, cleanups: &mut CleanupStack) {
        let orchestrator = self.env.orchestrator.clone();
        let id = id.to_string();
        cleanups.push(format!("delete volume {id}"), move || async move {
            let volumes = orchestrator
                .volume_list()
                .await
                .context(OrchestratorSnafu {
                    op: "list",
                    id: "volumes",
                })?;
            if volumes.contains(&id) {
                orchestrator
                    .volume_delete(&id)
                    .await
                    .context(OrchestratorSnafu {
                        op: "delete volume",
                        id: id.as_str(),
                    })?;
            }
            Ok(())
        });
    }

    fn detach_on_cleanup(&self, device: &str, cleanups: &mut CleanupStack) {
        let orchestrator = self.env.orchestrator.clone();
        let device = device.to_string();
        cleanups.push(format!("detach device {device}"), move || async move {
            devices::detach_device(orchestrator.as_ref(), &device).await
        });
    }

    fn enable_devices_on_cleanup(&self, selection: DeviceSelection, cleanups: &mut CleanupStack) {
        let orchestrator = self.env.orchestrator.clone();
        cleanups.push(
            format!("enable devices {}", describe(&selection)),
            move || async move {
                devices::toggle_devices(orchestrator.as_ref(), &selection, StateToggle::Enable)
                    .await
            },
        );
    }

    fn enable_node_on_cleanup(&self, node: &str, cleanups: &mut CleanupStack) {
        let orchestrator = self.env.orchestrator.clone();
        let node = node.to_string();
        cleanups.push(format!("enable node {node}"), move || async move {
            devices::toggle_nodes(orchestrator.as_ref(), &[node], StateToggle::Enable).await
        });
    }

    /// Create a replica 3 volume of `size` GiB, deleted on cleanup if it still exists.
    async fn create_volume(
        &self,
        size: u64,
        cleanups: &mut CleanupStack,
    ) -> Result<VolumeInfo, ScenarioError> {
        let volume = self
            .orchestrator()
            .volume_create(&VolumeCreateRequest::replica3(size))
            .await
            .context(OrchestratorSnafu {
                op: "create volume of",
                id: format!("{size}GiB"),
            })?;
        self.delete_on_cleanup(&volume.id, cleanups);
        tracing::info!(volume = %volume.id, name = %volume.name, size, "Volume created");

        ensure!(
            volume.size == size,
            InvariantSnafu {
                message: format!(
                    "Volume {} is {}GiB, {size}GiB were requested",
                    volume.id, volume.size
                ),
            }
        );
        ensure!(
            !volume.bricks.is_empty() && volume.bricks.len() % REPLICA_COUNT == 0,
            InvariantSnafu {
                message: format!(
                    "Volume {} has {} bricks, not a multiple of the replica count {REPLICA_COUNT}",
                    volume.id,
                    volume.bricks.len()
                ),
            }
        );
        Ok(volume)
    }

    /// Create a volume and check that it consumed free space and is up.
    async fn create_and_verify(
        &self,
        size: u64,
        cleanups: &mut CleanupStack,
    ) -> Result<VolumeInfo, ScenarioError> {
        let free = self.verifier.total_free_space().await?;
        let volume = self.create_volume(size, cleanups).await?;
        let created = self.verifier.total_free_space().await?;
        ensure!(
            created < free,
            InvariantSnafu {
                message: format!(
                    "Creation of volume {} did not consume free space: {free} before, {created} after",
                    volume.id
                ),
            }
        );
        self.verifier.brick_and_volume_healthy(&volume.name).await?;
        Ok(volume)
    }

    /// Expand `volume` by `size` GiB and check the outcome.
    async fn expand_volume(
        &self,
        volume: &VolumeInfo,
        size: u64,
    ) -> Result<VolumeInfo, ScenarioError> {
        let free = self.verifier.total_free_space().await?;
        let bricks = self.verifier.count_bricks(&volume.name).await?;
        self.orchestrator()
            .volume_expand(&volume.id, size)
            .await
            .context(OrchestratorSnafu {
                op: format!("expand by {size}GiB volume"),
                id: volume.id.as_str(),
            })?;
        tracing::info!(volume = %volume.id, size, "Volume expanded");
        self.check_expansion(volume, free, bricks).await
    }

    /// Check that an expansion of `before` consumed free space, grew the volume by one brick
    /// set, was rebalanced and left every brick up.
    async fn check_expansion(
        &self,
        before: &VolumeInfo,
        free_before: FreeSpace,
        bricks_before: usize,
    ) -> Result<VolumeInfo, ScenarioError> {
        let free = self.verifier.total_free_space().await?;
        ensure!(
            free < free_before,
            InvariantSnafu {
                message: format!(
                    "Expansion of volume {} did not consume free space: {free_before} before, {free} after",
                    before.id
                ),
            }
        );
        let after = self.volume_info(&before.id).await?;
        ensure!(
            after.size > before.size,
            InvariantSnafu {
                message: format!(
                    "Size of volume {} did not increase: {}GiB before, {}GiB after",
                    before.id, before.size, after.size
                ),
            }
        );
        let bricks = self.verifier.count_bricks(&before.name).await?;
        ensure!(
            bricks == bricks_before + REPLICA_COUNT,
            InvariantSnafu {
                message: format!(
                    "Volume {} went from {bricks_before} to {bricks} bricks, expected {}",
                    before.id,
                    bricks_before + REPLICA_COUNT
                ),
            }
        );
        self.verifier.rebalance_completed(&before.name).await?;
        self.verifier.brick_and_volume_healthy(&before.name).await?;
        Ok(after)
    }

    /// Delete `volume` and check that its space was reclaimed.
    async fn delete_volume(&self, volume: &VolumeInfo) -> Result<FreeSpace, ScenarioError> {
        let free = self.verifier.total_free_space().await?;
        self.orchestrator()
            .volume_delete(&volume.id)
            .await
            .context(OrchestratorSnafu {
                op: "delete volume",
                id: volume.id.as_str(),
            })?;
        let reclaimed = self.verifier.total_free_space().await?;
        ensure!(
            reclaimed > free,
            InvariantSnafu {
                message: format!(
                    "Free space not reclaimed after deletion of volume {}: {free} before, {reclaimed} after",
                    volume.id
                ),
            }
        );
        tracing::info!(volume = %volume.id, %reclaimed, "Volume deleted");
        Ok(reclaimed)
    }

    async fn expanded_volume(&self, cleanups: &mut CleanupStack) -> Result<(), ScenarioError> {
        let volume = self.create_and_verify(10, cleanups).await?;
        let bricks = self.verifier.count_bricks(&volume.name).await?;

        let volume = self.expand_volume(&volume, 3).await?;
        let volume = self.expand_volume(&volume, 3).await?;

        let added = self
            .verifier
            .count_bricks(&volume.name)
            .await?
            .saturating_sub(bricks);
        ensure!(
            added == 2 * REPLICA_COUNT,
            InvariantSnafu {
                message: format!(
                    "Two expansions of volume {} added {added} bricks, expected {}",
                    volume.id,
                    2 * REPLICA_COUNT
                ),
            }
        );
        self.delete_volume(&volume).await?;
        Ok(())
    }

    async fn no_free_space(&self, cleanups: &mut CleanupStack) -> Result<(), ScenarioError> {
        let orchestrator = self.orchestrator();
        let nodes = self.list_nodes().await?;
        ensure!(
            nodes.len() >= REPLICA_COUNT,
            SkippedSnafu {
                reason: format!("{REPLICA_COUNT} heketi nodes are required, found {}", nodes.len()),
            }
        );
        let (nodes, others) = nodes.split_at(REPLICA_COUNT);

        // only the first nodes can take bricks
        for node in others {
            devices::toggle_nodes(orchestrator, std::slice::from_ref(node), StateToggle::Disable)
                .await?;
            self.enable_node_on_cleanup(node, cleanups);
        }

        let mut smallest: Option<u64> = None;
        let mut added = DeviceSelection::new();
        for node in nodes {
            let info = self.node_info(node).await?;
            let Some(first) = info.devices.first() else {
                return InvariantSnafu {
                    message: format!("Node {node} does not have devices"),
                }
                .fail();
            };
            ensure!(
                first.state == EntryState::Online,
                SkippedSnafu {
                    reason: format!(
                        "the first device {} of node {node} must be online, it is {}",
                        first.name, first.state
                    ),
                }
            );
            let free = first.storage.free;
            smallest = Some(smallest.map_or(free, |smallest| smallest.min(free)));

            // and only on their first device
            for device in info.devices.iter().skip(1) {
                let selection = DeviceSelection::from([(node.clone(), device.name.clone())]);
                devices::toggle_devices(orchestrator, &selection, StateToggle::Disable).await?;
                self.enable_devices_on_cleanup(selection, cleanups);
            }

            let Some(name) = self
                .config
                .server_for(&info)
                .and_then(|server| server.additional_devices.first())
            else {
                return SkippedSnafu {
                    reason: format!("no additional device for node {node} in the inventory"),
                }
                .fail();
            };
            let device = devices::add_device(orchestrator, node, name).await?;
            self.detach_on_cleanup(&device.id, cleanups);
            added.insert((node.clone(), name.clone()));
        }

        // the new devices stay out of the way until the expansion is meant to succeed
        devices::toggle_devices(orchestrator, &added, StateToggle::Disable).await?;

        let size = utils::bytes::kib_to_gib_floor(smallest.unwrap_or_default()).saturating_sub(1);
        ensure!(
            size > 0,
            SkippedSnafu {
                reason: "the first devices have no free space left",
            }
        );
        let volume = self.create_volume(size, cleanups).await?;
        self.verifier.brick_and_volume_healthy(&volume.name).await?;
        let bricks = self.verifier.count_bricks(&volume.name).await?;
        let free = self.verifier.total_free_space().await?;

        match orchestrator
            .volume_expand(&volume.id, NO_SPACE_EXPAND_SIZE)
            .await
        {
            Ok(_) => {
                return UnexpectedSuccessSnafu {
                    op: format!("expand by {NO_SPACE_EXPAND_SIZE}GiB volume"),
                    id: volume.id.as_str(),
                }
                .fail()
            }
            Err(error) if error.is_execution() => {
                tracing::info!(volume = %volume.id, %error, "Expansion failed as expected");
            }
            Err(source) => {
                return Err(source).context(OrchestratorSnafu {
                    op: format!("expand by {NO_SPACE_EXPAND_SIZE}GiB volume"),
                    id: volume.id.as_str(),
                })
            }
        }
        let unchanged = self.volume_info(&volume.id).await?;
        let unchanged_bricks = self.verifier.count_bricks(&volume.name).await?;
        let unchanged_free = self.verifier.total_free_space().await?;
        ensure!(
            unchanged.size == volume.size && unchanged_bricks == bricks && unchanged_free == free,
            InvariantSnafu {
                message: format!(
                    "Failed expansion of volume {} was partially applied: {}GiB and {unchanged_bricks} bricks, {unchanged_free} free",
                    volume.id, unchanged.size
                ),
            }
        );

        devices::toggle_devices(orchestrator, &added, StateToggle::Enable).await?;
        orchestrator
            .volume_expand(&volume.id, NO_SPACE_EXPAND_SIZE)
            .await
            .context(OrchestratorSnafu {
                op: format!("expand by {NO_SPACE_EXPAND_SIZE}GiB volume"),
                id: volume.id.as_str(),
            })?;
        let volume = self.check_expansion(&volume, free, bricks).await?;
        self.delete_volume(&volume).await?;
        Ok(())
    }

    async fn rebalance_brick(&self, cleanups: &mut CleanupStack) -> Result<(), ScenarioError> {
        let volume = self.create_and_verify(10, cleanups).await?;
        let volume = self.expand_volume(&volume, 5).await?;
        self.delete_volume(&volume).await?;
        Ok(())
    }

    async fn add_device_heketi_cli(
        &self,
        cleanups: &mut CleanupStack,
    ) -> Result<(), ScenarioError> {
        let nodes = self.list_nodes().await?;
        self.create_volume(100, cleanups).await?;

        let request = VolumeCreateRequest::replica3(ADD_DEVICE_VOLUME_SIZE);
        let raw = self
            .env
            .cli
            .volume_create_raw(&request)
            .await
            .context(OrchestratorSnafu {
                op: "create volume of",
                id: format!("{ADD_DEVICE_VOLUME_SIZE}GiB"),
            })?;
        if raw.success() {
            if let Ok(volume) = serde_json::from_str::<VolumeInfo>(&raw.stdout) {
                self.delete_on_cleanup(&volume.id, cleanups);
            }
        }
        ensure!(
            raw.code == CLI_FAILURE_CODE && !raw.stderr.trim().is_empty(),
            InvariantSnafu {
                message: format!(
                    "Creation of a {ADD_DEVICE_VOLUME_SIZE}GiB volume exited with {} and error '{}', expected {CLI_FAILURE_CODE} and an error",
                    raw.code,
                    raw.stderr.trim()
                ),
            }
        );
        tracing::info!(stderr = raw.stderr.trim(), "Volume creation failed as expected");

        for node in &nodes {
            let info = self.node_info(node).await?;
            let Some(name) = self
                .config
                .server_for(&info)
                .and_then(|server| server.additional_devices.first())
            else {
                return SkippedSnafu {
                    reason: format!("no additional device for node {node} in the inventory"),
                }
                .fail();
            };
            let device = devices::add_device(self.orchestrator(), node, name).await?;
            self.detach_on_cleanup(&device.id, cleanups);
        }

        let volume = self.create_volume(ADD_DEVICE_VOLUME_SIZE, cleanups).await?;
        ensure!(
            volume.replica_count() == Some(REPLICA_COUNT),
            InvariantSnafu {
                message: format!(
                    "Volume {} has replica count {:?}, expected {REPLICA_COUNT}",
                    volume.id,
                    volume.replica_count()
                ),
            }
        );
        let hosts = volume.mount_hosts().into_iter().collect::<BTreeSet<_>>();
        let servers = self.config.storage_addresses();
        ensure!(
            hosts == servers,
            InvariantSnafu {
                message: format!(
                    "Mount hosts {hosts:?} of volume {} do not match the gluster servers {servers:?}",
                    volume.id
                ),
            }
        );
        self.verifier.brick_and_volume_healthy(&volume.name).await?;
        Ok(())
    }

    async fn free_space_round_trip(
        &self,
        cleanups: &mut CleanupStack,
    ) -> Result<(), ScenarioError> {
        let free = self.verifier.total_free_space().await?;
        let volume = self.create_and_verify(10, cleanups).await?;
        let reclaimed = self.delete_volume(&volume).await?;
        ensure!(
            reclaimed == free,
            InvariantSnafu {
                message: format!(
                    "Free space is {reclaimed} after creating and deleting volume {}, it was {free}",
                    volume.id
                ),
            }
        );
        Ok(())
    }

    async fn device_toggle_accounting(
        &self,
        cleanups: &mut CleanupStack,
    ) -> Result<(), ScenarioError> {
        let orchestrator = self.orchestrator();
        let mut selection = DeviceSelection::new();
        for node in self.list_nodes().await? {
            let mut info = self.node_info(&node).await?;
            if info.devices.len() < 2 {
                let spare = self
                    .config
                    .server_for(&info)
                    .and_then(|server| server.additional_devices.first())
                    .cloned();
                if let Some(name) = spare {
                    let device = devices::add_device(orchestrator, &node, &name).await?;
                    self.detach_on_cleanup(&device.id, cleanups);
                    info = self.node_info(&node).await?;
                }
            }
            // devices already offline are left as they are
            selection.extend(
                info.devices
                    .iter()
                    .skip(1)
                    .filter(|device| device.state == EntryState::Online)
                    .map(|device| (node.clone(), device.name.clone())),
            );
        }
        ensure!(
            !selection.is_empty(),
            SkippedSnafu {
                reason: "no node has more than one online device",
            }
        );

        let free = self.verifier.total_free_space().await?;
        self.enable_devices_on_cleanup(selection.clone(), cleanups);
        devices::toggle_devices(orchestrator, &selection, StateToggle::Disable).await?;
        let disabled = self.verifier.total_free_space().await?;
        tracing::info!(%free, %disabled, devices = selection.len(), "Devices disabled");

        devices::toggle_devices(orchestrator, &selection, StateToggle::Enable).await?;
        let enabled = self.verifier.total_free_space().await?;
        ensure!(
            enabled == free,
            InvariantSnafu {
                message: format!(
                    "Free space is {enabled} after disabling and enabling {}, it was {free}",
                    describe(&selection)
                ),
            }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn names() {
        assert_eq!(
            Scenario::from_str("expansion_no_free_space").unwrap(),
            Scenario::ExpansionNoFreeSpace
        );
        assert_eq!(Scenario::AddDeviceHeketiCli.to_string(), "add_device_heketi_cli");
        assert!(Scenario::from_str("nope").is_err());
        let defaults = Scenario::defaults();
        assert_eq!(defaults.len(), Scenario::iter().count() - 1);
        assert!(!defaults.contains(&Scenario::AddDeviceHeketiCli));
    }
}
