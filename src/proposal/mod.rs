//! Storage proposal: from settings and a device graph to a new device graph
//!
//! The steps run in order on copies of the input graph:
//! 1. [`VolumesGenerator`] plans the volumes the settings ask for
//! 2. [`LvmHelper`] works out the LVM demand, if LVM is used
//! 3. [`SpaceMaker`] frees space until [`SpaceDistributionCalculator`] finds a distribution
//! 4. [`PartitionCreator`] and [`LvmCreator`] create the devices

pub mod assigned_space;
pub mod calculator;
pub mod lvm_creator;
pub mod lvm_helper;
pub mod partition_creator;
pub mod planned;
pub mod space_distribution;
pub mod space_maker;
pub mod volumes_generator;

pub use calculator::SpaceDistributionCalculator;
pub use lvm_creator::{LvmCreator, LvmCreatorResult};
pub use lvm_helper::LvmHelper;
pub use partition_creator::{CreatedPartition, PartitionCreator};
pub use planned::{MakeSpacePolicy, PlannedLv, PlannedPartition, PlannedVg, PlannedVolume};
pub use space_distribution::SpaceDistribution;
pub use space_maker::SpaceMaker;
pub use volumes_generator::VolumesGenerator;

use crate::config::settings::ProposalSettings;
use crate::disk::devicegraph::Devicegraph;
use crate::utils::error::{PlannerError, Result};
use planned::split_volumes;
use tracing::info;

/// Outcome of a successful proposal
#[derive(Debug, Clone)]
pub struct ProposalResult {
    pub devicegraph: Devicegraph,
    pub distribution: SpaceDistribution,
    pub deleted_partitions: Vec<String>,
    pub created_partitions: Vec<CreatedPartition>,
    /// Volume group work, when LVM is used
    pub lvm: Option<LvmCreatorResult>,
}

impl ProposalResult {
    /// Device paths of everything the proposal created
    pub fn created_devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = self
            .created_partitions
            .iter()
            .map(|c| c.name.clone())
            .collect();
        if let Some(lvm) = &self.lvm {
            devices.extend(lvm.created_lvs.iter().cloned());
        }
        devices
    }
}

pub struct Proposal {
    settings: ProposalSettings,
}

impl Proposal {
    pub fn new(settings: ProposalSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ProposalSettings {
        &self.settings
    }

    /// Compute the proposal for `devicegraph`, which is left untouched
    pub fn propose(&self, devicegraph: &Devicegraph) -> Result<ProposalResult> {
        let settings = &self.settings;
        settings.validate()?;
        for disk in &settings.candidate_disks {
            if devicegraph.disk(disk).is_none() {
                return Err(PlannerError::DiskNotFound(disk.clone()));
            }
        }

        let volumes = VolumesGenerator::new(settings, devicegraph).volumes()?;
        let (partitions, lvs) = split_volumes(volumes);

        let planned_vg = if settings.lvm.enabled && !lvs.is_empty() {
            Some(self.planned_vg(lvs, devicegraph)?)
        } else {
            None
        };
        let lvm_helper = planned_vg
            .as_ref()
            .map(|vg| LvmHelper::new(vg.clone(), devicegraph))
            .transpose()?;

        let mut protected: Vec<String> = partitions
            .iter()
            .filter_map(|p| p.reuse.clone())
            .collect();
        if let Some(vg) = lvm_helper.as_ref().and_then(|h| h.reused_vg()) {
            protected.extend(vg.pvs.iter().map(|pv| pv.device.clone()));
        }

        let calculator = SpaceDistributionCalculator::new(lvm_helper);
        let space = SpaceMaker::new(&settings.candidate_disks, settings.delete_resize.clone())
            .protect(protected)
            .provide_space(devicegraph, &partitions, &calculator)?;

        let created = PartitionCreator::new(&space.devicegraph)
            .create_partitions(&space.distribution)?;
        let mut graph = created.devicegraph.clone();

        let lvm = match (&planned_vg, calculator.lvm_helper()) {
            (Some(vg), Some(helper)) => {
                let pv_devices = created.pv_devices(helper.vg_name());
                let result = LvmCreator::new(&graph).create_volumes(vg, &pv_devices)?;
                graph = result.devicegraph.clone();
                Some(result)
            }
            _ => None,
        };

        for part in partitions.iter().filter(|p| p.is_reused()) {
            if let (Some(name), Some(fs_type)) = (&part.reuse, part.filesystem) {
                graph.create_filesystem(name, fs_type, part.mount_point.as_deref())?;
            }
        }

        info!(
            "Proposal ready: {} partitions deleted, {} created",
            space.deleted_partitions.len(),
            created.created.len()
        );
        Ok(ProposalResult {
            devicegraph: graph,
            distribution: space.distribution,
            deleted_partitions: space.deleted_partitions,
            created_partitions: created.created,
            lvm,
        })
    }

    fn planned_vg(&self, lvs: Vec<PlannedLv>, devicegraph: &Devicegraph) -> Result<PlannedVg> {
        let settings = &self.settings;
        let mut vg = PlannedVg::new(&settings.lvm.vg_name);
        vg.extent_size = settings.lvm.extent_size;
        vg.make_space_policy = settings.lvm.make_space_policy;
        vg.pvs_encryption_password = settings.encryption_password.clone();
        vg.lvs = lvs;

        if settings.lvm.reuse_volume_group {
            let helper = LvmHelper::new(vg.clone(), devicegraph)?;
            let reusable = helper
                .reusable_volume_groups(devicegraph)
                .into_iter()
                .find(|group| {
                    group.pvs.iter().all(|pv| {
                        devicegraph
                            .disk_of_device(&pv.device)
                            .is_some_and(|disk| settings.candidate_disks.contains(&disk.name))
                    })
                });
            if let Some(group) = reusable {
                info!("Reusing volume group '{}'", group.name);
                vg.reuse = Some(group.name.clone());
            }
        }
        Ok(vg)
    }
}
