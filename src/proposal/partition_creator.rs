//! Turn a space distribution into partitions of a device graph

use crate::disk::devicegraph::{encryption_name, Devicegraph, PartitionTableType, PartitionType};
use crate::disk::region::{Region, LOGICAL_OVERHEAD};
use crate::disk::size::DiskSize;
use crate::proposal::assigned_space::AssignedSpace;
use crate::proposal::planned::PlannedPartition;
use crate::proposal::space_distribution::SpaceDistribution;
use crate::utils::error::{PlannerError, Result};
use serde::Serialize;
use tracing::{debug, info};

/// A partition created for a planned partition
#[derive(Debug, Clone, Serialize)]
pub struct CreatedPartition {
    /// Partition device path
    pub name: String,
    /// Device holding the content: the partition or its encryption layer
    pub device: String,
    pub size: DiskSize,
    pub planned: PlannedPartition,
}

#[derive(Debug, Clone)]
pub struct PartitionCreatorResult {
    pub devicegraph: Devicegraph,
    pub created: Vec<CreatedPartition>,
}

impl PartitionCreatorResult {
    /// Devices to add as physical volumes of `vg_name`
    pub fn pv_devices(&self, vg_name: &str) -> Vec<String> {
        self.created
            .iter()
            .filter(|c| c.planned.lvm_pv_for.as_deref() == Some(vg_name))
            .map(|c| c.device.clone())
            .collect()
    }
}

/// Creates the partitions of a distribution on a copy of a device graph
#[derive(Debug, Clone)]
pub struct PartitionCreator {
    devicegraph: Devicegraph,
}

impl PartitionCreator {
    pub fn new(devicegraph: &Devicegraph) -> Self {
        Self {
            devicegraph: devicegraph.clone(),
        }
    }

    /// Create every partition of `distribution`
    ///
    /// Spaces are handled by disk, then offset. In each space primary
    /// partitions come first, then the extended partition (if the space
    /// gets one) holding the logical ones. On failure the working copy is
    /// dropped with the error.
    pub fn create_partitions(
        mut self,
        distribution: &SpaceDistribution,
    ) -> Result<PartitionCreatorResult> {
        let mut created = Vec::new();
        for assigned in distribution.spaces() {
            self.process_space(assigned, &mut created)?;
        }
        info!("Created {} partitions", created.len());
        Ok(PartitionCreatorResult {
            devicegraph: self.devicegraph,
            created,
        })
    }

    fn process_space(
        &mut self,
        assigned: &AssignedSpace,
        created: &mut Vec<CreatedPartition>,
    ) -> Result<()> {
        let disk_name = assigned.disk_name().to_string();
        let space_end = assigned.space.region.end();
        let num_primary = match assigned.partition_type {
            Some(PartitionType::Logical) => 0,
            Some(PartitionType::Extended) => assigned.num_primary(),
            _ => assigned.volumes.len(),
        };

        debug!(
            "Filling {} with {} partitions ({} logical)",
            assigned.space,
            assigned.volumes.len(),
            assigned.volumes.len() - num_primary
        );

        let mut cursor = assigned.space.region.start;
        for (n, (planned, size)) in assigned.volumes.iter().zip(assigned.sizes()).enumerate() {
            let bytes = size.to_bytes().ok_or_else(|| {
                PlannerError::InvalidSize(format!("unbounded size for {}", planned))
            })?;

            let kind = if n < num_primary {
                PartitionType::Primary
            } else {
                if n == num_primary && assigned.partition_type == Some(PartitionType::Extended) {
                    let extended = Region::from_bounds(cursor, space_end);
                    info!("Creating extended partition on {} at {}", disk_name, extended);
                    self.devicegraph
                        .create_extended_partition(&disk_name, extended)?;
                }
                cursor += LOGICAL_OVERHEAD;
                PartitionType::Logical
            };

            let region = Region::new(cursor, bytes);
            cursor = region.end();
            let name = self.devicegraph.create_partition(&disk_name, region, kind)?;
            let device = self.finish_partition(&disk_name, &name, kind, planned)?;
            info!("Created {} ({}) for {}", name, size, planned);

            created.push(CreatedPartition {
                name,
                device,
                size: *size,
                planned: planned.clone(),
            });
        }
        Ok(())
    }

    /// Set id and flags, then add encryption and filesystem
    fn finish_partition(
        &mut self,
        disk_name: &str,
        name: &str,
        kind: PartitionType,
        planned: &PlannedPartition,
    ) -> Result<String> {
        self.devicegraph
            .set_partition_id(name, planned.effective_partition_id())?;

        if planned.bootable {
            let table = self
                .devicegraph
                .disk(disk_name)
                .map(|d| d.table)
                .ok_or_else(|| PlannerError::DiskNotFound(disk_name.to_string()))?;
            match table {
                PartitionTableType::Msdos if kind == PartitionType::Primary => {
                    self.devicegraph.set_boot_flags(name, true, false)?;
                }
                PartitionTableType::Gpt => {
                    self.devicegraph.set_boot_flags(name, false, true)?;
                }
                PartitionTableType::Msdos => {}
            }
        }

        let mut device = name.to_string();
        if let Some(password) = &planned.encryption_password {
            device = self
                .devicegraph
                .create_encryption(name, &encryption_name(name), password)?;
        }

        if !planned.is_lvm_pv() {
            if let Some(fs_type) = planned.filesystem {
                self.devicegraph
                    .create_filesystem(&device, fs_type, planned.mount_point.as_deref())?;
            }
        }
        Ok(device)
    }
}
