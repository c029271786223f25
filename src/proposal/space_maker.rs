//! Free disk space by deleting existing partitions
//!
//! The space maker asks the calculator for a distribution over the current
//! free spaces and, while there is none, deletes one more partition and
//! retries. Linux partitions go before other ones and, on each disk, the
//! partitions at the end go first.

use crate::config::settings::DeleteSettings;
use crate::disk::devicegraph::{Devicegraph, Partition};
use crate::proposal::calculator::SpaceDistributionCalculator;
use crate::proposal::planned::PlannedPartition;
use crate::proposal::space_distribution::SpaceDistribution;
use crate::utils::error::{PlannerError, Result};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct SpaceMakerResult {
    pub devicegraph: Devicegraph,
    pub deleted_partitions: Vec<String>,
    pub distribution: SpaceDistribution,
}

#[derive(Debug, Clone)]
pub struct SpaceMaker {
    candidate_disks: Vec<String>,
    delete: DeleteSettings,
    /// Devices that must survive (reused partitions, PVs of a reused group)
    protected: Vec<String>,
}

impl SpaceMaker {
    pub fn new(candidate_disks: &[String], delete: DeleteSettings) -> Self {
        Self {
            candidate_disks: candidate_disks.to_vec(),
            delete,
            protected: Vec::new(),
        }
    }

    pub fn protect<I>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        self.protected.extend(devices);
        self
    }

    /// Delete partitions until `volumes` can be distributed
    pub fn provide_space(
        &self,
        devicegraph: &Devicegraph,
        volumes: &[PlannedPartition],
        calculator: &SpaceDistributionCalculator,
    ) -> Result<SpaceMakerResult> {
        let mut graph = devicegraph.clone();
        let mut deleted_partitions = Vec::new();

        loop {
            let spaces = graph.free_disk_spaces_on(&self.candidate_disks);
            debug!("Trying a distribution over {} free spaces", spaces.len());
            if let Some(distribution) = calculator.best_distribution(volumes, &spaces) {
                return Ok(SpaceMakerResult {
                    devicegraph: graph,
                    deleted_partitions,
                    distribution,
                });
            }

            let Some(victim) = self.deletion_candidates(&graph).into_iter().next() else {
                return Err(PlannerError::NoDiskSpace(format!(
                    "nothing left to delete on {}",
                    self.candidate_disks.join(", ")
                )));
            };
            info!("Deleting {} to make space", victim);
            deleted_partitions.extend(graph.delete_partition(&victim)?);
        }
    }

    /// Partitions that may be deleted, in deletion order
    pub fn deletion_candidates(&self, devicegraph: &Devicegraph) -> Vec<String> {
        let mut linux = Vec::new();
        let mut other = Vec::new();

        for disk_name in &self.candidate_disks {
            let Some(disk) = devicegraph.disk(disk_name) else {
                continue;
            };
            let mut parts: Vec<&Partition> = disk
                .partitions
                .iter()
                .filter(|p| !p.is_extended() && !self.is_protected(p))
                .collect();
            parts.sort_by_key(|p| std::cmp::Reverse(p.region.start));

            for part in parts {
                if part.id.is_linux_system() {
                    linux.push(part.name.clone());
                } else {
                    other.push(part.name.clone());
                }
            }
        }

        let mut candidates = Vec::new();
        if self.delete.linux {
            candidates.extend(linux);
        }
        if self.delete.other {
            candidates.extend(other);
        }
        candidates
    }

    fn is_protected(&self, part: &Partition) -> bool {
        self.protected.contains(&part.name)
            || part
                .encryption
                .as_ref()
                .is_some_and(|enc| self.protected.contains(&enc.mapped_path()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::devicegraph::{Disk, PartitionId, PartitionTableType, PartitionType};
    use crate::disk::region::Region;
    use crate::disk::size::DiskSize;

    const GIB: u64 = 1024 * 1024 * 1024;

    /// 20 GiB disk: Windows (8 GiB), Linux (5 GiB), swap (5 GiB)
    fn crowded() -> Devicegraph {
        let mut graph = Devicegraph::new();
        graph.add_disk(Disk::new("/dev/sda", DiskSize::gib(20), PartitionTableType::Gpt));
        let layout = [
            (1, 8, PartitionId::Windows),
            (9, 5, PartitionId::Linux),
            (14, 5, PartitionId::Swap),
        ];
        for (start, size, id) in layout {
            let name = graph
                .create_partition(
                    "/dev/sda",
                    Region::new(start * GIB, size * GIB),
                    PartitionType::Primary,
                )
                .unwrap();
            graph.set_partition_id(&name, id).unwrap();
        }
        graph
    }

    fn volume(gib: u64) -> PlannedPartition {
        PlannedPartition::new(Some("/"), None).with_sizes(DiskSize::gib(gib), DiskSize::Unlimited, 1)
    }

    fn disks() -> Vec<String> {
        vec!["/dev/sda".to_string()]
    }

    #[test]
    fn no_deletion_when_space_suffices() {
        let maker = SpaceMaker::new(&disks(), DeleteSettings::default());
        let calculator = SpaceDistributionCalculator::default();
        let result = maker
            .provide_space(&crowded(), &[volume(0)], &calculator)
            .unwrap();
        assert!(result.deleted_partitions.is_empty());
    }

    #[test]
    fn deletes_linux_partitions_from_the_end() {
        let maker = SpaceMaker::new(&disks(), DeleteSettings::default());
        let calculator = SpaceDistributionCalculator::default();
        let result = maker
            .provide_space(&crowded(), &[volume(4)], &calculator)
            .unwrap();
        assert_eq!(result.deleted_partitions, vec!["/dev/sda3".to_string()]);

        let result = maker
            .provide_space(&crowded(), &[volume(8)], &calculator)
            .unwrap();
        assert_eq!(
            result.deleted_partitions,
            vec!["/dev/sda3".to_string(), "/dev/sda2".to_string()]
        );
        assert!(result.devicegraph.find_partition("/dev/sda1").is_some());
    }

    #[test]
    fn other_partitions_need_permission() {
        let calculator = SpaceDistributionCalculator::default();
        let maker = SpaceMaker::new(&disks(), DeleteSettings::default());
        let err = maker
            .provide_space(&crowded(), &[volume(15)], &calculator)
            .unwrap_err();
        assert!(matches!(err, PlannerError::NoDiskSpace(_)));

        let maker = SpaceMaker::new(
            &disks(),
            DeleteSettings {
                linux: true,
                other: true,
            },
        );
        let result = maker
            .provide_space(&crowded(), &[volume(15)], &calculator)
            .unwrap();
        assert_eq!(result.deleted_partitions.len(), 3);
    }

    #[test]
    fn protected_partitions_survive() {
        let maker =
            SpaceMaker::new(&disks(), DeleteSettings::default()).protect(vec!["/dev/sda3".to_string()]);
        assert_eq!(maker.deletion_candidates(&crowded()), vec!["/dev/sda2".to_string()]);
    }
}
