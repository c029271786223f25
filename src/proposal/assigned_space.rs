//! A free space together with the partitions assigned to it

use crate::disk::devicegraph::PartitionType;
use crate::disk::free_space::FreeDiskSpace;
use crate::disk::region::ALIGN_GRAIN;
use crate::disk::size::DiskSize;
use crate::proposal::planned::{distribute_space, total_min_size, PlannedPartition};

#[derive(Debug, Clone)]
pub struct AssignedSpace {
    pub space: FreeDiskSpace,
    /// Partitions in creation order
    pub volumes: Vec<PlannedPartition>,
    /// Partition type forced on the space, `None` when anything goes
    pub partition_type: Option<PartitionType>,
    /// How many of the partitions (the last ones) must be logical
    pub num_logical: usize,
    sizes: Vec<DiskSize>,
}

impl AssignedSpace {
    pub fn new(space: FreeDiskSpace, volumes: Vec<PlannedPartition>) -> Self {
        Self {
            space,
            volumes,
            partition_type: None,
            num_logical: 0,
            sizes: Vec::new(),
        }
    }

    pub fn grain() -> DiskSize {
        DiskSize::b(ALIGN_GRAIN)
    }

    /// Size left once the EBR of every logical partition is accounted for
    pub fn usable_size(&self) -> DiskSize {
        self.space.usable_size(self.num_logical)
    }

    pub fn total_min_size(&self) -> DiskSize {
        total_min_size(&self.volumes, Self::grain())
    }

    /// Whether the minimum sizes fit, with `num_logical` logical partitions
    pub fn fits_with(&self, num_logical: usize) -> bool {
        self.total_min_size() <= self.space.usable_size(num_logical)
    }

    /// Compute the final size of every partition
    ///
    /// Returns false when the minimum sizes do not fit the usable size.
    pub fn distribute(&mut self) -> bool {
        match distribute_space(&self.volumes, self.usable_size(), Self::grain()) {
            Some(sizes) => {
                self.sizes = sizes;
                true
            }
            None => false,
        }
    }

    /// Final sizes, parallel to `volumes`
    pub fn sizes(&self) -> &[DiskSize] {
        &self.sizes
    }

    pub fn assigned_size(&self) -> DiskSize {
        self.sizes.iter().sum()
    }

    /// Part of the usable size no partition takes
    pub fn unused_size(&self) -> DiskSize {
        self.usable_size() - self.assigned_size()
    }

    pub fn has_gap(&self) -> bool {
        !self.unused_size().is_zero()
    }

    /// Number of partitions placed as primary before any logical one
    pub fn num_primary(&self) -> usize {
        self.volumes.len() - self.num_logical.min(self.volumes.len())
    }

    pub fn disk_name(&self) -> &str {
        &self.space.disk_name
    }
}
