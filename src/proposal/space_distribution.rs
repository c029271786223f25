//! Result of the distribution search: which partitions go to which free
//! space, with which partition types and sizes.

use crate::disk::devicegraph::PartitionType;
use crate::disk::free_space::FreeDiskSpace;
use crate::disk::size::DiskSize;
use crate::proposal::assigned_space::AssignedSpace;
use crate::proposal::planned::PlannedPartition;
use std::cmp::Ordering;
use std::fmt;

/// Assignment of planned partitions to free spaces
///
/// Spaces are kept in processing order (disk name, then offset). A value
/// only exists when it is feasible: every space holds the minimum sizes of
/// its partitions and the partition table limits of every disk are met.
#[derive(Debug, Clone)]
pub struct SpaceDistribution {
    spaces: Vec<AssignedSpace>,
}

impl SpaceDistribution {
    pub fn empty() -> Self {
        Self { spaces: Vec::new() }
    }

    /// Build and size a distribution, `None` if it is not feasible
    pub fn new(assignments: Vec<(FreeDiskSpace, Vec<PlannedPartition>)>) -> Option<Self> {
        let mut spaces: Vec<AssignedSpace> = assignments
            .into_iter()
            .filter(|(_, volumes)| !volumes.is_empty())
            .map(|(space, volumes)| AssignedSpace::new(space, volumes))
            .collect();
        spaces.sort_by(|a, b| a.space.sort_key().cmp(&b.space.sort_key()));

        let mut disks: Vec<String> = spaces.iter().map(|s| s.disk_name().to_string()).collect();
        disks.dedup();
        for disk in disks {
            let indexes: Vec<usize> = (0..spaces.len())
                .filter(|&i| spaces[i].disk_name() == disk)
                .collect();
            if !assign_partition_types(&mut spaces, &indexes) {
                return None;
            }
        }

        for space in spaces.iter_mut() {
            if !space.distribute() {
                return None;
            }
        }

        Some(Self { spaces })
    }

    pub fn spaces(&self) -> &[AssignedSpace] {
        &self.spaces
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }

    fn assigned(&self, space: &FreeDiskSpace) -> Option<&AssignedSpace> {
        self.spaces
            .iter()
            .find(|s| s.space.disk_name == space.disk_name && s.space.region == space.region)
    }

    pub fn volumes_for(&self, space: &FreeDiskSpace) -> Option<&[PlannedPartition]> {
        self.assigned(space).map(|s| s.volumes.as_slice())
    }

    pub fn sizes_for(&self, space: &FreeDiskSpace) -> Option<&[DiskSize]> {
        self.assigned(space).map(|s| s.sizes())
    }

    pub fn type_for(&self, space: &FreeDiskSpace) -> Option<PartitionType> {
        self.assigned(space).and_then(|s| s.partition_type)
    }

    pub fn num_logical_for(&self, space: &FreeDiskSpace) -> usize {
        self.assigned(space).map(|s| s.num_logical).unwrap_or(0)
    }

    /// Spaces where the partitions leave some room unused
    pub fn gaps_count(&self) -> usize {
        self.spaces.iter().filter(|s| s.has_gap()).count()
    }

    pub fn gaps_total_disk_size(&self) -> DiskSize {
        self.spaces.iter().map(|s| s.unused_size()).sum()
    }

    pub fn total_assigned_size(&self) -> DiskSize {
        self.spaces.iter().map(|s| s.assigned_size()).sum()
    }

    pub fn volumes_count(&self) -> usize {
        self.spaces.iter().map(|s| s.volumes.len()).sum()
    }

    /// Physical volume partitions injected for LVM
    pub fn pv_count(&self) -> usize {
        self.spaces
            .iter()
            .flat_map(|s| s.volumes.iter())
            .filter(|v| v.is_lvm_pv())
            .count()
    }

    pub fn spaces_count(&self) -> usize {
        self.spaces.len()
    }

    /// Combined size of the spaces in use
    pub fn used_spaces_size(&self) -> DiskSize {
        self.spaces.iter().map(|s| s.space.disk_size()).sum()
    }

    /// Every planned partition with its final size
    pub fn planned_sizes(&self) -> impl Iterator<Item = (&PlannedPartition, DiskSize)> {
        self.spaces
            .iter()
            .flat_map(|s| s.volumes.iter().zip(s.sizes().iter().copied()))
    }

    /// Ranking between two feasible distributions, `Less` meaning better
    ///
    /// Criteria in order: more requested partitions placed, fewer physical
    /// volume pieces, fewer gaps, less unused space, fewer spaces touched,
    /// more space handed to partitions, smaller spaces consumed.
    pub fn compare(&self, other: &SpaceDistribution) -> Ordering {
        let requested = |d: &SpaceDistribution| d.volumes_count() - d.pv_count();
        requested(other)
            .cmp(&requested(self))
            .then_with(|| self.pv_count().cmp(&other.pv_count()))
            .then_with(|| self.gaps_count().cmp(&other.gaps_count()))
            .then_with(|| {
                self.gaps_total_disk_size()
                    .cmp(&other.gaps_total_disk_size())
            })
            .then_with(|| self.spaces_count().cmp(&other.spaces_count()))
            .then_with(|| {
                other
                    .total_assigned_size()
                    .cmp(&self.total_assigned_size())
            })
            .then_with(|| self.used_spaces_size().cmp(&other.used_spaces_size()))
    }

    pub fn is_better_than(&self, other: &SpaceDistribution) -> bool {
        self.compare(other) == Ordering::Less
    }
}

/// Decide primary/extended/logical placement for the spaces of one disk
///
/// Spaces inside an existing extended partition only take logical
/// partitions. The rest are primary while the table has slots for all of
/// them; otherwise one space becomes the new extended partition, taking as
/// logical whatever does not fit in the remaining primary slots.
fn assign_partition_types(spaces: &mut [AssignedSpace], indexes: &[usize]) -> bool {
    let Some(&first) = indexes.first() else {
        return true;
    };
    let table = spaces[first].space.clone();

    let (inside, outside): (Vec<usize>, Vec<usize>) = indexes
        .iter()
        .partition(|&&i| spaces[i].space.in_extended);

    let mut logical_needed = 0;
    for &i in &inside {
        spaces[i].partition_type = Some(PartitionType::Logical);
        spaces[i].num_logical = spaces[i].volumes.len();
        logical_needed += spaces[i].volumes.len();
    }
    if logical_needed > table.logical_slots {
        return false;
    }

    let outside_count: usize = outside.iter().map(|&i| spaces[i].volumes.len()).sum();
    let forced_primary = table.extended_exists || !table.extended_possible;

    if outside_count <= table.primary_slots {
        for &i in &outside {
            spaces[i].num_logical = 0;
            spaces[i].partition_type = forced_primary.then_some(PartitionType::Primary);
        }
        return true;
    }

    if forced_primary || table.primary_slots == 0 {
        return false;
    }

    // One slot goes to the extended partition itself
    let primaries_left = table.primary_slots - 1;
    let mut chosen: Option<(usize, usize)> = None;
    for &candidate in &outside {
        let here = spaces[candidate].volumes.len();
        let others = outside_count - here;
        if others > primaries_left {
            continue;
        }
        let num_logical = here - (primaries_left - others).min(here);
        if logical_needed + num_logical > table.logical_slots {
            continue;
        }
        if !spaces[candidate].fits_with(num_logical) {
            continue;
        }
        let better = match chosen {
            None => true,
            Some((current, _)) => {
                let current_key = (spaces[current].volumes.len(), spaces[current].space.disk_size());
                (here, spaces[candidate].space.disk_size()) > current_key
            }
        };
        if better {
            chosen = Some((candidate, num_logical));
        }
    }

    let Some((extended, num_logical)) = chosen else {
        return false;
    };
    for &i in &outside {
        if i == extended {
            spaces[i].partition_type = Some(PartitionType::Extended);
            spaces[i].num_logical = num_logical;
        } else {
            spaces[i].partition_type = Some(PartitionType::Primary);
            spaces[i].num_logical = 0;
        }
    }
    true
}

impl fmt::Display for SpaceDistribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for assigned in &self.spaces {
            let kind = assigned
                .partition_type
                .map(|t| t.to_string())
                .unwrap_or_else(|| "any".to_string());
            writeln!(
                f,
                "{} type={} logical={}",
                assigned.space, kind, assigned.num_logical
            )?;
            for (volume, size) in assigned.volumes.iter().zip(assigned.sizes()) {
                writeln!(f, "    {} -> {}", volume, size)?;
            }
        }
        Ok(())
    }
}
