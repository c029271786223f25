//! Free regions on a disk, as seen by the planner

use crate::disk::region::{Region, LOGICAL_OVERHEAD};
use crate::disk::size::DiskSize;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A contiguous unused region of a disk
///
/// Produced by scanning a device graph and immutable for the rest of a
/// planning run. The slot counters describe the partition table of the
/// disk holding the region, so every space of a disk carries the same values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeDiskSpace {
    /// Disk device path (e.g., /dev/sda)
    pub disk_name: String,
    /// Byte range of the free region
    pub region: Region,
    /// The region lies inside an existing extended partition
    #[serde(default)]
    pub in_extended: bool,
    /// Primary table entries still unused on the disk
    pub primary_slots: usize,
    /// Logical partitions that can still be created on the disk
    #[serde(default)]
    pub logical_slots: usize,
    /// The disk already has an extended partition
    #[serde(default)]
    pub extended_exists: bool,
    /// The partition table supports an extended partition at all (MBR)
    #[serde(default)]
    pub extended_possible: bool,
}

impl FreeDiskSpace {
    /// Plain space on a GPT-like disk with plenty of primary slots
    pub fn new(disk_name: &str, region: Region) -> Self {
        Self {
            disk_name: disk_name.to_string(),
            region,
            in_extended: false,
            primary_slots: 128,
            logical_slots: 0,
            extended_exists: false,
            extended_possible: false,
        }
    }

    pub fn disk_size(&self) -> DiskSize {
        self.region.size()
    }

    /// Size left for partitions if `num_logical` of them are logical
    pub fn usable_size(&self, num_logical: usize) -> DiskSize {
        self.disk_size() - DiskSize::b(LOGICAL_OVERHEAD) * num_logical as u64
    }

    /// Sort key giving the fixed processing order: disk, then offset
    pub fn sort_key(&self) -> (&str, u64) {
        (self.disk_name.as_str(), self.region.start)
    }
}

impl fmt::Display for FreeDiskSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.disk_name, self.region)?;
        if self.in_extended {
            write!(f, " (in extended)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::region::ALIGN_GRAIN;

    #[test]
    fn usable_size_subtracts_logical_overhead() {
        let space = FreeDiskSpace::new("/dev/sda", Region::new(ALIGN_GRAIN, 100 * ALIGN_GRAIN));
        assert_eq!(space.usable_size(0), DiskSize::mib(100));
        assert_eq!(space.usable_size(3), DiskSize::mib(97));
    }
}
