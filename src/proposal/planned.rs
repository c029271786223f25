//! Planned devices: requests for partitions and logical volumes that do not
//! exist yet.
//!
//! [`PlannedVolume`] is the sum of the two kinds of request. Both carry the
//! size range and weight exposed through [`Sizing`], which is all the
//! distribution code needs to know about them.

use crate::disk::devicegraph::{FilesystemType, PartitionId};
use crate::disk::lvm::DEFAULT_EXTENT_SIZE;
use crate::disk::size::DiskSize;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size constraints shared by every planned device
pub trait Sizing {
    fn min_size(&self) -> DiskSize;
    fn max_size(&self) -> DiskSize;
    /// Relative share of the surplus space
    fn weight(&self) -> u32;
}

/// A partition to be created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedPartition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FilesystemType>,
    pub min_size: DiskSize,
    pub max_size: DiskSize,
    #[serde(default)]
    pub weight: u32,
    /// Only place the partition on this disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<String>,
    /// Existing partition to use instead of creating one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reuse: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_id: Option<PartitionId>,
    #[serde(default)]
    pub bootable: bool,
    #[serde(default, skip_serializing)]
    pub encryption_password: Option<String>,
    /// Name of the volume group this partition is a physical volume for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lvm_pv_for: Option<String>,
}

impl PlannedPartition {
    pub fn new(mount_point: Option<&str>, filesystem: Option<FilesystemType>) -> Self {
        Self {
            mount_point: mount_point.map(str::to_string),
            filesystem,
            min_size: DiskSize::zero(),
            max_size: DiskSize::Unlimited,
            weight: 0,
            disk: None,
            reuse: None,
            partition_id: None,
            bootable: false,
            encryption_password: None,
            lvm_pv_for: None,
        }
    }

    pub fn with_sizes(mut self, min: DiskSize, max: DiskSize, weight: u32) -> Self {
        self.min_size = min;
        self.max_size = max;
        self.weight = weight;
        self
    }

    pub fn on_disk(mut self, disk: &str) -> Self {
        self.disk = Some(disk.to_string());
        self
    }

    pub fn is_reused(&self) -> bool {
        self.reuse.is_some()
    }

    pub fn is_lvm_pv(&self) -> bool {
        self.lvm_pv_for.is_some()
    }

    /// Partition id to set once the partition exists
    pub fn effective_partition_id(&self) -> PartitionId {
        if let Some(id) = self.partition_id {
            return id;
        }
        if self.is_lvm_pv() {
            return PartitionId::Lvm;
        }
        self.filesystem
            .map(|fs| fs.default_partition_id())
            .unwrap_or_default()
    }
}

impl Sizing for PlannedPartition {
    fn min_size(&self) -> DiskSize {
        self.min_size
    }

    fn max_size(&self) -> DiskSize {
        self.max_size
    }

    fn weight(&self) -> u32 {
        self.weight
    }
}

impl fmt::Display for PlannedPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = if let Some(vg) = &self.lvm_pv_for {
            format!("PV of {}", vg)
        } else {
            self.mount_point.clone().unwrap_or_else(|| "-".to_string())
        };
        write!(f, "{} [{} - {}]", label, self.min_size, self.max_size)
    }
}

/// A logical volume to be created in a planned volume group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedLv {
    pub logical_volume_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FilesystemType>,
    pub min_size: DiskSize,
    pub max_size: DiskSize,
    #[serde(default)]
    pub weight: u32,
    /// Size as a percentage of the final volume group size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stripes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stripe_size: Option<DiskSize>,
    /// Existing logical volume (in the reused group) to keep and use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reuse: Option<String>,
}

impl PlannedLv {
    pub fn new(name: &str, mount_point: Option<&str>, filesystem: Option<FilesystemType>) -> Self {
        Self {
            logical_volume_name: name.to_string(),
            mount_point: mount_point.map(str::to_string),
            filesystem,
            min_size: DiskSize::zero(),
            max_size: DiskSize::Unlimited,
            weight: 0,
            percent_size: None,
            stripes: None,
            stripe_size: None,
            reuse: None,
        }
    }

    pub fn with_sizes(mut self, min: DiskSize, max: DiskSize, weight: u32) -> Self {
        self.min_size = min;
        self.max_size = max;
        self.weight = weight;
        self
    }

    pub fn is_reused(&self) -> bool {
        self.reuse.is_some()
    }
}

impl Sizing for PlannedLv {
    fn min_size(&self) -> DiskSize {
        self.min_size
    }

    fn max_size(&self) -> DiskSize {
        self.max_size
    }

    fn weight(&self) -> u32 {
        self.weight
    }
}

/// What to do with logical volumes of a reused group that are not reused
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MakeSpacePolicy {
    /// Never delete existing logical volumes
    Keep,
    /// Delete them one by one only while space is missing
    #[default]
    Needed,
    /// Delete all of them up front
    Remove,
}

/// A volume group to be created or reused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedVg {
    pub volume_group_name: String,
    #[serde(default = "default_extent_size")]
    pub extent_size: DiskSize,
    /// Existing volume group to reuse
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reuse: Option<String>,
    #[serde(default)]
    pub make_space_policy: MakeSpacePolicy,
    #[serde(default)]
    pub lvs: Vec<PlannedLv>,
    /// Encrypt every new physical volume with this password
    #[serde(default, skip_serializing)]
    pub pvs_encryption_password: Option<String>,
}

fn default_extent_size() -> DiskSize {
    DEFAULT_EXTENT_SIZE
}

impl PlannedVg {
    pub fn new(name: &str) -> Self {
        Self {
            volume_group_name: name.to_string(),
            extent_size: DEFAULT_EXTENT_SIZE,
            reuse: None,
            make_space_policy: MakeSpacePolicy::default(),
            lvs: Vec::new(),
            pvs_encryption_password: None,
        }
    }

    /// Logical volumes that must be created
    pub fn new_lvs(&self) -> impl Iterator<Item = &PlannedLv> {
        self.lvs.iter().filter(|lv| !lv.is_reused())
    }

    /// Names of existing logical volumes the plan keeps
    pub fn reused_lv_names(&self) -> Vec<&str> {
        self.lvs.iter().filter_map(|lv| lv.reuse.as_deref()).collect()
    }
}

/// Any planned device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlannedVolume {
    Partition(PlannedPartition),
    LogicalVolume(PlannedLv),
}

impl PlannedVolume {
    pub fn mount_point(&self) -> Option<&str> {
        match self {
            PlannedVolume::Partition(p) => p.mount_point.as_deref(),
            PlannedVolume::LogicalVolume(lv) => lv.mount_point.as_deref(),
        }
    }

    pub fn is_reused(&self) -> bool {
        match self {
            PlannedVolume::Partition(p) => p.is_reused(),
            PlannedVolume::LogicalVolume(lv) => lv.is_reused(),
        }
    }
}

impl Sizing for PlannedVolume {
    fn min_size(&self) -> DiskSize {
        match self {
            PlannedVolume::Partition(p) => p.min_size(),
            PlannedVolume::LogicalVolume(lv) => lv.min_size(),
        }
    }

    fn max_size(&self) -> DiskSize {
        match self {
            PlannedVolume::Partition(p) => p.max_size(),
            PlannedVolume::LogicalVolume(lv) => lv.max_size(),
        }
    }

    fn weight(&self) -> u32 {
        match self {
            PlannedVolume::Partition(p) => p.weight(),
            PlannedVolume::LogicalVolume(lv) => lv.weight(),
        }
    }
}

/// Split a mixed list into partitions and logical volumes
pub fn split_volumes(volumes: Vec<PlannedVolume>) -> (Vec<PlannedPartition>, Vec<PlannedLv>) {
    let mut partitions = Vec::new();
    let mut lvs = Vec::new();
    for volume in volumes {
        match volume {
            PlannedVolume::Partition(p) => partitions.push(p),
            PlannedVolume::LogicalVolume(lv) => lvs.push(lv),
        }
    }
    (partitions, lvs)
}

/// Sum of minimum sizes, each rounded up to `grain`
pub fn total_min_size<T: Sizing>(volumes: &[T], grain: DiskSize) -> DiskSize {
    volumes.iter().map(|v| v.min_size().ceil(grain)).sum()
}

/// Partitions restricted to `disk`
pub fn by_disk<'a>(volumes: &'a [PlannedPartition], disk: &str) -> Vec<&'a PlannedPartition> {
    volumes
        .iter()
        .filter(|v| v.disk.as_deref() == Some(disk))
        .collect()
}

/// Partitions that need a place in the free space
pub fn to_distribute(volumes: &[PlannedPartition]) -> Vec<PlannedPartition> {
    volumes.iter().filter(|v| !v.is_reused()).cloned().collect()
}

/// Size every volume inside `space`, spreading the surplus by weight
///
/// Each volume starts at its minimum (rounded up to `grain`). The surplus
/// goes to volumes with a positive weight, proportionally, capping volumes
/// at their maximum and handing what they cannot take to the others until
/// nothing is left or nobody can grow. Sizes stay multiples of `grain`.
/// Returns `None` when the minimums alone do not fit.
pub fn distribute_space<T: Sizing>(
    volumes: &[T],
    space: DiskSize,
    grain: DiskSize,
) -> Option<Vec<DiskSize>> {
    let grain_bytes = grain.to_bytes().filter(|g| *g > 0).unwrap_or(1);
    let mut sizes: Vec<u64> = Vec::with_capacity(volumes.len());
    let mut caps: Vec<u64> = Vec::with_capacity(volumes.len());

    for volume in volumes {
        let min = volume.min_size().ceil(grain).to_bytes()?;
        let max = volume.max_size().floor(grain).bytes_or_max().max(min);
        sizes.push(min);
        caps.push(max);
    }

    let total_min: u64 = sizes.iter().sum();
    let space = space.bytes_or_max();
    if total_min > space {
        return None;
    }
    let mut extra = space - total_min;

    loop {
        let growing: Vec<usize> = (0..volumes.len())
            .filter(|&i| volumes[i].weight() > 0 && sizes[i] < caps[i])
            .collect();
        if growing.is_empty() || extra < grain_bytes {
            break;
        }

        let total_weight: u128 = growing.iter().map(|&i| volumes[i].weight() as u128).sum();
        let shares: Vec<(usize, u64)> = growing
            .iter()
            .map(|&i| {
                let share = extra as u128 * volumes[i].weight() as u128 / total_weight;
                (i, (share as u64) / grain_bytes * grain_bytes)
            })
            .collect();

        let saturated: Vec<usize> = shares
            .iter()
            .filter(|(i, share)| sizes[*i].saturating_add(*share) >= caps[*i])
            .map(|(i, _)| *i)
            .collect();

        if !saturated.is_empty() {
            for i in saturated {
                extra -= caps[i] - sizes[i];
                sizes[i] = caps[i];
            }
            continue;
        }

        for (i, share) in &shares {
            sizes[*i] += share;
            extra -= share;
        }

        // Rounding leftovers, one grain at a time in volume order
        for &i in &growing {
            if extra < grain_bytes {
                break;
            }
            if sizes[i] + grain_bytes <= caps[i] {
                sizes[i] += grain_bytes;
                extra -= grain_bytes;
            }
        }
    }

    Some(sizes.into_iter().map(DiskSize::b).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRAIN: DiskSize = DiskSize::mib(1);

    fn part(min: DiskSize, max: DiskSize, weight: u32) -> PlannedPartition {
        PlannedPartition::new(None, Some(FilesystemType::Ext4)).with_sizes(min, max, weight)
    }

    #[test]
    fn surplus_splits_by_weight() {
        let volumes = vec![
            part(DiskSize::gib(1), DiskSize::Unlimited, 2),
            part(DiskSize::gib(1), DiskSize::Unlimited, 1),
        ];
        let sizes = distribute_space(&volumes, DiskSize::gib(11), GRAIN).unwrap();
        let extra_a = (sizes[0] - DiskSize::gib(1)).to_bytes().unwrap();
        let extra_b = (sizes[1] - DiskSize::gib(1)).to_bytes().unwrap();
        assert_eq!(extra_a + extra_b, DiskSize::gib(9).to_bytes().unwrap());
        let diff = (extra_a as i128 - 2 * extra_b as i128).abs();
        assert!(diff <= 2 * GRAIN.to_bytes().unwrap() as i128);
    }

    #[test]
    fn capped_volume_hands_surplus_to_others() {
        let volumes = vec![
            part(DiskSize::gib(1), DiskSize::gib(2), 10),
            part(DiskSize::gib(1), DiskSize::Unlimited, 1),
        ];
        let sizes = distribute_space(&volumes, DiskSize::gib(10), GRAIN).unwrap();
        assert_eq!(sizes[0], DiskSize::gib(2));
        assert_eq!(sizes[1], DiskSize::gib(8));
    }

    #[test]
    fn zero_weight_keeps_minimum() {
        let volumes = vec![
            part(DiskSize::gib(1), DiskSize::Unlimited, 0),
            part(DiskSize::gib(1), DiskSize::gib(3), 1),
        ];
        let sizes = distribute_space(&volumes, DiskSize::gib(10), GRAIN).unwrap();
        assert_eq!(sizes, vec![DiskSize::gib(1), DiskSize::gib(3)]);
    }

    #[test]
    fn exact_fit_leaves_nothing_to_distribute() {
        let volumes = vec![
            part(DiskSize::gib(2), DiskSize::Unlimited, 1),
            part(DiskSize::gib(3), DiskSize::Unlimited, 1),
        ];
        let sizes = distribute_space(&volumes, DiskSize::gib(5), GRAIN).unwrap();
        assert_eq!(sizes, vec![DiskSize::gib(2), DiskSize::gib(3)]);
    }

    #[test]
    fn minimums_that_do_not_fit_are_rejected() {
        let volumes = vec![part(DiskSize::gib(6), DiskSize::Unlimited, 1)];
        assert!(distribute_space(&volumes, DiskSize::gib(5), GRAIN).is_none());
    }

    #[test]
    fn sizes_respect_grain() {
        let volumes = vec![
            part(DiskSize::b(1500), DiskSize::Unlimited, 1),
            part(DiskSize::mib(3), DiskSize::Unlimited, 1),
            part(DiskSize::mib(3), DiskSize::Unlimited, 1),
        ];
        let sizes = distribute_space(&volumes, DiskSize::mib(100), GRAIN).unwrap();
        assert!(sizes.iter().all(|s| s.to_bytes().unwrap() % GRAIN.to_bytes().unwrap() == 0));
        assert_eq!(sizes.iter().sum::<DiskSize>(), DiskSize::mib(100));
    }

    #[test]
    fn split_volumes_by_kind() {
        let volumes = vec![
            PlannedVolume::Partition(part(DiskSize::gib(1), DiskSize::gib(1), 0)),
            PlannedVolume::LogicalVolume(PlannedLv::new("root", Some("/"), None)),
        ];
        let (parts, lvs) = split_volumes(volumes);
        assert_eq!(parts.len(), 1);
        assert_eq!(lvs[0].logical_volume_name, "root");
    }

    #[test]
    fn by_disk_filters_on_affinity() {
        let volumes = vec![
            part(DiskSize::gib(1), DiskSize::gib(1), 0).on_disk("/dev/sda"),
            part(DiskSize::gib(1), DiskSize::gib(1), 0),
        ];
        assert_eq!(by_disk(&volumes, "/dev/sda").len(), 1);
        assert_eq!(total_min_size(&volumes, GRAIN), DiskSize::gib(2));
    }

    #[test]
    fn pv_gets_lvm_id() {
        let mut pv = part(DiskSize::gib(1), DiskSize::gib(1), 0);
        pv.lvm_pv_for = Some("system".to_string());
        assert_eq!(pv.effective_partition_id(), PartitionId::Lvm);
        let swap = PlannedPartition::new(None, Some(FilesystemType::Swap));
        assert_eq!(swap.effective_partition_id(), PartitionId::Swap);
    }
}
