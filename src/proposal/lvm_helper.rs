//! LVM space accounting for the distribution search
//!
//! [`LvmHelper`] answers how much physical volume capacity a planned volume
//! group still needs and turns that demand into PV pseudo-partitions the
//! calculator can place like any other planned partition.

use crate::disk::devicegraph::{Devicegraph, PartitionId, VolumeGroup};
use crate::disk::lvm::{raw_pv_size, useful_pv_space};
use crate::disk::size::DiskSize;
use crate::proposal::planned::{MakeSpacePolicy, PlannedPartition, PlannedVg};
use crate::utils::error::{PlannerError, Result};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LvmHelper {
    planned_vg: PlannedVg,
    /// Snapshot of the reused volume group, if any
    reused_vg: Option<VolumeGroup>,
}

impl LvmHelper {
    pub fn new(planned_vg: PlannedVg, devicegraph: &Devicegraph) -> Result<Self> {
        let reused_vg = match &planned_vg.reuse {
            Some(name) => Some(
                devicegraph
                    .find_vg(name)
                    .cloned()
                    .ok_or_else(|| PlannerError::VolumeGroupNotFound(name.clone()))?,
            ),
            None => None,
        };
        Ok(Self {
            planned_vg,
            reused_vg,
        })
    }

    pub fn planned_vg(&self) -> &PlannedVg {
        &self.planned_vg
    }

    pub fn reused_vg(&self) -> Option<&VolumeGroup> {
        self.reused_vg.as_ref()
    }

    /// Name PV pseudo-partitions refer to
    pub fn vg_name(&self) -> &str {
        self.planned_vg
            .reuse
            .as_deref()
            .unwrap_or(&self.planned_vg.volume_group_name)
    }

    /// Extent size in effect: the reused group's or the planned one
    pub fn extent_size(&self) -> DiskSize {
        self.reused_vg
            .as_ref()
            .map(|vg| vg.extent_size)
            .unwrap_or(self.planned_vg.extent_size)
    }

    /// Space the new logical volumes need at least
    pub fn needed_space(&self) -> DiskSize {
        let extent = self.extent_size();
        self.planned_vg
            .new_lvs()
            .map(|lv| lv.min_size.ceil(extent))
            .sum()
    }

    /// Space of the reused group that new logical volumes can take
    ///
    /// Under `Keep` every existing logical volume stays. Otherwise only the
    /// reused ones are guaranteed to survive.
    pub fn available_space(&self) -> DiskSize {
        let Some(vg) = &self.reused_vg else {
            return DiskSize::zero();
        };
        let reused = self.planned_vg.reused_lv_names();
        let surviving: DiskSize = vg
            .lvs
            .iter()
            .filter(|lv| {
                self.planned_vg.make_space_policy == MakeSpacePolicy::Keep
                    || reused.contains(&lv.name.as_str())
            })
            .map(|lv| lv.size.ceil(vg.extent_size))
            .sum();
        vg.size() - surviving
    }

    /// New physical volume capacity the group needs
    pub fn missing_space(&self) -> DiskSize {
        (self.needed_space() - self.available_space()).ceil(self.extent_size())
    }

    /// Most physical volume capacity the logical volumes can make use of
    pub fn max_extra_space(&self) -> DiskSize {
        let extent = self.extent_size();
        let max: DiskSize = self
            .planned_vg
            .new_lvs()
            .map(|lv| lv.max_size.ceil(extent))
            .sum();
        (max - self.available_space()).ceil(extent)
    }

    pub fn useful_pv_space(&self, raw_size: DiskSize) -> DiskSize {
        useful_pv_space(raw_size, self.extent_size())
    }

    /// Partition size giving `useful` bytes of physical volume capacity
    pub fn raw_size_for(&self, useful: DiskSize) -> DiskSize {
        raw_pv_size(useful, self.extent_size())
    }

    /// PV pseudo-partition providing between `useful_min` and `useful_max`
    pub fn pv_volume(&self, useful_min: DiskSize, useful_max: DiskSize) -> PlannedPartition {
        let weight = self.planned_vg.new_lvs().map(|lv| lv.weight).sum();
        let mut pv = PlannedPartition::new(None, None).with_sizes(
            self.raw_size_for(useful_min),
            self.raw_size_for(useful_max),
            weight,
        );
        pv.partition_id = Some(PartitionId::Lvm);
        pv.lvm_pv_for = Some(self.vg_name().to_string());
        pv.encryption_password = self.planned_vg.pvs_encryption_password.clone();
        pv
    }

    /// Ways to place the missing capacity, given the room left in each space
    ///
    /// Every space able to hold the whole demand alone yields a placement
    /// with a single PV. When none can, the demand is split greedily over
    /// the roomiest spaces; an empty result means it cannot be covered.
    pub fn pv_placements(&self, leftovers: &[DiskSize]) -> Vec<Vec<(usize, PlannedPartition)>> {
        let missing = self.missing_space();
        if missing.is_zero() {
            return Vec::new();
        }
        let max_extra = self.max_extra_space();
        let min_raw = self.raw_size_for(missing);

        let singles: Vec<Vec<(usize, PlannedPartition)>> = leftovers
            .iter()
            .enumerate()
            .filter(|(_, room)| **room >= min_raw)
            .map(|(i, _)| vec![(i, self.pv_volume(missing, max_extra))])
            .collect();
        if !singles.is_empty() {
            return singles;
        }

        let mut order: Vec<usize> = (0..leftovers.len()).collect();
        order.sort_by(|a, b| leftovers[*b].cmp(&leftovers[*a]));

        let mut remaining = missing;
        let mut pieces = Vec::new();
        for i in order {
            if remaining.is_zero() {
                break;
            }
            let useful = self.useful_pv_space(leftovers[i]);
            if useful.is_zero() {
                continue;
            }
            let take = useful.min(remaining);
            pieces.push((i, take));
            remaining -= take;
        }
        if !remaining.is_zero() {
            return Vec::new();
        }

        debug!("Splitting {} of PV space over {} spaces", missing, pieces.len());
        let growth = max_extra - missing;
        let placement = pieces
            .into_iter()
            .enumerate()
            .map(|(n, (i, take))| {
                let max = if n == 0 { take + growth } else { take };
                (i, self.pv_volume(take, max))
            })
            .collect();
        vec![placement]
    }

    /// Existing volume groups that could be reused, best candidates first
    ///
    /// Groups big enough for the new logical volumes come first, smallest
    /// first. Groups too small follow, biggest first.
    pub fn reusable_volume_groups<'a>(&self, devicegraph: &'a Devicegraph) -> Vec<&'a VolumeGroup> {
        let needed = self.needed_space();
        let (mut big, mut small): (Vec<&VolumeGroup>, Vec<&VolumeGroup>) = devicegraph
            .volume_groups
            .iter()
            .partition(|vg| vg.size() >= needed);
        big.sort_by_key(|vg| vg.size());
        small.sort_by_key(|vg| std::cmp::Reverse(vg.size()));
        big.extend(small);
        big
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::devicegraph::{Disk, LogicalVolume, PartitionTableType, PartitionType};
    use crate::disk::region::{Region, ALIGN_GRAIN};
    use crate::proposal::planned::PlannedLv;

    const GIB: u64 = 1024 * ALIGN_GRAIN;

    fn planned(lvs: Vec<PlannedLv>) -> PlannedVg {
        let mut vg = PlannedVg::new("system");
        vg.lvs = lvs;
        vg
    }

    fn lv(name: &str, min_gib: u64, max: DiskSize) -> PlannedLv {
        PlannedLv::new(name, None, None).with_sizes(DiskSize::gib(min_gib), max, 1)
    }

    /// One disk with a 10 GiB partition backing vg1, holding lv1 and lv2
    fn graph_with_vg() -> Devicegraph {
        let mut graph = Devicegraph::new();
        graph.add_disk(Disk::new("/dev/sda", DiskSize::gib(50), PartitionTableType::Gpt));
        let part = graph
            .create_partition("/dev/sda", Region::new(ALIGN_GRAIN, 10 * GIB), PartitionType::Primary)
            .unwrap();
        graph.create_lvm_vg("vg1", DiskSize::mib(4)).unwrap();
        graph.add_pv("vg1", &part).unwrap();
        let vg = graph.volume_groups.iter_mut().find(|vg| vg.name == "vg1").unwrap();
        for (name, gib) in [("lv1", 3), ("lv2", 4)] {
            vg.lvs.push(LogicalVolume {
                name: name.to_string(),
                size: DiskSize::gib(gib),
                stripes: 1,
                stripe_size: None,
                filesystem: None,
            });
        }
        graph
    }

    #[test]
    fn new_group_misses_everything() {
        let helper = LvmHelper::new(
            planned(vec![lv("root", 5, DiskSize::gib(10)), lv("swap", 1, DiskSize::gib(2))]),
            &Devicegraph::new(),
        )
        .unwrap();
        assert_eq!(helper.missing_space(), DiskSize::gib(6));
        assert_eq!(helper.max_extra_space(), DiskSize::gib(12));
    }

    #[test]
    fn unlimited_lv_gives_unlimited_extra() {
        let helper = LvmHelper::new(
            planned(vec![lv("root", 5, DiskSize::Unlimited)]),
            &Devicegraph::new(),
        )
        .unwrap();
        assert!(helper.max_extra_space().is_unlimited());
    }

    #[test]
    fn missing_space_rounds_to_extents() {
        let mut vg = planned(vec![PlannedLv::new("a", None, None).with_sizes(
            DiskSize::mib(10),
            DiskSize::mib(10),
            0,
        )]);
        vg.extent_size = DiskSize::mib(8);
        let helper = LvmHelper::new(vg, &Devicegraph::new()).unwrap();
        assert_eq!(helper.missing_space(), DiskSize::mib(16));
    }

    #[test]
    fn reused_group_reduces_demand() {
        let graph = graph_with_vg();
        // 10 GiB PV gives 10236 MiB of extents
        let mut vg = planned(vec![lv("new", 5, DiskSize::gib(5))]);
        vg.reuse = Some("vg1".to_string());
        vg.make_space_policy = MakeSpacePolicy::Keep;
        let keep = LvmHelper::new(vg.clone(), &graph).unwrap();
        assert_eq!(keep.available_space(), DiskSize::mib(10236 - 7 * 1024));
        assert_eq!(keep.missing_space(), DiskSize::mib(5 * 1024 - (10236 - 7 * 1024)));

        vg.make_space_policy = MakeSpacePolicy::Needed;
        let needed = LvmHelper::new(vg, &graph).unwrap();
        assert!(needed.missing_space().is_zero());
    }

    #[test]
    fn unknown_reused_group_is_an_error() {
        let mut vg = planned(Vec::new());
        vg.reuse = Some("nope".to_string());
        assert!(matches!(
            LvmHelper::new(vg, &Devicegraph::new()),
            Err(PlannerError::VolumeGroupNotFound(_))
        ));
    }

    #[test]
    fn single_pv_when_a_space_is_big_enough() {
        let helper = LvmHelper::new(
            planned(vec![lv("root", 2, DiskSize::gib(2))]),
            &Devicegraph::new(),
        )
        .unwrap();
        let placements = helper.pv_placements(&[DiskSize::gib(1), DiskSize::gib(3), DiskSize::gib(5)]);
        assert_eq!(placements.len(), 2);
        let (space, pv) = &placements[0][0];
        assert_eq!(*space, 1);
        assert!(pv.is_lvm_pv());
        assert_eq!(pv.min_size, DiskSize::mib(2049));
    }

    #[test]
    fn demand_is_split_when_no_space_suffices() {
        let helper = LvmHelper::new(
            planned(vec![lv("root", 4, DiskSize::gib(4))]),
            &Devicegraph::new(),
        )
        .unwrap();
        let placements = helper.pv_placements(&[DiskSize::mib(2049), DiskSize::mib(3073)]);
        assert_eq!(placements.len(), 1);
        let pieces = &placements[0];
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].0, 1);
        assert_eq!(pieces[0].1.min_size, DiskSize::mib(3073));
        assert_eq!(pieces[1].1.min_size, DiskSize::mib(1025));

        assert!(helper.pv_placements(&[DiskSize::gib(1), DiskSize::gib(1)]).is_empty());
    }

    #[test]
    fn reusable_groups_order() {
        let mut graph = Devicegraph::new();
        for (name, gib) in [("a", 20u64), ("b", 5), ("c", 12), ("d", 8)] {
            graph.volume_groups.push(VolumeGroup {
                name: name.to_string(),
                extent_size: DiskSize::mib(4),
                pvs: vec![crate::disk::devicegraph::PhysicalVolume {
                    device: format!("/dev/{}", name),
                    size: DiskSize::gib(gib) + DiskSize::mib(1),
                }],
                lvs: Vec::new(),
            });
        }
        let helper = LvmHelper::new(
            planned(vec![lv("root", 10, DiskSize::gib(10))]),
            &graph,
        )
        .unwrap();
        let names: Vec<&str> = helper
            .reusable_volume_groups(&graph)
            .iter()
            .map(|vg| vg.name.as_str())
            .collect();
        assert_eq!(names, vec!["c", "a", "d", "b"]);
    }
}
