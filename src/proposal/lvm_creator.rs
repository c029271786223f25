//! Create or extend the planned volume group and its logical volumes

use crate::disk::devicegraph::{encryption_name, Devicegraph, VolumeGroup};
use crate::disk::lvm::{lv_path, unique_name};
use crate::disk::size::DiskSize;
use crate::proposal::planned::{distribute_space, MakeSpacePolicy, PlannedLv, PlannedVg};
use crate::utils::error::{PlannerError, Result};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct LvmCreatorResult {
    pub devicegraph: Devicegraph,
    /// Name the volume group ended up with
    pub vg_name: String,
    /// Device paths of the new logical volumes
    pub created_lvs: Vec<String>,
    /// Device paths of existing logical volumes deleted to make space
    pub deleted_lvs: Vec<String>,
}

/// Materializes a planned volume group on a copy of a device graph
#[derive(Debug, Clone)]
pub struct LvmCreator {
    devicegraph: Devicegraph,
}

impl LvmCreator {
    pub fn new(devicegraph: &Devicegraph) -> Self {
        Self {
            devicegraph: devicegraph.clone(),
        }
    }

    /// Create the volume group over `pv_devices` and its logical volumes
    ///
    /// A reused group gets the new physical volumes added and, depending on
    /// its make-space policy, loses existing logical volumes until the new
    /// ones fit. Names already taken get a numeric suffix.
    pub fn create_volumes(
        mut self,
        planned_vg: &PlannedVg,
        pv_devices: &[String],
    ) -> Result<LvmCreatorResult> {
        let vg_name = match &planned_vg.reuse {
            Some(name) => {
                if self.devicegraph.find_vg(name).is_none() {
                    return Err(PlannerError::VolumeGroupNotFound(name.clone()));
                }
                info!("Reusing volume group '{}'", name);
                name.clone()
            }
            None => {
                let graph = &self.devicegraph;
                let name = unique_name(&planned_vg.volume_group_name, |n| {
                    graph.find_vg(n).is_some()
                });
                self.devicegraph
                    .create_lvm_vg(&name, planned_vg.extent_size)?;
                name
            }
        };

        for device in pv_devices {
            let device = self.encrypt_pv(device, planned_vg)?;
            self.devicegraph.add_pv(&vg_name, &device)?;
        }

        let deleted_lvs = self.make_space(&vg_name, planned_vg)?;
        let sizes = self.lv_sizes(&vg_name, planned_vg)?;

        let mut created_lvs = Vec::new();
        for (planned, size) in planned_vg.lvs.iter().zip(sizes) {
            let path = match (&planned.reuse, size) {
                (Some(existing), _) => lv_path(&vg_name, existing),
                (None, Some(size)) => {
                    let path = self.create_lv(&vg_name, planned, size)?;
                    created_lvs.push(path.clone());
                    path
                }
                (None, None) => continue,
            };
            if let Some(fs_type) = planned.filesystem {
                self.devicegraph
                    .create_filesystem(&path, fs_type, planned.mount_point.as_deref())?;
            }
        }

        Ok(LvmCreatorResult {
            devicegraph: self.devicegraph,
            vg_name,
            created_lvs,
            deleted_lvs,
        })
    }

    /// Put the encryption layer on a raw PV partition when requested
    fn encrypt_pv(&mut self, device: &str, planned_vg: &PlannedVg) -> Result<String> {
        let Some(password) = &planned_vg.pvs_encryption_password else {
            return Ok(device.to_string());
        };
        let plain_partition = self
            .devicegraph
            .find_partition(device)
            .is_some_and(|p| p.encryption.is_none());
        if !plain_partition {
            return Ok(device.to_string());
        }
        self.devicegraph
            .create_encryption(device, &encryption_name(device), password)
    }

    fn vg(&self, name: &str) -> Result<&VolumeGroup> {
        self.devicegraph
            .find_vg(name)
            .ok_or_else(|| PlannerError::VolumeGroupNotFound(name.to_string()))
    }

    /// Delete existing logical volumes as the policy allows
    fn make_space(&mut self, vg_name: &str, planned_vg: &PlannedVg) -> Result<Vec<String>> {
        let extent = self.vg(vg_name)?.extent_size;
        let needed: DiskSize = planned_vg
            .new_lvs()
            .map(|lv| lv.min_size.ceil(extent))
            .sum();
        let reused = planned_vg.reused_lv_names();
        let mut deleted = Vec::new();

        loop {
            let vg = self.vg(vg_name)?;
            let free = vg.free_size();
            let deficit = needed - free;
            let mut deletable: Vec<(String, DiskSize)> = vg
                .lvs
                .iter()
                .filter(|lv| !reused.contains(&lv.name.as_str()))
                .map(|lv| (lv.name.clone(), lv.size))
                .collect();

            let victim = match planned_vg.make_space_policy {
                MakeSpacePolicy::Keep => None,
                MakeSpacePolicy::Remove => deletable.first().map(|(name, _)| name.clone()),
                MakeSpacePolicy::Needed if deficit.is_zero() => None,
                MakeSpacePolicy::Needed => {
                    deletable.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
                    deletable
                        .iter()
                        .find(|(_, size)| *size >= deficit)
                        .or_else(|| {
                            deletable
                                .iter()
                                .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
                        })
                        .map(|(name, _)| name.clone())
                }
            };

            let Some(victim) = victim else {
                if !deficit.is_zero() {
                    return Err(PlannerError::VolumeGroupTooSmall {
                        vg: vg_name.to_string(),
                        missing: deficit.to_human_string(),
                    });
                }
                return Ok(deleted);
            };

            debug!("Deleting {}/{} to make space", vg_name, victim);
            self.devicegraph.delete_lv(vg_name, &victim)?;
            deleted.push(lv_path(vg_name, &victim));
        }
    }

    /// Final size of every planned logical volume, `None` for reused ones
    ///
    /// Percentage sized volumes are computed from the group size first, the
    /// rest shares what is left by weight in whole extents.
    fn lv_sizes(&self, vg_name: &str, planned_vg: &PlannedVg) -> Result<Vec<Option<DiskSize>>> {
        let vg = self.vg(vg_name)?;
        let extent = vg.extent_size;
        let free = vg.free_size();
        let too_small = |missing: DiskSize| PlannerError::VolumeGroupTooSmall {
            vg: vg_name.to_string(),
            missing: missing.to_human_string(),
        };

        let mut sizes: Vec<Option<DiskSize>> = vec![None; planned_vg.lvs.len()];
        let others_min: DiskSize = planned_vg
            .new_lvs()
            .filter(|lv| lv.percent_size.is_none())
            .map(|lv| lv.min_size.ceil(extent))
            .sum();

        let mut percent_total = DiskSize::zero();
        for (i, lv) in planned_vg.lvs.iter().enumerate() {
            let Some(percent) = lv.percent_size.filter(|_| lv.reuse.is_none()) else {
                continue;
            };
            let share = (vg.size() * u64::from(percent) / 100).floor(extent);
            let size = share.min(lv.max_size.floor(extent)).max(lv.min_size.ceil(extent));
            sizes[i] = Some(size);
            percent_total += size;
        }
        if percent_total + others_min > free {
            debug!("Percentage sized volumes fall back to their minimum");
            percent_total = DiskSize::zero();
            for (i, lv) in planned_vg.lvs.iter().enumerate() {
                if sizes[i].is_some() {
                    let size = lv.min_size.ceil(extent);
                    sizes[i] = Some(size);
                    percent_total += size;
                }
            }
        }
        if percent_total > free {
            return Err(too_small(percent_total - free));
        }

        let (indexes, rest): (Vec<usize>, Vec<PlannedLv>) = planned_vg
            .lvs
            .iter()
            .enumerate()
            .filter(|(_, lv)| lv.reuse.is_none() && lv.percent_size.is_none())
            .map(|(i, lv)| (i, lv.clone()))
            .unzip();
        let rest_sizes = distribute_space(&rest, free - percent_total, extent)
            .ok_or_else(|| too_small(others_min + percent_total - free))?;
        for (i, size) in indexes.into_iter().zip(rest_sizes) {
            sizes[i] = Some(size);
        }
        Ok(sizes)
    }

    fn create_lv(&mut self, vg_name: &str, planned: &PlannedLv, size: DiskSize) -> Result<String> {
        let name = {
            let vg = self.vg(vg_name)?;
            unique_name(&planned.logical_volume_name, |n| vg.lv(n).is_some())
        };
        let path = self.devicegraph.create_lv(vg_name, &name, size)?;
        if let Some(stripes) = planned.stripes {
            self.devicegraph
                .set_lv_stripes(vg_name, &name, stripes, planned.stripe_size)?;
        }
        info!("Created logical volume {} ({})", path, size);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::devicegraph::{Disk, FilesystemType, LogicalVolume, PartitionTableType, PartitionType};
    use crate::disk::region::Region;

    const MIB: u64 = 1024 * 1024;
    const GIB: u64 = 1024 * MIB;

    /// Disk with partitions of the given sizes (GiB), laid out back to back
    fn graph_with_partitions(sizes: &[u64]) -> (Devicegraph, Vec<String>) {
        let mut graph = Devicegraph::new();
        graph.add_disk(Disk::new("/dev/sda", DiskSize::gib(100), PartitionTableType::Gpt));
        let mut start = MIB;
        let mut names = Vec::new();
        for gib in sizes {
            let name = graph
                .create_partition("/dev/sda", Region::new(start, gib * GIB), PartitionType::Primary)
                .unwrap();
            start += gib * GIB;
            names.push(name);
        }
        (graph, names)
    }

    fn push_lv(graph: &mut Devicegraph, vg: &str, name: &str, size: DiskSize) {
        let vg = graph.volume_groups.iter_mut().find(|g| g.name == vg).unwrap();
        vg.lvs.push(LogicalVolume {
            name: name.to_string(),
            size,
            stripes: 1,
            stripe_size: None,
            filesystem: None,
        });
    }

    fn lv(name: &str, min: DiskSize, max: DiskSize, weight: u32) -> PlannedLv {
        PlannedLv::new(name, None, Some(FilesystemType::Ext4)).with_sizes(min, max, weight)
    }

    #[test]
    fn new_group_takes_a_free_name() {
        let (mut graph, pvs) = graph_with_partitions(&[5, 5]);
        graph.create_lvm_vg("system", DiskSize::mib(4)).unwrap();
        graph.add_pv("system", &pvs[0]).unwrap();

        let mut planned = PlannedVg::new("system");
        planned.lvs = vec![lv("root", DiskSize::gib(2), DiskSize::Unlimited, 1)];
        let result = LvmCreator::new(&graph)
            .create_volumes(&planned, &pvs[1..])
            .unwrap();
        assert_eq!(result.vg_name, "system0");
        let vg = result.devicegraph.find_vg("system0").unwrap();
        // 5 GiB PV: 1 MiB metadata, floored to 4 MiB extents
        assert_eq!(vg.size(), DiskSize::mib(5 * 1024 - 4));
        assert_eq!(vg.lv("root").unwrap().size, vg.size());
    }

    #[test]
    fn weights_and_maximums_apply_to_lvs() {
        let (graph, pvs) = graph_with_partitions(&[10]);
        let mut planned = PlannedVg::new("system");
        planned.lvs = vec![
            lv("swap", DiskSize::gib(1), DiskSize::gib(2), 1),
            lv("root", DiskSize::gib(3), DiskSize::Unlimited, 1),
        ];
        let result = LvmCreator::new(&graph).create_volumes(&planned, &pvs).unwrap();
        let vg = result.devicegraph.find_vg("system").unwrap();
        assert_eq!(vg.lv("swap").unwrap().size, DiskSize::gib(2));
        assert_eq!(vg.lv("root").unwrap().size, vg.size() - DiskSize::gib(2));
        assert_eq!(result.created_lvs.len(), 2);
        assert!(vg.free_size().is_zero());
    }

    #[test]
    fn lv_name_conflicts_get_a_suffix() {
        let (mut graph, pvs) = graph_with_partitions(&[10]);
        graph.create_lvm_vg("vg1", DiskSize::mib(4)).unwrap();
        graph.add_pv("vg1", &pvs[0]).unwrap();
        push_lv(&mut graph, "vg1", "root", DiskSize::gib(1));

        let mut planned = PlannedVg::new("vg1");
        planned.reuse = Some("vg1".to_string());
        planned.make_space_policy = MakeSpacePolicy::Keep;
        planned.lvs = vec![lv("root", DiskSize::gib(1), DiskSize::gib(1), 0)];
        let result = LvmCreator::new(&graph).create_volumes(&planned, &[]).unwrap();
        assert_eq!(result.created_lvs, vec!["/dev/vg1/root0".to_string()]);
        assert!(result.deleted_lvs.is_empty());
    }

    #[test]
    fn needed_policy_deletes_only_what_is_required() {
        let (mut graph, pvs) = graph_with_partitions(&[10]);
        graph.create_lvm_vg("vg1", DiskSize::mib(4)).unwrap();
        graph.add_pv("vg1", &pvs[0]).unwrap();
        push_lv(&mut graph, "vg1", "lv1", DiskSize::gib(3));
        push_lv(&mut graph, "vg1", "lv2", DiskSize::gib(5));

        let mut planned = PlannedVg::new("vg1");
        planned.reuse = Some("vg1".to_string());
        let mut keep = lv("lv1", DiskSize::zero(), DiskSize::Unlimited, 0);
        keep.reuse = Some("lv1".to_string());
        planned.lvs = vec![keep, lv("data", DiskSize::gib(4), DiskSize::gib(4), 0)];

        let result = LvmCreator::new(&graph).create_volumes(&planned, &[]).unwrap();
        assert_eq!(result.deleted_lvs, vec!["/dev/vg1/lv2".to_string()]);
        let vg = result.devicegraph.find_vg("vg1").unwrap();
        assert!(vg.lv("lv1").is_some());
        assert_eq!(vg.lv("data").unwrap().size, DiskSize::gib(4));
    }

    #[test]
    fn needed_policy_prefers_smallest_sufficient_lv() {
        let (mut graph, pvs) = graph_with_partitions(&[10]);
        graph.create_lvm_vg("vg1", DiskSize::mib(4)).unwrap();
        graph.add_pv("vg1", &pvs[0]).unwrap();
        push_lv(&mut graph, "vg1", "big", DiskSize::gib(6));
        push_lv(&mut graph, "vg1", "small", DiskSize::gib(3));

        let mut planned = PlannedVg::new("vg1");
        planned.reuse = Some("vg1".to_string());
        planned.lvs = vec![lv("data", DiskSize::gib(3), DiskSize::gib(3), 0)];
        let result = LvmCreator::new(&graph).create_volumes(&planned, &[]).unwrap();
        assert_eq!(result.deleted_lvs, vec!["/dev/vg1/small".to_string()]);
    }

    #[test]
    fn keep_policy_fails_when_space_is_short() {
        let (mut graph, pvs) = graph_with_partitions(&[10]);
        graph.create_lvm_vg("vg1", DiskSize::mib(4)).unwrap();
        graph.add_pv("vg1", &pvs[0]).unwrap();
        push_lv(&mut graph, "vg1", "lv1", DiskSize::gib(8));

        let mut planned = PlannedVg::new("vg1");
        planned.reuse = Some("vg1".to_string());
        planned.make_space_policy = MakeSpacePolicy::Keep;
        planned.lvs = vec![lv("data", DiskSize::gib(4), DiskSize::gib(4), 0)];
        let err = LvmCreator::new(&graph).create_volumes(&planned, &[]).unwrap_err();
        assert!(matches!(err, PlannerError::VolumeGroupTooSmall { .. }));
    }

    #[test]
    fn remove_policy_clears_unknown_lvs() {
        let (mut graph, pvs) = graph_with_partitions(&[10]);
        graph.create_lvm_vg("vg1", DiskSize::mib(4)).unwrap();
        graph.add_pv("vg1", &pvs[0]).unwrap();
        push_lv(&mut graph, "vg1", "a", DiskSize::gib(1));
        push_lv(&mut graph, "vg1", "b", DiskSize::gib(1));

        let mut planned = PlannedVg::new("vg1");
        planned.reuse = Some("vg1".to_string());
        planned.make_space_policy = MakeSpacePolicy::Remove;
        planned.lvs = vec![lv("data", DiskSize::gib(1), DiskSize::gib(1), 0)];
        let result = LvmCreator::new(&graph).create_volumes(&planned, &[]).unwrap();
        assert_eq!(result.deleted_lvs.len(), 2);
    }

    #[test]
    fn encrypted_pvs_use_mapped_device() {
        let (graph, pvs) = graph_with_partitions(&[4]);
        let mut planned = PlannedVg::new("system");
        planned.pvs_encryption_password = Some("secret".to_string());
        planned.lvs = vec![lv("root", DiskSize::gib(1), DiskSize::Unlimited, 1)];
        let result = LvmCreator::new(&graph).create_volumes(&planned, &pvs).unwrap();
        let vg = result.devicegraph.find_vg("system").unwrap();
        assert_eq!(vg.pvs[0].device, "/dev/mapper/cr_sda1");
    }

    #[test]
    fn percent_sized_lv() {
        let (graph, pvs) = graph_with_partitions(&[10]);
        let mut planned = PlannedVg::new("system");
        let mut half = lv("half", DiskSize::zero(), DiskSize::Unlimited, 0);
        half.percent_size = Some(50);
        planned.lvs = vec![half, lv("rest", DiskSize::gib(1), DiskSize::Unlimited, 1)];
        let result = LvmCreator::new(&graph).create_volumes(&planned, &pvs).unwrap();
        let vg = result.devicegraph.find_vg("system").unwrap();
        assert_eq!(vg.lv("half").unwrap().size, (vg.size() / 2).floor(DiskSize::mib(4)));
        assert!(vg.free_size().is_zero());
    }
}
