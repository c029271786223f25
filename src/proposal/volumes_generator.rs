//! Expand proposal settings into the list of planned volumes
//!
//! Root, home and swap come from the settings (as partitions, or as logical
//! volumes when LVM is enabled). Boot partitions are added according to the
//! boot mode and the partition table of the root disk.

use crate::config::settings::{BootMode, ProposalSettings};
use crate::disk::devicegraph::{
    Devicegraph, FilesystemType, Partition, PartitionId, PartitionTableType,
};
use crate::disk::size::DiskSize;
use crate::proposal::planned::{PlannedLv, PlannedPartition, PlannedVolume};
use crate::utils::error::{PlannerError, Result};
use tracing::{debug, info};

pub const ESP_MIN_SIZE: DiskSize = DiskSize::mib(256);
pub const ESP_MAX_SIZE: DiskSize = DiskSize::mib(512);
pub const BIOS_BOOT_MIN_SIZE: DiskSize = DiskSize::mib(1);
pub const BIOS_BOOT_MAX_SIZE: DiskSize = DiskSize::mib(8);

pub struct VolumesGenerator<'a> {
    settings: &'a ProposalSettings,
    devicegraph: &'a Devicegraph,
}

impl<'a> VolumesGenerator<'a> {
    pub fn new(settings: &'a ProposalSettings, devicegraph: &'a Devicegraph) -> Self {
        Self {
            settings,
            devicegraph,
        }
    }

    /// All planned volumes: boot partitions first, then root, swap and home
    pub fn volumes(&self) -> Result<Vec<PlannedVolume>> {
        let root_disk = self
            .settings
            .root_disk()
            .ok_or_else(|| PlannerError::ConfigError("no root disk".to_string()))?;
        let table = self
            .devicegraph
            .disk(root_disk)
            .map(|d| d.table)
            .ok_or_else(|| PlannerError::DiskNotFound(root_disk.to_string()))?;

        let mut volumes = self.boot_requirements(root_disk, table);
        volumes.push(self.root_volume(root_disk, table));
        if let Some(swap) = self.swap_volume() {
            volumes.push(swap);
        }
        if self.settings.use_separate_home {
            volumes.push(self.home_volume());
        }

        info!("Planned {} volumes", volumes.len());
        for volume in &volumes {
            debug!("Planned volume: {:?}", volume);
        }
        Ok(volumes)
    }

    /// Partitions the boot mode needs on the root disk
    pub fn boot_requirements(&self, root_disk: &str, table: PartitionTableType) -> Vec<PlannedVolume> {
        match (self.settings.boot_mode, table) {
            (BootMode::Uefi, _) => {
                let mut esp = PlannedPartition::new(Some("/boot/efi"), Some(FilesystemType::Vfat))
                    .with_sizes(ESP_MIN_SIZE, ESP_MAX_SIZE, 0)
                    .on_disk(root_disk);
                esp.partition_id = Some(PartitionId::Esp);
                if let Some(existing) = self.existing_esp(root_disk) {
                    info!("Reusing EFI system partition {}", existing.name);
                    esp.reuse = Some(existing.name.clone());
                    esp.min_size = existing.size();
                    esp.max_size = existing.size();
                }
                vec![PlannedVolume::Partition(esp)]
            }
            (BootMode::Legacy, PartitionTableType::Gpt) => {
                let mut bios_boot = PlannedPartition::new(None, None)
                    .with_sizes(BIOS_BOOT_MIN_SIZE, BIOS_BOOT_MAX_SIZE, 0)
                    .on_disk(root_disk);
                bios_boot.partition_id = Some(PartitionId::BiosBoot);
                bios_boot.bootable = true;
                vec![PlannedVolume::Partition(bios_boot)]
            }
            (BootMode::Legacy, PartitionTableType::Msdos) => Vec::new(),
        }
    }

    fn existing_esp(&self, root_disk: &str) -> Option<&Partition> {
        self.devicegraph
            .disk(root_disk)?
            .partitions
            .iter()
            .find(|p| p.id == PartitionId::Esp && p.size() >= ESP_MIN_SIZE)
    }

    /// Root size range, enlarged for Btrfs snapshots
    pub fn root_sizes(&self) -> (DiskSize, DiskSize) {
        let settings = self.settings;
        let mut min = settings.root_base_size;
        let mut max = if settings.use_separate_home {
            settings.root_max_size
        } else {
            DiskSize::Unlimited
        };
        if settings.root_filesystem == FilesystemType::Btrfs && settings.btrfs_snapshots {
            let factor = 100 + u64::from(settings.btrfs_increase_percentage);
            min = min * factor / 100;
            max = max * factor / 100;
        }
        (min, max)
    }

    fn root_volume(&self, root_disk: &str, table: PartitionTableType) -> PlannedVolume {
        let settings = self.settings;
        let (min, max) = self.root_sizes();
        if settings.lvm.enabled {
            let lv = PlannedLv::new("root", Some("/"), Some(settings.root_filesystem))
                .with_sizes(min, max, settings.root_weight);
            return PlannedVolume::LogicalVolume(lv);
        }
        let mut root = PlannedPartition::new(Some("/"), Some(settings.root_filesystem))
            .with_sizes(min, max, settings.root_weight)
            .on_disk(root_disk);
        root.encryption_password = settings.encryption_password.clone();
        root.bootable = settings.boot_mode == BootMode::Legacy && table == PartitionTableType::Msdos;
        PlannedVolume::Partition(root)
    }

    fn home_volume(&self) -> PlannedVolume {
        let settings = self.settings;
        if settings.lvm.enabled {
            let lv = PlannedLv::new("home", Some("/home"), Some(settings.home_filesystem))
                .with_sizes(settings.home_min_size, settings.home_max_size, settings.home_weight);
            return PlannedVolume::LogicalVolume(lv);
        }
        let mut home = PlannedPartition::new(Some("/home"), Some(settings.home_filesystem))
            .with_sizes(settings.home_min_size, settings.home_max_size, settings.home_weight);
        home.encryption_password = settings.encryption_password.clone();
        PlannedVolume::Partition(home)
    }

    /// Swap size range, at least the RAM size when suspend is wanted
    pub fn swap_sizes(&self) -> (DiskSize, DiskSize) {
        let swap = &self.settings.swap;
        if !swap.enlarge_for_suspend {
            return (swap.min_size, swap.max_size);
        }
        let ram = swap.effective_ram_size();
        (swap.min_size.max(ram), swap.max_size.max(ram))
    }

    fn swap_volume(&self) -> Option<PlannedVolume> {
        let settings = self.settings;
        if !settings.swap.enabled {
            return None;
        }
        let (min, max) = self.swap_sizes();

        if settings.swap.reuse_existing {
            if let Some(existing) = self.existing_swap(min) {
                info!("Reusing swap partition {}", existing.name);
                let mut swap = PlannedPartition::new(Some("swap"), Some(FilesystemType::Swap))
                    .with_sizes(existing.size(), existing.size(), 0);
                swap.reuse = Some(existing.name.clone());
                return Some(PlannedVolume::Partition(swap));
            }
        }

        if settings.lvm.enabled {
            let lv = PlannedLv::new("swap", Some("swap"), Some(FilesystemType::Swap))
                .with_sizes(min, max, settings.swap.weight);
            return Some(PlannedVolume::LogicalVolume(lv));
        }
        let mut swap = PlannedPartition::new(Some("swap"), Some(FilesystemType::Swap))
            .with_sizes(min, max, settings.swap.weight);
        swap.encryption_password = settings.encryption_password.clone();
        Some(PlannedVolume::Partition(swap))
    }

    /// Biggest unencrypted swap partition of the candidate disks that is big
    /// enough
    fn existing_swap(&self, min: DiskSize) -> Option<&Partition> {
        self.settings
            .candidate_disks
            .iter()
            .filter_map(|name| self.devicegraph.disk(name))
            .flat_map(|disk| disk.partitions.iter())
            .filter(|p| p.is_swap() && p.encryption.is_none() && p.size() >= min)
            .max_by_key(|p| p.size())
    }
}
