//! In-memory device graph
//!
//! Disks with their partition tables, encryption layers, filesystems and
//! LVM volume groups. A [`Devicegraph`] is a plain value: cloning it takes a
//! snapshot, and every mutating operation works in place on one copy.
//! Callers that hit an error halfway through a sequence of operations are
//! expected to drop the copy instead of trying to undo it.

use crate::disk::free_space::FreeDiskSpace;
use crate::disk::lvm::{is_valid_lvm_name, lv_path, useful_pv_space};
use crate::disk::region::{floor_align, Region, ALIGN_GRAIN, LOGICAL_OVERHEAD};
use crate::disk::size::DiskSize;
use crate::utils::error::{PlannerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// Bytes reserved at the end of a GPT disk for the backup header
const GPT_BACKUP_HEADER: u64 = 33 * 512;

/// Highest partition number the kernel handles on MBR disks
const MSDOS_MAX_PARTITIONS: u32 = 64;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PartitionTableType {
    #[default]
    Gpt,
    Msdos,
}

impl PartitionTableType {
    pub fn max_primary(&self) -> usize {
        match self {
            Self::Gpt => 128,
            Self::Msdos => 4,
        }
    }

    pub fn extended_possible(&self) -> bool {
        matches!(self, Self::Msdos)
    }

    pub fn max_logical(&self) -> usize {
        match self {
            Self::Gpt => 0,
            Self::Msdos => (MSDOS_MAX_PARTITIONS - 4) as usize,
        }
    }
}

impl fmt::Display for PartitionTableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpt => write!(f, "GPT"),
            Self::Msdos => write!(f, "MS-DOS"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PartitionType {
    #[default]
    Primary,
    Extended,
    Logical,
}

impl fmt::Display for PartitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Extended => write!(f, "extended"),
            Self::Logical => write!(f, "logical"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PartitionId {
    #[default]
    Linux,
    Swap,
    Lvm,
    Esp,
    BiosBoot,
    Extended,
    Windows,
    Unknown,
}

impl PartitionId {
    /// Partitions a Linux installer may treat as its own when making space
    pub fn is_linux_system(&self) -> bool {
        matches!(self, Self::Linux | Self::Swap | Self::Lvm)
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linux => write!(f, "Linux"),
            Self::Swap => write!(f, "Linux swap"),
            Self::Lvm => write!(f, "Linux LVM"),
            Self::Esp => write!(f, "EFI System"),
            Self::BiosBoot => write!(f, "BIOS boot"),
            Self::Extended => write!(f, "Extended"),
            Self::Windows => write!(f, "Windows data"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FilesystemType {
    Btrfs,
    Ext4,
    Xfs,
    Vfat,
    Swap,
    Ntfs,
}

impl FilesystemType {
    /// Partition id matching a partition formatted with this filesystem
    pub fn default_partition_id(&self) -> PartitionId {
        match self {
            Self::Swap => PartitionId::Swap,
            Self::Ntfs => PartitionId::Windows,
            _ => PartitionId::Linux,
        }
    }
}

impl fmt::Display for FilesystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Btrfs => write!(f, "btrfs"),
            Self::Ext4 => write!(f, "ext4"),
            Self::Xfs => write!(f, "xfs"),
            Self::Vfat => write!(f, "vfat"),
            Self::Swap => write!(f, "swap"),
            Self::Ntfs => write!(f, "ntfs"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Filesystem {
    pub fs_type: FilesystemType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,
}

/// Encryption layer on top of a partition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Encryption {
    /// Mapper name (e.g., "cr_sda2")
    pub name: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    /// Filesystem placed on the mapped device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<Filesystem>,
}

impl Encryption {
    pub fn mapped_path(&self) -> String {
        format!("/dev/mapper/{}", self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Partition {
    /// Device path (e.g., /dev/sda1)
    pub name: String,
    pub number: u32,
    pub region: Region,
    #[serde(default)]
    pub kind: PartitionType,
    #[serde(default)]
    pub id: PartitionId,
    /// MBR boot flag
    #[serde(default)]
    pub boot: bool,
    /// GPT LegacyBIOSBootable attribute
    #[serde(default)]
    pub legacy_boot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<Filesystem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<Encryption>,
}

impl Partition {
    pub fn size(&self) -> DiskSize {
        self.region.size()
    }

    pub fn is_extended(&self) -> bool {
        self.kind == PartitionType::Extended
    }

    pub fn is_logical(&self) -> bool {
        self.kind == PartitionType::Logical
    }

    pub fn is_swap(&self) -> bool {
        self.id == PartitionId::Swap
            || self
                .filesystem
                .as_ref()
                .is_some_and(|fs| fs.fs_type == FilesystemType::Swap)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Disk {
    /// Device path (e.g., /dev/sda)
    pub name: String,
    pub size: DiskSize,
    #[serde(default)]
    pub table: PartitionTableType,
    #[serde(default)]
    pub partitions: Vec<Partition>,
}

impl Disk {
    pub fn new(name: &str, size: DiskSize, table: PartitionTableType) -> Self {
        Self {
            name: name.to_string(),
            size,
            table,
            partitions: Vec::new(),
        }
    }

    /// Area partitions may occupy, aligned to the grain
    pub fn usable_region(&self) -> Region {
        let tail = match self.table {
            PartitionTableType::Gpt => GPT_BACKUP_HEADER,
            PartitionTableType::Msdos => 0,
        };
        let end = floor_align(self.size.bytes_or_max().saturating_sub(tail), ALIGN_GRAIN);
        Region::from_bounds(ALIGN_GRAIN, end)
    }

    pub fn extended(&self) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.is_extended())
    }

    /// Primary and extended partitions, ordered by offset
    fn top_level(&self) -> Vec<&Partition> {
        let mut parts: Vec<&Partition> =
            self.partitions.iter().filter(|p| !p.is_logical()).collect();
        parts.sort_by_key(|p| p.region.start);
        parts
    }

    fn logicals(&self) -> Vec<&Partition> {
        let mut parts: Vec<&Partition> =
            self.partitions.iter().filter(|p| p.is_logical()).collect();
        parts.sort_by_key(|p| p.region.start);
        parts
    }

    pub fn primary_slots(&self) -> usize {
        self.table
            .max_primary()
            .saturating_sub(self.top_level().len())
    }

    pub fn logical_slots(&self) -> usize {
        if !self.table.extended_possible() {
            return 0;
        }
        self.table.max_logical().saturating_sub(self.logicals().len())
    }

    fn next_number(&self, kind: PartitionType) -> Option<u32> {
        let used: Vec<u32> = self.partitions.iter().map(|p| p.number).collect();
        match (self.table, kind) {
            (PartitionTableType::Msdos, PartitionType::Logical) => {
                let next = used.iter().copied().filter(|n| *n > 4).max().unwrap_or(4) + 1;
                (next <= MSDOS_MAX_PARTITIONS).then_some(next)
            }
            (PartitionTableType::Msdos, _) => (1..=4).find(|n| !used.contains(n)),
            (PartitionTableType::Gpt, _) => {
                (1..=self.table.max_primary() as u32).find(|n| !used.contains(n))
            }
        }
    }

    /// Free regions of this disk, ordered by offset
    pub fn free_spaces(&self) -> Vec<FreeDiskSpace> {
        let mut raw = Vec::new();
        let usable = self.usable_region();

        let mut cursor = usable.start;
        for part in self.top_level() {
            raw.push((Region::from_bounds(cursor, part.region.start), false));
            cursor = cursor.max(part.region.end());
        }
        raw.push((Region::from_bounds(cursor, usable.end()), false));

        if let Some(ext) = self.extended() {
            let mut cursor = ext.region.start;
            for logical in self.logicals() {
                let ebr_start = logical.region.start.saturating_sub(LOGICAL_OVERHEAD);
                raw.push((Region::from_bounds(cursor, ebr_start), true));
                cursor = cursor.max(logical.region.end());
            }
            raw.push((Region::from_bounds(cursor, ext.region.end()), true));
        }

        let primary_slots = self.primary_slots();
        let logical_slots = self.logical_slots();
        let extended_exists = self.extended().is_some();

        let mut spaces: Vec<FreeDiskSpace> = raw
            .into_iter()
            .map(|(region, in_extended)| (region.aligned(ALIGN_GRAIN), in_extended))
            .filter(|(region, in_extended)| {
                let minimum = if *in_extended {
                    LOGICAL_OVERHEAD + ALIGN_GRAIN
                } else {
                    ALIGN_GRAIN
                };
                region.length >= minimum
            })
            .map(|(region, in_extended)| FreeDiskSpace {
                disk_name: self.name.clone(),
                region,
                in_extended,
                primary_slots,
                logical_slots,
                extended_exists,
                extended_possible: self.table.extended_possible(),
            })
            .collect();
        spaces.sort_by_key(|s| s.region.start);
        spaces
    }
}

/// A physical volume: a block device assigned to a volume group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhysicalVolume {
    pub device: String,
    /// Raw size of the device
    pub size: DiskSize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogicalVolume {
    pub name: String,
    pub size: DiskSize,
    #[serde(default = "default_stripes")]
    pub stripes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stripe_size: Option<DiskSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<Filesystem>,
}

fn default_stripes() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeGroup {
    pub name: String,
    pub extent_size: DiskSize,
    #[serde(default)]
    pub pvs: Vec<PhysicalVolume>,
    #[serde(default)]
    pub lvs: Vec<LogicalVolume>,
}

impl VolumeGroup {
    /// Total capacity: the useful space of all physical volumes
    pub fn size(&self) -> DiskSize {
        self.pvs
            .iter()
            .map(|pv| useful_pv_space(pv.size, self.extent_size))
            .sum()
    }

    /// Space allocated to logical volumes
    pub fn used_size(&self) -> DiskSize {
        self.lvs.iter().map(|lv| lv.size.ceil(self.extent_size)).sum()
    }

    /// Space not allocated to any logical volume
    pub fn free_size(&self) -> DiskSize {
        self.size() - self.used_size()
    }

    pub fn lv(&self, name: &str) -> Option<&LogicalVolume> {
        self.lvs.iter().find(|lv| lv.name == name)
    }

    pub fn device_path(&self) -> String {
        format!("/dev/{}", self.name)
    }
}

/// Name of the encryption layer put on top of `device` (e.g. "cr_sda1")
pub fn encryption_name(device: &str) -> String {
    let base = Path::new(device)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| device.to_string());
    format!("cr_{}", base)
}

/// Get the partition naming prefix for a device
/// e.g., /dev/sda -> /dev/sda, /dev/nvme0n1 -> /dev/nvme0n1p
pub fn partition_prefix(device: &str) -> String {
    if device.contains("nvme") || device.contains("mmcblk") || device.contains("loop") {
        format!("{}p", device)
    } else {
        device.to_string()
    }
}

/// Get partition path for a device and partition number
pub fn partition_path(device: &str, partition_num: u32) -> String {
    format!("{}{}", partition_prefix(device), partition_num)
}

/// Disks, partitions and volume groups of a system
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Devicegraph {
    #[serde(default)]
    pub disks: Vec<Disk>,
    #[serde(default)]
    pub volume_groups: Vec<VolumeGroup>,
}

impl Devicegraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a device graph from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let graph: Devicegraph = toml::from_str(&content)?;
        graph.validate()?;
        Ok(graph)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check partitions fit their disks and do not overlap
    pub fn validate(&self) -> Result<()> {
        for disk in &self.disks {
            let bounds = Region::from_bounds(0, disk.size.bytes_or_max());
            for part in &disk.partitions {
                if !bounds.contains(&part.region) {
                    return Err(PlannerError::InvalidRegion(format!(
                        "{} {} exceeds disk {}",
                        part.name, part.region, disk.name
                    )));
                }
            }
            let top = disk.top_level();
            for pair in top.windows(2) {
                if pair[0].region.overlaps(&pair[1].region) {
                    return Err(PlannerError::InvalidRegion(format!(
                        "{} overlaps {}",
                        pair[0].name, pair[1].name
                    )));
                }
            }
            if disk.partitions.iter().filter(|p| p.is_extended()).count() > 1 {
                return Err(PlannerError::InvalidRegion(format!(
                    "{} has more than one extended partition",
                    disk.name
                )));
            }
        }
        Ok(())
    }

    pub fn add_disk(&mut self, disk: Disk) {
        self.disks.push(disk);
    }

    pub fn disk(&self, name: &str) -> Option<&Disk> {
        self.disks.iter().find(|d| d.name == name)
    }

    fn disk_mut(&mut self, name: &str) -> Result<&mut Disk> {
        self.disks
            .iter_mut()
            .find(|d| d.name == name)
            .ok_or_else(|| PlannerError::DiskNotFound(name.to_string()))
    }

    pub fn partitions(&self) -> impl Iterator<Item = &Partition> {
        self.disks.iter().flat_map(|d| d.partitions.iter())
    }

    pub fn find_partition(&self, name: &str) -> Option<&Partition> {
        self.partitions().find(|p| p.name == name)
    }

    fn partition_mut(&mut self, name: &str) -> Result<&mut Partition> {
        self.disks
            .iter_mut()
            .flat_map(|d| d.partitions.iter_mut())
            .find(|p| p.name == name)
            .ok_or_else(|| PlannerError::DeviceNotFound(name.to_string()))
    }

    /// Disk holding the partition `name`
    pub fn disk_of(&self, name: &str) -> Option<&Disk> {
        self.disks
            .iter()
            .find(|d| d.partitions.iter().any(|p| p.name == name))
    }

    /// Disk holding `device`, a partition or the encryption layer of one
    pub fn disk_of_device(&self, device: &str) -> Option<&Disk> {
        self.disk_of(device).or_else(|| {
            self.partition_by_mapped_path(device)
                .and_then(|p| self.disk_of(&p.name))
        })
    }

    /// Partition whose encryption layer is mapped at `path`
    fn partition_by_mapped_path(&self, path: &str) -> Option<&Partition> {
        self.partitions().find(|p| {
            p.encryption
                .as_ref()
                .is_some_and(|enc| enc.mapped_path() == path)
        })
    }

    pub fn find_vg(&self, name: &str) -> Option<&VolumeGroup> {
        self.volume_groups.iter().find(|vg| vg.name == name)
    }

    fn vg_mut(&mut self, name: &str) -> Result<&mut VolumeGroup> {
        self.volume_groups
            .iter_mut()
            .find(|vg| vg.name == name)
            .ok_or_else(|| PlannerError::VolumeGroupNotFound(name.to_string()))
    }

    /// Volume group using `device` as a physical volume, if any
    pub fn vg_of_pv(&self, device: &str) -> Option<&VolumeGroup> {
        self.volume_groups
            .iter()
            .find(|vg| vg.pvs.iter().any(|pv| pv.device == device))
    }

    /// Size of a partition, encrypted device or logical volume
    pub fn device_size(&self, device: &str) -> Result<DiskSize> {
        if let Some(part) = self.find_partition(device) {
            return Ok(part.size());
        }
        if let Some(part) = self.partition_by_mapped_path(device) {
            return Ok(part.size());
        }
        self.volume_groups
            .iter()
            .flat_map(|vg| vg.lvs.iter().map(move |lv| (vg, lv)))
            .find(|(vg, lv)| lv_path(&vg.name, &lv.name) == device)
            .map(|(_, lv)| lv.size)
            .ok_or_else(|| PlannerError::DeviceNotFound(device.to_string()))
    }

    /// Free regions of every disk, ordered by disk name then offset
    pub fn free_disk_spaces(&self) -> Vec<FreeDiskSpace> {
        let mut spaces: Vec<FreeDiskSpace> =
            self.disks.iter().flat_map(|d| d.free_spaces()).collect();
        spaces.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        spaces
    }

    /// Free regions restricted to the given disks
    pub fn free_disk_spaces_on(&self, disks: &[String]) -> Vec<FreeDiskSpace> {
        self.free_disk_spaces()
            .into_iter()
            .filter(|s| disks.iter().any(|d| *d == s.disk_name))
            .collect()
    }

    /// Create a partition, returning its device path
    pub fn create_partition(
        &mut self,
        disk_name: &str,
        region: Region,
        kind: PartitionType,
    ) -> Result<String> {
        let disk = self.disk_mut(disk_name)?;

        if region.is_empty() || !disk.usable_region().contains(&region) {
            return Err(PlannerError::InvalidRegion(format!(
                "{} is outside the usable area of {}",
                region, disk_name
            )));
        }

        match kind {
            PartitionType::Logical => {
                let ext = disk.extended().ok_or_else(|| {
                    PlannerError::InvalidRegion(format!(
                        "{} has no extended partition for a logical one",
                        disk_name
                    ))
                })?;
                let with_ebr = Region::from_bounds(
                    region.start.saturating_sub(LOGICAL_OVERHEAD),
                    region.end(),
                );
                if !ext.region.contains(&with_ebr) {
                    return Err(PlannerError::InvalidRegion(format!(
                        "{} does not fit in extended partition {}",
                        region, ext.name
                    )));
                }
                if disk.logicals().iter().any(|p| p.region.overlaps(&with_ebr)) {
                    return Err(PlannerError::InvalidRegion(format!(
                        "{} overlaps a logical partition on {}",
                        region, disk_name
                    )));
                }
            }
            PartitionType::Primary | PartitionType::Extended => {
                if kind == PartitionType::Extended {
                    if !disk.table.extended_possible() {
                        return Err(PlannerError::NoPartitionSlot(format!(
                            "{} table on {} does not support extended partitions",
                            disk.table, disk_name
                        )));
                    }
                    if disk.extended().is_some() {
                        return Err(PlannerError::NoPartitionSlot(format!(
                            "{} already has an extended partition",
                            disk_name
                        )));
                    }
                }
                if disk.top_level().iter().any(|p| p.region.overlaps(&region)) {
                    return Err(PlannerError::InvalidRegion(format!(
                        "{} overlaps an existing partition on {}",
                        region, disk_name
                    )));
                }
                if disk.primary_slots() == 0 {
                    return Err(PlannerError::NoPartitionSlot(format!(
                        "no primary slot left on {}",
                        disk_name
                    )));
                }
            }
        }

        let number = disk
            .next_number(kind)
            .ok_or_else(|| PlannerError::NoPartitionSlot(format!("{} is full", disk_name)))?;
        let name = partition_path(disk_name, number);
        let id = if kind == PartitionType::Extended {
            PartitionId::Extended
        } else {
            PartitionId::Linux
        };

        debug!("Creating {} partition {} at {}", kind, name, region);
        disk.partitions.push(Partition {
            name: name.clone(),
            number,
            region,
            kind,
            id,
            boot: false,
            legacy_boot: false,
            filesystem: None,
            encryption: None,
        });
        Ok(name)
    }

    /// Create the extended partition of an MBR disk
    pub fn create_extended_partition(&mut self, disk_name: &str, region: Region) -> Result<String> {
        self.create_partition(disk_name, region, PartitionType::Extended)
    }

    /// Delete a partition, returning the names of everything removed
    ///
    /// Deleting an extended partition removes its logical partitions.
    /// Deleting the last logical partition removes the then empty extended
    /// partition. Volume groups using a removed partition as physical volume
    /// are removed as well.
    pub fn delete_partition(&mut self, name: &str) -> Result<Vec<String>> {
        let disk_name = self
            .disk_of(name)
            .map(|d| d.name.clone())
            .ok_or_else(|| PlannerError::DeviceNotFound(name.to_string()))?;
        let disk = self.disk_mut(&disk_name)?;

        let mut removed = Vec::new();
        let (is_extended, was_logical) = disk
            .partitions
            .iter()
            .find(|p| p.name == name)
            .map_or((false, false), |p| (p.is_extended(), p.is_logical()));

        disk.partitions.retain(|p| {
            let gone = p.name == name || (is_extended && p.is_logical());
            if gone {
                removed.push(p.name.clone());
            }
            !gone
        });

        if was_logical && disk.logicals().is_empty() {
            if let Some(ext) = disk.extended().map(|e| e.name.clone()) {
                disk.partitions.retain(|p| p.name != ext);
                removed.push(ext);
            }
        }

        let mut devices = removed.clone();
        for part_name in &removed {
            devices.push(format!("/dev/mapper/{}", encryption_name(part_name)));
        }
        let before = self.volume_groups.len();
        self.volume_groups
            .retain(|vg| !vg.pvs.iter().any(|pv| devices.contains(&pv.device)));
        if self.volume_groups.len() != before {
            info!("Volume groups backed by {} were removed", name);
        }

        debug!("Deleted partitions: {}", removed.join(", "));
        Ok(removed)
    }

    pub fn set_partition_id(&mut self, name: &str, id: PartitionId) -> Result<()> {
        self.partition_mut(name)?.id = id;
        Ok(())
    }

    pub fn set_boot_flags(&mut self, name: &str, boot: bool, legacy_boot: bool) -> Result<()> {
        let part = self.partition_mut(name)?;
        part.boot = boot;
        part.legacy_boot = legacy_boot;
        Ok(())
    }

    /// Put an encryption layer on a partition, returning the mapped path
    pub fn create_encryption(&mut self, device: &str, name: &str, password: &str) -> Result<String> {
        let part = self.partition_mut(device)?;
        let encryption = Encryption {
            name: name.to_string(),
            password: password.to_string(),
            filesystem: None,
        };
        let mapped = encryption.mapped_path();
        part.encryption = Some(encryption);
        Ok(mapped)
    }

    /// Format a partition, encrypted device or logical volume
    pub fn create_filesystem(
        &mut self,
        device: &str,
        fs_type: FilesystemType,
        mount_point: Option<&str>,
    ) -> Result<()> {
        let filesystem = Some(Filesystem {
            fs_type,
            mount_point: mount_point.map(str::to_string),
        });

        if let Ok(part) = self.partition_mut(device) {
            part.filesystem = filesystem;
            return Ok(());
        }

        for part in self.disks.iter_mut().flat_map(|d| d.partitions.iter_mut()) {
            if let Some(enc) = part.encryption.as_mut() {
                if enc.mapped_path() == device {
                    enc.filesystem = filesystem;
                    return Ok(());
                }
            }
        }

        for vg in self.volume_groups.iter_mut() {
            let vg_name = vg.name.clone();
            if let Some(lv) = vg
                .lvs
                .iter_mut()
                .find(|lv| lv_path(&vg_name, &lv.name) == device)
            {
                lv.filesystem = filesystem;
                return Ok(());
            }
        }

        Err(PlannerError::DeviceNotFound(device.to_string()))
    }

    /// Create an empty volume group
    pub fn create_lvm_vg(&mut self, name: &str, extent_size: DiskSize) -> Result<String> {
        if !is_valid_lvm_name(name) {
            return Err(PlannerError::InvalidName(name.to_string()));
        }
        if self.find_vg(name).is_some() {
            return Err(PlannerError::InvalidName(format!(
                "volume group {} already exists",
                name
            )));
        }
        info!("Creating volume group '{}'", name);
        self.volume_groups.push(VolumeGroup {
            name: name.to_string(),
            extent_size,
            pvs: Vec::new(),
            lvs: Vec::new(),
        });
        Ok(format!("/dev/{}", name))
    }

    /// Add a partition or encrypted device to a volume group
    pub fn add_pv(&mut self, vg_name: &str, device: &str) -> Result<()> {
        let size = self.device_size(device)?;
        if let Some(other) = self.vg_of_pv(device) {
            return Err(PlannerError::ValidationError(format!(
                "{} is already a physical volume of {}",
                device, other.name
            )));
        }
        if let Some(part) = self.partition_by_mapped_path(device).map(|p| p.name.clone()) {
            self.set_partition_id(&part, PartitionId::Lvm)?;
        } else if self.find_partition(device).is_some() {
            self.set_partition_id(device, PartitionId::Lvm)?;
        }
        debug!("Adding {} to volume group {}", device, vg_name);
        let vg = self.vg_mut(vg_name)?;
        vg.pvs.push(PhysicalVolume {
            device: device.to_string(),
            size,
        });
        Ok(())
    }

    /// Create a logical volume, returning its device path
    ///
    /// The size is rounded up to the extent size of the group.
    pub fn create_lv(&mut self, vg_name: &str, lv_name: &str, size: DiskSize) -> Result<String> {
        if !is_valid_lvm_name(lv_name) {
            return Err(PlannerError::InvalidName(lv_name.to_string()));
        }
        let vg = self.vg_mut(vg_name)?;
        if vg.lv(lv_name).is_some() {
            return Err(PlannerError::InvalidName(format!(
                "logical volume {}/{} already exists",
                vg_name, lv_name
            )));
        }
        let size = size.ceil(vg.extent_size);
        if size.is_unlimited() || size > vg.free_size() {
            return Err(PlannerError::VolumeGroupTooSmall {
                vg: vg_name.to_string(),
                missing: (size - vg.free_size()).to_human_string(),
            });
        }
        debug!("Creating logical volume {}/{} ({})", vg_name, lv_name, size);
        vg.lvs.push(LogicalVolume {
            name: lv_name.to_string(),
            size,
            stripes: 1,
            stripe_size: None,
            filesystem: None,
        });
        Ok(lv_path(vg_name, lv_name))
    }

    pub fn set_lv_stripes(
        &mut self,
        vg_name: &str,
        lv_name: &str,
        stripes: u32,
        stripe_size: Option<DiskSize>,
    ) -> Result<()> {
        let vg = self.vg_mut(vg_name)?;
        let lv = vg
            .lvs
            .iter_mut()
            .find(|lv| lv.name == lv_name)
            .ok_or_else(|| PlannerError::DeviceNotFound(lv_path(vg_name, lv_name)))?;
        lv.stripes = stripes.max(1);
        lv.stripe_size = stripe_size;
        Ok(())
    }

    pub fn delete_lv(&mut self, vg_name: &str, lv_name: &str) -> Result<()> {
        let vg = self.vg_mut(vg_name)?;
        let before = vg.lvs.len();
        vg.lvs.retain(|lv| lv.name != lv_name);
        if vg.lvs.len() == before {
            return Err(PlannerError::DeviceNotFound(lv_path(vg_name, lv_name)));
        }
        info!("Deleted logical volume {}/{}", vg_name, lv_name);
        Ok(())
    }
}
